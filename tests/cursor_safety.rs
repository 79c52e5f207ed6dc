use proptest::prelude::*;
use std::sync::Arc;
use tablekit::{EntitySchema, MemoryStore, Repository, Value, item};

fn notes() -> Arc<EntitySchema> {
    Arc::new(
        EntitySchema::builder("Note")
            .table("notes")
            .id("id")
            .range_key("title")
            .build()
            .expect("schema"),
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn every_returned_cursor_is_url_safe(titles in prop::collection::btree_set(any::<String>(), 1..6)) {
        let rt = runtime();
        let (cursors, seen) = rt.block_on(async {
            let repo = Repository::new(Arc::new(MemoryStore::new()));
            let schema = notes();
            for (n, title) in titles.iter().enumerate() {
                repo.insert(
                    &schema,
                    item([
                        ("id", Value::from(format!("n{n}"))),
                        ("title", Value::from(title.as_str())),
                    ]),
                )
                .execute()
                .await
                .expect("insert");
            }
            let mut cursors = Vec::new();
            let mut seen = 0;
            let mut next: Option<String> = None;
            loop {
                let mut read = repo.list(&[]).from(&schema).limit(1);
                if let Some(cursor) = next.take() {
                    read = read.resume(cursor);
                }
                let page = read.execute().await.expect("page");
                seen += page.items.len();
                cursors.extend(page.first_evaluated_key.clone());
                cursors.extend(page.last_evaluated_key.clone());
                match page.last_evaluated_key {
                    Some(cursor) => next = Some(cursor),
                    None => break,
                }
            }
            (cursors, seen)
        });
        prop_assert_eq!(seen, titles.len());
        for cursor in cursors {
            prop_assert!(!cursor.contains('+'), "cursor {}", cursor);
            prop_assert!(!cursor.contains('/'), "cursor {}", cursor);
        }
    }
}
