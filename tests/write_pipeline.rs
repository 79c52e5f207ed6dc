use std::sync::Arc;
use tablekit::{
    AccessErrorCode, EntitySchema, Item, KeyDecl, MemoryStore, Repository, ReturnMode, Value, col,
    item, lit,
};

fn users() -> Arc<EntitySchema> {
    Arc::new(
        EntitySchema::builder("User")
            .table("users")
            .id("id")
            .hash_key("team")
            .range_key("name")
            .version("version")
            .build()
            .expect("schema"),
    )
}

fn user(id: &str, team: &str, name: &str) -> Item {
    item([
        ("id", Value::from(id)),
        ("team", Value::from(team)),
        ("name", Value::from(name)),
    ])
}

fn setup() -> (Arc<MemoryStore>, Repository, Arc<EntitySchema>) {
    let store = Arc::new(MemoryStore::new());
    let repo = Repository::new(store.clone());
    (store, repo, users())
}

async fn names_in_team(repo: &Repository, schema: &Arc<EntitySchema>, team: &str) -> Vec<Value> {
    repo.list(&["name"])
        .from(schema)
        .by(team)
        .execute()
        .await
        .expect("list team")
        .items
        .into_iter()
        .map(|it| it["name"].clone())
        .collect()
}

#[tokio::test]
async fn inserted_entity_reads_back_with_initial_version() {
    let (_, repo, schema) = setup();
    let mut fields = user("u1", "red", "ann");
    fields.insert("age".into(), Value::Integer(31));
    fields.insert("tags".into(), Value::List(vec!["a".into(), "b".into()]));
    fields.insert("nickname".into(), Value::Null);
    repo.insert(&schema, fields.clone())
        .execute()
        .await
        .expect("insert");

    let stored = repo
        .get(&schema, "u1")
        .execute()
        .await
        .expect("get")
        .expect("present");
    let mut expected = fields;
    expected.remove("nickname");
    expected.insert("version".into(), Value::Integer(1));
    assert_eq!(stored, expected);

    let missing = repo.get(&schema, "nope").execute().await.expect("get");
    assert!(missing.is_none());
}

#[tokio::test]
async fn inserting_an_existing_identity_is_duplicate_key() {
    let (store, repo, schema) = setup();
    repo.insert(&schema, user("u1", "red", "ann"))
        .execute()
        .await
        .expect("insert");
    let before = store.records("users");
    let err = repo
        .insert(&schema, user("u1", "blue", "zed"))
        .execute()
        .await
        .expect_err("duplicate");
    assert_eq!(err.code(), AccessErrorCode::DuplicateKey);
    assert_eq!(store.records("users"), before);
}

#[tokio::test]
async fn key_collision_with_another_entity_leaves_both_untouched() {
    let (store, repo, schema) = setup();
    repo.insert(&schema, user("a", "red", "ann"))
        .execute()
        .await
        .expect("insert a");
    repo.insert(&schema, user("b", "red", "bob"))
        .execute()
        .await
        .expect("insert b");
    let before = store.records("users");

    let err = repo
        .update(&schema, item([("id", "a"), ("name", "bob")]))
        .execute()
        .await
        .expect_err("collides with b");
    assert_eq!(err.code_str(), "duplicate_key");
    assert!(!err.failures().is_empty());
    assert_eq!(store.records("users"), before);
    assert_eq!(
        names_in_team(&repo, &schema, "red").await,
        vec![Value::from("ann"), Value::from("bob")]
    );
}

#[tokio::test]
async fn update_moves_secondary_records_and_keeps_omitted_fields() {
    let (_, repo, schema) = setup();
    let mut fields = user("u1", "red", "ann");
    fields.insert("email".into(), Value::from("ann@example.com"));
    fields.insert("nickname".into(), Value::from("annie"));
    repo.insert(&schema, fields).execute().await.expect("insert");

    let new = repo
        .update(
            &schema,
            item([
                ("id", Value::from("u1")),
                ("team", Value::from("blue")),
                ("nickname", Value::Null),
            ]),
        )
        .returning(ReturnMode::AllNew)
        .execute()
        .await
        .expect("update")
        .expect("all new");
    assert_eq!(new["version"], Value::Integer(2));
    assert_eq!(new["email"], Value::from("ann@example.com"));
    assert!(!new.contains_key("nickname"));

    assert!(names_in_team(&repo, &schema, "red").await.is_empty());
    assert_eq!(
        names_in_team(&repo, &schema, "blue").await,
        vec![Value::from("ann")]
    );
    let listed = repo.list(&[]).from(&schema).execute().await.expect("all");
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0], new);
}

#[tokio::test]
async fn stale_version_is_rejected_and_unchecked_update_overwrites() {
    let (_, repo, schema) = setup();
    repo.insert(&schema, user("u1", "red", "ann"))
        .execute()
        .await
        .expect("insert");

    let first = repo.get(&schema, "u1").execute().await.expect("read").expect("present");
    let second = first.clone();
    assert_eq!(first["version"], Value::Integer(1));

    let mut edit = first;
    edit.insert("name".into(), Value::from("anna"));
    let updated = repo
        .update(&schema, edit)
        .with_version_check()
        .returning(ReturnMode::AllNew)
        .execute()
        .await
        .expect("first writer")
        .expect("all new");
    assert_eq!(updated["version"], Value::Integer(2));

    let mut stale = second;
    stale.insert("name".into(), Value::from("annabel"));
    let err = repo
        .update(&schema, stale.clone())
        .with_version_check()
        .execute()
        .await
        .expect_err("stale version");
    assert_eq!(err.code(), AccessErrorCode::VersionMismatch);
    assert!(matches!(
        err,
        tablekit::AccessError::Version {
            expected: 1,
            actual: Some(2),
            ..
        }
    ));

    repo.update(&schema, stale)
        .execute()
        .await
        .expect("unchecked update");
    let stored = repo.get(&schema, "u1").execute().await.expect("read").expect("present");
    assert_eq!(stored["version"], Value::Integer(3));
    assert_eq!(stored["name"], Value::from("annabel"));
}

#[tokio::test]
async fn caller_condition_failure_is_conditional_check() {
    let (store, repo, schema) = setup();
    let mut fields = user("u1", "red", "ann");
    fields.insert("state".into(), Value::from("closed"));
    repo.insert(&schema, fields).execute().await.expect("insert");
    let before = store.records("users");

    let err = repo
        .update(&schema, item([("id", "u1"), ("name", "bo")]))
        .where_(col("state").eq(lit("open")))
        .execute()
        .await
        .expect_err("condition");
    assert_eq!(err.code_str(), "conditional_check_failed");
    assert_eq!(store.records("users"), before);

    repo.update(&schema, item([("id", "u1"), ("name", "bo")]))
        .where_(col("state").eq(lit("closed")))
        .execute()
        .await
        .expect("condition holds");
}

#[tokio::test]
async fn patch_applies_field_expressions() {
    let (_, repo, schema) = setup();
    let mut fields = user("u1", "red", "ann");
    fields.insert("logins".into(), Value::Integer(4));
    fields.insert("roles".into(), Value::List(vec!["dev".into(), "ops".into()]));
    fields.insert("bio".into(), Value::from("hi"));
    repo.insert(&schema, fields).execute().await.expect("insert");

    let none = repo
        .on(&schema, "u1")
        .add("logins", 1_i64)
        .execute()
        .await
        .expect("patch");
    assert!(none.is_none());

    let new = repo
        .on(&schema, "u1")
        .set("team", "blue")
        .add("roles", Value::List(vec!["admin".into()]))
        .delete("roles", "ops")
        .remove("bio")
        .returning(ReturnMode::AllNew)
        .execute()
        .await
        .expect("patch")
        .expect("all new");
    assert_eq!(new["logins"], Value::Integer(5));
    assert_eq!(
        new["roles"],
        Value::List(vec!["dev".into(), "admin".into()])
    );
    assert!(!new.contains_key("bio"));
    assert_eq!(new["version"], Value::Integer(3));
    assert_eq!(
        names_in_team(&repo, &schema, "blue").await,
        vec![Value::from("ann")]
    );

    let err = repo
        .on(&schema, "u1")
        .set("id", "other")
        .execute()
        .await
        .expect_err("identity patch");
    assert_eq!(err.code_str(), "validation");

    let err = repo
        .on(&schema, "ghost")
        .set("name", "x")
        .execute()
        .await
        .expect_err("missing entity");
    assert_eq!(err.code_str(), "conditional_check_failed");
}

#[tokio::test]
async fn delete_removes_every_record_and_returns_old() {
    let (store, repo, schema) = setup();
    repo.insert(&schema, user("u1", "red", "ann"))
        .execute()
        .await
        .expect("insert");
    assert_eq!(store.records("users").len(), 3);

    let old = repo
        .delete(&schema, "u1")
        .returning(ReturnMode::AllOld)
        .execute()
        .await
        .expect("delete")
        .expect("all old");
    assert_eq!(old["name"], Value::from("ann"));
    assert!(store.records("users").is_empty());

    repo.delete(&schema, "u1")
        .execute()
        .await
        .expect("absent delete is a no-op");
    let err = repo
        .delete(&schema, "u1")
        .expect_version(1)
        .execute()
        .await
        .expect_err("conditioned delete of absent entity");
    assert_eq!(err.code_str(), "conditional_check_failed");
}

#[tokio::test]
async fn computed_and_aliased_fields_round_trip() {
    let (store, repo, _) = setup();
    let schema = Arc::new(
        EntitySchema::builder("Event")
            .table("events")
            .id("id")
            .field(tablekit::FieldDef::new("title").alias("t"))
            .field(tablekit::FieldDef::new("day").computed(|it| {
                it.get("at")
                    .and_then(Value::as_str)
                    .map(|at| Value::from(&at[..at.len().min(10)]))
            }))
            .hash_key(KeyDecl::new("day"))
            .build()
            .expect("schema"),
    );
    repo.insert(
        &schema,
        item([
            ("id", "e1"),
            ("title", "launch"),
            ("at", "2024-05-01T10:00"),
        ]),
    )
    .execute()
    .await
    .expect("insert");

    for record in store.records("events") {
        assert!(record.attributes.contains_key("t"));
        assert!(!record.attributes.contains_key("title"));
        assert!(!record.attributes.contains_key("day"));
    }

    let page = repo
        .list(&[])
        .from(&schema)
        .by("2024-05-01")
        .filter(col("title").eq(lit("launch")))
        .execute()
        .await
        .expect("by day");
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0]["title"], Value::from("launch"));
}

#[tokio::test]
async fn computed_fields_filter_project_and_guard_writes() {
    let (store, repo, _) = setup();
    let schema = Arc::new(
        EntitySchema::builder("Event")
            .table("events")
            .id("id")
            .range_key("at")
            .field(tablekit::FieldDef::new("day").computed(|it| {
                it.get("at")
                    .and_then(Value::as_str)
                    .map(|at| Value::from(&at[..at.len().min(10)]))
            }))
            .build()
            .expect("schema"),
    );
    for (id, at) in [
        ("e1", "2024-05-01T10:00"),
        ("e2", "2024-05-02T09:00"),
        ("e3", "2024-05-01T18:30"),
    ] {
        repo.insert(&schema, item([("id", id), ("at", at), ("title", id)]))
            .execute()
            .await
            .expect("insert");
    }

    let page = repo
        .list(&["id", "day"])
        .from(&schema)
        .filter(col("day").eq(lit("2024-05-01")))
        .execute()
        .await
        .expect("filter on computed field");
    let ids: Vec<_> = page.items.iter().map(|it| it["id"].clone()).collect();
    assert_eq!(ids, vec![Value::from("e1"), Value::from("e3")]);
    assert_eq!(page.items[0]["day"], Value::from("2024-05-01"));
    assert!(!page.items[0].contains_key("at"));

    let fetched = repo.get(&schema, "e2").execute().await.expect("get").expect("e2");
    assert_eq!(fetched["day"], Value::from("2024-05-02"));

    let err = repo
        .update(&schema, item([("id", "e2"), ("title", "moved")]))
        .where_(col("day").eq(lit("2024-05-01")))
        .execute()
        .await
        .expect_err("condition on computed field is false");
    assert_eq!(err.code(), AccessErrorCode::ConditionalCheckFailed);

    repo.update(&schema, item([("id", "e2"), ("title", "moved")]))
        .where_(col("day").eq(lit("2024-05-02")))
        .execute()
        .await
        .expect("condition on computed field holds");
    let stored = repo.get(&schema, "e2").execute().await.expect("get").expect("e2");
    assert_eq!(stored["title"], Value::from("moved"));
    assert!(
        store
            .records("events")
            .iter()
            .all(|r| !r.attributes.contains_key("day"))
    );
}
