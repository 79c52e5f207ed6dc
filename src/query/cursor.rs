use crate::error::AccessError;
use crate::store::StoreKey;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Absolute physical scan position. Direction-agnostic: the same token
/// resumes an ascending or a descending scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CursorToken {
    #[serde(rename = "p")]
    partition: String,
    #[serde(rename = "s")]
    sort: String,
    #[serde(rename = "i")]
    index: Option<String>,
}

/// Encodes a position as an opaque, URL-safe (no `+`, `/` or padding) token.
pub fn encode_cursor(key: &StoreKey) -> Result<String, AccessError> {
    let token = CursorToken {
        partition: key.partition.clone(),
        sort: key.sort.clone(),
        index: key.index.clone(),
    };
    let bytes = rmp_serde::to_vec(&token)
        .map_err(|e| AccessError::Validation(format!("cursor encode failed: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Decodes a token produced by [`encode_cursor`] back into a key on `table`.
pub fn decode_cursor(table: &str, encoded: &str) -> Result<StoreKey, AccessError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|_| AccessError::Validation("invalid cursor".into()))?;
    let token: CursorToken = rmp_serde::from_slice(&bytes)
        .map_err(|e| AccessError::Validation(format!("invalid cursor: {e}")))?;
    Ok(StoreKey {
        table: table.to_string(),
        index: token.index,
        partition: token.partition,
        sort: token.sort,
    })
}
