//! Session cursors: base64url of a small JSON kind tag.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "k", rename_all = "lowercase")]
pub enum SessionCursor {
    Normal { seq: u64 },
    Background { offset: u64 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CursorError {
    Malformed,
    WrongKind,
}

impl std::fmt::Display for CursorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => f.write_str("malformed cursor"),
            Self::WrongKind => f.write_str("cursor kind does not match session type"),
        }
    }
}

impl std::error::Error for CursorError {}

pub fn encode_cursor(cursor: &SessionCursor) -> String {
    let json = serde_json::to_string(cursor).expect("cursor serializes");
    URL_SAFE_NO_PAD.encode(json.as_bytes())
}

fn decode(encoded: &str) -> Result<SessionCursor, CursorError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(|_| CursorError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| CursorError::Malformed)
}

/// Decode a cursor for a `normal` bash session; rejects background cursors.
pub fn decode_normal_cursor(encoded: &str) -> Result<u64, CursorError> {
    match decode(encoded)? {
        SessionCursor::Normal { seq } => Ok(seq),
        SessionCursor::Background { .. } => Err(CursorError::WrongKind),
    }
}

/// Decode a cursor for a background session; rejects normal cursors.
pub fn decode_background_cursor(encoded: &str) -> Result<u64, CursorError> {
    match decode(encoded)? {
        SessionCursor::Background { offset } => Ok(offset),
        SessionCursor::Normal { .. } => Err(CursorError::WrongKind),
    }
}
