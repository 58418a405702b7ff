//! The on-wire context codec.
//!
//! The encoding is an external contract shared with the receiving side; the
//! only requirement is that `decode(encode(x))` deep-equals `x` for every
//! normalized model context. The default codec is canonical JSON: struct
//! field order is fixed by the type definitions and dynamic maps serialize
//! in sorted key order.

use crate::model_context::ModelContextV2;

pub trait ContextCodec: Send + Sync {
    fn encode(&self, context: &ModelContextV2) -> String;
    fn decode(&self, payload: &str) -> Result<ModelContextV2, serde_json::Error>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonContextCodec;

impl ContextCodec for JsonContextCodec {
    fn encode(&self, context: &ModelContextV2) -> String {
        serde_json::to_string(context).unwrap_or_else(|_| "{}".to_string())
    }

    fn decode(&self, payload: &str) -> Result<ModelContextV2, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
