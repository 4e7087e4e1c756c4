//! Sync cookie: `{rid, ctxcsn}`, opaque to the consumer.

use super::types::Csn;
use crate::error::{Result, SyncProviderError};
use serde::{Deserialize, Serialize};

/// A subscriber's replica identifier.
pub type Rid = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub rid: Rid,
    pub csn: Csn,
}

impl Cookie {
    pub fn new(rid: Rid, csn: Csn) -> Self {
        Self { rid, csn }
    }

    /// Encode to the opaque wire representation. The protocol layer (out of
    /// scope) is responsible for embedding this inside the sync control;
    /// the core only needs a stable, round-trippable encoding.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Cookie serializes infallibly")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| SyncProviderError::Protocol(format!("malformed sync cookie: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let c = Cookie::new(1, Csn::from("20240101000000.000000Z#000000#001#000000"));
        let decoded = Cookie::decode(&c.encode()).unwrap();
        assert_eq!(c, decoded);
        assert_eq!(c.encode(), decoded.encode());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Cookie::decode(b"not json").is_err());
    }
}
