//! Descriptor serialization
//!
//! Descriptors are written as JSON by default. Endpoints can swap in another
//! self-describing format by implementing [`DescriptorCodec`].

use crate::error::{Result, TusError};
use super::types::Resource;

/// Encode and decode resource descriptors
pub trait DescriptorCodec: Send + Sync {
    fn encode(&self, resource: &Resource) -> Result<Vec<u8>>;

    fn decode(&self, data: &[u8]) -> Result<Resource>;
}

/// serde_json descriptor codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indented output, easier to inspect on disk
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl DescriptorCodec for JsonCodec {
    fn encode(&self, resource: &Resource) -> Result<Vec<u8>> {
        let encoded = if self.pretty {
            serde_json::to_vec_pretty(resource)
        } else {
            serde_json::to_vec(resource)
        };
        encoded.map_err(|e| TusError::Codec(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<Resource> {
        serde_json::from_slice(data).map_err(|e| TusError::Codec(e.to_string()))
    }
}
