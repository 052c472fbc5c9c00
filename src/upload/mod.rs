//! Resumable Upload Module (tus 1.0 protocol)
//!
//! Implements resumable uploads with:
//! - Offset-addressed chunk writes into a per-resource file
//! - A descriptor per resource persisted between requests
//! - Atomic completion into the upload directory
//!
//! Resource lifecycle:
//! 1. POST creates the resource at offset 0 and writes its descriptor
//! 2. Each PATCH at the current offset appends bytes and advances the descriptor
//! 3. The chunk that reaches the declared length moves the file into place
//! 4. DELETE removes an unfinished resource

pub mod callback;
pub mod codec;
pub mod locks;
pub mod metadata;
pub mod paths;
pub mod resource;
pub mod types;

pub use callback::{LoggingHandler, NoopHandler, RequestContext, UploadCompleteHandler};
pub use codec::{DescriptorCodec, JsonCodec};
pub use locks::{ResourceGuard, ResourceLocks};
pub use metadata::UploadMetadata;
pub use paths::UploadPaths;
pub use resource::ResourceStore;
pub use types::*;
