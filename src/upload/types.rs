//! Protocol constants and the resource record

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Protocol version spoken by this server
pub const TUS_API_VERSION: &str = "1.0.0";

/// Protocol versions accepted from clients
pub const TUS_API_VERSION_SUPPORTED: &str = "1.0.0";

/// Extensions advertised on discovery
pub const TUS_API_EXTENSIONS: [&str; 3] = ["creation", "termination", "file-check"];

/// Maximum file size: 4GB
pub const TUS_MAX_FILE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Default request body limit for a single chunk: 16MB
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default permission bits for created directories
pub const DEFAULT_MKDIR_MODE: u32 = 0o755;

/// Hidden directory holding in-flight chunk bytes
pub const RESOURCES_DIR: &str = ".resources";

/// Hidden directory holding resource descriptors
pub const METADATA_DIR: &str = ".metadata";

/// Route parameter carrying the resource id
pub const RESOURCE_UID_PARAM: &str = "resource_uid";

// ============================================================================
// Headers
// ============================================================================

pub const HEADER_TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const HEADER_TUS_VERSION: HeaderName = HeaderName::from_static("tus-version");
pub const HEADER_TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub const HEADER_TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
pub const HEADER_TUS_FILE_EXISTS: HeaderName = HeaderName::from_static("tus-file-exists");
pub const HEADER_TUS_FILE_NAME: HeaderName = HeaderName::from_static("tus-file-name");
pub const HEADER_TUS_TEMP_FILENAME: HeaderName = HeaderName::from_static("tus-temp-filename");
pub const HEADER_UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
pub const HEADER_UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");
pub const HEADER_UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");

/// Used to get the original scheme behind a reverse proxy
pub const HEADER_X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers a browser client needs to read from tus responses
pub const EXPOSED_HEADERS: [HeaderName; 10] = [
    axum::http::header::LOCATION,
    HEADER_TUS_RESUMABLE,
    HEADER_TUS_VERSION,
    HEADER_TUS_EXTENSION,
    HEADER_TUS_MAX_SIZE,
    HEADER_TUS_FILE_EXISTS,
    HEADER_TUS_FILE_NAME,
    HEADER_TUS_TEMP_FILENAME,
    HEADER_UPLOAD_LENGTH,
    HEADER_UPLOAD_OFFSET,
];

/// Headers attached to every tus response
pub fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(HEADER_TUS_RESUMABLE, HeaderValue::from_static(TUS_API_VERSION));
    headers.insert(
        HEADER_TUS_VERSION,
        HeaderValue::from_static(TUS_API_VERSION_SUPPORTED),
    );
    headers
}

// ============================================================================
// Resource
// ============================================================================

/// One in-progress upload.
///
/// Between requests the descriptor on disk is the source of truth; a
/// `Resource` value is rebuilt from it on every request and written back
/// when the offset advances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource id, also the chunk file name
    pub uid: String,

    /// Final file name under the upload directory
    pub file_name: String,

    /// Declared total size in bytes
    pub file_size: u64,

    /// Bytes persisted so far
    pub offset: u64,

    /// `Upload-Metadata` header exactly as received on creation
    pub metadata_header: String,
}

impl Resource {
    /// Create a fresh resource at offset 0
    pub fn new(file_name: impl Into<String>, file_size: u64, metadata_header: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            file_size,
            offset: 0,
            metadata_header: metadata_header.into(),
        }
    }

    /// Copy of this resource at a new offset
    pub fn with_offset(&self, offset: u64) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    /// Whether `offset` reaches the declared size
    pub fn is_complete_at(&self, offset: u64) -> bool {
        offset == self.file_size
    }

    /// Bytes still expected
    pub fn remaining(&self) -> u64 {
        self.file_size.saturating_sub(self.offset)
    }
}
