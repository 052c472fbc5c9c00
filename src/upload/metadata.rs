//! Upload-Metadata codec
//!
//! The header is a comma separated list of `key base64value` pairs. Keys are
//! matched case-insensitively; values are raw bytes after decoding.

use std::collections::BTreeMap;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::{Result, TusError};

/// Key holding the target file name
pub const FILENAME_KEY: &str = "filename";

/// Decoded upload metadata with case-insensitive keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMetadata {
    entries: BTreeMap<String, Vec<u8>>,
}

impl UploadMetadata {
    /// Insert a value, replacing any key that differs only by case
    pub fn insert(&mut self, key: &str, value: Vec<u8>) {
        self.entries.insert(key.to_ascii_lowercase(), value);
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `filename` value as text
    pub fn file_name(&self) -> Option<String> {
        self.get(FILENAME_KEY)
            .filter(|value| !value.is_empty())
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }
}

/// Parse an `Upload-Metadata` header value
pub fn parse(header: &str) -> Result<UploadMetadata> {
    let mut metadata = UploadMetadata::default();

    for item in header.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let mut parts = item.split_whitespace();
        let (key, value) = match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) => (key, value),
            _ => {
                return Err(TusError::InvalidMetadata(format!(
                    "malformed entry {:?}",
                    item
                )))
            }
        };

        let decoded = STANDARD.decode(value).map_err(|e| {
            TusError::InvalidMetadata(format!("value for {:?} is not base64: {}", key, e))
        })?;
        metadata.insert(key, decoded);
    }

    Ok(metadata)
}

/// Require a non-empty `filename` entry
pub fn validate(metadata: UploadMetadata) -> Result<UploadMetadata> {
    if metadata.file_name().is_none() {
        return Err(TusError::InvalidMetadata(
            "Upload metadata missed filename value".to_string(),
        ));
    }
    Ok(metadata)
}

/// The final path component of the client supplied file name
pub fn target_file_name(metadata: &UploadMetadata) -> Result<String> {
    let raw = metadata
        .file_name()
        .ok_or_else(|| TusError::InvalidMetadata("Upload metadata missed filename value".to_string()))?;

    let name = Path::new(&raw)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| TusError::InvalidMetadata(format!("unusable filename {:?}", raw)))?;

    // Control characters and backslashes never reach the filesystem
    if name.contains('\\') || name.chars().any(char::is_control) {
        return Err(TusError::InvalidMetadata(format!("unusable filename {:?}", raw)));
    }

    Ok(name)
}

/// Find a finished file that an upload of `metadata` would collide with.
///
/// A file collides when it has the same name, or the same stem with any
/// extension. Only regular files directly under `upload_dir` are considered.
pub async fn check_file_name(metadata: &UploadMetadata, upload_dir: &Path) -> Result<Option<String>> {
    let candidate = target_file_name(metadata)?;
    let stem = Path::new(&candidate)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| candidate.clone());
    let prefix = format!("{}.", stem);

    let mut entries = match tokio::fs::read_dir(upload_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TusError::storage(upload_dir, e)),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| TusError::storage(upload_dir, e))?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if name == candidate || name.starts_with(&prefix) {
            return Ok(Some(name));
        }
    }

    Ok(None)
}
