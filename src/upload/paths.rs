//! Upload directory resolution and URL templates
//!
//! Layout under a resolved upload directory:
//!
//! ```text
//! {upload_dir}/{file_name}              finished files
//! {upload_dir}/.resources/{uid}         in-flight chunk bytes
//! {upload_dir}/.metadata/{uid}.json     resource descriptors
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Result, TusError};
use super::types::{METADATA_DIR, RESOURCES_DIR};

// ============================================================================
// Directories
// ============================================================================

/// Directories for one request, resolved from the endpoint's path template
#[derive(Debug, Clone)]
pub struct UploadPaths {
    upload_dir: PathBuf,
    mkdir_mode: u32,
}

impl UploadPaths {
    /// Substitute route parameters into `root_template` and make it absolute
    pub fn resolve(
        root_template: &Path,
        params: &HashMap<String, String>,
        mkdir_mode: u32,
    ) -> Result<Self> {
        let template = root_template.to_string_lossy();
        let rendered = PathBuf::from(render_template(&template, params)?);

        let upload_dir = if rendered.is_absolute() {
            rendered
        } else {
            std::env::current_dir()
                .map_err(|e| {
                    TusError::Configuration(format!("cannot resolve relative upload path: {}", e))
                })?
                .join(rendered)
        };

        Ok(Self {
            upload_dir,
            mkdir_mode,
        })
    }

    /// Directory that receives finished files
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// `.resources` directory, created on first access
    pub async fn resources_dir(&self) -> Result<PathBuf> {
        self.ensure_dir(self.upload_dir.join(RESOURCES_DIR)).await
    }

    /// `.metadata` directory, created on first access
    pub async fn metadata_dir(&self) -> Result<PathBuf> {
        self.ensure_dir(self.upload_dir.join(METADATA_DIR)).await
    }

    /// Chunk file of a resource
    pub async fn resource_path(&self, uid: &str) -> Result<PathBuf> {
        Ok(self.resources_dir().await?.join(uid))
    }

    /// Descriptor file of a resource
    pub async fn descriptor_path(&self, uid: &str) -> Result<PathBuf> {
        Ok(self.metadata_dir().await?.join(format!("{}.json", uid)))
    }

    /// Final location of a finished file
    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.upload_dir.join(file_name)
    }

    async fn ensure_dir(&self, path: PathBuf) -> Result<PathBuf> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(self.mkdir_mode);

        builder
            .create(&path)
            .await
            .map_err(|e| TusError::storage(&path, e))?;
        Ok(path)
    }
}

/// Replace `{name}` placeholders with route parameter values
pub fn render_template(template: &str, params: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| {
            TusError::Configuration(format!("unclosed placeholder in {:?}", template))
        })?;

        let name = &after[..end];
        let value = params.get(name).ok_or_else(|| {
            TusError::Configuration(format!(
                "path template {:?} references missing route parameter {:?}",
                template, name
            ))
        })?;
        if value.is_empty() || value == "." || value == ".." || value.contains(['/', '\\']) {
            return Err(TusError::NotFound(format!(
                "route parameter {:?} is not a usable path segment",
                name
            )));
        }
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

// ============================================================================
// URLs
// ============================================================================

/// Resource id segment of a resource route template
pub const RESOURCE_UID_PLACEHOLDER: &str = "{resource_uid}";

/// Canonical form of an upload URL template.
///
/// Trailing slashes are dropped and `:name` segments are written as `{name}`.
pub fn canonical_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }

    trimmed
        .split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => format!("{{{}}}", name),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resource sub-route template of an upload URL
pub fn resource_url(upload_url: &str) -> String {
    format!("{}/{}", upload_url.trim_end_matches('/'), RESOURCE_UID_PLACEHOLDER)
}

/// Upload URL a resource URL belongs to
pub fn upload_url(resource_url: &str) -> String {
    match resource_url.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => resource_url.to_string(),
    }
}

/// Route path in the router's `:name` syntax
pub fn router_path(canonical: &str) -> String {
    canonical
        .split('/')
        .map(|segment| {
            match segment
                .strip_prefix('{')
                .and_then(|s| s.strip_suffix('}'))
            {
                Some(name) => format!(":{}", name),
                None => segment.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
