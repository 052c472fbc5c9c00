//! Configuration management
//!
//! [`TusConfig`] describes one upload endpoint and is fixed once registered.
//! [`AppConfig`] is the process configuration of the bundled server binary.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE, Engine as _};

use crate::upload::callback::{NoopHandler, UploadCompleteHandler};
use crate::upload::codec::{DescriptorCodec, JsonCodec};
use crate::upload::paths::{canonical_url, resource_url};
use crate::upload::types::{DEFAULT_MAX_CHUNK_SIZE, DEFAULT_MKDIR_MODE, TUS_MAX_FILE_SIZE};

// ============================================================================
// Endpoint Configuration
// ============================================================================

/// Configuration of one upload endpoint
#[derive(Clone)]
pub struct TusConfig {
    /// Upload directory, may contain `{param}` route placeholders
    pub upload_path: PathBuf,

    /// Public URL of the endpoint, may contain route placeholders
    pub upload_url: String,

    /// Explicit name used for the endpoint's route names
    pub upload_resource_name: Option<String>,

    /// Allow a new upload to replace a finished file with the same name
    pub allow_overwrite_files: bool,

    /// Permission bits for created directories
    pub mkdir_mode: u32,

    /// Largest `Upload-Length` accepted on creation
    pub max_file_size: u64,

    /// Request body limit for a single chunk
    pub max_chunk_size: usize,

    /// Serialize chunk writes per resource
    pub lock_resources: bool,

    pub on_upload_done: Arc<dyn UploadCompleteHandler>,

    pub codec: Arc<dyn DescriptorCodec>,
}

impl TusConfig {
    pub fn new(upload_path: impl Into<PathBuf>, upload_url: impl Into<String>) -> Self {
        Self {
            upload_path: upload_path.into(),
            upload_url: upload_url.into(),
            upload_resource_name: None,
            allow_overwrite_files: false,
            mkdir_mode: DEFAULT_MKDIR_MODE,
            max_file_size: TUS_MAX_FILE_SIZE,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            lock_resources: true,
            on_upload_done: Arc::new(NoopHandler),
            codec: Arc::new(JsonCodec::new()),
        }
    }

    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.upload_resource_name = Some(name.into());
        self
    }

    pub fn allow_overwrite_files(mut self, allow: bool) -> Self {
        self.allow_overwrite_files = allow;
        self
    }

    pub fn with_mkdir_mode(mut self, mode: u32) -> Self {
        self.mkdir_mode = mode;
        self
    }

    pub fn with_max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = max;
        self
    }

    pub fn with_max_chunk_size(mut self, max: usize) -> Self {
        self.max_chunk_size = max;
        self
    }

    pub fn with_resource_locking(mut self, enabled: bool) -> Self {
        self.lock_resources = enabled;
        self
    }

    pub fn on_upload_done(mut self, handler: Arc<dyn UploadCompleteHandler>) -> Self {
        self.on_upload_done = handler;
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn DescriptorCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn upload_path(&self) -> &Path {
        &self.upload_path
    }

    /// Canonical upload route template
    pub fn upload_route(&self) -> String {
        canonical_url(&self.upload_url)
    }

    /// Upload route template as mounted, keeping a configured trailing slash
    pub fn mounted_upload_route(&self) -> String {
        let canonical = self.upload_route();
        if self.upload_url.ends_with('/') && canonical != "/" {
            format!("{}/", canonical)
        } else {
            canonical
        }
    }

    /// Canonical resource route template
    pub fn resource_route(&self) -> String {
        resource_url(&self.upload_route())
    }

    /// URL-safe base64 of the upload URL, `=` padding written as `_`
    pub fn upload_url_id(&self) -> String {
        URL_SAFE.encode(self.upload_url.as_bytes()).replace('=', "_")
    }

    /// Name of the upload route
    pub fn upload_route_name(&self) -> String {
        match &self.upload_resource_name {
            Some(name) => name.clone(),
            None => format!("tus_upload_{}", self.upload_url_id()),
        }
    }

    /// Name of the resource route
    pub fn resource_route_name(&self) -> String {
        match &self.upload_resource_name {
            Some(name) => format!("{}_resource", name),
            None => format!("tus_resource_{}", self.upload_url_id()),
        }
    }
}

impl fmt::Debug for TusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TusConfig")
            .field("upload_path", &self.upload_path)
            .field("upload_url", &self.upload_url)
            .field("upload_resource_name", &self.upload_resource_name)
            .field("allow_overwrite_files", &self.allow_overwrite_files)
            .field("mkdir_mode", &format_args!("{:o}", self.mkdir_mode))
            .field("max_file_size", &self.max_file_size)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("lock_resources", &self.lock_resources)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Server Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub path: PathBuf,
    pub url: String,
    pub allow_overwrite: bool,
    pub max_chunk_size: usize,
    pub max_file_size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8300,
            },
            upload: UploadConfig {
                path: PathBuf::from("./uploads"),
                url: "/uploads".to_string(),
                allow_overwrite: false,
                max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
                max_file_size: TUS_MAX_FILE_SIZE,
            },
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();

        Ok(AppConfig {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
            },
            upload: UploadConfig {
                path: env::var("TUS_UPLOAD_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.upload.path),
                url: env::var("TUS_UPLOAD_URL").unwrap_or(defaults.upload.url),
                allow_overwrite: parse_var("TUS_ALLOW_OVERWRITE", defaults.upload.allow_overwrite)?,
                max_chunk_size: parse_var("TUS_MAX_CHUNK_SIZE", defaults.upload.max_chunk_size)?,
                max_file_size: parse_var("TUS_MAX_FILE_SIZE", defaults.upload.max_file_size)?,
            },
        })
    }

    /// Endpoint configuration for the configured upload URL
    pub fn tus_config(&self) -> TusConfig {
        TusConfig::new(self.upload.path.clone(), self.upload.url.clone())
            .allow_overwrite_files(self.upload.allow_overwrite)
            .with_max_chunk_size(self.upload.max_chunk_size)
            .with_max_file_size(self.upload.max_file_size)
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
