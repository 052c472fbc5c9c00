//! Upload completion hooks

use std::collections::HashMap;
use std::path::Path;

use axum::http::{HeaderMap, Method, Uri};

use super::types::Resource;

/// What a completion handler gets to see of the finishing request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Route parameters of the matched resource route
    pub params: HashMap<String, String>,
}

/// Called once a resource's final byte has been written and the file moved
/// into place.
///
/// `resource` is the snapshot taken before the last chunk, so its offset is
/// where that chunk started.
#[async_trait::async_trait]
pub trait UploadCompleteHandler: Send + Sync {
    async fn on_upload_complete(
        &self,
        context: &RequestContext,
        resource: &Resource,
        path: &Path,
    ) -> anyhow::Result<()>;
}

/// Completion handler that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHandler;

#[async_trait::async_trait]
impl UploadCompleteHandler for NoopHandler {
    async fn on_upload_complete(
        &self,
        _context: &RequestContext,
        _resource: &Resource,
        _path: &Path,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Completion handler that logs each finished upload
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait::async_trait]
impl UploadCompleteHandler for LoggingHandler {
    async fn on_upload_complete(
        &self,
        context: &RequestContext,
        resource: &Resource,
        path: &Path,
    ) -> anyhow::Result<()> {
        tracing::info!(
            resource_uid = %resource.uid,
            file_name = %resource.file_name,
            file_size = resource.file_size,
            uri = %context.uri,
            path = %path.display(),
            "File uploaded"
        );
        Ok(())
    }
}
