//! tus Routes
//!
//! HTTP endpoints for the tus resumable upload protocol. For every registered
//! upload URL:
//!
//! - OPTIONS {upload_url} - Advertise protocol version and extensions
//! - GET {upload_url} - Check whether the file named in Upload-Metadata exists
//! - POST {upload_url} - Create a resource
//! - HEAD {upload_url}/:resource_uid - Report the resource offset
//! - PATCH {upload_url}/:resource_uid - Write a chunk at the current offset
//! - DELETE {upload_url}/:resource_uid - Cancel the upload

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    async_trait,
    body::Body,
    extract::{rejection::PathRejection, FromRequestParts, OriginalUri, Path, State},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{head, options},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::TusConfig;
use crate::error::{Result, TusError};
use crate::state::{Endpoint, TusRegistry};
use crate::upload::{
    metadata, paths::router_path, RequestContext, Resource, ResourceStore, UploadPaths,
    base_headers, HEADER_TUS_EXTENSION, HEADER_TUS_FILE_EXISTS, HEADER_TUS_FILE_NAME,
    HEADER_TUS_MAX_SIZE, HEADER_TUS_RESUMABLE, HEADER_TUS_TEMP_FILENAME, HEADER_UPLOAD_LENGTH,
    HEADER_UPLOAD_METADATA, HEADER_UPLOAD_OFFSET, HEADER_X_FORWARDED_PROTO, RESOURCE_UID_PARAM,
    RESOURCES_DIR, TUS_API_EXTENSIONS,
};

// ============================================================================
// Router
// ============================================================================

/// Create the router serving every endpoint in `registry`
pub fn router(registry: TusRegistry) -> Router {
    let registry = Arc::new(registry);
    let mut app = Router::new();

    for (id, config) in registry.endpoints() {
        let endpoint = Endpoint::new(registry.clone(), id);

        let routes = Router::new()
            .route(
                &router_path(&config.mounted_upload_route()),
                options(discover).get(file_check).post(start_upload),
            )
            .route(
                &router_path(&config.resource_route()),
                head(resource_status).patch(upload_chunk).delete(delete_resource),
            )
            .layer(RequestBodyLimitLayer::new(config.max_chunk_size))
            .with_state(endpoint);

        app = app.merge(routes);
    }

    app
}

// ============================================================================
// Extractors
// ============================================================================

/// All route parameters of the matched route, empty when it has none
#[derive(Debug, Clone, Default)]
pub struct RouteParams(pub HashMap<String, String>);

#[async_trait]
impl<S> FromRequestParts<S> for RouteParams
where
    S: Send + Sync,
{
    type Rejection = TusError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        match Path::<HashMap<String, String>>::from_request_parts(parts, state).await {
            Ok(Path(params)) => Ok(Self(params)),
            Err(PathRejection::MissingPathParams(_)) => Ok(Self::default()),
            Err(e) => Err(TusError::NotFound(e.body_text())),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// OPTIONS {upload_url}
///
/// Non-tus clients get a bare 200.
async fn discover(State(endpoint): State<Endpoint>, headers: HeaderMap) -> Result<Response> {
    if !is_tus_request(&headers) {
        return Ok(StatusCode::OK.into_response());
    }

    let config = endpoint.config()?;
    let mut response_headers = base_headers();
    response_headers.insert(
        HEADER_TUS_EXTENSION,
        HeaderValue::from_str(&TUS_API_EXTENSIONS.join(",")).map_err(|e| {
            TusError::Configuration(format!("invalid extension list: {}", e))
        })?,
    );
    response_headers.insert(HEADER_TUS_MAX_SIZE, HeaderValue::from(config.max_file_size));

    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}

/// GET {upload_url}
///
/// Reports whether a file clashing with the Upload-Metadata filename exists.
async fn file_check(
    State(endpoint): State<Endpoint>,
    RouteParams(params): RouteParams,
    headers: HeaderMap,
) -> Result<Response> {
    let config = endpoint.config()?;
    let store = resource_store(config, &params)?;

    let metadata_header = header_str(&headers, &HEADER_UPLOAD_METADATA, "Upload-Metadata")?.unwrap_or("");
    let valid_metadata = metadata::validate(metadata::parse(metadata_header)?)?;
    let existing = metadata::check_file_name(&valid_metadata, store.paths().upload_dir()).await?;

    let mut response_headers = base_headers();
    match existing {
        Some(file_name) => {
            response_headers.insert(HEADER_TUS_FILE_EXISTS, HeaderValue::from_static("true"));
            response_headers.insert(HEADER_TUS_FILE_NAME, file_name_value(&file_name)?);
        }
        None => {
            response_headers.insert(HEADER_TUS_FILE_EXISTS, HeaderValue::from_static("false"));
        }
    }

    Ok((StatusCode::OK, response_headers).into_response())
}

/// POST {upload_url}
///
/// Create a resource for the file described by Upload-Metadata.
async fn start_upload(
    State(endpoint): State<Endpoint>,
    RouteParams(params): RouteParams,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Result<Response> {
    if !is_tus_request(&headers) {
        tracing::warn!(headers = ?headers, "Wrong headers for start upload view");
        return Err(TusError::UnsupportedProtocol);
    }

    let config = endpoint.config()?;
    let store = resource_store(config, &params)?;

    let metadata_header = header_str(&headers, &HEADER_UPLOAD_METADATA, "Upload-Metadata")?.unwrap_or("");
    let valid_metadata = metadata::validate(metadata::parse(metadata_header)?)?;
    let file_name = metadata::target_file_name(&valid_metadata)?;

    if let Some(existing) = metadata::check_file_name(&valid_metadata, store.paths().upload_dir()).await? {
        if !config.allow_overwrite_files {
            tracing::warn!(
                endpoint = %config.upload_route_name(),
                file_name = %file_name,
                existing = %existing,
                "Refusing to overwrite existing file"
            );
            return Err(TusError::FileExists(existing));
        }
    }

    let file_size = header_u64(&headers, &HEADER_UPLOAD_LENGTH, "Upload-Length")?.unwrap_or(0);
    if file_size > config.max_file_size {
        return Err(TusError::FileTooLarge {
            size: file_size,
            max: config.max_file_size,
        });
    }

    let resource = store.create(&file_name, file_size, metadata_header);

    // Materialize the chunk file now so storage problems surface on creation
    let persisted = match store.save_chunk(&resource, &[]).await {
        Ok(_) => store.save_descriptor(&resource).await.map(|_| ()),
        Err(e) => Err(e),
    };
    if let Err(e) = persisted {
        tracing::error!(
            endpoint = %config.upload_route_name(),
            file_name = %file_name,
            resource = ?resource,
            upload_path = %store.paths().upload_dir().display(),
            error = %e,
            "Unable to create file"
        );
        return Err(e);
    }

    tracing::info!(
        endpoint = %config.upload_route_name(),
        resource_uid = %resource.uid,
        file_name = %resource.file_name,
        file_size = resource.file_size,
        "Created upload resource"
    );

    let location = resource_location(&uri, &headers, &resource.uid);
    let mut response_headers = base_headers();
    response_headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&location).map_err(|e| TusError::InvalidHeader {
            name: "Host",
            reason: e.to_string(),
        })?,
    );
    response_headers.insert(HEADER_TUS_TEMP_FILENAME, uid_value(&resource.uid)?);

    Ok((StatusCode::CREATED, response_headers).into_response())
}

/// HEAD {upload_url}/:resource_uid
///
/// Report how many bytes the server holds.
async fn resource_status(
    State(endpoint): State<Endpoint>,
    RouteParams(params): RouteParams,
) -> Result<Response> {
    let config = endpoint.config()?;
    let store = resource_store(config, &params)?;
    let resource = load_or_404(&store, resource_uid(&params)?).await?;

    let mut response_headers = base_headers();
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response_headers.insert(HEADER_UPLOAD_OFFSET, HeaderValue::from(resource.offset));
    response_headers.insert(HEADER_UPLOAD_LENGTH, HeaderValue::from(resource.file_size));

    Ok((StatusCode::OK, response_headers).into_response())
}

/// PATCH {upload_url}/:resource_uid
///
/// Write the body at the current offset. The chunk reaching the declared
/// length completes the upload.
async fn upload_chunk(
    State(endpoint): State<Endpoint>,
    RouteParams(params): RouteParams,
    OriginalUri(uri): OriginalUri,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<Response> {
    let config = endpoint.config()?;
    let store = resource_store(config, &params)?;
    let uid = resource_uid(&params)?;

    let _guard = if config.lock_resources {
        let key = store.paths().upload_dir().join(RESOURCES_DIR).join(uid);
        Some(endpoint.locks().acquire(&key).await)
    } else {
        None
    };

    let resource = load_or_410(&store, uid).await?;

    let upload_offset = header_u64(&headers, &HEADER_UPLOAD_OFFSET, "Upload-Offset")?.unwrap_or(0);
    if upload_offset != resource.offset {
        tracing::warn!(
            endpoint = %config.resource_route_name(),
            resource_uid = %resource.uid,
            expected = resource.offset,
            actual = upload_offset,
            "Upload offset mismatch"
        );
        return Err(TusError::OffsetMismatch {
            expected: resource.offset,
            actual: upload_offset,
        });
    }

    if let Some(length) = header_u64(&headers, &header::CONTENT_LENGTH, "Content-Length")? {
        if length > resource.remaining() {
            return Err(TusError::ChunkExceedsLength {
                offset: resource.offset,
                chunk: length,
                length: resource.file_size,
            });
        }
    }

    let written = store.save_chunk_stream(&resource, body.into_data_stream()).await?;
    let next_offset = resource.offset + written;

    if resource.is_complete_at(next_offset) {
        let path = store.complete(&resource).await?;

        let context = RequestContext {
            method,
            uri,
            headers,
            params,
        };
        if let Err(e) = config
            .on_upload_done
            .on_upload_complete(&context, &resource, &path)
            .await
        {
            tracing::error!(
                endpoint = %config.resource_route_name(),
                resource_uid = %resource.uid,
                path = %path.display(),
                error = %e,
                "Upload completion callback failed"
            );
        }
    } else {
        store.save_descriptor(&resource.with_offset(next_offset)).await?;
        tracing::debug!(
            endpoint = %config.resource_route_name(),
            resource_uid = %resource.uid,
            offset = next_offset,
            file_size = resource.file_size,
            "Chunk accepted"
        );
    }

    let mut response_headers = base_headers();
    response_headers.insert(HEADER_TUS_TEMP_FILENAME, uid_value(&resource.uid)?);
    response_headers.insert(HEADER_UPLOAD_OFFSET, HeaderValue::from(next_offset));

    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}

/// DELETE {upload_url}/:resource_uid
///
/// Cancel an upload, removing its chunk file and descriptor.
async fn delete_resource(
    State(endpoint): State<Endpoint>,
    RouteParams(params): RouteParams,
) -> Result<Response> {
    let config = endpoint.config()?;
    let store = resource_store(config, &params)?;
    let uid = resource_uid(&params)?;

    let _guard = if config.lock_resources {
        let key = store.paths().upload_dir().join(RESOURCES_DIR).join(uid);
        Some(endpoint.locks().acquire(&key).await)
    } else {
        None
    };

    let resource = load_or_404(&store, uid).await?;
    store.delete(&resource).await?;

    tracing::info!(
        endpoint = %config.resource_route_name(),
        resource_uid = %resource.uid,
        file_name = %resource.file_name,
        offset = resource.offset,
        "Upload resource deleted"
    );

    Ok((StatusCode::NO_CONTENT, base_headers()).into_response())
}

// ============================================================================
// Helpers
// ============================================================================

fn is_tus_request(headers: &HeaderMap) -> bool {
    headers
        .get(HEADER_TUS_RESUMABLE)
        .map(|value| !value.is_empty())
        .unwrap_or(false)
}

fn resource_store(config: &TusConfig, params: &HashMap<String, String>) -> Result<ResourceStore> {
    let paths = UploadPaths::resolve(config.upload_path(), params, config.mkdir_mode)?;
    Ok(ResourceStore::new(paths, config.codec.clone()))
}

fn resource_uid(params: &HashMap<String, String>) -> Result<&str> {
    params
        .get(RESOURCE_UID_PARAM)
        .map(String::as_str)
        .ok_or_else(|| TusError::Configuration("resource route missing resource_uid".to_string()))
}

async fn load_or_404(store: &ResourceStore, uid: &str) -> Result<Resource> {
    store.load_descriptor(uid).await.map_err(|e| {
        if matches!(e, TusError::NotFound(_)) {
            tracing::warn!(resource_uid = %uid, "Unable to read resource metadata by requested UID");
        }
        e
    })
}

async fn load_or_410(store: &ResourceStore, uid: &str) -> Result<Resource> {
    let resource = match store.load_descriptor(uid).await {
        Ok(resource) => resource,
        Err(TusError::NotFound(_)) => {
            tracing::warn!(resource_uid = %uid, "Attempt to continue upload of removed resource");
            return Err(TusError::Gone(uid.to_string()));
        }
        Err(e) => return Err(e),
    };

    if !store.chunk_exists(&resource.uid).await? {
        tracing::warn!(
            resource_uid = %uid,
            file_name = %resource.file_name,
            "Resource chunk file missing"
        );
        return Err(TusError::Gone(uid.to_string()));
    }

    Ok(resource)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName, label: &'static str) -> Result<Option<&'a str>> {
    headers
        .get(name)
        .map(|value| {
            value.to_str().map_err(|e| TusError::InvalidHeader {
                name: label,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn header_u64(headers: &HeaderMap, name: &HeaderName, label: &'static str) -> Result<Option<u64>> {
    match header_str(headers, name, label)?.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| TusError::InvalidHeader {
                name: label,
                reason: format!("{:?} is not a non-negative integer", value),
            }),
    }
}

/// Absolute URL of a new resource, honoring a proxy's X-Forwarded-Proto
fn resource_location(uri: &Uri, headers: &HeaderMap, uid: &str) -> String {
    let path = format!("{}/{}", uri.path().trim_end_matches('/'), uid);

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|authority| authority.to_string()));

    let Some(host) = host else {
        return path;
    };

    let scheme = headers
        .get(HEADER_X_FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| uri.scheme_str())
        .unwrap_or("http");

    format!("{}://{}{}", scheme, host, path)
}

fn file_name_value(file_name: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(file_name)
        .map_err(|_| TusError::InvalidMetadata(format!("file name {:?} is not a valid header value", file_name)))
}

fn uid_value(uid: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(uid).map_err(|_| TusError::NotFound(uid.to_string()))
}
