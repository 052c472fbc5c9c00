//! Endpoint registry
//!
//! Built once while wiring the router and read-only afterwards. Every
//! handler receives an [`Endpoint`] handle naming the configuration it
//! serves, so no per-request lookup by URL is needed on the hot path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::TusConfig;
use crate::error::{Result, TusError};
use crate::upload::locks::ResourceLocks;
use crate::upload::paths::{canonical_url, upload_url, RESOURCE_UID_PLACEHOLDER};

/// Opaque handle of a registered endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointId(usize);

/// Registered upload endpoints keyed by canonical upload URL
#[derive(Default)]
pub struct TusRegistry {
    endpoints: Vec<Arc<TusConfig>>,
    index: HashMap<String, EndpointId>,
    locks: ResourceLocks,
}

impl TusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint. The same canonical URL can only be registered once.
    pub fn register(&mut self, config: TusConfig) -> Result<EndpointId> {
        if !config.upload_url.starts_with('/') {
            return Err(TusError::Configuration(format!(
                "upload URL {:?} must start with '/'",
                config.upload_url
            )));
        }

        let key = config.upload_route();
        if key.contains(RESOURCE_UID_PLACEHOLDER) {
            return Err(TusError::Configuration(format!(
                "upload URL {:?} must not contain {}",
                config.upload_url, RESOURCE_UID_PLACEHOLDER
            )));
        }
        if self.index.contains_key(&key) {
            return Err(TusError::Configuration(format!(
                "Upload URL {:?} already registered",
                config.upload_url
            )));
        }

        let new_routes = [key.clone(), config.resource_route()];
        for existing in &self.endpoints {
            let existing_routes = [existing.upload_route(), existing.resource_route()];
            for new_route in &new_routes {
                if let Some(clash) = existing_routes
                    .iter()
                    .find(|route| routes_overlap(new_route, route))
                {
                    return Err(TusError::Configuration(format!(
                        "Upload URL {:?} route {:?} overlaps route {:?} of {:?}",
                        config.upload_url, new_route, clash, existing.upload_url
                    )));
                }
            }
        }

        let id = EndpointId(self.endpoints.len());
        tracing::debug!(
            upload_url = %key,
            upload_path = %config.upload_path.display(),
            route = %config.upload_route_name(),
            "Registered tus endpoint"
        );

        self.endpoints.push(Arc::new(config));
        self.index.insert(key, id);
        Ok(id)
    }

    /// Configuration behind a handle
    pub fn config(&self, id: EndpointId) -> Result<&Arc<TusConfig>> {
        self.endpoints
            .get(id.0)
            .ok_or_else(|| TusError::Configuration(format!("no tus endpoint {:?}", id)))
    }

    /// Find the endpoint serving a route template.
    ///
    /// Both the upload route and its resource sub-route resolve to the same
    /// endpoint.
    pub fn find(&self, route_path: &str) -> Result<EndpointId> {
        let mut key = canonical_url(route_path);
        if key.ends_with(&format!("/{}", RESOURCE_UID_PLACEHOLDER)) {
            key = upload_url(&key);
        }

        self.index.get(&key).copied().ok_or_else(|| {
            TusError::Configuration(format!(
                "Unable to find tus config for URL {:?}",
                route_path
            ))
        })
    }

    /// Registered endpoints in registration order
    pub fn endpoints(&self) -> impl Iterator<Item = (EndpointId, &Arc<TusConfig>)> {
        self.endpoints
            .iter()
            .enumerate()
            .map(|(i, config)| (EndpointId(i), config))
    }

    pub fn locks(&self) -> &ResourceLocks {
        &self.locks
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Mount every registered endpoint on a new router
    pub fn into_router(self) -> axum::Router {
        crate::routes::tus::router(self)
    }
}

/// Whether two canonical route templates cannot be mounted side by side.
///
/// Routes overlap when they have the same shape with every `{name}` taken as
/// a wildcard, or when they put differently named placeholders at the same
/// position after a common prefix.
fn routes_overlap(a: &str, b: &str) -> bool {
    let a: Vec<&str> = a.split('/').collect();
    let b: Vec<&str> = b.split('/').collect();

    for (x, y) in a.iter().zip(&b) {
        match (placeholder(x), placeholder(y)) {
            (Some(n), Some(m)) if n != m => return true,
            (Some(_), Some(_)) => {}
            (None, None) if x == y => {}
            _ => return false,
        }
    }

    a.len() == b.len()
}

fn placeholder(segment: &str) -> Option<&str> {
    segment.strip_prefix('{').and_then(|s| s.strip_suffix('}'))
}

/// Handler state: the registry plus the endpoint a route belongs to
#[derive(Clone)]
pub struct Endpoint {
    registry: Arc<TusRegistry>,
    id: EndpointId,
}

impl Endpoint {
    pub fn new(registry: Arc<TusRegistry>, id: EndpointId) -> Self {
        Self { registry, id }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn config(&self) -> Result<&Arc<TusConfig>> {
        self.registry.config(self.id)
    }

    pub fn locks(&self) -> &ResourceLocks {
        self.registry.locks()
    }
}
