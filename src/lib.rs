//! tus Server
//!
//! Server side of the tus.io 1.0 resumable upload protocol for axum
//! applications. Register one [`TusConfig`] per upload URL in a
//! [`TusRegistry`], then mount [`routes::router`]:
//!
//! ```no_run
//! use tus_server::{routes, TusConfig, TusRegistry};
//!
//! # fn build() -> tus_server::Result<axum::Router> {
//! let mut registry = TusRegistry::new();
//! registry.register(TusConfig::new("/srv/uploads", "/uploads"))?;
//! registry.register(TusConfig::new("/srv/users/{username}", "/users/:username/uploads"))?;
//!
//! let app = routes::router(registry);
//! # Ok(app)
//! # }
//! ```

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod upload;

pub use config::{AppConfig, TusConfig};
pub use error::{Result, TusError};
pub use state::{Endpoint, EndpointId, TusRegistry};
pub use upload::{
    DescriptorCodec, JsonCodec, LoggingHandler, NoopHandler, RequestContext, Resource,
    ResourceStore, UploadCompleteHandler,
};
