//! Health check endpoint

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::upload::TUS_API_VERSION;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub tus_version: &'static str,
    pub endpoints: usize,
}

/// Health route reporting how many upload endpoints are mounted
pub fn router(endpoints: usize) -> Router {
    Router::new().route(
        "/",
        get(move || async move {
            Json(HealthResponse {
                status: "healthy",
                version: env!("CARGO_PKG_VERSION"),
                tus_version: TUS_API_VERSION,
                endpoints,
            })
        }),
    )
}
