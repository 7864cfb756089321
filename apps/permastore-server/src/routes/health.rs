//! Health check and version endpoints

use axum::Json;
use serde::Serialize;

use crate::package::{BAGIT_VERSION, FORMAT_VERSION};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: "permastore-server",
    })
}

/// Versions a stored package depends on
#[derive(Serialize)]
pub struct VersionResponse {
    pub api: &'static str,
    pub package_format: &'static str,
    pub bagit: &'static str,
}

pub async fn version_info() -> Json<VersionResponse> {
    Json(VersionResponse {
        api: env!("CARGO_PKG_VERSION"),
        package_format: FORMAT_VERSION,
        bagit: BAGIT_VERSION,
    })
}
