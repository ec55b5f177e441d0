//! GET /health

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub version: String,
}

pub async fn health() -> Json<HealthOut> {
    Json(HealthOut {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
