//! Plain HTTP handlers served next to the relay endpoint.

use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Json},
};
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "Jarvis Relay",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Answers every unknown path with an empty 404 and asks hyper to drop the
/// connection afterwards, so no upgrade is ever negotiated there.
///
/// This is not a bare socket teardown: axum handlers cannot destroy the
/// connection, so the client does see a status line before the close.
pub async fn reject() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, [(header::CONNECTION, "close")])
}
