//! Liveness and readiness endpoints.

use crate::handlers::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use std::fmt::Display;

#[derive(Serialize)]
pub struct Liveness {
    status: &'static str,
}

/// `GET /healthz`: no I/O, always 200.
pub async fn healthz() -> Json<Liveness> {
    Json(Liveness { status: "ok" })
}

#[derive(Serialize)]
pub struct Readiness {
    ready: bool,
    /// Blobs left behind by failed best-effort cleanup since startup.
    leaked_blobs: u64,
    checks: Vec<Check>,
}

#[derive(Serialize)]
struct Check {
    name: &'static str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Check {
    fn new<E: Display>(name: &'static str, outcome: Result<(), E>) -> Self {
        let error = outcome.err().map(|e| e.to_string());
        Self {
            name,
            ok: error.is_none(),
            error,
        }
    }
}

/// `GET /readyz`: pings the catalog and the blob backend.
///
/// 503 if either check fails.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let backend = state.store.backend();
    let checks = vec![
        Check::new("catalog", state.store.catalog().ping().await),
        Check::new(backend.kind(), backend.ping().await),
    ];
    let ready = checks.iter().all(|p| p.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(Readiness {
            ready,
            leaked_blobs: state.store.leaked_blobs(),
            checks,
        }),
    )
}
