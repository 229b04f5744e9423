//! Defines routes for object operations.
//!
//! ## Structure
//! - **Health endpoints** (mounted at root)
//!   - `GET /healthz`, `GET /readyz`
//!
//! - **Object-level endpoints** (mounted under the API prefix)
//!   - `PUT|POST /objects/{bucket}/{*key}`: upload object
//!   - `GET      /objects/{bucket}/{*key}?token=`: download object
//!   - `DELETE   /objects/{bucket}/{*key}`: remove object
//!   - `GET      /info/{bucket}/{*key}`: metadata and download URL
//!
//! Keys may contain `/`, so they are matched as wildcards and arrive
//! percent-decoded.

use crate::handlers::{
    AppState,
    health_handlers::{healthz, readyz},
    object_handlers::{delete_object, download_object, get_object_info, upload_object},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, put},
};

/// Build the router. `api_prefix` is where object routes are nested
/// (empty for the root); `max_body` caps request bodies.
pub fn routes(api_prefix: &str, max_body: usize) -> Router<AppState> {
    let objects = Router::new()
        .route(
            "/objects/{bucket}/{*key}",
            put(upload_object)
                .post(upload_object)
                .get(download_object)
                .delete(delete_object),
        )
        .route("/info/{bucket}/{*key}", get(get_object_info))
        .layer(DefaultBodyLimit::max(max_body));

    let prefix = api_prefix.trim_end_matches('/');
    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz));

    if prefix.is_empty() {
        router.merge(objects)
    } else {
        router.nest(prefix, objects)
    }
}
