//! HTTP handlers and the state they share.

pub mod health_handlers;
pub mod object_handlers;

use crate::services::object_store::ObjectStore;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: ObjectStore,
    /// Schema used when a request does not name one.
    pub default_schema: String,
    /// Upper bound on an uploaded payload, in bytes.
    pub max_object_size: usize,
}
