//! Core data models for the object catalog and its blob backends.
//!
//! `ObjectRecord` maps to the `objects` table via `sqlx::FromRow` and
//! serializes as JSON via `serde`. `BlobDocument` is the shape of a payload
//! in the document backend.

pub mod document;
pub mod object;
