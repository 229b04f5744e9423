//! Storage core: catalog, blob backends, signatures, tokens and the object
//! store that sequences them.

pub mod blob;
pub mod catalog;
pub mod error;
pub mod maintenance;
pub mod object_store;
pub mod signature;
pub mod token;
pub mod validation;
