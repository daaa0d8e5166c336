//! Shared domain definitions for `TaskPing`.
//!
//! Holds the data model (task groups, tasks, participants), the pure
//! ingestion path that turns uploaded sheet rows into task records, and the
//! validation rules the authoring dialog applies to operator input. Nothing
//! in this crate touches storage or the network.

pub mod ingest;
pub mod model;
pub mod sheet;
pub mod validate;

pub use validate::ValidationError;
