//! Core data models for the object store.
//!
//! These entities are the in-memory shape of the registry. They map one-to-one
//! onto catalog rows (see `services::catalog`) and serialize as JSON via `serde`
//! for the health endpoints and tests.

pub mod bucket;
pub mod object;
