//! Storage core: the registry, its CSV catalogs and the payload store.

pub mod catalog;
pub mod error;
pub mod object_store;
pub mod registry;
pub mod storage_service;
