//! Storage core: naming, the two stores, and the coordinator tying them together.

pub mod byte_store;
pub mod metadata_store;
pub mod naming;
pub mod storage_service;

#[cfg(test)]
pub mod test_support;
