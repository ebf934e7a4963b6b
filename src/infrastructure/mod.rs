//! Storage and delivery adapters for the domain ports.

pub mod in_memory;
pub mod log_sink;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
