//! The Storage Service (§4.6): per-node storage security groups.

pub mod service;

pub use service::{StoragePort, StorageService};
