// Fabric Provisioning Core
//
// Control-plane service that provisions and tears down fabric-level network
// access for short-lived compute jobs. See `domains::jobs` for the
// provisioning/deprovisioning engine and `kernel::deploy_batcher` for the
// cross-replica deploy coalescer.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;

pub use config::Config;
