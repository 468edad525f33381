//! Kernel — core infrastructure: the database pool, the Network Controller
//! Adapter client, the deploy batcher, and the dependency container that
//! wires them together for `main`.
//!
//! IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
//! Business logic belongs in the domain layers (`crate::domains`).

pub mod deploy_batcher;
pub mod deps;
pub mod nca;
pub mod nca_http;
pub mod nca_mock;
pub mod sweeper;

pub use deploy_batcher::{DeployBatcher, DeployError};
pub use deps::ServerKernel;
pub use nca::{NcaError, NcaResult, NetworkControllerAdapter};
pub use nca_http::NetworkControllerClient;
pub use sweeper::{spawn_sweeper, sweep_expired_jobs};
