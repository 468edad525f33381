//! The Job Provisioning/Deprovisioning Engine (§4.1, §4.2, §4.4, §4.5).

pub mod contract_ids;
pub mod error;
pub mod models;
pub mod service;
pub mod shared_group_cache;

pub use error::JobError;
pub use models::{
    Allocation, ComputeNode, Job, JobComputeNode, JobStatus, JobStorageAccess, PortMapping,
    PortSelector, SecurityGroup, SwitchPort,
};
pub use service::JobService;
pub use shared_group_cache::SharedGroupCache;
