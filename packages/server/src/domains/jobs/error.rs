//! `JobError` — the behavioral-kind taxonomy of §7, as a `thiserror` enum so
//! call sites (and tests) match on variant rather than message text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    /// Unknown nodes, missing required configuration (§7 "Validation").
    #[error("validation failed: {0}")]
    Validation(String),

    /// An existing Job for this job-id is not in an admittable status
    /// (§4.1.1: anything other than {active, provisioning}).
    #[error("job {job_id} already exists with status {status}")]
    Conflict { job_id: String, status: String },

    /// Unique-constraint violation on Allocation insert, resolved to the
    /// holding job-ids (§7 "Allocation-conflict").
    #[error("nodes already allocated to other jobs: {0}")]
    AllocationConflict(String),

    /// A fatal (non-conflict, non-not-found) NCA failure, either during
    /// provisioning programming or deprovision cleanup (§7).
    #[error("network controller failure: {0}")]
    NcaFailure(String),

    /// The provisioning or deprovisioning operation exceeded its deadline
    /// (§5 "Timeouts").
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Any relational-store failure, wrapped verbatim (§7 "RS failure").
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}
