use thiserror::Error;

/// Errors surfaced by the key-value coordinator contract.
///
/// Mirrors the behavioral-kind taxonomy used elsewhere in this workspace:
/// callers match on the variant, not on a formatted message.
#[derive(Debug, Error)]
pub enum KvcError {
    /// `AcquireLock` could not obtain the lock because another holder has it.
    #[error("lock not acquired for key {key}")]
    LockNotAcquired { key: String },

    /// The underlying store rejected the call (connection, timeout, protocol).
    #[error("kv store error: {0}")]
    Backend(#[from] fred::error::Error),
}

pub type Result<T> = std::result::Result<T, KvcError>;
