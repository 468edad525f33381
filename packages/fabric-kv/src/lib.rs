//! Key-value coordination primitives shared by the fabric provisioning core.
//!
//! This crate exists independently of `server` so the coordination logic
//! (distributed lock, counter-with-TTL) can be unit-tested and reused without
//! pulling in the rest of the service, mirroring how this workspace pulls
//! reusable infrastructure out of the main service crate.

mod error;
mod fred_kvc;
mod kvc;
mod lock;
mod mock;

pub use error::{KvcError, Result};
pub use fred_kvc::FredKvc;
pub use kvc::KeyValueCoordinator;
pub use lock::{acquire_lock, LockGuard};
pub use mock::MockKvc;
