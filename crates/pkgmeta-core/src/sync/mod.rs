//! In-process coordination: keyed slots, single-flight caching, identity locks.

mod keyed;
mod package_lock;
mod single_flight;

pub use keyed::{KeyedGuard, KeyedLocks};
pub use package_lock::{PackageLockManager, PackageLockToken};
pub use single_flight::SingleFlightCache;
