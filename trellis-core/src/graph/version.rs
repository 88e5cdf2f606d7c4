//! Version Clock
//!
//! A single process-wide counter. Every source write advances it by exactly
//! one and stamps the written node with the new value. Dependents compare
//! stamps with strict greater-than against what they last saw; that is the
//! only change-detection mechanism in the engine.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static CLOCK: AtomicU64 = AtomicU64::new(0);

/// A point on the version clock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// "Never written / never computed".
    pub const MIN: Version = Version(0);

    /// Get the raw counter value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Version {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Advance the clock and return the new version.
pub fn next_version() -> Version {
    Version(CLOCK.fetch_add(1, Ordering::SeqCst) + 1)
}

/// Read the clock without advancing it.
pub fn current_version() -> Version {
    Version(CLOCK.load(Ordering::SeqCst))
}
