//! Opaque monotonically-ordered tag attached to every buffer to correlate
//! updates across consumers.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionNumber(u64);

impl VersionNumber {
    /// Mints a fresh, process-wide monotonically increasing version.
    pub fn new() -> Self {
        VersionNumber(NEXT_VERSION.fetch_add(1, Ordering::Relaxed))
    }

    /// The version that compares less than every minted version; used as
    /// the initial value before any read has completed.
    pub const fn none() -> Self {
        VersionNumber(0)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for VersionNumber {
    fn default() -> Self {
        VersionNumber::none()
    }
}

/// Data validity orthogonal to exceptions: a faulty write
/// marks the value, flows through the network, and is downgraded to `Ok`
/// by the next good read on the same accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Ok,
    Faulty,
}

impl Default for Validity {
    fn default() -> Self {
        Validity::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_monotonic() {
        let a = VersionNumber::new();
        let b = VersionNumber::new();
        assert!(b > a);
    }
}
