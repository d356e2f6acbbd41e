//! Integer handle types exposed across the crate boundary.
//!
//! Value `0` is reserved as the error sentinel on every handle type, matching
//! the C ABI's `cti_app_id_t`/`cti_session_id_t`/`cti_manifest_id_t`
//! contract: a handle of zero never refers to a live object.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! handle_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            /// The reserved error sentinel. Never returned by a successful allocation.
            pub const SENTINEL: Self = Self(0);

            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn as_raw(self) -> u64 {
                self.0
            }

            pub const fn is_sentinel(self) -> bool {
                self.0 == 0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

handle_type!(AppId);
handle_type!(SessionId);
handle_type!(ManifestId);

/// Opaque handle returned by the FE daemon's `register_app` response.
///
/// Tracked on the owning `App` so MPIR state can outlive a caller fork or a
/// re-load of this library in a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DaemonAppId(u64);

impl DaemonAppId {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Process-wide monotonic handle allocator.
///
/// Guarantees every handle issued in the process's lifetime is unique, even
/// across deregistration (spec.md invariant 1): this counter never resets,
/// so a released handle's numeric value is never reissued.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next handle value, starting at 1 (0 is the sentinel).
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_zero() {
        assert!(AppId::SENTINEL.is_sentinel());
        assert_eq!(AppId::SENTINEL.as_raw(), 0);
    }

    #[test]
    fn allocator_never_reissues() {
        let alloc = HandleAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let h = alloc.allocate();
            assert!(seen.insert(h), "handle {h} issued twice");
        }
    }

    #[test]
    fn allocator_skips_sentinel() {
        let alloc = HandleAllocator::new();
        assert_ne!(alloc.allocate(), 0);
    }

    #[test]
    fn handle_display() {
        let id = AppId::from_raw(42);
        assert_eq!(id.to_string(), "42");
    }
}
