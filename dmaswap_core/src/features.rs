// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Kernel feature detection with negative caching.
//!
//! Some ioctls are optional: older kernels or drivers answer them with
//! "not supported". Each feature starts out unknown, is attempted on first
//! use, and is downgraded permanently the first time it fails with a
//! not-supported error class. Other failures leave the state alone so a
//! transient error does not disable a working path.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, LazyLock};

use rustix::io::Errno;

const UNKNOWN: u8 = 0;
const SUPPORTED: u8 = 1;
const UNSUPPORTED: u8 = 2;

/// An optional kernel capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Importing a sync file into a timeline syncobj point.
    SyncobjImportSyncFile,
    /// `DMA_BUF_IOCTL_IMPORT_SYNC_FILE` / `EXPORT_SYNC_FILE`.
    DmabufSyncFile,
}

impl Feature {
    const fn index(self) -> usize {
        match self {
            Self::SyncobjImportSyncFile => 0,
            Self::DmabufSyncFile => 1,
        }
    }
}

/// Returns `true` for error classes that mean "this kernel can't do it".
#[must_use]
pub fn is_unsupported_errno(errno: Errno) -> bool {
    matches!(
        errno,
        Errno::NOTTY | Errno::OPNOTSUPP | Errno::INVAL | Errno::NOSYS
    )
}

/// Per-feature tri-state: unknown, supported, or permanently unsupported.
#[derive(Debug)]
pub struct FeatureCache {
    states: [AtomicU8; 2],
}

impl Default for FeatureCache {
    fn default() -> Self {
        Self::new()
    }
}

static PROCESS_FEATURES: LazyLock<Arc<FeatureCache>> =
    LazyLock::new(|| Arc::new(FeatureCache::new()));

impl FeatureCache {
    /// Creates a cache with every feature unknown.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            states: [AtomicU8::new(UNKNOWN), AtomicU8::new(UNKNOWN)],
        }
    }

    /// The cache shared by every display instance in the process.
    #[must_use]
    pub fn process() -> Arc<Self> {
        Arc::clone(&PROCESS_FEATURES)
    }

    /// Returns `false` only once the feature has been ruled out.
    #[must_use]
    pub fn is_available(&self, feature: Feature) -> bool {
        self.states[feature.index()].load(Ordering::Acquire) != UNSUPPORTED
    }

    /// Records the outcome of an attempt and passes it through.
    ///
    /// A not-supported failure downgrades the feature for good.
    pub fn record<T>(&self, feature: Feature, result: Result<T, Errno>) -> Result<T, Errno> {
        let state = &self.states[feature.index()];
        match &result {
            Ok(_) => {
                let _ = state.compare_exchange(
                    UNKNOWN,
                    SUPPORTED,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
            Err(errno) if is_unsupported_errno(*errno) => {
                if state.swap(UNSUPPORTED, Ordering::AcqRel) != UNSUPPORTED {
                    tracing::warn!(?feature, ?errno, "kernel feature unsupported; disabling");
                }
            }
            Err(_) => {}
        }
        result
    }

    /// Runs `attempt` unless the feature has been ruled out, recording the
    /// outcome. Returns [`None`] without calling `attempt` when ruled out.
    pub fn try_with<T>(
        &self,
        feature: Feature,
        attempt: impl FnOnce() -> Result<T, Errno>,
    ) -> Option<Result<T, Errno>> {
        if !self.is_available(feature) {
            return None;
        }
        Some(self.record(feature, attempt()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Feature, FeatureCache};
    use rustix::io::Errno;

    #[test]
    fn process_cache_is_shared() {
        let a = FeatureCache::process();
        let b = FeatureCache::process();
        assert!(std::sync::Arc::ptr_eq(&a, &b), "one cache per process");
    }

    #[test]
    fn features_start_available() {
        let cache = FeatureCache::new();
        assert!(cache.is_available(Feature::SyncobjImportSyncFile));
        assert!(cache.is_available(Feature::DmabufSyncFile));
    }

    #[test]
    fn not_supported_errors_downgrade_permanently() {
        let cache = FeatureCache::new();
        let result: Result<(), Errno> = cache.record(Feature::DmabufSyncFile, Err(Errno::NOTTY));
        assert_eq!(result, Err(Errno::NOTTY));
        assert!(!cache.is_available(Feature::DmabufSyncFile));

        let _ = cache.record(Feature::DmabufSyncFile, Ok(()));
        assert!(
            !cache.is_available(Feature::DmabufSyncFile),
            "a later success must not re-enable a ruled-out feature"
        );
        assert!(cache.is_available(Feature::SyncobjImportSyncFile));
    }

    #[test]
    fn transient_errors_do_not_downgrade() {
        let cache = FeatureCache::new();
        let _ = cache.record::<()>(Feature::SyncobjImportSyncFile, Err(Errno::NOMEM));
        assert!(cache.is_available(Feature::SyncobjImportSyncFile));
    }

    #[test]
    fn ruled_out_features_are_not_attempted() {
        let cache = FeatureCache::new();
        let mut calls = 0;
        for _ in 0..3 {
            let _ = cache.try_with(Feature::SyncobjImportSyncFile, || {
                calls += 1;
                Err::<(), _>(Errno::OPNOTSUPP)
            });
        }
        assert_eq!(calls, 1, "the kernel should only be asked once");
    }
}
