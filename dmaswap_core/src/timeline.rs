// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-buffer explicit-sync timelines.
//!
//! Each present buffer owns one kernel timeline shared with the compositor.
//! A frame moves the timeline forward by two points: the producer fence lands
//! on the acquire point, and the compositor signals the release point once it
//! is done reading.
//!
//! ```text
//! point:    n          n+1 (acquire)        n+2 (release)
//!           |--attach_fence-->|--advance_release-->|
//! ```

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Arc;

use rustix::io::Errno;

use crate::channel::{SurfaceChannel, TimelineId};
use crate::error::SyncError;
use crate::platform::{SyncobjDevice, SyncobjHandle, TimelineWaitMode, WaitDeadline};

/// A sync object that is destroyed when dropped unless kept.
struct ScopedSyncobj<'a> {
    device: &'a dyn SyncobjDevice,
    handle: SyncobjHandle,
}

impl<'a> ScopedSyncobj<'a> {
    fn create(device: &'a dyn SyncobjDevice) -> Result<Self, Errno> {
        let handle = device.create()?;
        Ok(Self { device, handle })
    }

    fn keep(self) -> SyncobjHandle {
        let handle = self.handle;
        core::mem::forget(self);
        handle
    }
}

impl Drop for ScopedSyncobj<'_> {
    fn drop(&mut self) {
        self.device.destroy(self.handle);
    }
}

/// A kernel timeline shared with the compositor.
pub struct Timeline {
    device: Arc<dyn SyncobjDevice>,
    handle: SyncobjHandle,
    remote: TimelineId,
    point: u64,
}

impl core::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Timeline")
            .field("handle", &self.handle)
            .field("remote", &self.remote)
            .field("point", &self.point)
            .finish_non_exhaustive()
    }
}

impl Timeline {
    /// Creates a timeline and imports it into the compositor.
    ///
    /// On failure nothing is left allocated.
    pub fn create(
        device: &Arc<dyn SyncobjDevice>,
        channel: &mut dyn SurfaceChannel,
    ) -> Result<Self, SyncError> {
        let syncobj = ScopedSyncobj::create(device.as_ref())
            .map_err(|errno| SyncError::kernel("create", errno))?;
        let fd = device
            .handle_to_fd(syncobj.handle)
            .map_err(|errno| SyncError::kernel("handle_to_fd", errno))?;
        let remote = channel.import_timeline(fd.as_fd())?;
        drop(fd);
        Ok(Self {
            device: Arc::clone(device),
            handle: syncobj.keep(),
            remote,
            point: 0,
        })
    }

    /// Kernel handle.
    #[must_use]
    pub fn handle(&self) -> SyncobjHandle {
        self.handle
    }

    /// Compositor-side id.
    #[must_use]
    pub fn remote(&self) -> TimelineId {
        self.remote
    }

    /// Current point: the last acquire or release point handed out.
    #[must_use]
    pub fn point(&self) -> u64 {
        self.point
    }

    /// Moves a producer fence onto the next point, which becomes the acquire
    /// point.
    ///
    /// The fence goes through a throwaway binary sync object so the timeline
    /// only changes once the whole transfer succeeded.
    pub fn attach_fence(&mut self, fence: BorrowedFd<'_>) -> Result<(), Errno> {
        let temp = ScopedSyncobj::create(self.device.as_ref())?;
        self.device.import_sync_file(temp.handle, fence)?;
        self.device
            .transfer(self.handle, self.point + 1, temp.handle, 0)?;
        self.point += 1;
        Ok(())
    }

    /// Signals the next point from the CPU and makes it the acquire point.
    ///
    /// Used after a CPU block on rendering when the fence could not be
    /// attached, so acquire/release points can still be advertised.
    pub fn signal_next(&mut self) -> Result<(), Errno> {
        self.device.timeline_signal(self.handle, self.point + 1)?;
        self.point += 1;
        Ok(())
    }

    /// Hands out the `(acquire, release)` pair for the frame being
    /// committed: the current point, then the point after it.
    pub fn advance_release(&mut self) -> (u64, u64) {
        let acquire = self.point;
        self.point += 1;
        (acquire, self.point)
    }

    /// Exports the current point as a sync file for the GPU to wait on.
    pub fn extract_sync_fd(&self) -> Result<OwnedFd, Errno> {
        let temp = ScopedSyncobj::create(self.device.as_ref())?;
        self.device.transfer(temp.handle, 0, self.handle, self.point)?;
        self.device.export_sync_file(temp.handle)
    }

    /// Blocks the CPU until the current point has signalled.
    pub fn wait_current(&self) -> Result<(), Errno> {
        self.device
            .timeline_wait(
                &[self.handle],
                &[self.point],
                WaitDeadline::Forever,
                TimelineWaitMode::ForSubmit,
            )
            .map(|_| ())
    }

    /// Releases the compositor import and the kernel object.
    pub fn destroy(self, channel: &mut dyn SurfaceChannel) {
        channel.destroy_timeline(self.remote);
    }
}

impl Drop for Timeline {
    fn drop(&mut self) {
        self.device.destroy(self.handle);
    }
}
