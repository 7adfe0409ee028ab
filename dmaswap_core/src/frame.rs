// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-frame submission steps.
//!
//! A frame moves through a fixed sequence of phases, once per call:
//!
//! ```text
//!   Idle ─► PacingWait ─► BufferAcquired ─► Synced ─► Submitted ─► Idle
//!     └────────────────────────┘
//!       (no wait needed)
//! ```
//!
//! Any failure before [`FramePhase::Submitted`] drops straight back to
//! [`FramePhase::Idle`] with nothing committed. The orchestration lives in
//! [`Surface::submit_frame`](crate::surface::Surface::submit_frame); this
//! module holds the fence hand-off and the request batch that ends in a
//! commit.

use core::time::Duration;
use std::os::fd::AsFd;

use crate::channel::{BufferId, ChannelCapabilities, DamageRect, SurfaceChannel};
use crate::display::DisplayInstance;
use crate::error::SyncError;
use crate::features::Feature;
use crate::pacing::Pacing;
use crate::swapchain::PresentBuffer;

/// Where a frame submission is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FramePhase {
    /// No frame in flight.
    #[default]
    Idle,
    /// Waiting for the previous frame's pacing signal.
    PacingWait,
    /// A present buffer has been selected.
    BufferAcquired,
    /// The producer fence was handed off or the CPU blocked on rendering.
    Synced,
    /// Attach and commit were sent.
    Submitted,
}

impl FramePhase {
    /// Returns `true` if `next` directly follows `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::PacingWait | Self::BufferAcquired)
                | (Self::PacingWait, Self::BufferAcquired)
                | (Self::BufferAcquired, Self::Synced)
                | (Self::Synced, Self::Submitted)
                | (_, Self::Idle)
        )
    }

    /// Moves to `next`.
    pub(crate) fn advance(&mut self, next: Self) {
        debug_assert!(
            self.can_advance_to(next),
            "invalid frame transition {self:?} -> {next:?}"
        );
        tracing::trace!(from = ?*self, to = ?next, "frame phase");
        *self = next;
    }
}

/// How the producer fence reached the compositor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceHandoff {
    /// Attached to the buffer's timeline or dma-buf.
    Gpu,
    /// The CPU blocked until rendering finished.
    CpuBlock,
}

/// Hands the rendering fence for `buffer` to the compositor.
///
/// With explicit sync the fence lands on the buffer's next timeline point;
/// if that fails the CPU blocks and the point is signalled from the CPU so
/// the acquire point is still valid. With implicit sync the fence is
/// attached to the dma-buf, or the CPU blocks if that is impossible.
pub(crate) fn sync_rendering(
    display: &DisplayInstance,
    buffer: &mut PresentBuffer,
) -> Result<FenceHandoff, SyncError> {
    let driver = display.driver();
    let fence = if driver.supports_native_fence() {
        match driver.create_render_fence() {
            Ok(fence) => Some(fence),
            Err(err) => {
                tracing::warn!(%err, "creating render fence failed; blocking on the GPU");
                None
            }
        }
    } else {
        None
    };

    if let Some(timeline) = buffer.timeline_mut() {
        if let Some(fence) = &fence {
            match display
                .features()
                .try_with(Feature::SyncobjImportSyncFile, || {
                    timeline.attach_fence(fence.as_fd())
                }) {
                Some(Ok(())) => return Ok(FenceHandoff::Gpu),
                Some(Err(errno)) => {
                    tracing::warn!(?errno, "attaching fence to timeline failed; blocking on the GPU");
                }
                None => {}
            }
        }
        driver.finish();
        timeline
            .signal_next()
            .map_err(|errno| SyncError::kernel("timeline_signal", errno))?;
        return Ok(FenceHandoff::CpuBlock);
    }

    if let (Some(fence), Some(dmabuf), Some(dmabuf_sync)) =
        (&fence, buffer.dmabuf(), display.dmabuf_sync())
    {
        if display.implicit_sync() {
            let imported = display.features().try_with(Feature::DmabufSyncFile, || {
                dmabuf_sync.import_sync_file(dmabuf.as_fd(), fence.as_fd())
            });
            if let Some(Ok(())) = imported {
                return Ok(FenceHandoff::Gpu);
            }
        }
    }
    driver.finish();
    Ok(FenceHandoff::CpuBlock)
}

/// Everything needed to build one frame's request batch.
#[derive(Debug)]
pub(crate) struct CommitRequest<'a> {
    pub(crate) buffer: BufferId,
    pub(crate) damage: &'a [DamageRect],
    pub(crate) interval: u32,
    pub(crate) margin: Duration,
}

/// Sends damage, sync points, attach, pacing requests and the commit.
///
/// With FIFO pacing and a non-zero interval a second commit with a barrier
/// wait follows, so a hidden surface still gets a discarded event in
/// finite time.
pub(crate) fn commit_frame(
    channel: &mut dyn SurfaceChannel,
    caps: ChannelCapabilities,
    pacing: &mut Pacing,
    buffer: &mut PresentBuffer,
    request: &CommitRequest<'_>,
) {
    if caps.damage_buffer && !request.damage.is_empty() {
        for rect in request.damage {
            channel.damage_buffer(*rect);
        }
    } else {
        channel.damage_all();
    }

    if let Some(timeline) = buffer.timeline_mut() {
        let (acquire, release) = timeline.advance_release();
        channel.set_acquire_point(timeline.remote(), acquire);
        channel.set_release_point(timeline.remote(), release);
    }

    channel.attach(request.buffer);

    if caps.fifo_pacing {
        channel.set_fifo_barrier();
        if request.interval > 0 {
            if caps.commit_timing {
                if let Some(target) = pacing.commit_target(request.interval, request.margin) {
                    channel.set_commit_timestamp(target);
                }
            }
            pacing.set_presentation(channel.request_presentation_feedback());
            channel.wait_fifo_barrier();
            channel.commit();
            channel.wait_fifo_barrier();
        }
    } else {
        pacing.set_frame_callback(channel.request_frame());
    }

    channel.commit();
    pacing.set_swap_sync(channel.request_sync());
}
