// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-surface compositor channel.
//!
//! All protocol I/O for one surface goes through exactly one
//! [`SurfaceChannel`]. Requests are plain method calls; events are read back
//! as [`SurfaceEvent`] values after a dispatch, so each consumer folds them
//! through a single `handle` entry point.
//!
//! Protocol objects are named by small copyable ids ([`BufferId`],
//! [`TimelineId`], [`CallbackId`], [`PresentationId`]) so the core can hold
//! them without borrowing the channel.

use core::fmt;
use std::os::fd::BorrowedFd;

use crate::error::ChannelError;
use crate::feedback::FeedbackEvent;
use crate::format::{Fourcc, Modifier};
use crate::time::{Clock, HostTime};

/// A compositor-side buffer (`wl_buffer`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// A timeline imported into the compositor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimelineId(pub u64);

/// A one-shot completion callback (`wl_callback`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// A presentation-feedback object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PresentationId(pub u64);

/// A damaged rectangle in buffer coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DamageRect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

/// Everything the compositor needs to wrap a dma-buf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DmabufDesc {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Presented pixel format.
    pub fourcc: Fourcc,
    /// Memory layout.
    pub modifier: Modifier,
    /// Row pitch in bytes.
    pub stride: u32,
    /// Plane offset in bytes.
    pub offset: u32,
}

/// Which optional protocols the compositor offers this surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelCapabilities {
    /// A sync-object manager is bound.
    pub explicit_sync: bool,
    /// Both a FIFO manager and presentation timing are bound.
    pub fifo_pacing: bool,
    /// A commit-timing manager is bound. Only used together with
    /// `fifo_pacing`.
    pub commit_timing: bool,
    /// The surface accepts buffer-coordinate damage.
    pub damage_buffer: bool,
    /// Per-surface dma-buf feedback is available.
    pub surface_feedback: bool,
}

/// An event read from the channel.
#[derive(Debug)]
pub enum SurfaceEvent {
    /// The compositor no longer reads from this buffer.
    BufferReleased(BufferId),
    /// A frame callback or display sync completed.
    CallbackDone(CallbackId),
    /// A frame was shown.
    Presented {
        /// Which feedback object.
        id: PresentationId,
        /// When it was shown, on the presentation clock.
        timestamp: HostTime,
        /// Output refresh period in nanoseconds, or zero if unknown.
        refresh_ns: u32,
    },
    /// A frame was never shown.
    Discarded(PresentationId),
    /// Surface dma-buf feedback.
    Feedback(FeedbackEvent),
}

/// Protocol operations for one surface.
///
/// Request methods only queue; nothing reaches the compositor until
/// [`Self::flush`] or a dispatch call.
pub trait SurfaceChannel: fmt::Debug + Send {
    /// Optional protocols available for this surface.
    fn capabilities(&self) -> ChannelCapabilities;

    /// The compositor's presentation clock.
    fn presentation_clock(&self) -> Clock;

    /// Handles already-received events without blocking.
    fn dispatch_pending(&mut self) -> Result<(), ChannelError>;

    /// Flushes, then blocks until at least one event has been handled.
    fn blocking_dispatch(&mut self) -> Result<(), ChannelError>;

    /// Flushes and waits until the compositor has processed every request.
    fn roundtrip(&mut self) -> Result<(), ChannelError>;

    /// Sends queued requests.
    fn flush(&mut self) -> Result<(), ChannelError>;

    /// Pops the oldest handled event.
    fn next_event(&mut self) -> Option<SurfaceEvent>;

    /// Wraps a dma-buf as a compositor buffer. Blocks until the compositor
    /// accepts or rejects it.
    fn share_dmabuf(
        &mut self,
        dmabuf: BorrowedFd<'_>,
        desc: &DmabufDesc,
    ) -> Result<BufferId, ChannelError>;

    /// Destroys a compositor buffer.
    fn destroy_buffer(&mut self, buffer: BufferId);

    /// Creates the per-surface explicit-sync object.
    fn enable_explicit_sync(&mut self) -> Result<(), ChannelError>;

    /// Imports a sync-object descriptor as a timeline.
    fn import_timeline(&mut self, syncobj: BorrowedFd<'_>) -> Result<TimelineId, ChannelError>;

    /// Destroys an imported timeline.
    fn destroy_timeline(&mut self, timeline: TimelineId);

    /// Sets the acquire point for the next commit.
    fn set_acquire_point(&mut self, timeline: TimelineId, point: u64);

    /// Sets the release point for the next commit.
    fn set_release_point(&mut self, timeline: TimelineId, point: u64);

    /// Damages a rectangle in buffer coordinates.
    fn damage_buffer(&mut self, rect: DamageRect);

    /// Damages the whole surface.
    fn damage_all(&mut self);

    /// Attaches a buffer for the next commit.
    fn attach(&mut self, buffer: BufferId);

    /// Commits pending state.
    fn commit(&mut self);

    /// Requests a frame callback for the next commit.
    fn request_frame(&mut self) -> CallbackId;

    /// Requests a display-level sync callback.
    fn request_sync(&mut self) -> CallbackId;

    /// Abandons a callback; its completion will not be reported.
    fn destroy_callback(&mut self, callback: CallbackId);

    /// Sets a FIFO barrier on the next commit.
    fn set_fifo_barrier(&mut self);

    /// Makes the next commit wait for the previous barrier.
    fn wait_fifo_barrier(&mut self);

    /// Asks the compositor not to apply the next commit before `target`.
    fn set_commit_timestamp(&mut self, target: HostTime);

    /// Requests presentation feedback for the next commit.
    fn request_presentation_feedback(&mut self) -> PresentationId;

    /// Abandons a presentation-feedback object.
    fn destroy_presentation_feedback(&mut self, feedback: PresentationId);

    /// Subscribes to per-surface dma-buf feedback.
    fn subscribe_surface_feedback(&mut self) -> Result<(), ChannelError>;

    /// Drops the per-surface feedback subscription and every remaining
    /// per-surface protocol object.
    fn shutdown(&mut self);
}
