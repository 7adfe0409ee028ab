// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Driver and kernel services consumed as black boxes.
//!
//! The presentation core never allocates GPU memory, creates fences or
//! issues ioctls itself. It calls through these traits instead:
//!
//! | Trait | Provides |
//! |---|---|
//! | [`GpuDriver`] | color-buffer alloc/import/export/copy, fences, render surfaces |
//! | [`BufferAllocator`] | GBM-style buffer objects with modifier negotiation |
//! | [`SyncobjDevice`] | DRM timeline sync objects |
//! | [`DmabufSync`] | implicit fences attached to a dma-buf |
//!
//! Kernel-facing traits report raw [`Errno`] values so that the caller can
//! tell "not supported" apart from transient failures (see
//! [`FeatureCache`](crate::features::FeatureCache)).

use core::fmt;
use std::os::fd::{BorrowedFd, OwnedFd};

use rustix::io::Errno;

use crate::error::DriverError;
use crate::format::{Fourcc, Modifier};

/// Opaque handle to a driver color buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorBuffer(pub u64);

/// Opaque handle to the driver's internal rendering surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderSurfaceId(pub u64);

/// Opaque driver framebuffer-config identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConfigId(pub u64);

/// A dma-buf plane exported from a color buffer.
#[derive(Debug)]
pub struct ExportedBuffer {
    /// The dma-buf descriptor.
    pub fd: OwnedFd,
    /// Row pitch in bytes.
    pub stride: u32,
    /// Plane offset in bytes.
    pub offset: u32,
}

/// A buffer object created by a [`BufferAllocator`].
#[derive(Debug)]
pub struct BufferObject {
    /// Exported plane.
    pub plane: ExportedBuffer,
    /// Modifier the allocator picked.
    pub modifier: Modifier,
}

/// Callback the driver invokes when it wants the surface's buffers
/// refreshed, possibly from another thread.
pub type UpdateCallback = Box<dyn Fn() + Send + Sync>;

/// Rendering driver primitives.
pub trait GpuDriver: fmt::Debug + Send + Sync {
    /// Allocates a color buffer with the given layout. `linear` requests a
    /// buffer readable by another device.
    fn alloc_color_buffer(
        &self,
        width: u32,
        height: u32,
        fourcc: Fourcc,
        modifier: Modifier,
        linear: bool,
    ) -> Result<ColorBuffer, DriverError>;

    /// Imports a dma-buf as a renderable color buffer.
    fn import_color_buffer(
        &self,
        plane: &ExportedBuffer,
        width: u32,
        height: u32,
        fourcc: Fourcc,
        modifier: Modifier,
    ) -> Result<ColorBuffer, DriverError>;

    /// Exports a color buffer as a dma-buf.
    fn export_color_buffer(&self, buffer: ColorBuffer) -> Result<ExportedBuffer, DriverError>;

    /// Releases a color buffer.
    fn free_color_buffer(&self, buffer: ColorBuffer);

    /// Copies the contents of `src` into `dst`.
    fn copy_color_buffer(&self, src: ColorBuffer, dst: ColorBuffer) -> Result<(), DriverError>;

    /// Returns `true` if [`Self::create_render_fence`] is usable.
    fn supports_native_fence(&self) -> bool;

    /// Creates a fence for all rendering submitted so far, flushes, and
    /// returns it as a sync file.
    fn create_render_fence(&self) -> Result<OwnedFd, DriverError>;

    /// Makes subsequent GPU work wait for `fence` without stalling the CPU.
    fn wait_fence(&self, fence: OwnedFd) -> Result<(), DriverError>;

    /// Blocks the CPU until all submitted rendering has completed.
    fn finish(&self);

    /// Creates the internal rendering surface targeting `back`.
    fn create_render_surface(
        &self,
        config: ConfigId,
        back: ColorBuffer,
        on_update: UpdateCallback,
    ) -> Result<RenderSurfaceId, DriverError>;

    /// Points the rendering surface at a new back buffer.
    fn set_color_buffers(
        &self,
        surface: RenderSurfaceId,
        back: ColorBuffer,
    ) -> Result<(), DriverError>;

    /// Detaches the rendering surface. Returns only once any in-progress
    /// update callback has completed.
    fn destroy_render_surface(&self, surface: RenderSurfaceId);
}

/// GBM-style buffer-object allocation.
pub trait BufferAllocator: fmt::Debug + Send + Sync {
    /// Allocates a buffer, letting the allocator pick from `modifiers`.
    ///
    /// An empty `modifiers` slice requests an implicit layout. `scanout`
    /// requests a buffer the display engine can scan out directly.
    fn create_buffer(
        &self,
        width: u32,
        height: u32,
        fourcc: Fourcc,
        modifiers: &[Modifier],
        scanout: bool,
    ) -> Result<BufferObject, Errno>;
}

/// Kernel sync-object handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SyncobjHandle(pub u32);

/// How [`SyncobjDevice::timeline_wait`] decides a point is ready.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimelineWaitMode {
    /// Wait until a fence has been submitted for the point.
    Available,
    /// Wait until the point has signalled, waiting for submission first.
    ForSubmit,
}

/// Deadline for [`SyncobjDevice::timeline_wait`] on `CLOCK_MONOTONIC`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitDeadline {
    /// Check without blocking.
    Poll,
    /// Block until something is ready.
    Forever,
    /// Block until this absolute time in nanoseconds.
    At(i64),
}

impl WaitDeadline {
    /// Returns the absolute timeout in nanoseconds used by the ioctl.
    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        match self {
            Self::Poll => 0,
            Self::Forever => i64::MAX,
            Self::At(nanos) => nanos,
        }
    }
}

/// DRM sync-object primitives.
pub trait SyncobjDevice: fmt::Debug + Send + Sync {
    /// Creates a sync object.
    fn create(&self) -> Result<SyncobjHandle, Errno>;

    /// Destroys a sync object.
    fn destroy(&self, handle: SyncobjHandle);

    /// Exports a sync object as a shareable descriptor.
    fn handle_to_fd(&self, handle: SyncobjHandle) -> Result<OwnedFd, Errno>;

    /// Replaces the fence of a binary sync object with a sync file.
    fn import_sync_file(&self, handle: SyncobjHandle, sync_file: BorrowedFd<'_>)
    -> Result<(), Errno>;

    /// Exports the fence of a binary sync object as a sync file.
    fn export_sync_file(&self, handle: SyncobjHandle) -> Result<OwnedFd, Errno>;

    /// Copies the fence at `src_point` of `src` to `dst_point` of `dst`.
    /// Point zero addresses a binary sync object.
    fn transfer(
        &self,
        dst: SyncobjHandle,
        dst_point: u64,
        src: SyncobjHandle,
        src_point: u64,
    ) -> Result<(), Errno>;

    /// Waits for any of the `(handle, point)` pairs and returns the index of
    /// the first ready one. Times out with [`Errno::TIME`].
    fn timeline_wait(
        &self,
        handles: &[SyncobjHandle],
        points: &[u64],
        deadline: WaitDeadline,
        mode: TimelineWaitMode,
    ) -> Result<usize, Errno>;

    /// Signals `point` on a timeline from the CPU.
    fn timeline_signal(&self, handle: SyncobjHandle, point: u64) -> Result<(), Errno>;
}

/// Implicit fences attached to dma-bufs.
pub trait DmabufSync: fmt::Debug + Send + Sync {
    /// Adds `sync_file` as a write fence on `dmabuf`.
    fn import_sync_file(&self, dmabuf: BorrowedFd<'_>, sync_file: BorrowedFd<'_>)
    -> Result<(), Errno>;

    /// Exports the fences a writer would wait on as a sync file.
    fn export_sync_file(&self, dmabuf: BorrowedFd<'_>) -> Result<OwnedFd, Errno>;
}
