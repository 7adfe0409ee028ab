// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The present-buffer pool.
//!
//! A [`Swapchain`] owns one render buffer and up to
//! [`PresentConfig::max_present_buffers`](crate::config::PresentConfig)
//! present buffers of one size and layout. In direct mode the render target
//! is always the current back buffer, which is itself a present buffer. In
//! PRIME mode the render buffer is private and every frame is copied into a
//! free linear present buffer.
//!
//! Buffer status only moves forward:
//!
//! ```text
//!   Idle ──submit──► InUse ──release event──► IdleNotified ──fence wait──► Idle
//!                      └──────────── timeline wait (explicit) ───────────────┘
//! ```
//!
//! Buffers are kept in a list where new buffers go to the front and released
//! buffers move to the back, so the search for an idle buffer prefers the
//! one released longest ago.

use std::collections::VecDeque;
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use rustix::event::{PollFd, PollFlags};
use rustix::io::Errno;
use rustix::time::Timespec;

use crate::channel::{BufferId, DmabufDesc, SurfaceChannel, SurfaceEvent};
use crate::display::DisplayInstance;
use crate::error::{AllocationError, SyncError};
use crate::features::Feature;
use crate::format::{Fourcc, Modifier};
use crate::platform::{
    ColorBuffer, ExportedBuffer, SyncobjDevice, TimelineWaitMode, WaitDeadline,
};
use crate::timeline::Timeline;

/// Where a present buffer is in its reuse cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferStatus {
    /// Free for rendering or copying into.
    Idle,
    /// Attached and committed; the compositor may be reading it.
    InUse,
    /// The compositor released it, but its last read may still be in
    /// flight. Only used with implicit sync.
    IdleNotified,
}

/// One shareable allocation bound to a compositor buffer.
#[derive(Debug)]
pub struct PresentBuffer {
    id: BufferId,
    color: ColorBuffer,
    dmabuf: Option<OwnedFd>,
    status: BufferStatus,
    timeline: Option<Timeline>,
    age: u32,
}

impl PresentBuffer {
    /// Compositor-side buffer id.
    #[must_use]
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Driver color buffer.
    #[must_use]
    pub fn color(&self) -> ColorBuffer {
        self.color
    }

    /// Reuse status.
    #[must_use]
    pub fn status(&self) -> BufferStatus {
        self.status
    }

    /// Frames since this buffer's contents were last presented, or zero if
    /// it has never been presented.
    #[must_use]
    pub fn age(&self) -> u32 {
        self.age
    }

    /// The dma-buf, kept open only while implicit sync needs it.
    #[must_use]
    pub fn dmabuf(&self) -> Option<&OwnedFd> {
        self.dmabuf.as_ref()
    }

    /// Explicit-sync timeline.
    #[must_use]
    pub fn timeline(&self) -> Option<&Timeline> {
        self.timeline.as_ref()
    }

    pub(crate) fn timeline_mut(&mut self) -> Option<&mut Timeline> {
        self.timeline.as_mut()
    }
}

/// Geometry and layout of a swapchain.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc<'a> {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Format the driver renders in.
    pub render_fourcc: Fourcc,
    /// Format the compositor is told about.
    pub present_fourcc: Fourcc,
    /// Present through private render buffer plus linear copies.
    pub prime: bool,
    /// Modifiers the allocator may pick from. Empty requests an implicit
    /// layout.
    pub modifiers: &'a [Modifier],
    /// Give each present buffer a timeline.
    pub explicit_sync: bool,
}

/// A pool of present buffers with one size and layout.
#[derive(Debug)]
pub struct Swapchain {
    display: Arc<DisplayInstance>,
    width: u32,
    height: u32,
    render_fourcc: Fourcc,
    present_fourcc: Fourcc,
    modifier: Modifier,
    prime: bool,
    syncobj: Option<Arc<dyn SyncobjDevice>>,
    render: ColorBuffer,
    buffers: Vec<PresentBuffer>,
    current_back: Option<BufferId>,
}

impl Swapchain {
    /// Allocates the render buffer and, in direct mode, registers it as the
    /// first present buffer.
    ///
    /// PRIME swapchains start without present buffers; the first frame
    /// allocates one. On failure everything allocated so far is released.
    pub fn create(
        display: &Arc<DisplayInstance>,
        channel: &mut dyn SurfaceChannel,
        desc: &SwapchainDesc<'_>,
    ) -> Result<Self, AllocationError> {
        let syncobj = if desc.explicit_sync {
            Some(Arc::clone(display.syncobj().ok_or(
                AllocationError::Kernel {
                    operation: "syncobj",
                    errno: Errno::NODEV,
                },
            )?))
        } else {
            None
        };

        let bo = display
            .allocator()
            .create_buffer(
                desc.width,
                desc.height,
                desc.render_fourcc,
                desc.modifiers,
                !desc.prime,
            )
            .map_err(|errno| AllocationError::Kernel {
                operation: "create_buffer",
                errno,
            })?;
        let render = display.driver().import_color_buffer(
            &bo.plane,
            desc.width,
            desc.height,
            desc.render_fourcc,
            bo.modifier,
        )?;

        let mut swapchain = Self {
            display: Arc::clone(display),
            width: desc.width,
            height: desc.height,
            render_fourcc: desc.render_fourcc,
            present_fourcc: desc.present_fourcc,
            modifier: if desc.prime {
                Modifier::LINEAR
            } else {
                bo.modifier
            },
            prime: desc.prime,
            syncobj,
            render,
            buffers: Vec::new(),
            current_back: None,
        };

        if !desc.prime {
            match swapchain.append(channel, render, bo.plane) {
                Ok(id) => swapchain.current_back = Some(id),
                Err(err) => {
                    display.driver().free_color_buffer(render);
                    swapchain.release(channel);
                    return Err(err);
                }
            }
        }

        tracing::debug!(
            width = desc.width,
            height = desc.height,
            modifier = ?swapchain.modifier,
            prime = desc.prime,
            "swapchain created"
        );
        Ok(swapchain)
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Layout of the present buffers.
    #[must_use]
    pub fn modifier(&self) -> Modifier {
        self.modifier
    }

    /// Whether this swapchain presents through PRIME.
    #[must_use]
    pub fn is_prime(&self) -> bool {
        self.prime
    }

    /// The buffer the driver renders into.
    #[must_use]
    pub fn render_buffer(&self) -> ColorBuffer {
        self.render
    }

    /// The current back buffer. Always [`None`] under PRIME.
    #[must_use]
    pub fn current_back(&self) -> Option<&PresentBuffer> {
        self.current_back.and_then(|id| self.buffer(id))
    }

    /// Number of present buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Returns `true` if no present buffer exists yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Present buffers, most preferred for reuse first.
    pub fn buffers(&self) -> impl Iterator<Item = &PresentBuffer> {
        self.buffers.iter()
    }

    /// Looks up a present buffer.
    #[must_use]
    pub fn buffer(&self, id: BufferId) -> Option<&PresentBuffer> {
        self.buffers.iter().find(|b| b.id == id)
    }

    pub(crate) fn buffer_mut(&mut self, id: BufferId) -> Option<&mut PresentBuffer> {
        self.buffers.iter_mut().find(|b| b.id == id)
    }

    fn append(
        &mut self,
        channel: &mut dyn SurfaceChannel,
        color: ColorBuffer,
        plane: ExportedBuffer,
    ) -> Result<BufferId, AllocationError> {
        let timeline = match &self.syncobj {
            Some(device) => Some(Timeline::create(device, channel)?),
            None => None,
        };

        let desc = DmabufDesc {
            width: self.width,
            height: self.height,
            fourcc: self.present_fourcc,
            modifier: self.modifier,
            stride: plane.stride,
            offset: plane.offset,
        };
        let id = match channel.share_dmabuf(plane.fd.as_fd(), &desc) {
            Ok(id) => id,
            Err(err) => {
                if let Some(timeline) = timeline {
                    timeline.destroy(channel);
                }
                return Err(err.into());
            }
        };

        // Explicit sync never looks at the dma-buf again; implicit sync
        // needs it for fence export and polling.
        let dmabuf = (timeline.is_none() && self.display.implicit_sync()).then_some(plane.fd);

        self.buffers.insert(
            0,
            PresentBuffer {
                id,
                color,
                dmabuf,
                status: BufferStatus::Idle,
                timeline,
                age: 0,
            },
        );
        Ok(id)
    }

    /// Allocates one more present buffer in the swapchain's layout.
    ///
    /// The caller is responsible for respecting the pool cap.
    pub fn create_present_buffer(
        &mut self,
        channel: &mut dyn SurfaceChannel,
    ) -> Result<BufferId, AllocationError> {
        let driver = self.display.driver();
        let color = driver.alloc_color_buffer(
            self.width,
            self.height,
            self.render_fourcc,
            self.modifier,
            self.prime,
        )?;
        let plane = match driver.export_color_buffer(color) {
            Ok(plane) => plane,
            Err(err) => {
                driver.free_color_buffer(color);
                return Err(err.into());
            }
        };
        let display = Arc::clone(&self.display);
        self.append(channel, color, plane).inspect_err(|_| {
            display.driver().free_color_buffer(color);
        })
    }

    /// Handles a compositor release notice.
    ///
    /// Returns `false` if the buffer does not belong to this swapchain.
    pub fn on_buffer_release(&mut self, id: BufferId) -> bool {
        let Some(index) = self.buffers.iter().position(|b| b.id == id) else {
            return false;
        };
        let mut buffer = self.buffers.remove(index);
        // With explicit sync the release point is authoritative.
        if buffer.status == BufferStatus::InUse && buffer.timeline.is_none() {
            buffer.status = BufferStatus::IdleNotified;
        }
        self.buffers.push(buffer);
        true
    }

    /// Routes queued channel events: releases for this swapchain are handled
    /// here, everything else is deferred for the caller.
    pub fn route_events(
        &mut self,
        channel: &mut dyn SurfaceChannel,
        deferred: &mut VecDeque<SurfaceEvent>,
    ) {
        while let Some(event) = channel.next_event() {
            match event {
                SurfaceEvent::BufferReleased(id) => {
                    if !self.on_buffer_release(id) {
                        tracing::trace!(?id, "release for a retired buffer");
                    }
                }
                other => deferred.push_back(other),
            }
        }
    }

    /// Marks a buffer as attached and committed.
    pub(crate) fn mark_in_use(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffer_mut(id) {
            buffer.status = BufferStatus::InUse;
        }
    }

    /// Makes `id` the back buffer the driver renders into next.
    pub(crate) fn set_back(&mut self, id: BufferId) {
        if let Some(color) = self.buffer(id).map(PresentBuffer::color) {
            self.current_back = Some(id);
            self.render = color;
        }
    }

    /// Ages every presented buffer by one frame and gives `presented` age 1.
    pub fn update_buffer_age(&mut self, presented: BufferId) {
        for buffer in &mut self.buffers {
            if buffer.id == presented {
                buffer.age = 1;
            } else if buffer.age > 0 {
                buffer.age += 1;
            }
        }
    }

    /// Returns an idle present buffer, allocating or blocking as needed.
    ///
    /// Already-released buffers are collected without blocking first, so a
    /// new buffer is only allocated when none is free. Once the pool is at
    /// its cap this blocks until the compositor releases one. Events that
    /// are not releases for this swapchain are pushed to `deferred`.
    pub fn find_free_buffer(
        &mut self,
        channel: &mut dyn SurfaceChannel,
        deferred: &mut VecDeque<SurfaceEvent>,
    ) -> Result<BufferId, AllocationError> {
        let explicit = self.syncobj.is_some();
        if explicit {
            self.check_release_explicit(WaitDeadline::Poll)?;
        } else {
            self.check_release_implicit(channel, deferred, Duration::ZERO)?;
        }

        loop {
            if let Some(buffer) = self
                .buffers
                .iter()
                .find(|b| b.status == BufferStatus::Idle)
            {
                return Ok(buffer.id);
            }

            if self.buffers.len() < self.display.config().max_present_buffers {
                tracing::trace!(count = self.buffers.len() + 1, "growing present pool");
                return self.create_present_buffer(channel);
            }

            if explicit {
                self.check_release_explicit(WaitDeadline::Forever)?;
            } else {
                let timeout = self.display.config().release_poll_interval;
                let checked = self.check_release_implicit(channel, deferred, timeout)?;
                if checked == 0 {
                    channel.blocking_dispatch()?;
                    self.route_events(channel, deferred);
                }
            }
        }
    }

    /// Waits on the release points of every busy buffer and reclaims the
    /// first one that becomes available.
    fn check_release_explicit(&mut self, deadline: WaitDeadline) -> Result<usize, SyncError> {
        let Some(device) = &self.syncobj else {
            return Ok(0);
        };
        let busy: Vec<usize> = self
            .buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.status != BufferStatus::Idle && b.timeline.is_some())
            .map(|(i, _)| i)
            .collect();
        if busy.is_empty() {
            return Ok(0);
        }

        let mut handles = Vec::with_capacity(busy.len());
        let mut points = Vec::with_capacity(busy.len());
        for timeline in busy.iter().filter_map(|i| self.buffers[*i].timeline()) {
            handles.push(timeline.handle());
            points.push(timeline.point());
        }

        match device.timeline_wait(&handles, &points, deadline, TimelineWaitMode::Available) {
            Ok(first) => {
                let index = busy[first];
                let driver = self.display.driver();
                let buffer = &mut self.buffers[index];
                if let Some(timeline) = &buffer.timeline {
                    wait_timeline_point(driver, timeline)?;
                }
                buffer.status = BufferStatus::Idle;
                Ok(busy.len())
            }
            Err(Errno::TIME | Errno::INTR) => Ok(busy.len()),
            Err(errno) => Err(SyncError::kernel("timeline_wait", errno)),
        }
    }

    /// Reclaims released buffers under implicit sync.
    ///
    /// Returns the number of buffers that were waited on; zero means nothing
    /// has been released yet and the caller has to wait for events.
    fn check_release_implicit(
        &mut self,
        channel: &mut dyn SurfaceChannel,
        deferred: &mut VecDeque<SurfaceEvent>,
        timeout: Duration,
    ) -> Result<usize, SyncError> {
        channel.dispatch_pending()?;
        self.route_events(channel, deferred);

        let display = Arc::clone(&self.display);
        let dmabuf_sync = display.dmabuf_sync().filter(|_| display.implicit_sync());
        let mut count = 0;
        for buffer in &mut self.buffers {
            if buffer.status != BufferStatus::IdleNotified {
                continue;
            }
            let (Some(fd), Some(dmabuf_sync)) = (&buffer.dmabuf, dmabuf_sync) else {
                // Nothing to wait on: take the oldest release and hope it
                // really is idle.
                buffer.status = BufferStatus::Idle;
                return Ok(1);
            };
            let fence = display
                .features()
                .try_with(Feature::DmabufSyncFile, || dmabuf_sync.export_sync_file(fd.as_fd()));
            if let Some(Ok(fence)) = fence {
                if display.driver().wait_fence(fence).is_ok() {
                    buffer.status = BufferStatus::Idle;
                    return Ok(1);
                }
            }
            count += 1;
        }
        if count == 0 {
            return Ok(0);
        }

        let notified: Vec<usize> = self
            .buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.status == BufferStatus::IdleNotified && b.dmabuf.is_some())
            .map(|(i, _)| i)
            .collect();
        let ready = {
            let mut fds: Vec<PollFd<'_>> = notified
                .iter()
                .filter_map(|i| self.buffers[*i].dmabuf.as_ref())
                .map(|fd| PollFd::new(fd, PollFlags::OUT))
                .collect();
            let timespec = Timespec {
                tv_sec: i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX),
                tv_nsec: timeout.subsec_nanos().into(),
            };
            match rustix::event::poll(&mut fds, Some(&timespec)) {
                Ok(_) => fds
                    .iter()
                    .map(|fd| fd.revents().contains(PollFlags::OUT))
                    .collect(),
                Err(Errno::INTR | Errno::TIME) => vec![false; fds.len()],
                Err(errno) => return Err(SyncError::Poll(errno)),
            }
        };
        for (index, ready) in notified.iter().zip(ready) {
            if ready {
                self.buffers[*index].status = BufferStatus::Idle;
            }
        }
        Ok(count)
    }

    /// Releases every present buffer, its timeline and compositor buffer,
    /// and the render buffer.
    pub fn release(mut self, channel: &mut dyn SurfaceChannel) {
        for buffer in self.buffers.drain(..) {
            channel.destroy_buffer(buffer.id);
            if let Some(timeline) = buffer.timeline {
                timeline.destroy(channel);
            }
            self.display.driver().free_color_buffer(buffer.color);
        }
        // Drop frees the PRIME render buffer.
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let driver = self.display.driver();
        for buffer in self.buffers.drain(..) {
            driver.free_color_buffer(buffer.color);
        }
        if self.prime {
            driver.free_color_buffer(self.render);
        }
    }
}

/// Makes the GPU wait for a timeline point, falling back to a CPU wait.
fn wait_timeline_point(
    driver: &dyn crate::platform::GpuDriver,
    timeline: &Timeline,
) -> Result<(), SyncError> {
    let on_gpu = timeline
        .extract_sync_fd()
        .ok()
        .is_some_and(|fence| driver.wait_fence(fence).is_ok());
    if on_gpu {
        return Ok(());
    }
    timeline
        .wait_current()
        .map_err(|errno| SyncError::kernel("timeline_wait", errno))
}
