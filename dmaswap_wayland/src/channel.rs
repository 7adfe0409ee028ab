// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! [`SurfaceChannel`] over `wayland-client`.

use std::collections::HashMap;
use std::os::fd::BorrowedFd;

use dmaswap_core::channel::{
    BufferId, CallbackId, ChannelCapabilities, DamageRect, DmabufDesc, PresentationId,
    SurfaceChannel, SurfaceEvent, TimelineId,
};
use dmaswap_core::error::ChannelError;
use dmaswap_core::time::{Clock, HostTime};
use wayland_client::Proxy;
use wayland_client::protocol::wl_buffer::WlBuffer;
use wayland_client::protocol::wl_display::WlDisplay;
use wayland_client::protocol::wl_surface::WlSurface;
use wayland_protocols::wp::commit_timing::v1::client::wp_commit_timer_v1::WpCommitTimerV1;
use wayland_protocols::wp::fifo::v1::client::wp_fifo_v1::WpFifoV1;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_buffer_params_v1::Flags;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_feedback_v1::ZwpLinuxDmabufFeedbackV1;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_v1::ZwpLinuxDmabufV1;
use wayland_protocols::wp::linux_drm_syncobj::v1::client::wp_linux_drm_syncobj_manager_v1::WpLinuxDrmSyncobjManagerV1;
use wayland_protocols::wp::linux_drm_syncobj::v1::client::wp_linux_drm_syncobj_surface_v1::WpLinuxDrmSyncobjSurfaceV1;
use wayland_protocols::wp::linux_drm_syncobj::v1::client::wp_linux_drm_syncobj_timeline_v1::WpLinuxDrmSyncobjTimelineV1;
use wayland_protocols::wp::presentation_time::client::wp_presentation::WpPresentation;

use crate::globals::{Globals, SURFACE_DAMAGE_BUFFER_VERSION, split_u64};
use crate::queue::{ParamsOutcome, SurfaceQueue};

fn connection_error(err: impl std::error::Error + Send + Sync + 'static) -> ChannelError {
    ChannelError::Connection(Box::new(err))
}

/// The compositor channel for one `wl_surface`.
///
/// Owns a private event queue; every object it creates for the surface is
/// attached to that queue. Only one channel may exist per `wl_surface`,
/// since FIFO and commit-timer objects are unique per surface.
#[derive(Debug)]
pub struct WaylandChannel {
    queue: SurfaceQueue,
    display: WlDisplay,
    surface: WlSurface,
    caps: ChannelCapabilities,
    clock: Clock,
    dmabuf: ZwpLinuxDmabufV1,
    syncobj_manager: Option<WpLinuxDrmSyncobjManagerV1>,
    presentation: Option<WpPresentation>,
    syncobj_surface: Option<WpLinuxDrmSyncobjSurfaceV1>,
    fifo: Option<WpFifoV1>,
    commit_timer: Option<WpCommitTimerV1>,
    surface_feedback: Option<ZwpLinuxDmabufFeedbackV1>,
    buffers: HashMap<BufferId, WlBuffer>,
    timelines: HashMap<TimelineId, WpLinuxDrmSyncobjTimelineV1>,
    next_id: u64,
}

impl WaylandChannel {
    /// Creates the channel for `surface`.
    ///
    /// FIFO and commit-timer objects are created up front when the
    /// capabilities allow them; the explicit-sync surface and feedback
    /// subscription are created on request.
    #[must_use]
    pub fn new(globals: &Globals, surface: &WlSurface) -> Self {
        let queue = SurfaceQueue::new(globals.connection());
        let qh = queue.handle();
        let caps = globals.versions().capabilities(surface.version());

        let fifo = caps
            .fifo_pacing
            .then(|| globals.fifo().map(|fifo| fifo.get_fifo(surface, &qh, ())))
            .flatten();
        let commit_timer = caps
            .commit_timing
            .then(|| {
                globals
                    .commit_timing()
                    .map(|timing| timing.get_timer(surface, &qh, ()))
            })
            .flatten();

        tracing::debug!(surface = %surface.id(), ?caps, "created surface channel");
        Self {
            queue,
            display: globals.display(),
            surface: surface.clone(),
            caps,
            clock: globals.presentation_clock(),
            dmabuf: globals.dmabuf().clone(),
            syncobj_manager: globals.syncobj().cloned(),
            presentation: globals.presentation().cloned(),
            syncobj_surface: None,
            fifo,
            commit_timer,
            surface_feedback: None,
            buffers: HashMap::new(),
            timelines: HashMap::new(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn destroy_objects(&mut self) {
        if let Some(feedback) = self.surface_feedback.take() {
            feedback.destroy();
        }
        if let Some(syncobj) = self.syncobj_surface.take() {
            syncobj.destroy();
        }
        if let Some(fifo) = self.fifo.take() {
            fifo.destroy();
        }
        if let Some(timer) = self.commit_timer.take() {
            timer.destroy();
        }
        for (_, buffer) in self.buffers.drain() {
            buffer.destroy();
        }
        for (_, timeline) in self.timelines.drain() {
            timeline.destroy();
        }
        self.queue.state_mut().clear();
    }
}

impl SurfaceChannel for WaylandChannel {
    fn capabilities(&self) -> ChannelCapabilities {
        self.caps
    }

    fn presentation_clock(&self) -> Clock {
        self.clock
    }

    fn dispatch_pending(&mut self) -> Result<(), ChannelError> {
        self.queue
            .dispatch_pending()
            .map(drop)
            .map_err(connection_error)
    }

    fn blocking_dispatch(&mut self) -> Result<(), ChannelError> {
        self.queue
            .blocking_dispatch()
            .map(drop)
            .map_err(connection_error)
    }

    fn roundtrip(&mut self) -> Result<(), ChannelError> {
        self.queue.roundtrip().map(drop).map_err(connection_error)
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        self.queue.flush().map_err(connection_error)
    }

    fn next_event(&mut self) -> Option<SurfaceEvent> {
        self.queue.state_mut().pop()
    }

    fn share_dmabuf(
        &mut self,
        dmabuf: BorrowedFd<'_>,
        desc: &DmabufDesc,
    ) -> Result<BufferId, ChannelError> {
        let width = i32::try_from(desc.width).map_err(|_| ChannelError::BufferRejected)?;
        let height = i32::try_from(desc.height).map_err(|_| ChannelError::BufferRejected)?;
        let (modifier_hi, modifier_lo) = split_u64(desc.modifier.0);

        let params = self.dmabuf.create_params(&self.queue.handle(), ());
        params.add(
            dmabuf,
            0,
            desc.offset,
            desc.stride,
            modifier_hi,
            modifier_lo,
        );
        params.create(width, height, desc.fourcc.0, Flags::empty());

        let outcome = self.queue.roundtrip().map(|_| {
            self.queue
                .state_mut()
                .take_params()
                .unwrap_or(ParamsOutcome::Failed)
        });
        params.destroy();

        match outcome.map_err(connection_error)? {
            ParamsOutcome::Created(buffer) => {
                let id = BufferId(self.next_id());
                self.queue.state_mut().track_buffer(&buffer, id);
                self.buffers.insert(id, buffer);
                tracing::trace!(?id, ?desc, "compositor accepted dma-buf");
                Ok(id)
            }
            ParamsOutcome::Failed => {
                tracing::debug!(?desc, "compositor rejected dma-buf");
                Err(ChannelError::BufferRejected)
            }
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(proxy) = self.buffers.remove(&buffer) {
            self.queue.state_mut().forget_buffer(&proxy);
            proxy.destroy();
        }
    }

    fn enable_explicit_sync(&mut self) -> Result<(), ChannelError> {
        if self.syncobj_surface.is_some() {
            return Ok(());
        }
        let manager = self
            .syncobj_manager
            .as_ref()
            .ok_or(ChannelError::Unsupported("wp_linux_drm_syncobj_manager_v1"))?;
        self.syncobj_surface = Some(manager.get_surface(&self.surface, &self.queue.handle(), ()));
        Ok(())
    }

    fn import_timeline(&mut self, syncobj: BorrowedFd<'_>) -> Result<TimelineId, ChannelError> {
        let manager = self
            .syncobj_manager
            .as_ref()
            .ok_or(ChannelError::Unsupported("wp_linux_drm_syncobj_manager_v1"))?;
        let timeline = manager.import_timeline(syncobj, &self.queue.handle(), ());
        let id = TimelineId(self.next_id());
        self.timelines.insert(id, timeline);
        Ok(id)
    }

    fn destroy_timeline(&mut self, timeline: TimelineId) {
        if let Some(proxy) = self.timelines.remove(&timeline) {
            proxy.destroy();
        }
    }

    fn set_acquire_point(&mut self, timeline: TimelineId, point: u64) {
        if let (Some(surface), Some(timeline)) =
            (&self.syncobj_surface, self.timelines.get(&timeline))
        {
            let (hi, lo) = split_u64(point);
            surface.set_acquire_point(timeline, hi, lo);
        }
    }

    fn set_release_point(&mut self, timeline: TimelineId, point: u64) {
        if let (Some(surface), Some(timeline)) =
            (&self.syncobj_surface, self.timelines.get(&timeline))
        {
            let (hi, lo) = split_u64(point);
            surface.set_release_point(timeline, hi, lo);
        }
    }

    fn damage_buffer(&mut self, rect: DamageRect) {
        if self.caps.damage_buffer {
            self.surface
                .damage_buffer(rect.x, rect.y, rect.width, rect.height);
        } else {
            self.damage_all();
        }
    }

    fn damage_all(&mut self) {
        if self.surface.version() >= SURFACE_DAMAGE_BUFFER_VERSION {
            self.surface.damage_buffer(0, 0, i32::MAX, i32::MAX);
        } else {
            self.surface.damage(0, 0, i32::MAX, i32::MAX);
        }
    }

    fn attach(&mut self, buffer: BufferId) {
        match self.buffers.get(&buffer) {
            Some(proxy) => self.surface.attach(Some(proxy), 0, 0),
            None => tracing::warn!(?buffer, "attach of an unknown buffer"),
        }
    }

    fn commit(&mut self) {
        self.surface.commit();
    }

    fn request_frame(&mut self) -> CallbackId {
        let id = CallbackId(self.next_id());
        self.queue.state_mut().track_callback(id);
        let _callback = self.surface.frame(&self.queue.handle(), id);
        id
    }

    fn request_sync(&mut self) -> CallbackId {
        let id = CallbackId(self.next_id());
        self.queue.state_mut().track_callback(id);
        let _callback = self.display.sync(&self.queue.handle(), id);
        id
    }

    fn destroy_callback(&mut self, callback: CallbackId) {
        self.queue.state_mut().forget_callback(callback);
    }

    fn set_fifo_barrier(&mut self) {
        if let Some(fifo) = &self.fifo {
            fifo.set_barrier();
        }
    }

    fn wait_fifo_barrier(&mut self) {
        if let Some(fifo) = &self.fifo {
            fifo.wait_barrier();
        }
    }

    fn set_commit_timestamp(&mut self, target: HostTime) {
        if let Some(timer) = &self.commit_timer {
            let (sec_hi, sec_lo, nsec) = target.to_wire();
            timer.set_timestamp(sec_hi, sec_lo, nsec);
        }
    }

    fn request_presentation_feedback(&mut self) -> PresentationId {
        let id = PresentationId(self.next_id());
        match &self.presentation {
            Some(presentation) => {
                self.queue.state_mut().track_presentation(id);
                let _feedback = presentation.feedback(&self.surface, &self.queue.handle(), id);
            }
            None => {
                tracing::warn!("presentation feedback requested without wp_presentation");
                self.queue.state_mut().push(SurfaceEvent::Discarded(id));
            }
        }
        id
    }

    fn destroy_presentation_feedback(&mut self, feedback: PresentationId) {
        self.queue.state_mut().forget_presentation(feedback);
    }

    fn subscribe_surface_feedback(&mut self) -> Result<(), ChannelError> {
        if !self.caps.surface_feedback {
            return Err(ChannelError::Unsupported("zwp_linux_dmabuf_feedback_v1"));
        }
        if self.surface_feedback.is_none() {
            self.surface_feedback = Some(self.dmabuf.get_surface_feedback(
                &self.surface,
                &self.queue.handle(),
                (),
            ));
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        tracing::debug!(surface = %self.surface.id(), "shutting down surface channel");
        self.destroy_objects();
    }
}

impl Drop for WaylandChannel {
    fn drop(&mut self) {
        self.destroy_objects();
    }
}
