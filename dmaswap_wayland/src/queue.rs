// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The private per-surface event queue.
//!
//! Every [`WaylandChannel`](crate::WaylandChannel) owns one
//! `EventQueue<ChannelState>`. Objects it creates are attached to that queue,
//! so their events are only ever dispatched by the thread that owns the
//! surface and never interleave with the host toolkit's queue.
//!
//! ```text
//! channel owns:
//!   SurfaceQueue { EventQueue<ChannelState>, ChannelState }
//!     -> QueueHandle<ChannelState>
//! host/toolkit owns the wl_surface (any queue)
//! channel creates per-surface objects with QueueHandle<ChannelState>
//! Dispatch impls push SurfaceEvent values into ChannelState
//! the core pops them through SurfaceChannel::next_event()
//! ```
//!
//! # `QueueHandle` object-creation contract
//!
//! | Object | Queue |
//! |---|---|
//! | `wl_surface` | Host queue; the channel only sends requests on it. |
//! | `zwp_linux_dmabuf_v1`, managers, `wp_presentation` | Binding queue in [`Globals`](crate::Globals). |
//! | `zwp_linux_buffer_params_v1` / `wl_buffer` | Surface queue. |
//! | `wl_callback` (frame and display sync) | Surface queue. |
//! | `wp_presentation_feedback` | Surface queue. |
//! | `zwp_linux_dmabuf_feedback_v1` (surface) | Surface queue. |
//! | syncobj surface/timeline, `wp_fifo_v1`, `wp_commit_timer_v1` | Surface queue (no events). |
//!
//! Abandoned callbacks and presentation feedbacks stay alive on the
//! compositor side until they fire; their completion is dropped here.

use std::collections::{HashMap, HashSet, VecDeque};

use dmaswap_core::channel::{BufferId, CallbackId, PresentationId, SurfaceEvent};
use dmaswap_core::time::HostTime;
use wayland_client::backend::{ObjectId, WaylandError};
use wayland_client::protocol::wl_buffer::{self, WlBuffer};
use wayland_client::protocol::wl_callback::{self, WlCallback};
use wayland_client::{Connection, Dispatch, DispatchError, EventQueue, Proxy, QueueHandle};
use wayland_protocols::wp::commit_timing::v1::client::wp_commit_timer_v1::WpCommitTimerV1;
use wayland_protocols::wp::fifo::v1::client::wp_fifo_v1::WpFifoV1;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_buffer_params_v1::{
    self, ZwpLinuxBufferParamsV1,
};
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_feedback_v1::{
    self, ZwpLinuxDmabufFeedbackV1,
};
use wayland_protocols::wp::linux_drm_syncobj::v1::client::wp_linux_drm_syncobj_surface_v1::WpLinuxDrmSyncobjSurfaceV1;
use wayland_protocols::wp::linux_drm_syncobj::v1::client::wp_linux_drm_syncobj_timeline_v1::WpLinuxDrmSyncobjTimelineV1;
use wayland_protocols::wp::presentation_time::client::wp_presentation_feedback::{
    self, WpPresentationFeedback,
};

use crate::feedback::{DecodeError, decode};

/// Answer to the last `zwp_linux_buffer_params_v1.create`.
#[derive(Debug)]
pub(crate) enum ParamsOutcome {
    Created(WlBuffer),
    Failed,
}

/// Event sink for one surface.
#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    events: VecDeque<SurfaceEvent>,
    buffers: HashMap<ObjectId, BufferId>,
    live_callbacks: HashSet<CallbackId>,
    live_presentations: HashSet<PresentationId>,
    params: Option<ParamsOutcome>,
}

impl ChannelState {
    pub(crate) fn pop(&mut self) -> Option<SurfaceEvent> {
        self.events.pop_front()
    }

    pub(crate) fn push(&mut self, event: SurfaceEvent) {
        self.events.push_back(event);
    }

    pub(crate) fn track_buffer(&mut self, buffer: &WlBuffer, id: BufferId) {
        self.buffers.insert(buffer.id(), id);
    }

    pub(crate) fn forget_buffer(&mut self, buffer: &WlBuffer) {
        self.buffers.remove(&buffer.id());
    }

    pub(crate) fn track_callback(&mut self, id: CallbackId) {
        self.live_callbacks.insert(id);
    }

    pub(crate) fn forget_callback(&mut self, id: CallbackId) {
        self.live_callbacks.remove(&id);
    }

    pub(crate) fn track_presentation(&mut self, id: PresentationId) {
        self.live_presentations.insert(id);
    }

    pub(crate) fn forget_presentation(&mut self, id: PresentationId) {
        self.live_presentations.remove(&id);
    }

    pub(crate) fn take_params(&mut self) -> Option<ParamsOutcome> {
        self.params.take()
    }

    pub(crate) fn clear(&mut self) {
        self.events.clear();
        self.buffers.clear();
        self.live_callbacks.clear();
        self.live_presentations.clear();
        self.params = None;
    }

    fn callback_done(&mut self, id: CallbackId) {
        if self.live_callbacks.remove(&id) {
            self.events.push_back(SurfaceEvent::CallbackDone(id));
        }
    }

    fn presentation_event(&mut self, id: PresentationId, event: wp_presentation_feedback::Event) {
        let event = match event {
            wp_presentation_feedback::Event::Presented {
                tv_sec_hi,
                tv_sec_lo,
                tv_nsec,
                refresh,
                ..
            } => SurfaceEvent::Presented {
                id,
                timestamp: HostTime::from_wire(tv_sec_hi, tv_sec_lo, tv_nsec),
                refresh_ns: refresh,
            },
            wp_presentation_feedback::Event::Discarded => SurfaceEvent::Discarded(id),
            _ => return,
        };
        if self.live_presentations.remove(&id) {
            self.events.push_back(event);
        }
    }

    fn feedback_event(&mut self, event: zwp_linux_dmabuf_feedback_v1::Event) {
        match decode(event) {
            Ok(event) => self.events.push_back(SurfaceEvent::Feedback(event)),
            Err(DecodeError::Unknown) => {}
            Err(err) => tracing::warn!(%err, "dropping malformed surface feedback event"),
        }
    }
}

/// Channel-owned queue and its state.
#[derive(Debug)]
pub(crate) struct SurfaceQueue {
    event_queue: EventQueue<ChannelState>,
    state: ChannelState,
}

impl SurfaceQueue {
    pub(crate) fn new(connection: &Connection) -> Self {
        Self {
            event_queue: connection.new_event_queue(),
            state: ChannelState::default(),
        }
    }

    /// Handle every per-surface object must be created with.
    pub(crate) fn handle(&self) -> QueueHandle<ChannelState> {
        self.event_queue.handle()
    }

    /// Dispatches events already read from the socket.
    pub(crate) fn dispatch_pending(&mut self) -> Result<usize, DispatchError> {
        self.event_queue.dispatch_pending(&mut self.state)
    }

    /// Flushes, blocks for new events when needed, and dispatches.
    pub(crate) fn blocking_dispatch(&mut self) -> Result<usize, DispatchError> {
        self.event_queue.blocking_dispatch(&mut self.state)
    }

    /// Blocks until the compositor has processed every request so far.
    pub(crate) fn roundtrip(&mut self) -> Result<usize, DispatchError> {
        self.event_queue.roundtrip(&mut self.state)
    }

    pub(crate) fn flush(&self) -> Result<(), WaylandError> {
        self.event_queue.flush()
    }

    pub(crate) fn state_mut(&mut self) -> &mut ChannelState {
        &mut self.state
    }
}

impl Dispatch<ZwpLinuxBufferParamsV1, ()> for ChannelState {
    fn event(
        state: &mut Self,
        _proxy: &ZwpLinuxBufferParamsV1,
        event: zwp_linux_buffer_params_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            zwp_linux_buffer_params_v1::Event::Created { buffer } => {
                state.params = Some(ParamsOutcome::Created(buffer));
            }
            zwp_linux_buffer_params_v1::Event::Failed => {
                state.params = Some(ParamsOutcome::Failed);
            }
            _ => {}
        }
    }

    wayland_client::event_created_child!(ChannelState, ZwpLinuxBufferParamsV1, [
        zwp_linux_buffer_params_v1::EVT_CREATED_OPCODE => (WlBuffer, ()),
    ]);
}

impl Dispatch<WlBuffer, ()> for ChannelState {
    fn event(
        state: &mut Self,
        proxy: &WlBuffer,
        event: wl_buffer::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event
            && let Some(&id) = state.buffers.get(&proxy.id())
        {
            state.events.push_back(SurfaceEvent::BufferReleased(id));
        }
    }
}

impl Dispatch<WlCallback, CallbackId> for ChannelState {
    fn event(
        state: &mut Self,
        _proxy: &WlCallback,
        event: wl_callback::Event,
        data: &CallbackId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { .. } = event {
            state.callback_done(*data);
        }
    }
}

impl Dispatch<WpPresentationFeedback, PresentationId> for ChannelState {
    fn event(
        state: &mut Self,
        _proxy: &WpPresentationFeedback,
        event: wp_presentation_feedback::Event,
        data: &PresentationId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        state.presentation_event(*data, event);
    }
}

impl Dispatch<ZwpLinuxDmabufFeedbackV1, ()> for ChannelState {
    fn event(
        state: &mut Self,
        _proxy: &ZwpLinuxDmabufFeedbackV1,
        event: zwp_linux_dmabuf_feedback_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        state.feedback_event(event);
    }
}

wayland_client::delegate_noop!(ChannelState: ignore WpLinuxDrmSyncobjSurfaceV1);
wayland_client::delegate_noop!(ChannelState: ignore WpLinuxDrmSyncobjTimelineV1);
wayland_client::delegate_noop!(ChannelState: ignore WpFifoV1);
wayland_client::delegate_noop!(ChannelState: ignore WpCommitTimerV1);
