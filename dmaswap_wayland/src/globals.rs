// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Connection-wide protocol globals.
//!
//! [`Globals::bind`] enumerates the registry once per connection and binds
//! every global the channel can use. Only `zwp_linux_dmabuf_v1` (version 3
//! or later) is required; the rest gate optional [`ChannelCapabilities`].
//!
//! | Global | Versions | Gates |
//! |---|---|---|
//! | `zwp_linux_dmabuf_v1` | 3–4 | required; v4 adds feedback objects |
//! | `wp_linux_drm_syncobj_manager_v1` | 1 | `explicit_sync` |
//! | `wp_fifo_manager_v1` | 1 | `fifo_pacing` (with `wp_presentation`) |
//! | `wp_commit_timing_manager_v1` | 1 | `commit_timing` (with `fifo_pacing`) |
//! | `wp_presentation` | 1 | `fifo_pacing`, presentation clock |
//!
//! Global objects are bound on a private queue that is drained once during
//! binding. Per-surface objects created from them later are attached to the
//! creating channel's own queue.

use dmaswap_core::channel::ChannelCapabilities;
use dmaswap_core::format::{Fourcc, Modifier};
use dmaswap_core::time::Clock;
use wayland_client::globals::{BindError, GlobalError, GlobalListContents, registry_queue_init};
use wayland_client::protocol::wl_display::WlDisplay;
use wayland_client::protocol::wl_registry::{self, WlRegistry};
use wayland_client::{Connection, Dispatch, DispatchError, EventQueue, Proxy, QueueHandle};
use wayland_protocols::wp::commit_timing::v1::client::wp_commit_timing_manager_v1::WpCommitTimingManagerV1;
use wayland_protocols::wp::fifo::v1::client::wp_fifo_manager_v1::WpFifoManagerV1;
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_v1::{
    self, ZwpLinuxDmabufV1,
};
use wayland_protocols::wp::linux_drm_syncobj::v1::client::wp_linux_drm_syncobj_manager_v1::WpLinuxDrmSyncobjManagerV1;
use wayland_protocols::wp::presentation_time::client::wp_presentation::{self, WpPresentation};

/// First `zwp_linux_dmabuf_v1` version with feedback objects.
pub(crate) const DMABUF_FEEDBACK_VERSION: u32 = 4;

/// First `wl_surface` version with `damage_buffer`.
pub(crate) const SURFACE_DAMAGE_BUFFER_VERSION: u32 = 4;

/// Errors from [`Globals::bind`].
#[derive(Debug, thiserror::Error)]
pub enum GlobalsError {
    /// The registry could not be enumerated.
    #[error("failed to enumerate compositor globals")]
    Registry(#[from] GlobalError),
    /// A required global is missing or too old.
    #[error("compositor does not provide a usable `{interface}`")]
    Missing {
        /// Interface name.
        interface: &'static str,
        /// Why binding failed.
        #[source]
        source: BindError,
    },
    /// The initial roundtrip failed.
    #[error("initial roundtrip failed")]
    Dispatch(#[from] DispatchError),
}

/// Events received on the binding queue.
#[derive(Debug, Default)]
pub(crate) struct BindState {
    clock_id: Option<u32>,
    legacy_modifiers: Vec<(Fourcc, Modifier)>,
}

/// Which optional globals exist, and the protocol versions that matter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct GlobalVersions {
    pub(crate) dmabuf: u32,
    pub(crate) syncobj: bool,
    pub(crate) fifo: bool,
    pub(crate) commit_timing: bool,
    pub(crate) presentation: bool,
}

impl GlobalVersions {
    /// Capabilities for a surface of the given `wl_surface` version.
    ///
    /// FIFO pacing needs presentation feedback to know when a frame left the
    /// queue, and commit timestamps are only computed from that feedback.
    pub(crate) fn capabilities(self, surface_version: u32) -> ChannelCapabilities {
        let fifo_pacing = self.fifo && self.presentation;
        ChannelCapabilities {
            explicit_sync: self.syncobj,
            fifo_pacing,
            commit_timing: fifo_pacing && self.commit_timing,
            damage_buffer: surface_version >= SURFACE_DAMAGE_BUFFER_VERSION,
            surface_feedback: self.dmabuf >= DMABUF_FEEDBACK_VERSION,
        }
    }
}

/// Bound globals for one connection.
///
/// Cheap to share by reference between every surface on the connection.
#[derive(Debug)]
pub struct Globals {
    connection: Connection,
    dmabuf: ZwpLinuxDmabufV1,
    syncobj: Option<WpLinuxDrmSyncobjManagerV1>,
    fifo: Option<WpFifoManagerV1>,
    commit_timing: Option<WpCommitTimingManagerV1>,
    presentation: Option<WpPresentation>,
    clock: Clock,
    legacy_modifiers: Vec<(Fourcc, Modifier)>,
    _queue: EventQueue<BindState>,
}

impl Globals {
    /// Enumerates the registry, binds the globals the channel uses and waits
    /// for their initial events.
    pub fn bind(connection: &Connection) -> Result<Self, GlobalsError> {
        let (list, mut queue) = registry_queue_init::<BindState>(connection)?;
        let qh = queue.handle();

        let dmabuf = list
            .bind::<ZwpLinuxDmabufV1, _, _>(&qh, 3..=DMABUF_FEEDBACK_VERSION, ())
            .map_err(|source| GlobalsError::Missing {
                interface: "zwp_linux_dmabuf_v1",
                source,
            })?;
        let syncobj = list
            .bind::<WpLinuxDrmSyncobjManagerV1, _, _>(&qh, 1..=1, ())
            .ok();
        let fifo = list.bind::<WpFifoManagerV1, _, _>(&qh, 1..=1, ()).ok();
        let commit_timing = list
            .bind::<WpCommitTimingManagerV1, _, _>(&qh, 1..=1, ())
            .ok();
        let presentation = list.bind::<WpPresentation, _, _>(&qh, 1..=1, ()).ok();

        let mut state = BindState::default();
        queue.roundtrip(&mut state)?;

        let clock = state.clock_id.map_or(Clock::Monotonic, Clock::from_raw);
        let globals = Self {
            connection: connection.clone(),
            dmabuf,
            syncobj,
            fifo,
            commit_timing,
            presentation,
            clock,
            legacy_modifiers: state.legacy_modifiers,
            _queue: queue,
        };
        tracing::debug!(
            dmabuf_version = globals.dmabuf.version(),
            syncobj = globals.syncobj.is_some(),
            fifo = globals.fifo.is_some(),
            commit_timing = globals.commit_timing.is_some(),
            presentation = globals.presentation.is_some(),
            ?clock,
            "bound compositor globals"
        );
        Ok(globals)
    }

    /// The connection the globals were bound on.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) fn display(&self) -> WlDisplay {
        self.connection.display()
    }

    pub(crate) fn dmabuf(&self) -> &ZwpLinuxDmabufV1 {
        &self.dmabuf
    }

    pub(crate) fn syncobj(&self) -> Option<&WpLinuxDrmSyncobjManagerV1> {
        self.syncobj.as_ref()
    }

    pub(crate) fn fifo(&self) -> Option<&WpFifoManagerV1> {
        self.fifo.as_ref()
    }

    pub(crate) fn commit_timing(&self) -> Option<&WpCommitTimingManagerV1> {
        self.commit_timing.as_ref()
    }

    pub(crate) fn presentation(&self) -> Option<&WpPresentation> {
        self.presentation.as_ref()
    }

    /// The compositor's presentation clock, or `CLOCK_MONOTONIC` without
    /// `wp_presentation`.
    #[must_use]
    pub fn presentation_clock(&self) -> Clock {
        self.clock
    }

    /// Whether the compositor can hand out dma-buf feedback objects.
    #[must_use]
    pub fn has_feedback(&self) -> bool {
        self.dmabuf.version() >= DMABUF_FEEDBACK_VERSION
    }

    /// `(format, modifier)` pairs announced by a version 3 compositor.
    #[must_use]
    pub fn legacy_modifiers(&self) -> &[(Fourcc, Modifier)] {
        &self.legacy_modifiers
    }

    pub(crate) fn versions(&self) -> GlobalVersions {
        GlobalVersions {
            dmabuf: self.dmabuf.version(),
            syncobj: self.syncobj.is_some(),
            fifo: self.fifo.is_some(),
            commit_timing: self.commit_timing.is_some(),
            presentation: self.presentation.is_some(),
        }
    }
}

/// Joins the `hi`/`lo` halves used on the wire.
pub(crate) fn join_u64(hi: u32, lo: u32) -> u64 {
    (u64::from(hi) << 32) | u64::from(lo)
}

/// Splits a value into the `hi`/`lo` halves used on the wire.
pub(crate) fn split_u64(value: u64) -> (u32, u32) {
    let [a, b, c, d, e, f, g, h] = value.to_be_bytes();
    (
        u32::from_be_bytes([a, b, c, d]),
        u32::from_be_bytes([e, f, g, h]),
    )
}

impl Dispatch<WlRegistry, GlobalListContents> for BindState {
    fn event(
        _state: &mut Self,
        _proxy: &WlRegistry,
        _event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZwpLinuxDmabufV1, ()> for BindState {
    fn event(
        state: &mut Self,
        _proxy: &ZwpLinuxDmabufV1,
        event: zwp_linux_dmabuf_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let zwp_linux_dmabuf_v1::Event::Modifier {
            format,
            modifier_hi,
            modifier_lo,
        } = event
        {
            state.legacy_modifiers.push((
                Fourcc(format),
                Modifier(join_u64(modifier_hi, modifier_lo)),
            ));
        }
    }
}

impl Dispatch<WpPresentation, ()> for BindState {
    fn event(
        state: &mut Self,
        _proxy: &WpPresentation,
        event: wp_presentation::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wp_presentation::Event::ClockId { clk_id } = event {
            state.clock_id = Some(clk_id);
        }
    }
}

wayland_client::delegate_noop!(BindState: ignore WpLinuxDrmSyncobjManagerV1);
wayland_client::delegate_noop!(BindState: ignore WpFifoManagerV1);
wayland_client::delegate_noop!(BindState: ignore WpCommitTimingManagerV1);

#[cfg(test)]
mod tests {
    use super::{GlobalVersions, join_u64, split_u64};

    fn everything() -> GlobalVersions {
        GlobalVersions {
            dmabuf: 4,
            syncobj: true,
            fifo: true,
            commit_timing: true,
            presentation: true,
        }
    }

    #[test]
    fn full_compositor_enables_everything() {
        let caps = everything().capabilities(6);
        assert!(caps.explicit_sync);
        assert!(caps.fifo_pacing);
        assert!(caps.commit_timing);
        assert!(caps.damage_buffer);
        assert!(caps.surface_feedback);
    }

    #[test]
    fn fifo_without_presentation_is_not_used() {
        let caps = GlobalVersions {
            presentation: false,
            ..everything()
        }
        .capabilities(6);
        assert!(!caps.fifo_pacing);
        assert!(
            !caps.commit_timing,
            "commit timing follows fifo pacing even when its manager is bound"
        );
        assert!(caps.explicit_sync);
    }

    #[test]
    fn old_protocol_versions_disable_optional_paths() {
        let caps = GlobalVersions {
            dmabuf: 3,
            ..everything()
        }
        .capabilities(3);
        assert!(!caps.surface_feedback);
        assert!(!caps.damage_buffer);
        assert!(caps.fifo_pacing);
    }

    #[test]
    fn wire_halves_join_and_split() {
        let value = 0x0100_0000_0000_0ff3;
        assert_eq!(split_u64(value), (0x0100_0000, 0x0000_0ff3));
        assert_eq!(join_u64(0x0100_0000, 0x0000_0ff3), value);
        assert_eq!(split_u64(u64::MAX), (u32::MAX, u32::MAX));
    }
}
