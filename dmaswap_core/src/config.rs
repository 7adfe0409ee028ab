// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tunables and per-surface creation parameters.

use core::time::Duration;

use crate::format::Fourcc;
use crate::platform::ConfigId;

/// Presentation tunables shared by every surface of a display instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresentConfig {
    /// Maximum number of present buffers per swapchain.
    pub max_present_buffers: usize,
    /// How long one implicit-sync release wait blocks before re-checking
    /// the event queue.
    pub release_poll_interval: Duration,
    /// Subtracted from the commit target so the compositor does not miss
    /// the intended refresh cycle.
    pub commit_timestamp_margin: Duration,
    /// Refresh period assumed until the first presentation event arrives.
    pub default_refresh: Duration,
    /// Whether new surface feedback may switch an existing swapchain to a
    /// different modifier.
    pub allow_modifier_realloc: bool,
}

impl PresentConfig {
    /// Four buffers, 100 ms poll tick, 500 µs margin, 60 Hz.
    pub const DEFAULT: Self = Self {
        max_present_buffers: 4,
        release_poll_interval: Duration::from_millis(100),
        commit_timestamp_margin: Duration::from_micros(500),
        default_refresh: Duration::from_nanos(1_000_000_000 / 60),
        allow_modifier_realloc: true,
    };
}

impl Default for PresentConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Attributes passed at surface creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceAttributes {
    /// Present through the opaque sibling of the config format so the
    /// compositor ignores alpha.
    pub present_opaque: bool,
}

/// The driver framebuffer config a surface renders with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowConfig {
    /// Driver config identifier.
    pub id: ConfigId,
    /// Render format.
    pub fourcc: Fourcc,
    /// Whether the config can back window surfaces.
    pub window: bool,
}
