// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wayland compositor channel for `dmaswap_core`.
//!
//! This crate connects the protocol-agnostic presentation core to a Wayland
//! compositor:
//!
//! - [`Globals`]: binds `zwp_linux_dmabuf_v1` and the optional sync, pacing
//!   and presentation-time globals once per connection
//! - [`negotiate_default_feedback`]: the connection-wide format list, from
//!   v4 feedback objects or v3 `modifier` events
//! - [`WaylandChannel`]: a [`SurfaceChannel`] over a private per-surface
//!   event queue
//! - [`Window`]: the `wl_egl_window` analogue a [`Surface`] is built on
//!
//! # Wiring
//!
//! ```text
//! Connection ──► Globals::bind ──► negotiate_default_feedback
//!                    │                        │
//!                    │                        ▼
//!                    │              DisplayDesc ──► DisplayInstance
//!                    ▼                                    │
//! wl_surface ──► WaylandChannel::new ─┐                   │
//!           └──► Window::new ─────────┴──► Surface::create
//! ```
//!
//! [`SurfaceChannel`]: dmaswap_core::channel::SurfaceChannel
//! [`Surface`]: dmaswap_core::Surface

mod channel;
mod feedback;
mod globals;
mod queue;
mod window;

pub use channel::WaylandChannel;
pub use feedback::negotiate_default_feedback;
pub use globals::{Globals, GlobalsError};
pub use window::Window;
