// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Buffer negotiation, swapchain management and frame pacing for presenting
//! GPU-rendered windows to a compositor through shared dma-bufs.
//!
//! `dmaswap_core` is protocol-agnostic: the compositor is reached through one
//! [`SurfaceChannel`](channel::SurfaceChannel) per surface, and the GPU
//! driver, buffer allocator and kernel sync primitives through the traits in
//! [`platform`]. A Wayland implementation of the channel lives in
//! `dmaswap_wayland`.
//!
//! # Architecture
//!
//! ```text
//!   DefaultFeedback ──► DisplayInstance (formats, devices, services)
//!                              │
//!                              ▼
//!   SurfaceFeedback ──► Surface::create ──► Swapchain ──► PresentBuffer
//!                              │                              │
//!                              ▼                              ▼
//!                     Surface::submit_frame             Timeline / dma-buf
//!                              │
//!       pacing wait ─► realloc ─► acquire ─► sync ─► commit ─► next back
//!                              │
//!                              ▼
//!                 SurfaceEvent ──► Pacing::handle / Swapchain release
//! ```
//!
//! **[`format`]** — Fourcc codes, modifiers, the known-format catalog and
//! frozen [`FormatList`](format::FormatList) tables.
//!
//! **[`feedback`]** — Folds dma-buf feedback tranches into a connection-wide
//! format list and per-surface modifier updates.
//!
//! **[`display`]** — The shared [`DisplayInstance`](display::DisplayInstance).
//!
//! **[`swapchain`]** — Present-buffer pool: allocation, release tracking and
//! buffer age, in direct or PRIME mode.
//!
//! **[`timeline`]** — Explicit-sync timelines, two points per frame.
//!
//! **[`pacing`]** — Frame callbacks, FIFO barriers, commit timestamps and
//! presentation feedback.
//!
//! **[`frame`]** — Fence hand-off and the per-frame request batch.
//!
//! **[`surface`]** — The [`Surface`](surface::Surface) orchestrator and its
//! native-window contract.
//!
//! **[`features`]** — Negatively cached kernel capability probes.

pub mod channel;
pub mod config;
pub mod display;
pub mod error;
pub mod features;
pub mod feedback;
pub mod format;
pub mod frame;
pub mod pacing;
pub mod platform;
pub mod surface;
pub mod swapchain;
pub mod time;
pub mod timeline;

#[cfg(test)]
mod testing;

pub use config::{PresentConfig, SurfaceAttributes, WindowConfig};
pub use display::{DisplayDesc, DisplayInstance, DisplayServices, SurfaceKey};
pub use error::{
    AllocationError, ChannelError, DriverError, NegotiationError, SurfaceError, SyncError,
};
pub use format::{Fourcc, Modifier};
pub use surface::{NativeWindow, Surface, WindowListener};
