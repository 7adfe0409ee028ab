// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Native window handle for a `wl_surface`, the analogue of `wl_egl_window`.
//!
//! The host owns the [`Window`] and reports size changes through
//! [`Window::resize`]; the presentation surface built on it listens for
//! those through [`WindowListener`] and records the committed buffer size
//! back through [`NativeWindow::set_attached_size`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dmaswap_core::display::SurfaceKey;
use dmaswap_core::surface::{NativeWindow, WindowListener};
use wayland_client::Proxy;
use wayland_client::protocol::wl_surface::WlSurface;

#[derive(Default)]
struct Geometry {
    size: (i32, i32),
    attached: (u32, u32),
    listener: Option<Weak<dyn WindowListener>>,
    destroyed: bool,
}

impl Geometry {
    fn listener(&self) -> Option<Arc<dyn WindowListener>> {
        self.listener.as_ref().and_then(Weak::upgrade)
    }
}

/// A sized handle around a host-owned `wl_surface`.
pub struct Window {
    surface: WlSurface,
    geometry: Mutex<Geometry>,
}

impl core::fmt::Debug for Window {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let geometry = self.geometry();
        f.debug_struct("Window")
            .field("surface", &self.surface.id())
            .field("size", &geometry.size)
            .field("attached", &geometry.attached)
            .field("destroyed", &geometry.destroyed)
            .finish_non_exhaustive()
    }
}

impl Window {
    /// Wraps `surface` with an initial size in pixels.
    #[must_use]
    pub fn new(surface: &WlSurface, width: i32, height: i32) -> Arc<Self> {
        Arc::new(Self {
            surface: surface.clone(),
            geometry: Mutex::new(Geometry {
                size: (width, height),
                ..Geometry::default()
            }),
        })
    }

    fn geometry(&self) -> MutexGuard<'_, Geometry> {
        self.geometry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The wrapped surface.
    #[must_use]
    pub fn surface(&self) -> &WlSurface {
        &self.surface
    }

    /// Sets a new requested size and notifies the presentation surface.
    ///
    /// The listener runs after the internal lock is released, so it may call
    /// back into the window.
    pub fn resize(&self, width: i32, height: i32) {
        let listener = {
            let mut geometry = self.geometry();
            if geometry.destroyed {
                return;
            }
            geometry.size = (width, height);
            geometry.listener()
        };
        if let Some(listener) = listener {
            listener.resized(width, height);
        }
    }

    /// Size of the last buffer committed to the surface.
    #[must_use]
    pub fn attached_size(&self) -> (u32, u32) {
        self.geometry().attached
    }

    /// Detaches the window from its surface and tells the presentation
    /// surface to stop submitting. Further resizes are ignored.
    pub fn destroy(&self) {
        let listener = {
            let mut geometry = self.geometry();
            if geometry.destroyed {
                return;
            }
            geometry.destroyed = true;
            geometry.listener.take().as_ref().and_then(Weak::upgrade)
        };
        if let Some(listener) = listener {
            listener.destroyed();
        }
    }
}

impl NativeWindow for Window {
    fn surface_key(&self) -> Option<SurfaceKey> {
        if self.geometry().destroyed || !self.surface.is_alive() {
            return None;
        }
        Some(SurfaceKey(u64::from(self.surface.id().protocol_id())))
    }

    fn size(&self) -> (i32, i32) {
        self.geometry().size
    }

    fn set_attached_size(&self, width: u32, height: u32) {
        self.geometry().attached = (width, height);
    }

    fn set_listener(&self, listener: Option<Weak<dyn WindowListener>>) {
        let mut geometry = self.geometry();
        if geometry.destroyed && listener.is_some() {
            return;
        }
        geometry.listener = listener;
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        self.destroy();
    }
}
