// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The display instance shared by every surface.
//!
//! A [`DisplayInstance`] bundles what the bootstrap collaborator resolved
//! once per connection: driver services, the driver's renderable formats,
//! the compositor's negotiated default formats, and the device ids used to
//! match feedback tranches. Surfaces, swapchains and timelines hold it
//! through an [`Arc`], so it outlives every object it issued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::PresentConfig;
use crate::error::SurfaceError;
use crate::features::{Feature, FeatureCache};
use crate::feedback::{DeviceId, NegotiatedFeedback};
use crate::format::FormatList;
use crate::platform::{BufferAllocator, DmabufSync, GpuDriver, SyncobjDevice};

/// Identifies a compositor surface. Two native windows wrapping the same
/// compositor surface share a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceKey(pub u64);

/// Driver and kernel services.
#[derive(Clone, Debug)]
pub struct DisplayServices {
    /// Rendering driver.
    pub driver: Arc<dyn GpuDriver>,
    /// Buffer-object allocator for the render device.
    pub allocator: Arc<dyn BufferAllocator>,
    /// Timeline sync objects, if the device supports them.
    pub syncobj: Option<Arc<dyn SyncobjDevice>>,
    /// Implicit dma-buf fences, if the kernel exposes them.
    pub dmabuf_sync: Option<Arc<dyn DmabufSync>>,
}

/// Everything needed to build a [`DisplayInstance`].
#[derive(Debug)]
pub struct DisplayDesc {
    /// Driver and kernel services.
    pub services: DisplayServices,
    /// Formats and modifiers the driver can render to.
    pub driver_formats: Arc<FormatList>,
    /// The compositor's connection-wide default feedback.
    pub default_feedback: NegotiatedFeedback,
    /// Device ids of the render device (primary and render nodes).
    pub render_devices: Vec<DeviceId>,
    /// Present only through linear buffers plus a copy.
    pub force_prime: bool,
    /// The driver honours implicit fences on shared dma-bufs.
    pub implicit_sync: bool,
    /// Tunables.
    pub config: PresentConfig,
    /// Kernel feature cache, usually [`FeatureCache::process`].
    pub features: Arc<FeatureCache>,
}

impl DisplayDesc {
    /// Returns `true` if the render device is not the compositor's main
    /// device, which requires presenting through PRIME.
    #[must_use]
    pub fn needs_prime(&self) -> bool {
        !self
            .render_devices
            .contains(&self.default_feedback.main_device)
    }
}

/// Shared per-connection state.
#[derive(Debug)]
pub struct DisplayInstance {
    services: DisplayServices,
    driver_formats: Arc<FormatList>,
    default_feedback: NegotiatedFeedback,
    render_devices: Vec<DeviceId>,
    force_prime: bool,
    implicit_sync: bool,
    config: PresentConfig,
    features: Arc<FeatureCache>,
    surfaces: Mutex<HashSet<SurfaceKey>>,
}

impl DisplayInstance {
    /// Creates a shared instance.
    #[must_use]
    pub fn new(desc: DisplayDesc) -> Arc<Self> {
        tracing::debug!(
            driver_formats = desc.driver_formats.len(),
            default_formats = desc.default_feedback.formats.len(),
            force_prime = desc.force_prime,
            implicit_sync = desc.implicit_sync,
            explicit_sync = desc.services.syncobj.is_some(),
            "display instance created"
        );
        Arc::new(Self {
            services: desc.services,
            driver_formats: desc.driver_formats,
            default_feedback: desc.default_feedback,
            render_devices: desc.render_devices,
            force_prime: desc.force_prime,
            implicit_sync: desc.implicit_sync,
            config: desc.config,
            features: desc.features,
            surfaces: Mutex::new(HashSet::new()),
        })
    }

    /// Rendering driver.
    #[must_use]
    pub fn driver(&self) -> &dyn GpuDriver {
        self.services.driver.as_ref()
    }

    /// Buffer-object allocator.
    #[must_use]
    pub fn allocator(&self) -> &dyn BufferAllocator {
        self.services.allocator.as_ref()
    }

    /// Timeline sync-object device, if any.
    #[must_use]
    pub fn syncobj(&self) -> Option<&Arc<dyn SyncobjDevice>> {
        self.services.syncobj.as_ref()
    }

    /// Formats the driver can render to.
    #[must_use]
    pub fn driver_formats(&self) -> &FormatList {
        &self.driver_formats
    }

    /// The compositor's connection-wide formats.
    #[must_use]
    pub fn default_formats(&self) -> &Arc<FormatList> {
        &self.default_feedback.formats
    }

    /// The compositor's main device.
    #[must_use]
    pub fn main_device(&self) -> DeviceId {
        self.default_feedback.main_device
    }

    /// Device ids of the render device.
    #[must_use]
    pub fn render_devices(&self) -> &[DeviceId] {
        &self.render_devices
    }

    /// Whether every surface presents through PRIME.
    #[must_use]
    pub fn force_prime(&self) -> bool {
        self.force_prime
    }

    /// Tunables.
    #[must_use]
    pub fn config(&self) -> &PresentConfig {
        &self.config
    }

    /// Kernel feature cache.
    #[must_use]
    pub fn features(&self) -> &FeatureCache {
        &self.features
    }

    /// Whether implicit fences on shared dma-bufs can be relied on: the
    /// driver honours them and the kernel can import and export them.
    #[must_use]
    pub fn implicit_sync(&self) -> bool {
        self.implicit_sync
            && self.services.dmabuf_sync.is_some()
            && self.features.is_available(Feature::DmabufSyncFile)
    }

    /// Implicit dma-buf fence ioctls, if usable.
    pub(crate) fn dmabuf_sync(&self) -> Option<&dyn DmabufSync> {
        if self.features.is_available(Feature::DmabufSyncFile) {
            self.services.dmabuf_sync.as_deref()
        } else {
            None
        }
    }

    /// Whether explicit sync can be used given what the compositor offers.
    #[must_use]
    pub fn explicit_sync(&self, compositor_supports: bool) -> bool {
        compositor_supports
            && self.services.syncobj.is_some()
            && self.services.driver.supports_native_fence()
    }

    /// Claims `key` for a new surface. Fails if another surface already
    /// presents to the same compositor surface.
    pub fn register_surface(
        self: &Arc<Self>,
        key: SurfaceKey,
    ) -> Result<SurfaceRegistration, SurfaceError> {
        let mut surfaces = self.surfaces.lock().unwrap_or_else(PoisonError::into_inner);
        if !surfaces.insert(key) {
            return Err(SurfaceError::AlreadyExists);
        }
        Ok(SurfaceRegistration {
            display: Arc::clone(self),
            key,
        })
    }

    /// Number of live surfaces.
    #[must_use]
    pub fn surface_count(&self) -> usize {
        self.surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Holds a [`SurfaceKey`] claimed until dropped.
#[derive(Debug)]
pub struct SurfaceRegistration {
    display: Arc<DisplayInstance>,
    key: SurfaceKey,
}

impl SurfaceRegistration {
    /// The display instance the key was claimed on.
    #[must_use]
    pub fn display(&self) -> &Arc<DisplayInstance> {
        &self.display
    }

    /// The claimed key.
    #[must_use]
    pub fn key(&self) -> SurfaceKey {
        self.key
    }
}

impl Drop for SurfaceRegistration {
    fn drop(&mut self) {
        self.display
            .surfaces
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
