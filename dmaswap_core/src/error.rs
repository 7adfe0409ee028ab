// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy.
//!
//! Negotiation and allocation failures surface as creation failures for one
//! surface only. Synchronization failures are mostly absorbed by CPU-block
//! fallbacks; the ones that escape are reported as [`SyncError`].

use rustix::io::Errno;
use thiserror::Error;

use crate::format::Fourcc;

/// Failure reported by an opaque driver primitive.
#[derive(Debug, Error)]
#[error("driver operation `{operation}` failed")]
pub struct DriverError {
    /// Name of the failing primitive.
    pub operation: &'static str,
}

impl DriverError {
    /// Creates an error for the named primitive.
    #[must_use]
    pub const fn new(operation: &'static str) -> Self {
        Self { operation }
    }
}

/// No usable format/modifier combination could be agreed on.
#[derive(Debug, Error)]
pub enum NegotiationError {
    /// The feedback session saw malformed data or failed to load its table.
    #[error("malformed dma-buf feedback")]
    MalformedFeedback,
    /// The session finished without any recognized format.
    #[error("compositor advertised no usable formats")]
    NoFormats,
    /// The session finished with formats but no modifiers.
    #[error("compositor advertised no usable modifiers")]
    NoModifiers,
    /// The config format has no opaque counterpart.
    #[error("no opaque format for {0:?}")]
    NoOpaqueFormat(Fourcc),
    /// The driver cannot render to this format.
    #[error("driver does not support {0:?}")]
    UnsupportedFormat(Fourcc),
    /// Neither a shared modifier nor linear is available.
    #[error("no supported format modifiers for {0:?}")]
    NoCommonModifier(Fourcc),
}

/// A buffer or kernel object could not be created.
#[derive(Debug, Error)]
pub enum AllocationError {
    /// The driver rejected an allocation, import or export.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// A kernel object could not be created.
    #[error("kernel allocation `{operation}` failed")]
    Kernel {
        /// Name of the failing primitive.
        operation: &'static str,
        /// Error reported by the kernel.
        #[source]
        errno: Errno,
    },
    /// The compositor refused to wrap the buffer.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The timeline for a new buffer could not be created.
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// A fence or timeline operation failed.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A sync-object ioctl failed.
    #[error("syncobj `{operation}` failed")]
    Kernel {
        /// Name of the failing primitive.
        operation: &'static str,
        /// Error reported by the kernel.
        #[source]
        errno: Errno,
    },
    /// A driver fence primitive failed.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// Sharing the timeline with the compositor failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// Polling a dma-buf for release failed.
    #[error("polling dma-buf release failed")]
    Poll(#[source] Errno),
}

impl SyncError {
    pub(crate) const fn kernel(operation: &'static str, errno: Errno) -> Self {
        Self::Kernel { operation, errno }
    }
}

/// The compositor channel failed.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connection is gone or a protocol error was raised.
    #[error("compositor connection failed")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The compositor rejected a dma-buf.
    #[error("compositor rejected dma-buf")]
    BufferRejected,
    /// A required global is not bound.
    #[error("compositor does not support `{0}`")]
    Unsupported(&'static str),
}

/// Errors returned by surface entry points.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// The window config cannot be used for window surfaces.
    #[error("config cannot be used for window surfaces")]
    BadConfig,
    /// A surface already exists for this compositor surface.
    #[error("a surface already exists for this window")]
    AlreadyExists,
    /// The native window was destroyed.
    #[error("native window has been destroyed")]
    BadNativeWindow,
    /// The surface was already torn down.
    #[error("surface has been destroyed")]
    Destroyed,
    /// See [`NegotiationError`].
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    /// See [`AllocationError`].
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// See [`SyncError`].
    #[error(transparent)]
    Sync(#[from] SyncError),
    /// See [`ChannelError`].
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// See [`DriverError`].
    #[error(transparent)]
    Driver(#[from] DriverError),
}
