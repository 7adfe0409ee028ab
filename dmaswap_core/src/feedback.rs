// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! dma-buf feedback aggregation.
//!
//! The compositor describes the buffer layouts it can consume as a sequence
//! of tranches. Each tranche names a target device, some flags and a list of
//! indices into a shared format table. This module folds those events into
//! something the swapchain can act on:
//!
//! - [`DefaultFeedback`] runs once per connection and produces a frozen
//!   [`FormatList`] for the compositor's main device.
//! - [`SurfaceFeedback`] stays attached to one surface and turns every
//!   re-sent batch into a [`SurfaceModifiers`] update for a single format.
//!
//! Both are driven by [`FeedbackEvent`] values through a single `handle`
//! entry point. Malformed input sets a session-wide error flag instead of
//! failing immediately; the flag is converted into a failure when the
//! session finishes.

use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;

use rustix::io::{Errno, pread};

use crate::error::NegotiationError;
use crate::format::{FormatEntry, FormatList, Fourcc, Modifier, format_info};

const TABLE_ENTRY_SIZE: usize = 16;

/// A DRM device number (`dev_t`) as carried in feedback events.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u64);

impl DeviceId {
    /// Parses a native-endian `dev_t` from a protocol byte array.
    ///
    /// Arrays shorter than a `dev_t` are rejected.
    #[must_use]
    pub fn from_ne_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
        Some(Self(u64::from_ne_bytes(raw)))
    }
}

/// One event of a feedback session.
#[derive(Debug)]
pub enum FeedbackEvent {
    /// Shared table of `(format, modifier)` pairs, replacing any prior table.
    FormatTable {
        /// Read-only descriptor for the table.
        fd: OwnedFd,
        /// Table size in bytes.
        size: u32,
    },
    /// Device the compositor composites on.
    MainDevice(DeviceId),
    /// Device the current tranche targets.
    TrancheTargetDevice(DeviceId),
    /// Flags of the current tranche.
    TrancheFlags(u32),
    /// Indices into the format table for the current tranche.
    TrancheFormats(Vec<u16>),
    /// The current tranche is complete.
    TrancheDone,
    /// The whole batch is complete.
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TableEntry {
    fourcc: Fourcc,
    modifier: Modifier,
}

/// Snapshot of the compositor's `(format, modifier)` index table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormatTable {
    entries: Vec<TableEntry>,
}

impl FormatTable {
    /// Reads a table of `size` bytes from `fd`.
    ///
    /// Each 16-byte record holds a `u32` format, 4 bytes of padding and a
    /// `u64` modifier. A trailing partial record is ignored.
    pub fn load(fd: impl AsFd, size: u32) -> Result<Self, Errno> {
        let len = usize::try_from(size).map_err(|_| Errno::OVERFLOW)? / TABLE_ENTRY_SIZE;
        let mut bytes = vec![0_u8; len * TABLE_ENTRY_SIZE];
        let mut filled = 0;
        while filled < bytes.len() {
            let offset = u64::try_from(filled).map_err(|_| Errno::OVERFLOW)?;
            match pread(fd.as_fd(), &mut bytes[filled..], offset) {
                Ok(0) => return Err(Errno::IO),
                Ok(n) => filled += n,
                Err(Errno::INTR) => {}
                Err(errno) => return Err(errno),
            }
        }
        Ok(Self::from_bytes(&bytes))
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let entries = bytes
            .chunks_exact(TABLE_ENTRY_SIZE)
            .map(|record| {
                let mut fourcc = [0_u8; 4];
                let mut modifier = [0_u8; 8];
                fourcc.copy_from_slice(&record[..4]);
                modifier.copy_from_slice(&record[8..]);
                TableEntry {
                    fourcc: Fourcc(u32::from_ne_bytes(fourcc)),
                    modifier: Modifier(u64::from_ne_bytes(modifier)),
                }
            })
            .collect();
        Self { entries }
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, index: u16) -> Option<TableEntry> {
        self.entries.get(usize::from(index)).copied()
    }
}

/// State shared by both session kinds.
#[derive(Debug, Default)]
struct FeedbackCommon {
    table: Option<FormatTable>,
    main_device: DeviceId,
    tranche_device: DeviceId,
    tranche_flags: u32,
    error: bool,
}

impl FeedbackCommon {
    fn on_format_table(&mut self, fd: OwnedFd, size: u32) {
        self.table = None;
        match FormatTable::load(&fd, size) {
            Ok(table) if !table.is_empty() => self.table = Some(table),
            Ok(_) => {}
            Err(errno) => {
                tracing::debug!(?errno, size, "failed to read dma-buf format table");
                self.error = true;
            }
        }
    }

    /// Resolves tranche indices; an out-of-range index poisons the session.
    fn resolve(&mut self, indices: &[u16]) -> Vec<TableEntry> {
        let Some(table) = self.table.as_ref() else {
            return Vec::new();
        };
        let mut resolved = Vec::with_capacity(indices.len());
        for &index in indices {
            match table.get(index) {
                Some(entry) => resolved.push(entry),
                None => {
                    tracing::debug!(index, len = table.len(), "feedback index out of range");
                    self.error = true;
                    return Vec::new();
                }
            }
        }
        resolved
    }

    fn tranche_done(&mut self) {
        self.tranche_device = DeviceId::default();
        self.tranche_flags = 0;
    }

    fn done(&mut self) {
        self.tranche_done();
        self.error = false;
    }
}

#[derive(Debug)]
struct Tranche {
    target_device: DeviceId,
    #[expect(dead_code, reason = "only shown in debug output; no tranche flag changes selection")]
    flags: u32,
    formats: Vec<TableEntry>,
}

/// Result of a connection-wide negotiation.
#[derive(Clone, Debug)]
pub struct NegotiatedFeedback {
    /// Formats the compositor can consume from its main device.
    pub formats: Arc<FormatList>,
    /// The compositor's main device, or zero for legacy negotiation.
    pub main_device: DeviceId,
}

/// Connection-wide negotiation session.
#[derive(Debug)]
pub struct DefaultFeedback {
    common: FeedbackCommon,
    pending: Vec<TableEntry>,
    tranches: Vec<Tranche>,
    done: bool,
    legacy: bool,
}

impl Default for DefaultFeedback {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultFeedback {
    /// Starts a session fed by a feedback object.
    #[must_use]
    pub fn new() -> Self {
        Self {
            common: FeedbackCommon::default(),
            pending: Vec::new(),
            tranches: Vec::new(),
            done: false,
            legacy: false,
        }
    }

    /// Starts a session fed by flat `modifier` events from an older
    /// compositor. The result is not filtered by device.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            legacy: true,
            ..Self::new()
        }
    }

    /// Feeds one event.
    pub fn handle(&mut self, event: FeedbackEvent) {
        match event {
            FeedbackEvent::FormatTable { fd, size } => self.common.on_format_table(fd, size),
            FeedbackEvent::MainDevice(device) => self.common.main_device = device,
            FeedbackEvent::TrancheTargetDevice(device) => self.common.tranche_device = device,
            FeedbackEvent::TrancheFlags(flags) => self.common.tranche_flags = flags,
            FeedbackEvent::TrancheFormats(indices) => {
                if self.common.error {
                    return;
                }
                let resolved = self.common.resolve(&indices);
                self.pending.extend(resolved);
            }
            FeedbackEvent::TrancheDone => self.finish_tranche(),
            FeedbackEvent::Done => self.done = true,
        }
    }

    /// Feeds one legacy `modifier` event. `INVALID` modifiers are skipped.
    pub fn handle_legacy_modifier(&mut self, fourcc: Fourcc, modifier: Modifier) {
        if self.common.error || modifier == Modifier::INVALID {
            return;
        }
        self.pending.push(TableEntry { fourcc, modifier });
    }

    /// Marks the session as failed, e.g. after a failed roundtrip.
    pub fn set_error(&mut self) {
        self.common.error = true;
    }

    /// Returns `true` once the compositor has sent `done`.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn finish_tranche(&mut self) {
        if !self.common.error && !self.pending.is_empty() {
            self.tranches.push(Tranche {
                target_device: self.common.tranche_device,
                flags: self.common.tranche_flags,
                formats: core::mem::take(&mut self.pending),
            });
        }
        self.common.tranche_done();
    }

    /// Consumes the session and computes the frozen format list.
    pub fn finish(mut self) -> Result<NegotiatedFeedback, NegotiationError> {
        if self.legacy {
            self.finish_tranche();
        }
        if self.common.error {
            return Err(NegotiationError::MalformedFeedback);
        }

        let main_device = self.common.main_device;
        let legacy = self.legacy;
        let mut entries: Vec<FormatEntry> = Vec::new();
        let mut modifier_count = 0;
        let relevant = self
            .tranches
            .iter()
            .filter(|t| legacy || t.target_device == main_device);
        for entry in relevant.flat_map(|t| t.formats.iter()) {
            if format_info(entry.fourcc).is_none() {
                continue;
            }
            let slot = match entries.iter_mut().position(|e| e.fourcc == entry.fourcc) {
                Some(index) => &mut entries[index],
                None => {
                    entries.push(FormatEntry::new(entry.fourcc, []));
                    let last = entries.len() - 1;
                    &mut entries[last]
                }
            };
            if !slot.supports(entry.modifier) {
                slot.push_modifier(entry.modifier);
                modifier_count += 1;
            }
        }

        if entries.is_empty() {
            return Err(NegotiationError::NoFormats);
        }
        if modifier_count == 0 {
            return Err(NegotiationError::NoModifiers);
        }
        tracing::debug!(
            formats = entries.len(),
            modifiers = modifier_count,
            ?main_device,
            "default dma-buf feedback negotiated"
        );
        Ok(NegotiatedFeedback {
            formats: FormatList::new(entries).shared(),
            main_device,
        })
    }
}

/// Outcome of one surface feedback batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SurfaceModifiers {
    /// Use these modifiers, in driver order.
    Direct(Vec<Modifier>),
    /// Only linear is shared: present through PRIME.
    Prime,
    /// Nothing usable was advertised: fall back to the connection default.
    Default,
}

/// Persistent per-surface feedback state.
///
/// Instead of building a format list, this keeps one support bit per driver
/// modifier plus a linear flag, filled from the first tranche that targets a
/// render device and lists anything usable.
#[derive(Debug)]
pub struct SurfaceFeedback {
    common: FeedbackCommon,
    present_fourcc: Fourcc,
    driver_modifiers: Vec<Modifier>,
    render_devices: Vec<DeviceId>,
    supported: Vec<bool>,
    linear: bool,
    tranche_supported: Vec<bool>,
    tranche_linear: bool,
}

impl SurfaceFeedback {
    /// Creates state for one presented format.
    #[must_use]
    pub fn new(
        present_fourcc: Fourcc,
        driver_modifiers: Vec<Modifier>,
        render_devices: Vec<DeviceId>,
    ) -> Self {
        let count = driver_modifiers.len();
        Self {
            common: FeedbackCommon::default(),
            present_fourcc,
            driver_modifiers,
            render_devices,
            supported: vec![false; count],
            linear: false,
            tranche_supported: vec![false; count],
            tranche_linear: false,
        }
    }

    fn has_modifiers(&self) -> bool {
        !self.driver_modifiers.is_empty() && (self.linear || self.supported.contains(&true))
    }

    /// Feeds one event. Returns an update once a full batch has arrived.
    pub fn handle(&mut self, event: FeedbackEvent) -> Option<SurfaceModifiers> {
        match event {
            FeedbackEvent::FormatTable { fd, size } => self.common.on_format_table(fd, size),
            FeedbackEvent::MainDevice(device) => self.common.main_device = device,
            FeedbackEvent::TrancheTargetDevice(device) => self.common.tranche_device = device,
            FeedbackEvent::TrancheFlags(flags) => self.common.tranche_flags = flags,
            FeedbackEvent::TrancheFormats(indices) => self.on_tranche_formats(&indices),
            FeedbackEvent::TrancheDone => self.on_tranche_done(),
            FeedbackEvent::Done => return self.on_done(),
        }
        None
    }

    fn on_tranche_formats(&mut self, indices: &[u16]) {
        if self.common.error || self.has_modifiers() {
            return;
        }
        for entry in self.common.resolve(indices) {
            if entry.fourcc != self.present_fourcc {
                continue;
            }
            if entry.modifier == Modifier::LINEAR {
                self.tranche_linear = true;
            } else if let Some(i) = self.driver_modifiers.iter().position(|m| *m == entry.modifier) {
                self.tranche_supported[i] = true;
            }
        }
    }

    fn on_tranche_done(&mut self) {
        let use_tranche = !self.common.error
            && !self.has_modifiers()
            && self.render_devices.contains(&self.common.tranche_device);
        if use_tranche {
            self.supported.copy_from_slice(&self.tranche_supported);
            self.linear = self.tranche_linear;
        }
        self.tranche_supported.fill(false);
        self.tranche_linear = false;
        self.common.tranche_done();
    }

    fn on_done(&mut self) -> Option<SurfaceModifiers> {
        let failed = self.common.error;
        let modifiers: Vec<Modifier> = self
            .driver_modifiers
            .iter()
            .zip(&self.supported)
            .filter(|(_, supported)| **supported)
            .map(|(m, _)| *m)
            .collect();
        let linear = self.linear;

        self.supported.fill(false);
        self.tranche_supported.fill(false);
        self.linear = false;
        self.tranche_linear = false;
        self.common.done();

        if failed {
            tracing::debug!("discarding malformed surface feedback batch");
            return None;
        }
        Some(if !modifiers.is_empty() {
            SurfaceModifiers::Direct(modifiers)
        } else if linear {
            SurfaceModifiers::Prime
        } else {
            SurfaceModifiers::Default
        })
    }
}
