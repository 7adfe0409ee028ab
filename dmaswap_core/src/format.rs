// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pixel formats, memory-layout modifiers and frozen format tables.
//!
//! A [`FormatList`] is the immutable result of negotiation: formats sorted by
//! code so [`FormatList::find`] can binary search, each with its distinct
//! modifiers in first-seen order. Lists are shared between surfaces through
//! [`Arc`] and never mutated after construction.

use core::fmt;
use std::sync::Arc;

/// A DRM fourcc pixel-format code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fourcc(pub u32);

impl Fourcc {
    /// Builds a fourcc code from its four ASCII characters.
    #[must_use]
    pub const fn from_chars(chars: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(chars))
    }

    /// `DRM_FORMAT_INVALID`.
    pub const INVALID: Self = Self(0);
    /// `DRM_FORMAT_ARGB8888`.
    pub const ARGB8888: Self = Self::from_chars(*b"AR24");
    /// `DRM_FORMAT_XRGB8888`.
    pub const XRGB8888: Self = Self::from_chars(*b"XR24");
    /// `DRM_FORMAT_ABGR8888`.
    pub const ABGR8888: Self = Self::from_chars(*b"AB24");
    /// `DRM_FORMAT_XBGR8888`.
    pub const XBGR8888: Self = Self::from_chars(*b"XB24");
    /// `DRM_FORMAT_ARGB2101010`.
    pub const ARGB2101010: Self = Self::from_chars(*b"AR30");
    /// `DRM_FORMAT_XRGB2101010`.
    pub const XRGB2101010: Self = Self::from_chars(*b"XR30");
    /// `DRM_FORMAT_RGB565`.
    pub const RGB565: Self = Self::from_chars(*b"RG16");
    /// `DRM_FORMAT_ABGR16161616F`.
    pub const ABGR16161616F: Self = Self::from_chars(*b"AB4H");
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_le_bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            let text: String = bytes.iter().map(|b| char::from(*b)).collect();
            write!(f, "Fourcc({text:?})")
        } else {
            write!(f, "Fourcc({:#010x})", self.0)
        }
    }
}

/// A DRM format modifier describing a buffer's memory layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Modifier(pub u64);

impl Modifier {
    /// `DRM_FORMAT_MOD_LINEAR`.
    pub const LINEAR: Self = Self(0);
    /// `DRM_FORMAT_MOD_INVALID`: "no explicit modifier".
    pub const INVALID: Self = Self(0x00ff_ffff_ffff_ffff);
}

/// Channel layout of a known pixel format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FormatInfo {
    /// Format code.
    pub fourcc: Fourcc,
    /// Bits per pixel.
    pub bpp: u8,
    /// Red, green, blue and alpha sizes in bits.
    pub colors: [u8; 4],
    /// Red, green, blue and alpha bit offsets.
    pub offsets: [u8; 4],
}

impl FormatInfo {
    /// Returns `true` if the format carries no alpha channel.
    #[must_use]
    pub const fn is_opaque(&self) -> bool {
        self.colors[3] == 0
    }
}

const fn info(code: &[u8; 4], bpp: u8, colors: [u8; 4], offsets: [u8; 4]) -> FormatInfo {
    FormatInfo {
        fourcc: Fourcc::from_chars(*code),
        bpp,
        colors,
        offsets,
    }
}

/// Catalog of pixel formats this crate knows how to present.
///
/// Feedback entries for any other format are dropped during negotiation.
pub static KNOWN_FORMATS: &[FormatInfo] = &[
    info(b"AR24", 32, [8, 8, 8, 8], [16, 8, 0, 24]),
    info(b"RA24", 32, [8, 8, 8, 8], [24, 16, 8, 0]),
    info(b"XR24", 32, [8, 8, 8, 0], [16, 8, 0, 0]),
    info(b"RG24", 24, [8, 8, 8, 0], [16, 8, 0, 0]),
    info(b"XB24", 32, [8, 8, 8, 0], [0, 8, 16, 0]),
    info(b"AB24", 32, [8, 8, 8, 8], [0, 8, 16, 24]),
    info(b"R8  ", 8, [8, 0, 0, 0], [0, 0, 0, 0]),
    info(b"RG88", 16, [8, 8, 0, 0], [8, 0, 0, 0]),
    info(b"R16 ", 16, [16, 0, 0, 0], [0, 0, 0, 0]),
    info(b"RG32", 32, [16, 16, 0, 0], [16, 0, 0, 0]),
    info(b"AR30", 32, [10, 10, 10, 2], [20, 10, 0, 30]),
    info(b"AB30", 32, [10, 10, 10, 2], [0, 10, 20, 30]),
    info(b"AB4H", 64, [16, 16, 16, 16], [0, 16, 32, 48]),
    info(b"RGB8", 8, [3, 3, 2, 0], [5, 2, 0, 0]),
    info(b"AR12", 16, [4, 4, 4, 4], [8, 4, 0, 12]),
    info(b"AB12", 16, [4, 4, 4, 4], [0, 4, 8, 12]),
    info(b"RA12", 16, [4, 4, 4, 4], [12, 8, 4, 0]),
    info(b"BA12", 16, [4, 4, 4, 4], [4, 8, 12, 0]),
    info(b"XR12", 16, [4, 4, 4, 0], [8, 4, 0, 0]),
    info(b"XB12", 16, [4, 4, 4, 0], [0, 4, 8, 0]),
    info(b"RX12", 16, [4, 4, 4, 0], [12, 8, 4, 0]),
    info(b"BX12", 16, [4, 4, 4, 0], [4, 8, 12, 0]),
    info(b"XR15", 16, [5, 5, 5, 0], [10, 5, 0, 0]),
    info(b"XB15", 16, [5, 5, 5, 0], [0, 5, 10, 0]),
    info(b"RX15", 16, [5, 5, 5, 0], [11, 6, 1, 0]),
    info(b"BX15", 16, [5, 5, 5, 0], [1, 6, 11, 0]),
    info(b"AR15", 16, [5, 5, 5, 1], [10, 5, 0, 15]),
    info(b"AB15", 16, [5, 5, 5, 1], [0, 5, 10, 15]),
    info(b"RA15", 16, [5, 5, 5, 1], [11, 6, 1, 0]),
    info(b"BA15", 16, [5, 5, 5, 1], [1, 6, 11, 0]),
    info(b"RG16", 16, [5, 6, 5, 0], [11, 5, 0, 0]),
    info(b"BG16", 16, [5, 6, 5, 0], [0, 5, 11, 0]),
    info(b"BG24", 24, [8, 8, 8, 0], [0, 8, 16, 0]),
    info(b"RX24", 32, [8, 8, 8, 0], [24, 16, 8, 0]),
    info(b"BX24", 32, [8, 8, 8, 0], [8, 16, 24, 0]),
    info(b"BA24", 32, [8, 8, 8, 8], [8, 16, 24, 0]),
    info(b"XR30", 32, [10, 10, 10, 0], [20, 10, 0, 0]),
    info(b"XB30", 32, [10, 10, 10, 0], [0, 10, 20, 0]),
    info(b"RX30", 32, [10, 10, 10, 0], [22, 12, 2, 0]),
    info(b"BX30", 32, [10, 10, 10, 0], [2, 12, 22, 0]),
    info(b"RA30", 32, [10, 10, 10, 2], [22, 12, 2, 0]),
    info(b"BA30", 32, [10, 10, 10, 2], [2, 12, 22, 0]),
];

/// Looks up a format in [`KNOWN_FORMATS`].
#[must_use]
pub fn format_info(fourcc: Fourcc) -> Option<&'static FormatInfo> {
    KNOWN_FORMATS.iter().find(|info| info.fourcc == fourcc)
}

/// Returns the opaque counterpart of `fourcc`.
///
/// Opaque formats map to themselves. Otherwise the result has the same bits
/// per pixel, the same RGB sizes and offsets, and no alpha. Returns [`None`]
/// for unknown formats and formats without an opaque sibling.
#[must_use]
pub fn find_opaque_format(fourcc: Fourcc) -> Option<Fourcc> {
    let fmt = format_info(fourcc)?;
    if fmt.is_opaque() {
        return Some(fmt.fourcc);
    }
    KNOWN_FORMATS
        .iter()
        .find(|other| {
            other.is_opaque()
                && other.bpp == fmt.bpp
                && other.colors[..3] == fmt.colors[..3]
                && other.offsets[..3] == fmt.offsets[..3]
        })
        .map(|other| other.fourcc)
}

/// One pixel format together with the modifiers supported for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatEntry {
    /// Format code.
    pub fourcc: Fourcc,
    /// Distinct supported modifiers, in the order they were reported.
    pub modifiers: Vec<Modifier>,
}

impl FormatEntry {
    /// Creates an entry, dropping duplicate modifiers.
    #[must_use]
    pub fn new(fourcc: Fourcc, modifiers: impl IntoIterator<Item = Modifier>) -> Self {
        let mut entry = Self {
            fourcc,
            modifiers: Vec::new(),
        };
        for modifier in modifiers {
            entry.push_modifier(modifier);
        }
        entry
    }

    pub(crate) fn push_modifier(&mut self, modifier: Modifier) {
        if !self.modifiers.contains(&modifier) {
            self.modifiers.push(modifier);
        }
    }

    /// Returns `true` if `modifier` is listed for this format.
    #[must_use]
    pub fn supports(&self, modifier: Modifier) -> bool {
        self.modifiers.contains(&modifier)
    }
}

/// An immutable table of formats sorted by code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormatList {
    entries: Vec<FormatEntry>,
}

impl FormatList {
    /// Builds a list, merging entries that share a format code.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = FormatEntry>) -> Self {
        let mut merged: Vec<FormatEntry> = Vec::new();
        for entry in entries {
            match merged.iter_mut().find(|e| e.fourcc == entry.fourcc) {
                Some(existing) => {
                    for modifier in entry.modifiers {
                        existing.push_modifier(modifier);
                    }
                }
                None => merged.push(FormatEntry::new(entry.fourcc, entry.modifiers)),
            }
        }
        merged.sort_by_key(|e| e.fourcc);
        Self { entries: merged }
    }

    /// Wraps the list for sharing across surfaces.
    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Binary-searches for `fourcc`.
    #[must_use]
    pub fn find(&self, fourcc: Fourcc) -> Option<&FormatEntry> {
        self.entries
            .binary_search_by_key(&fourcc, |e| e.fourcc)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Returns `true` if `fourcc` is listed with `modifier`.
    #[must_use]
    pub fn supports(&self, fourcc: Fourcc, modifier: Modifier) -> bool {
        self.find(fourcc).is_some_and(|e| e.supports(modifier))
    }

    /// Iterates entries in ascending format order.
    pub fn iter(&self) -> impl Iterator<Item = &FormatEntry> {
        self.entries.iter()
    }

    /// Number of formats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no formats are listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Intersects the driver's modifiers for a format with what the compositor
/// supports for the presented format, keeping driver order.
///
/// An empty result means no shared layout exists: the caller must fall back to
/// PRIME (linear present buffers plus a copy). Under `force_prime` the result
/// is always empty.
#[must_use]
pub fn pick_default_modifiers(
    driver: &FormatEntry,
    compositor: &FormatList,
    present_fourcc: Fourcc,
    force_prime: bool,
) -> Vec<Modifier> {
    if force_prime {
        return Vec::new();
    }
    let Some(server) = compositor.find(present_fourcc) else {
        return Vec::new();
    };
    driver
        .modifiers
        .iter()
        .copied()
        .filter(|m| server.supports(*m))
        .collect()
}
