// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Default dma-buf feedback negotiation and event decoding.

use dmaswap_core::error::NegotiationError;
use dmaswap_core::feedback::{DefaultFeedback, DeviceId, FeedbackEvent, NegotiatedFeedback};
use dmaswap_core::format::{Fourcc, Modifier};
use wayland_client::{Connection, Dispatch, QueueHandle, WEnum};
use wayland_protocols::wp::linux_dmabuf::zv1::client::zwp_linux_dmabuf_feedback_v1::{
    self, ZwpLinuxDmabufFeedbackV1,
};

use crate::globals::Globals;

/// Why a feedback event could not be decoded.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum DecodeError {
    /// A device array shorter than `dev_t`.
    #[error("device array of {0} bytes is too short")]
    ShortDevice(usize),
    /// A tranche index array with a trailing half index.
    #[error("tranche index array of {0} bytes is not a whole number of indices")]
    OddIndices(usize),
    /// An event this crate does not know about.
    #[error("unknown feedback event")]
    Unknown,
}

fn device(bytes: &[u8]) -> Result<DeviceId, DecodeError> {
    DeviceId::from_ne_bytes(bytes).ok_or(DecodeError::ShortDevice(bytes.len()))
}

/// Converts a protocol event into the core representation.
pub(crate) fn decode(
    event: zwp_linux_dmabuf_feedback_v1::Event,
) -> Result<FeedbackEvent, DecodeError> {
    use zwp_linux_dmabuf_feedback_v1::Event;

    Ok(match event {
        Event::Done => FeedbackEvent::Done,
        Event::FormatTable { fd, size } => FeedbackEvent::FormatTable { fd, size },
        Event::MainDevice { device: bytes } => FeedbackEvent::MainDevice(device(&bytes)?),
        Event::TrancheDone => FeedbackEvent::TrancheDone,
        Event::TrancheTargetDevice { device: bytes } => {
            FeedbackEvent::TrancheTargetDevice(device(&bytes)?)
        }
        Event::TrancheFormats { indices } => {
            let chunks = indices.chunks_exact(2);
            if !chunks.remainder().is_empty() {
                return Err(DecodeError::OddIndices(indices.len()));
            }
            FeedbackEvent::TrancheFormats(
                chunks
                    .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
                    .collect(),
            )
        }
        Event::TrancheFlags { flags } => FeedbackEvent::TrancheFlags(match flags {
            WEnum::Value(flags) => flags.bits(),
            WEnum::Unknown(raw) => raw,
        }),
        _ => return Err(DecodeError::Unknown),
    })
}

/// Feeds a protocol event into a default session; malformed events fail the
/// session.
fn feed(session: &mut DefaultFeedback, event: zwp_linux_dmabuf_feedback_v1::Event) {
    match decode(event) {
        Ok(event) => session.handle(event),
        Err(DecodeError::Unknown) => {}
        Err(err) => {
            tracing::warn!(%err, "malformed default dma-buf feedback");
            session.set_error();
        }
    }
}

#[derive(Debug)]
struct NegotiationState {
    session: DefaultFeedback,
}

impl Dispatch<ZwpLinuxDmabufFeedbackV1, ()> for NegotiationState {
    fn event(
        state: &mut Self,
        _proxy: &ZwpLinuxDmabufFeedbackV1,
        event: zwp_linux_dmabuf_feedback_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        feed(&mut state.session, event);
    }
}

/// Negotiates the connection-wide format list.
///
/// With feedback support a default feedback object is created on a private
/// queue and read until its first `done`. Older compositors are negotiated
/// from the `modifier` events collected while binding.
pub fn negotiate_default_feedback(
    globals: &Globals,
) -> Result<NegotiatedFeedback, NegotiationError> {
    if !globals.has_feedback() {
        return negotiate_legacy(globals.legacy_modifiers());
    }

    let mut queue = globals.connection().new_event_queue::<NegotiationState>();
    let qh = queue.handle();
    let feedback = globals.dmabuf().get_default_feedback(&qh, ());
    let mut state = NegotiationState {
        session: DefaultFeedback::new(),
    };

    // The whole batch is sent in response to the request, so one roundtrip
    // either completes it or it never arrives.
    if let Err(err) = queue.roundtrip(&mut state) {
        tracing::warn!(%err, "default feedback roundtrip failed");
        state.session.set_error();
    } else if !state.session.is_done() {
        tracing::warn!("default feedback incomplete after roundtrip");
        state.session.set_error();
    }
    feedback.destroy();

    state.session.finish()
}

/// Negotiates from flat `(format, modifier)` announcements.
pub(crate) fn negotiate_legacy(
    modifiers: &[(Fourcc, Modifier)],
) -> Result<NegotiatedFeedback, NegotiationError> {
    let mut session = DefaultFeedback::legacy();
    for &(fourcc, modifier) in modifiers {
        session.handle_legacy_modifier(fourcc, modifier);
    }
    session.finish()
}
