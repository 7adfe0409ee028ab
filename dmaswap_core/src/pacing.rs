// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame pacing state.
//!
//! Two pacing schemes exist, chosen by what the compositor offers:
//!
//! - **Frame callback**: each commit requests a `frame` callback and the
//!   next frame waits for it.
//! - **FIFO + presentation feedback**: each commit sets a FIFO barrier,
//!   optionally carries a target timestamp, and requests presentation
//!   feedback; the next frame waits for that feedback.
//!
//! Both also request a display sync after every commit, which
//! [`Pacing::is_displaying`] reports for the GPU-and-protocol wait.
//!
//! [`Pacing::handle`] is the single entry point for the events these
//! objects produce.

use core::time::Duration;

use crate::channel::{CallbackId, PresentationId, SurfaceChannel, SurfaceEvent};
use crate::time::{Clock, HostTime};

/// Outstanding pacing objects and the last observed presentation timing.
#[derive(Debug)]
pub struct Pacing {
    clock: Clock,
    frame_callback: Option<CallbackId>,
    last_swap_sync: Option<CallbackId>,
    presentation: Option<PresentationId>,
    last_timestamp: HostTime,
    last_refresh_ns: u64,
}

impl Pacing {
    /// Creates idle state. `default_refresh` is assumed until the first
    /// presentation event.
    #[must_use]
    pub fn new(clock: Clock, default_refresh: Duration) -> Self {
        Self {
            clock,
            frame_callback: None,
            last_swap_sync: None,
            presentation: None,
            last_timestamp: HostTime::default(),
            last_refresh_ns: u64::try_from(default_refresh.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    /// Returns `true` while the previous frame's pacing signal is
    /// outstanding.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.frame_callback.is_some() || self.last_swap_sync.is_some() || self.presentation.is_some()
    }

    /// Returns `true` while the last commit has not reached the compositor
    /// or has not been shown yet. Frame callbacks are not included because
    /// they may never fire for a hidden surface.
    #[must_use]
    pub fn is_displaying(&self) -> bool {
        self.last_swap_sync.is_some() || self.presentation.is_some()
    }

    /// When the last frame was shown, or unset before the first one.
    #[must_use]
    pub fn last_timestamp(&self) -> HostTime {
        self.last_timestamp
    }

    /// The last reported refresh period in nanoseconds.
    #[must_use]
    pub fn last_refresh_ns(&self) -> u64 {
        self.last_refresh_ns
    }

    /// Folds one event into the state. Returns `false` if the event does not
    /// belong to an outstanding pacing object.
    pub fn handle(&mut self, event: &SurfaceEvent) -> bool {
        match *event {
            SurfaceEvent::CallbackDone(id) => {
                let mut matched = false;
                if self.frame_callback == Some(id) {
                    self.frame_callback = None;
                    matched = true;
                }
                if self.last_swap_sync == Some(id) {
                    self.last_swap_sync = None;
                    matched = true;
                }
                matched
            }
            SurfaceEvent::Presented {
                id,
                timestamp,
                refresh_ns,
            } if self.presentation == Some(id) => {
                self.presentation = None;
                self.last_timestamp = timestamp;
                self.last_refresh_ns = u64::from(refresh_ns);
                tracing::trace!(?timestamp, refresh_ns, "frame presented");
                true
            }
            SurfaceEvent::Discarded(id) if self.presentation == Some(id) => {
                self.presentation = None;
                self.last_timestamp = self.clock.now();
                tracing::trace!("frame discarded");
                true
            }
            _ => false,
        }
    }

    /// Computes the earliest time the next commit should be applied:
    /// `interval` refresh periods after the last presentation, minus
    /// `margin`.
    ///
    /// Returns [`None`] before the first presentation or when the interval
    /// is shorter than the margin.
    #[must_use]
    pub fn commit_target(&self, interval: u32, margin: Duration) -> Option<HostTime> {
        if self.last_timestamp.is_unset() {
            return None;
        }
        let margin = u64::try_from(margin.as_nanos()).unwrap_or(u64::MAX);
        let ahead = u64::from(interval).saturating_mul(self.last_refresh_ns);
        if ahead < margin {
            return None;
        }
        Some(HostTime(
            self.last_timestamp.nanos().saturating_add(ahead - margin),
        ))
    }

    /// Drops every outstanding pacing object so the next frame is not
    /// throttled by the previous one. An outstanding presentation is treated
    /// as discarded now.
    pub fn abandon(&mut self, channel: &mut dyn SurfaceChannel) {
        if let Some(id) = self.presentation.take() {
            channel.destroy_presentation_feedback(id);
            self.last_timestamp = self.clock.now();
        }
        if let Some(id) = self.frame_callback.take() {
            channel.destroy_callback(id);
        }
        if let Some(id) = self.last_swap_sync.take() {
            channel.destroy_callback(id);
        }
    }

    /// Records the frame callback requested with a commit.
    pub fn set_frame_callback(&mut self, id: CallbackId) {
        self.frame_callback = Some(id);
    }

    /// Records the display sync requested after a commit.
    pub fn set_swap_sync(&mut self, id: CallbackId) {
        self.last_swap_sync = Some(id);
    }

    /// Records the presentation feedback requested with a commit.
    pub fn set_presentation(&mut self, id: PresentationId) {
        self.presentation = Some(id);
    }

    /// Destroys outstanding objects without touching the timing state.
    pub fn shutdown(&mut self, channel: &mut dyn SurfaceChannel) {
        if let Some(id) = self.presentation.take() {
            channel.destroy_presentation_feedback(id);
        }
        if let Some(id) = self.frame_callback.take() {
            channel.destroy_callback(id);
        }
        if let Some(id) = self.last_swap_sync.take() {
            channel.destroy_callback(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::Pacing;
    use crate::channel::{CallbackId, PresentationId, SurfaceEvent};
    use crate::testing::FakeChannel;
    use crate::time::{Clock, HostTime};

    const REFRESH: Duration = Duration::from_nanos(16_666_666);
    const MARGIN: Duration = Duration::from_micros(500);

    #[test]
    fn no_target_before_first_presentation() {
        let pacing = Pacing::new(Clock::Monotonic, REFRESH);
        assert_eq!(pacing.commit_target(1, MARGIN), None);
    }

    #[test]
    fn target_is_interval_refreshes_after_last_present() {
        let mut pacing = Pacing::new(Clock::Monotonic, REFRESH);
        pacing.set_presentation(PresentationId(1));
        assert!(pacing.handle(&SurfaceEvent::Presented {
            id: PresentationId(1),
            timestamp: HostTime(1_000_000_000),
            refresh_ns: 10_000_000,
        }));
        assert!(!pacing.is_pending());

        assert_eq!(
            pacing.commit_target(2, MARGIN),
            Some(HostTime(1_000_000_000 + 20_000_000 - 500_000))
        );
        assert_eq!(
            pacing.commit_target(0, MARGIN),
            None,
            "an interval shorter than the margin gets no target"
        );
    }

    #[test]
    fn unknown_refresh_disables_the_target() {
        let mut pacing = Pacing::new(Clock::Monotonic, REFRESH);
        pacing.set_presentation(PresentationId(1));
        pacing.handle(&SurfaceEvent::Presented {
            id: PresentationId(1),
            timestamp: HostTime(5),
            refresh_ns: 0,
        });
        assert_eq!(pacing.commit_target(1, MARGIN), None);
    }

    #[test]
    fn one_callback_can_satisfy_both_slots() {
        let mut pacing = Pacing::new(Clock::Monotonic, REFRESH);
        pacing.set_frame_callback(CallbackId(3));
        pacing.set_swap_sync(CallbackId(4));
        assert!(pacing.is_pending());
        assert!(pacing.is_displaying());

        assert!(pacing.handle(&SurfaceEvent::CallbackDone(CallbackId(4))));
        assert!(!pacing.is_displaying());
        assert!(pacing.is_pending(), "frame callback still outstanding");
        assert!(!pacing.handle(&SurfaceEvent::CallbackDone(CallbackId(99))));
        assert!(pacing.handle(&SurfaceEvent::CallbackDone(CallbackId(3))));
        assert!(!pacing.is_pending());
    }

    #[test]
    fn stale_presentation_events_are_ignored() {
        let mut pacing = Pacing::new(Clock::Monotonic, REFRESH);
        pacing.set_presentation(PresentationId(2));
        assert!(!pacing.handle(&SurfaceEvent::Discarded(PresentationId(1))));
        assert!(pacing.is_pending());
    }

    #[test]
    fn discard_uses_the_current_time() {
        let mut pacing = Pacing::new(Clock::Monotonic, REFRESH);
        pacing.set_presentation(PresentationId(1));
        let before = Clock::Monotonic.now();
        assert!(pacing.handle(&SurfaceEvent::Discarded(PresentationId(1))));
        assert!(pacing.last_timestamp() >= before);
    }

    #[test]
    fn abandon_destroys_everything_and_stamps_now() {
        let (mut channel, log) = FakeChannel::new();
        let mut pacing = Pacing::new(Clock::Monotonic, REFRESH);
        pacing.set_frame_callback(CallbackId(1));
        pacing.set_swap_sync(CallbackId(2));
        pacing.set_presentation(PresentationId(3));

        let before = Clock::Monotonic.now();
        pacing.abandon(&mut channel);
        assert!(!pacing.is_pending());
        assert!(pacing.last_timestamp() >= before);

        let state = log.state();
        assert_eq!(state.destroyed_callbacks, vec![CallbackId(1), CallbackId(2)]);
        assert_eq!(state.destroyed_presentations, vec![PresentationId(3)]);
    }
}
