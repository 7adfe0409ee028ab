// Copyright 2026 the Dmaswap Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Presentation-clock timestamps.
//!
//! [`HostTime`] is a nanosecond count on the compositor's presentation clock.
//! [`Clock`] selects which POSIX clock that is; the compositor advertises it
//! once per connection and every pacing timestamp is read from it.

use core::fmt;
use core::time::Duration;

use rustix::time::{ClockId, Timespec, clock_gettime};

const NANOS_PER_SECOND: u128 = 1_000_000_000;

/// A point in time in nanoseconds on a presentation [`Clock`].
///
/// `HostTime(0)` doubles as "no timestamp known yet".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HostTime(pub u64);

impl HostTime {
    /// Returns the raw nanosecond value.
    #[inline]
    #[must_use]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Returns `true` if no timestamp has been recorded.
    #[inline]
    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }

    /// Builds a timestamp from the split seconds/nanoseconds form used on the
    /// wire (`tv_sec_hi`, `tv_sec_lo`, `tv_nsec`).
    #[must_use]
    pub fn from_wire(sec_hi: u32, sec_lo: u32, nsec: u32) -> Self {
        let seconds = (u64::from(sec_hi) << 32) | u64::from(sec_lo);
        let ticks = u128::from(seconds)
            .saturating_mul(NANOS_PER_SECOND)
            .saturating_add(u128::from(nsec));
        Self(u64::try_from(ticks).unwrap_or(u64::MAX))
    }

    /// Splits this timestamp into the wire form `(sec_hi, sec_lo, nsec)`.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "splitting a u64 into its high and low halves"
    )]
    pub const fn to_wire(self) -> (u32, u32, u32) {
        let seconds = self.0 / 1_000_000_000;
        let nsec = (self.0 % 1_000_000_000) as u32;
        ((seconds >> 32) as u32, seconds as u32, nsec)
    }

    /// Checked addition of a duration.
    #[inline]
    #[must_use]
    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        let nanos = u64::try_from(duration.as_nanos()).ok()?;
        self.0.checked_add(nanos).map(Self)
    }
}

impl fmt::Debug for HostTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTime({})", self.0)
    }
}

/// Clock source used for presentation timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Clock {
    /// `CLOCK_MONOTONIC`, used until the compositor says otherwise.
    #[default]
    Monotonic,
    /// Clock selected from `wp_presentation.clock_id`.
    Presentation(ClockId),
}

impl Clock {
    /// Maps a raw `clockid_t` advertised by the compositor.
    ///
    /// Unknown ids fall back to [`Clock::Monotonic`].
    #[must_use]
    pub fn from_raw(clock_id: u32) -> Self {
        match clock_id {
            0 => Self::Presentation(ClockId::Realtime),
            1 => Self::Presentation(ClockId::Monotonic),
            4 => Self::Presentation(ClockId::MonotonicRaw),
            7 => Self::Presentation(ClockId::Boottime),
            _ => Self::Monotonic,
        }
    }

    #[must_use]
    const fn posix_clock_id(self) -> ClockId {
        match self {
            Self::Monotonic => ClockId::Monotonic,
            Self::Presentation(clock_id) => clock_id,
        }
    }

    /// Reads the current time on this clock.
    #[must_use]
    pub fn now(self) -> HostTime {
        timespec_to_host_time(clock_gettime(self.posix_clock_id()))
    }
}

fn timespec_to_host_time(timespec: Timespec) -> HostTime {
    let seconds = u64::try_from(timespec.tv_sec).unwrap_or(0);
    let nanos = u64::try_from(timespec.tv_nsec)
        .unwrap_or(0)
        .min(999_999_999);

    let ticks = u128::from(seconds)
        .saturating_mul(NANOS_PER_SECOND)
        .saturating_add(u128::from(nanos));
    HostTime(u64::try_from(ticks).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::{Clock, HostTime, timespec_to_host_time};
    use core::time::Duration;
    use rustix::time::{ClockId, Timespec};

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let first = Clock::Monotonic.now();
        let second = Clock::Monotonic.now();
        assert!(second >= first, "monotonic clock should not go backwards");
    }

    #[test]
    fn raw_clock_ids_map_to_posix_clocks() {
        assert_eq!(Clock::from_raw(1), Clock::Presentation(ClockId::Monotonic));
        assert_eq!(Clock::from_raw(0), Clock::Presentation(ClockId::Realtime));
        assert_eq!(Clock::from_raw(99), Clock::Monotonic);
    }

    #[test]
    fn wire_timestamps_are_seconds_plus_nanos() {
        let time = HostTime::from_wire(0, 12, 345_678_901);
        assert_eq!(time, HostTime(12 * 1_000_000_000 + 345_678_901));
        assert_eq!(time.to_wire(), (0, 12, 345_678_901));
    }

    #[test]
    fn wire_timestamps_carry_high_seconds() {
        let time = HostTime::from_wire(1, 0, 5);
        assert_eq!(time.to_wire(), (1, 0, 5));
    }

    #[test]
    fn timespec_conversion_saturates_on_large_values() {
        let input = Timespec {
            tv_sec: i64::MAX,
            tv_nsec: 999_999_999,
        };
        assert_eq!(timespec_to_host_time(input), HostTime(u64::MAX));
    }

    #[test]
    fn checked_add_rejects_overflow() {
        assert_eq!(
            HostTime(10).checked_add(Duration::from_nanos(5)),
            Some(HostTime(15))
        );
        assert_eq!(HostTime(u64::MAX).checked_add(Duration::from_nanos(1)), None);
    }
}
