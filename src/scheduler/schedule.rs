use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use std::fmt;

/// Minutes before a scheduled restart at which players are warned.
pub const WARNING_THRESHOLDS: [u32; 5] = [60, 30, 10, 5, 1];

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Minutes from `now` to the nearest restart hour, wrapping past midnight.
///
/// Seconds are ignored. A restart hour equal to the current minute gives 0;
/// an hour already passed today counts toward tomorrow. Hours outside 0-23
/// are ignored, and `None` means no valid hour is configured.
pub fn minutes_until_next_restart(hours: &[u8], now: NaiveTime) -> Option<u32> {
    let current = now.hour() * 60 + now.minute();

    hours
        .iter()
        .filter(|h| **h < 24)
        .map(|h| {
            let target = u32::from(*h) * 60;
            if target >= current {
                target - current
            } else {
                target + MINUTES_PER_DAY - current
            }
        })
        .min()
}

/// Whether `minutes_left` is one of the warning thresholds.
pub fn is_warning_point(minutes_left: u32) -> bool {
    WARNING_THRESHOLDS.contains(&minutes_left)
}

/// The upcoming restart relative to a moment in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextRestart {
    pub at: NaiveDateTime,
    pub minutes_left: u32,
}

impl fmt::Display for NextRestart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (in {}h {}m)",
            self.at.format("%H:%M"),
            self.minutes_left / 60,
            self.minutes_left % 60
        )
    }
}

pub fn next_restart(hours: &[u8], now: NaiveDateTime) -> Option<NextRestart> {
    let minutes_left = minutes_until_next_restart(hours, now.time())?;
    Some(NextRestart {
        at: now + TimeDelta::minutes(i64::from(minutes_left)),
        minutes_left,
    })
}

/// `HH:MM (in Xh Ym)`, or `Not Scheduled` without valid restart hours.
pub fn describe_next_restart(hours: &[u8], now: NaiveDateTime) -> String {
    next_restart(hours, now)
        .map(|next| next.to_string())
        .unwrap_or_else(|| "Not Scheduled".to_string())
}
