//! Check interval model.
//!
//! Monitors carry an explicit interval. Older records stored a cron string;
//! only the `*/N * * * *` shape ("every N minutes") is understood, anything
//! else falls back to a default interval.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// How often a monitor should be checked, in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckInterval(u64);

impl CheckInterval {
    /// Interval used when a stored expression cannot be interpreted
    pub const DEFAULT: CheckInterval = CheckInterval(10 * 60);

    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub const fn from_minutes(minutes: u64) -> Self {
        Self(minutes.saturating_mul(60))
    }

    pub const fn as_secs(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }

    /// Parse `*/N * * * *`. Returns `None` for every other shape and for N = 0.
    pub fn parse_cron(expression: &str) -> Option<Self> {
        let mut fields = expression.split_whitespace();
        let minutes = fields.next()?.strip_prefix("*/")?;
        let rest: Vec<&str> = fields.collect();
        if rest.len() != 4 || rest.iter().any(|field| *field != "*") {
            return None;
        }
        if minutes.is_empty() || !minutes.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let minutes: u64 = minutes.parse().ok()?;
        if minutes == 0 {
            return None;
        }
        minutes.checked_mul(60).map(Self)
    }

    /// Like [`CheckInterval::parse_cron`] but never fails.
    pub fn from_cron_or(expression: &str, fallback: CheckInterval) -> Self {
        Self::parse_cron(expression).unwrap_or(fallback)
    }

    /// A monitor is due when it was never checked or when at least one full
    /// interval has elapsed since its last check.
    pub fn is_due(self, last_checked: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last_checked) = last_checked else {
            return true;
        };
        let step = i64::try_from(self.0).ok().and_then(TimeDelta::try_seconds);
        match step.and_then(|step| now.checked_sub_signed(step)) {
            Some(cutoff) => last_checked <= cutoff,
            None => false,
        }
    }
}

impl Default for CheckInterval {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for CheckInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 60 == 0 {
            write!(f, "{}m", self.0 / 60)
        } else {
            write!(f, "{}s", self.0)
        }
    }
}
