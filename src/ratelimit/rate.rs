//! Rate specification parsing.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, ThrottleError};

/// Time window for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    /// Length of this window in whole seconds.
    pub fn as_secs(&self) -> u64 {
        match self {
            TimeWindow::Second => 1,
            TimeWindow::Minute => 60,
            TimeWindow::Hour => 3600,
            TimeWindow::Day => 86400,
        }
    }

    /// Look up a window by its unit character (`s`, `m`, `h` or `d`).
    pub fn from_unit_char(unit: char) -> Option<Self> {
        match unit {
            's' => Some(TimeWindow::Second),
            'm' => Some(TimeWindow::Minute),
            'h' => Some(TimeWindow::Hour),
            'd' => Some(TimeWindow::Day),
            _ => None,
        }
    }

    /// The unit character used in rate strings.
    pub fn unit_char(&self) -> char {
        match self {
            TimeWindow::Second => 's',
            TimeWindow::Minute => 'm',
            TimeWindow::Hour => 'h',
            TimeWindow::Day => 'd',
        }
    }
}

/// An immutable "N events per window" budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RateSpec {
    limit: u64,
    window: TimeWindow,
}

impl RateSpec {
    /// Create a rate spec directly. The limit must be positive.
    pub fn new(limit: u64, window: TimeWindow) -> Result<Self> {
        if limit == 0 {
            return Err(ThrottleError::InvalidRate(format!("{}/{}", limit, window.unit_char())));
        }
        Ok(Self { limit, window })
    }

    /// Parse a compact rate string such as `"5/m"` or `"100/hour"`.
    ///
    /// Only the first character of the unit token is significant, so
    /// `"10/minute"` and `"10/m"` are equivalent.
    pub fn parse(rate: &str) -> Result<Self> {
        let invalid = || ThrottleError::InvalidRate(rate.to_string());

        let mut parts = rate.split('/');
        let (count, unit) = match (parts.next(), parts.next(), parts.next()) {
            (Some(count), Some(unit), None) => (count, unit),
            _ => return Err(invalid()),
        };

        let limit: u64 = count.trim().parse().map_err(|_| invalid())?;
        let window = unit
            .chars()
            .next()
            .and_then(TimeWindow::from_unit_char)
            .ok_or_else(invalid)?;

        Self::new(limit, window).map_err(|_| invalid())
    }

    /// Maximum number of events allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// The window this budget applies to.
    pub fn window(&self) -> TimeWindow {
        self.window
    }

    /// Window length in seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window.as_secs()
    }

    /// Whether a window that has already seen `current` events has room for one more.
    pub fn admits(&self, current: i64) -> bool {
        u64::try_from(current).map_or(true, |current| current < self.limit)
    }
}

impl FromStr for RateSpec {
    type Err = ThrottleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.limit, self.window.unit_char())
    }
}
