//! Mission time and the clock abstraction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds and 2^-32 subseconds since the mission epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MissionTime {
    /// Whole seconds.
    pub seconds: u32,
    /// Fraction of a second in units of 2^-32 s.
    pub subseconds: u32,
}

impl MissionTime {
    /// Creates a time value.
    pub const fn new(seconds: u32, subseconds: u32) -> Self {
        Self { seconds, subseconds }
    }

    /// True for the "never" value.
    pub const fn is_zero(&self) -> bool {
        self.seconds == 0 && self.subseconds == 0
    }

    /// Converts a UTC timestamp (Unix epoch) to mission time.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let seconds = at.timestamp().clamp(0, i64::from(u32::MAX)) as u32;
        let subseconds = ((u64::from(at.timestamp_subsec_nanos()) << 32) / 1_000_000_000) as u32;
        Self { seconds, subseconds }
    }
}

/// Source of the current mission time.
pub trait TimeSource: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> MissionTime;
}

/// Wall-clock time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> MissionTime {
        MissionTime::from_datetime(Utc::now())
    }
}
