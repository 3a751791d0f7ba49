use std::fmt::Display;

use crate::t;

use super::{DateTime, Duration};

#[derive(Debug, Clone, Copy)]
pub struct DateTimeRange {
    start: DateTime,
    end: DateTime,
}

impl DateTimeRange {
    pub fn new(start: DateTime, end: DateTime) -> Self {
        Self { start, end }
    }

    /// Lookback window ending now.
    pub fn last(duration: Duration) -> Self {
        let now = t!(now);
        Self::new(now - duration, now)
    }

    pub fn start(&self) -> DateTime {
        self.start
    }

    pub fn end(&self) -> DateTime {
        self.end
    }

    pub fn contains(&self, dt: DateTime) -> bool {
        self.start <= dt && dt <= self.end
    }
}

impl Display for DateTimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
