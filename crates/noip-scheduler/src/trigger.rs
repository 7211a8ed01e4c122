use chrono::{DateTime, Duration, Utc};

/// Fixed-interval trigger: fires every `interval_minutes` minutes, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalTrigger {
    interval_minutes: u32,
}

/// Where a late fire time should move to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchUp {
    /// First fire time strictly after `now`.
    pub next: DateTime<Utc>,
    /// How many fire times were skipped to get there.
    pub missed: u64,
}

impl IntervalTrigger {
    pub fn new(interval_minutes: u32) -> Self {
        Self { interval_minutes }
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(self.interval_minutes as i64)
    }

    /// `last_fire + interval`. With no previous fire, `now` stands in for it,
    /// so the first fire is one interval after registration.
    pub fn next_fire_time(
        &self,
        last_fire: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        last_fire.unwrap_or(now) + self.interval()
    }

    /// Advance a fire time that is already in the past along the interval grid
    /// until it is after `now`.
    pub fn catch_up(&self, scheduled: DateTime<Utc>, now: DateTime<Utc>) -> CatchUp {
        let step = self.interval().num_milliseconds().max(1);
        let late = (now - scheduled).num_milliseconds();
        if late < 0 {
            return CatchUp {
                next: scheduled,
                missed: 0,
            };
        }
        let steps = late / step + 1;
        CatchUp {
            next: scheduled + Duration::milliseconds(steps * step),
            missed: steps as u64,
        }
    }
}
