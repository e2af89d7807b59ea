//! Weekly cadence arithmetic. A period runs from one configured boundary
//! (weekday + time of day, UTC) to the next.
//!
//! Schedulers do not fire exactly on time, so a trigger that lands up to
//! `early_grace_secs` before a boundary is attributed to the period that
//! boundary opens, and the regeneration window of a period opens that much
//! before its boundary.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::{RegenError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeeklyCadence {
    pub weekday: Weekday,
    pub hour: u32,
    pub minute: u32,
    pub early_grace_secs: u32,
}

/// Longest accepted early-fire tolerance.
const MAX_EARLY_GRACE_SECS: u32 = 24 * 60 * 60;

impl Default for WeeklyCadence {
    fn default() -> Self {
        Self {
            weekday: Weekday::Sun,
            hour: 0,
            minute: 0,
            early_grace_secs: 300,
        }
    }
}

impl WeeklyCadence {
    pub fn validate(&self) -> Result<()> {
        if self.hour > 23 {
            return Err(RegenError::Config(format!("schedule.hour {} is out of range", self.hour)));
        }
        if self.minute > 59 {
            return Err(RegenError::Config(format!("schedule.minute {} is out of range", self.minute)));
        }
        if self.early_grace_secs > MAX_EARLY_GRACE_SECS {
            return Err(RegenError::Config(format!(
                "schedule.early_grace_secs {} exceeds {}",
                self.early_grace_secs, MAX_EARLY_GRACE_SECS
            )));
        }
        Ok(())
    }

    fn time_of_day(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Most recent boundary at or before `now`.
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.weekday().num_days_from_monday() as i64;
        let target = self.weekday.num_days_from_monday() as i64;
        let days_back = (today - target).rem_euclid(7);

        let date = now.date_naive() - Duration::days(days_back);
        let boundary = Utc.from_utc_datetime(&date.and_time(self.time_of_day()));

        if boundary > now {
            boundary - Duration::days(7)
        } else {
            boundary
        }
    }

    fn early_grace(&self) -> Duration {
        Duration::seconds(self.early_grace_secs as i64)
    }

    /// Period a trigger fired at `now` belongs to.
    pub fn trigger_period(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.period_start(now + self.early_grace())
    }

    /// Earliest instant a regeneration counts toward the period starting at
    /// `period_start`.
    pub fn window_opens(&self, period_start: DateTime<Utc>) -> DateTime<Utc> {
        period_start - self.early_grace()
    }

    /// First boundary strictly after `now`.
    pub fn next_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.period_start(now) + Duration::days(7)
    }

    pub fn describe(&self) -> String {
        format!("every {:?} at {:02}:{:02} UTC", self.weekday, self.hour, self.minute)
    }
}
