//! Once-a-day trigger at a local wall-clock time.
//!
//! The next fire instant is always derived from the calendar (local date +
//! configured time in the configured zone), never by adding up sleep
//! intervals, so long uptimes and DST changes do not shift it. A fire that is
//! observed too late is skipped rather than replayed.

use std::{future::Future, time::Duration as StdDuration};

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ScheduleSettings;

/// How late (in seconds) a fire may be observed and still run.
const MISFIRE_GRACE_SECS: i64 = 60;

/// Upper bound on a single sleep, so wall-clock adjustments are noticed.
const MAX_SLEEP: StdDuration = StdDuration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid schedule time '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

#[derive(Debug, Clone)]
pub struct ScheduleTrigger {
    at: NaiveTime,
    tz: Tz,
    next_fire: Option<DateTime<Utc>>,
    last_fired: Option<NaiveDate>,
}

impl ScheduleTrigger {
    pub fn new(at: NaiveTime, tz: Tz) -> Self {
        Self { at, tz, next_fire: None, last_fired: None }
    }

    pub fn from_settings(settings: &ScheduleSettings) -> Result<Self, ScheduleError> {
        Ok(Self::new(parse_time(&settings.time)?, parse_timezone(&settings.timezone)?))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn next_fire(&self) -> Option<DateTime<Utc>> {
        self.next_fire
    }

    /// Calendar date in the schedule's zone at `now`.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// Instant of the configured time on `date`. A time that falls in a DST
    /// gap moves to the first valid local time after it; an ambiguous time
    /// uses the earlier instant.
    fn fire_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let mut local = date.and_time(self.at);
        for _ in 0..8 {
            if let Some(t) = self.tz.from_local_datetime(&local).earliest() {
                return t.with_timezone(&Utc);
            }
            local += Duration::minutes(30);
        }
        // No zone has a gap this long; fall back to reading the time as UTC.
        date.and_time(self.at).and_utc()
    }

    /// First fire instant at or after `now`.
    pub fn next_fire_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = self.local_date(now);
        loop {
            let candidate = self.fire_on(date);
            if candidate >= now {
                return candidate;
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => return candidate,
            }
        }
    }

    /// Advance the trigger to `now`. Returns the local date being fired for
    /// when the daily alert is due, at most once per local date.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<NaiveDate> {
        let due = match self.next_fire {
            Some(due) => due,
            None => {
                let due = self.next_fire_from(now);
                self.next_fire = Some(due);
                due
            }
        };
        if now < due {
            return None;
        }

        let date = self.local_date(due);
        self.next_fire = Some(self.fire_on_next_day(date, now));

        if now - due > Duration::seconds(MISFIRE_GRACE_SECS) {
            warn!(%date, due = %due, "missed daily alert time, skipping until tomorrow");
            return None;
        }
        if self.last_fired == Some(date) {
            return None;
        }

        self.last_fired = Some(date);
        Some(date)
    }

    fn fire_on_next_day(&self, fired: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
        let after = fired.succ_opt().map(|d| self.fire_on(d)).unwrap_or(now);
        if after > now { after } else { self.next_fire_from(now + Duration::seconds(1)) }
    }

    /// Drive the trigger off the wall clock forever. Each fire runs `on_fire`
    /// on its own task so the timer never waits on a dispatch.
    pub async fn run<F, Fut>(mut self, mut on_fire: F)
    where
        F: FnMut(NaiveDate) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        info!(time = %self.at, timezone = %self.tz, "daily alert schedule started");

        loop {
            let now = Utc::now();
            if let Some(date) = self.poll(now) {
                info!(%date, "daily alert schedule fired");
                tokio::spawn(on_fire(date));
            }

            let wait = self
                .next_fire
                .and_then(|next| (next - Utc::now()).to_std().ok())
                .unwrap_or(StdDuration::ZERO)
                .min(MAX_SLEEP)
                .max(StdDuration::from_millis(100));
            tokio::time::sleep(wait).await;
        }
    }
}

/// Parse `HH:MM` (24h).
pub fn parse_time(value: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| ScheduleError::InvalidTime(value.to_string()))
}

pub fn parse_timezone(value: &str) -> Result<Tz, ScheduleError> {
    value.trim().parse::<Tz>().map_err(|_| ScheduleError::UnknownTimezone(value.to_string()))
}
