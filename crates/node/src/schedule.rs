//! Trigger policies for registered jobs.
//!
//! | Variant    | First fire                              | Then                          |
//! |------------|-----------------------------------------|-------------------------------|
//! | `Interval` | after random delay in `[0, jitter)`, or immediately | every `period`    |
//! | `Calendar` | next matching wall-clock instant        | daily, or weekly if `day_of_week` |
//! | `OnDemand` | never on its own                        | only through `run_now`        |

use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveTime, TimeZone, Weekday};
use rand::Rng;

/// How far ahead a calendar schedule searches for a valid local instant.
/// Two weeks covers a weekly slot swallowed by a DST gap.
const CALENDAR_SEARCH_DAYS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Interval {
        period: Duration,
        jitter: Option<Duration>,
    },
    Calendar {
        day_of_week: Option<Weekday>,
        hour: u32,
        minute: u32,
        second: u32,
    },
    OnDemand,
}

impl Schedule {
    pub fn every(period: Duration) -> Self {
        Schedule::Interval { period, jitter: None }
    }

    pub fn every_with_jitter(period: Duration, jitter_max: Duration) -> Self {
        Schedule::Interval {
            period,
            jitter: Some(jitter_max),
        }
    }

    pub fn daily(hour: u32, minute: u32, second: u32) -> Self {
        Schedule::Calendar {
            day_of_week: None,
            hour,
            minute,
            second,
        }
    }

    pub fn weekly(day: Weekday, hour: u32, minute: u32, second: u32) -> Self {
        Schedule::Calendar {
            day_of_week: Some(day),
            hour,
            minute,
            second,
        }
    }

    /// Delay before the first fire of an interval schedule.
    ///
    /// `None` for calendar and on-demand schedules.
    pub fn initial_delay<R: Rng>(&self, rng: &mut R) -> Option<Duration> {
        match self {
            Schedule::Interval { jitter: Some(max), .. } if !max.is_zero() => {
                Some(rng.gen_range(Duration::ZERO..*max))
            }
            Schedule::Interval { .. } => Some(Duration::ZERO),
            _ => None,
        }
    }

    /// Next calendar instant strictly after `now`, in `now`'s time zone.
    ///
    /// Local times that fall in a DST gap are skipped; ambiguous ones resolve
    /// to the earlier instant. Returns `None` for non-calendar schedules and
    /// for an out-of-range time of day.
    pub fn next_fire_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let Schedule::Calendar {
            day_of_week,
            hour,
            minute,
            second,
        } = self
        else {
            return None;
        };
        let time = NaiveTime::from_hms_opt(*hour, *minute, *second)?;
        let tz = now.timezone();
        let today = now.date_naive();

        for offset in 0..CALENDAR_SEARCH_DAYS {
            let date = today.checked_add_days(Days::new(offset))?;
            if day_of_week.map(|d| date.weekday() != d).unwrap_or(false) {
                continue;
            }
            let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() else {
                continue;
            };
            if candidate > *now {
                return Some(candidate);
            }
        }
        None
    }

    /// Human-readable form for the job listing.
    pub fn describe(&self) -> String {
        match self {
            Schedule::Interval { period, jitter: None } => format!("every {}s", period.as_secs()),
            Schedule::Interval {
                period,
                jitter: Some(j),
            } => format!("every {}s (jitter < {}s)", period.as_secs(), j.as_secs()),
            Schedule::Calendar {
                day_of_week: None,
                hour,
                minute,
                second,
            } => format!("daily at {:02}:{:02}:{:02}", hour, minute, second),
            Schedule::Calendar {
                day_of_week: Some(d),
                hour,
                minute,
                second,
            } => format!("weekly on {} at {:02}:{:02}:{:02}", d, hour, minute, second),
            Schedule::OnDemand => "on demand".to_string(),
        }
    }
}
