//! Recurrence translation.
//!
//! Turns a user-facing schedule shape (type tag + loosely typed data map) into
//! a [`Recurrence`]: a cron field set, a flat interval in minutes, a pinned
//! one-shot instant, or "fire now". Everything here is pure; the clock is only
//! consulted by callers through [`Recurrence::next_fire_after`].

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, SchedulerError};
use crate::types::ScheduleType;

/// Accepted layout for `ONCE` values. Interpreted as UTC.
pub const ONCE_FORMAT: &str = "%Y-%m-%d %H:%M";

const MINUTES_PER_HOUR: u64 = 60;
const MINUTES_PER_DAY: u64 = 24 * MINUTES_PER_HOUR;
const MINUTES_PER_WEEK: u64 = 7 * MINUTES_PER_DAY;
const MINUTES_PER_MONTH: u64 = 30 * MINUTES_PER_DAY;

/// Longest accepted `PERIODIC` interval: 100 thirty-day-month years.
pub const MAX_INTERVAL_MINUTES: u64 = 100 * 12 * MINUTES_PER_MONTH;

/// How long a fired one-shot entry may linger before the live store drops it.
pub const ONE_SHOT_GRACE_MINUTES: i64 = 60;

/// Weekday names in cron order, 0 = Sunday.
const WEEKDAYS: [(&str, &str); 7] = [
    ("SUN", "SUNDAY"),
    ("MON", "MONDAY"),
    ("TUE", "TUESDAY"),
    ("WED", "WEDNESDAY"),
    ("THU", "THURSDAY"),
    ("FRI", "FRIDAY"),
    ("SAT", "SATURDAY"),
];

/// Day names understood by the `cron` crate, indexed like [`WEEKDAYS`].
/// The crate numbers days 1-7 from Sunday, so names avoid an off-by-one.
const CRON_DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Typed view of a schedule request, one variant per schedule type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    WeeklyDays { days: Vec<String> },
    MonthlyDates { dates: Vec<String> },
    Once { at: String },
    Periodic { unit: FrequencyUnit, frequency: u64 },
    Immediate,
}

impl ScheduleSpec {
    /// Read the type-specific fields out of `data`.
    pub fn parse(schedule_type: ScheduleType, data: &Value) -> Result<Self> {
        match schedule_type {
            ScheduleType::WeeklySpecificDays => Ok(ScheduleSpec::WeeklyDays {
                days: string_values(data, "VALUES")?,
            }),
            ScheduleType::MonthlySpecificDates => Ok(ScheduleSpec::MonthlyDates {
                dates: string_values(data, "VALUES")?,
            }),
            ScheduleType::Once => match data.get("VALUES") {
                Some(Value::String(s)) if !s.trim().is_empty() => Ok(ScheduleSpec::Once {
                    at: s.trim().to_string(),
                }),
                Some(Value::String(_)) | Some(Value::Null) | None => Err(
                    SchedulerError::Validation("date is required for one-time execution".into()),
                ),
                Some(other) => Err(SchedulerError::Validation(format!(
                    "ONCE VALUES must be a \"YYYY-MM-DD HH:MM\" string, got {other}"
                ))),
            },
            ScheduleType::Periodic => {
                let unit = match data.get("FREQUENCY_TYPE") {
                    None | Some(Value::Null) => FrequencyUnit::Minutes,
                    Some(Value::String(s)) => s.parse()?,
                    Some(other) => {
                        return Err(SchedulerError::Validation(format!(
                            "invalid frequency type: {other}"
                        )))
                    }
                };
                let frequency = match data.get("FREQUENCY") {
                    None | Some(Value::Null) => 1,
                    Some(v) => positive_integer(v)?,
                };
                Ok(ScheduleSpec::Periodic { unit, frequency })
            }
            ScheduleType::Immediate => Ok(ScheduleSpec::Immediate),
        }
    }
}

/// `PERIODIC` units with their fixed length in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyUnit {
    Months,
    Weeks,
    Days,
    Hours,
    Minutes,
}

impl FrequencyUnit {
    pub fn minutes(self) -> u64 {
        match self {
            FrequencyUnit::Months => MINUTES_PER_MONTH,
            FrequencyUnit::Weeks => MINUTES_PER_WEEK,
            FrequencyUnit::Days => MINUTES_PER_DAY,
            FrequencyUnit::Hours => MINUTES_PER_HOUR,
            FrequencyUnit::Minutes => 1,
        }
    }
}

impl FromStr for FrequencyUnit {
    type Err = SchedulerError;

    /// Case, plural and parentheses are ignored: `hours`, `HOUR`, `Hour(s)`.
    fn from_str(raw: &str) -> Result<Self> {
        let cleaned: String = raw
            .trim()
            .to_uppercase()
            .chars()
            .filter(|c| *c != '(' && *c != ')')
            .collect();
        let singular = cleaned.strip_suffix('S').unwrap_or(&cleaned);
        match singular {
            "MONTH" => Ok(FrequencyUnit::Months),
            "WEEK" => Ok(FrequencyUnit::Weeks),
            "DAY" => Ok(FrequencyUnit::Days),
            "HOUR" => Ok(FrequencyUnit::Hours),
            "MINUTE" => Ok(FrequencyUnit::Minutes),
            _ => Err(SchedulerError::Validation(format!(
                "invalid frequency type: {raw}"
            ))),
        }
    }
}

/// Five cron fields, each a literal, a comma-set, or `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronFields {
    pub minute: String,
    pub hour: String,
    pub day_of_month: String,
    pub month_of_year: String,
    /// Comma-set of indices, 0 = Sunday.
    pub day_of_week: String,
}

impl Default for CronFields {
    fn default() -> Self {
        Self {
            minute: "*".into(),
            hour: "*".into(),
            day_of_month: "*".into(),
            month_of_year: "*".into(),
            day_of_week: "*".into(),
        }
    }
}

impl CronFields {
    /// Midnight UTC, the base for weekly and monthly schedules.
    fn midnight() -> Self {
        Self {
            minute: "0".into(),
            hour: "0".into(),
            ..Self::default()
        }
    }

    /// Name of the first field with no values, if any.
    pub fn empty_field(&self) -> Option<&'static str> {
        [
            ("minute", &self.minute),
            ("hour", &self.hour),
            ("day_of_month", &self.day_of_month),
            ("month_of_year", &self.month_of_year),
            ("day_of_week", &self.day_of_week),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty())
        .map(|(name, _)| name)
    }

    /// Six-field expression (leading seconds) for the `cron` crate.
    pub fn to_expression(&self) -> String {
        let dow = if self.day_of_week.trim() == "*" {
            "*".to_string()
        } else {
            self.day_of_week
                .split(',')
                .map(|d| {
                    d.trim()
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| CRON_DAY_NAMES.get(i))
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| d.trim().to_string())
                })
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "0 {} {} {} {} {}",
            self.minute, self.hour, self.day_of_month, self.month_of_year, dow
        )
    }

    /// First fire strictly after `after`. `Ok(None)` when the fields can never match.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        if let Some(field) = self.empty_field() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "cron field '{field}' has no values"
            )));
        }
        let schedule = cron::Schedule::from_str(&self.to_expression()).map_err(|e| {
            SchedulerError::InvalidSchedule(format!("unusable cron fields: {e}"))
        })?;
        Ok(schedule.after(&after).next())
    }

    /// The RedBeat `schedule` object, tagged so the beat decoder rebuilds a crontab.
    pub fn to_json(&self) -> Value {
        json!({
            "__type__": "crontab",
            "minute": self.minute,
            "hour": self.hour,
            "day_of_month": self.day_of_month,
            "month_of_year": self.month_of_year,
            "day_of_week": self.day_of_week,
        })
    }
}

/// Normalized "when to fire".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recurrence {
    Cron(CronFields),
    Interval {
        minutes: u64,
    },
    /// A single fire at `at`. `cron` carries the same instant as pinned
    /// fields for stores that only understand crontab definitions.
    Once {
        at: DateTime<Utc>,
        cron: CronFields,
    },
    Immediate,
}

impl Recurrence {
    pub fn cron_fields(&self) -> Option<&CronFields> {
        match self {
            Recurrence::Cron(fields) | Recurrence::Once { cron: fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn interval_minutes(&self) -> Option<u64> {
        match self {
            Recurrence::Interval { minutes } => Some(*minutes),
            _ => None,
        }
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Recurrence::Immediate)
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Recurrence::Once { .. })
    }

    /// When a live store should drop the entry on its own. Only one-shots expire.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Once { at, .. } => {
                at.checked_add_signed(chrono::Duration::minutes(ONE_SHOT_GRACE_MINUTES))
            }
            _ => None,
        }
    }

    /// Next fire strictly after `now`, or `None` when nothing is left to fire.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self {
            Recurrence::Cron(fields) => fields.next_fire_after(now),
            Recurrence::Interval { minutes } => {
                let minutes = i64::try_from(*minutes).map_err(|_| {
                    SchedulerError::InvalidSchedule(format!("interval of {minutes} minutes"))
                })?;
                Ok(chrono::Duration::try_minutes(minutes).and_then(|d| now.checked_add_signed(d)))
            }
            Recurrence::Once { at, .. } => Ok((*at > now).then_some(*at)),
            Recurrence::Immediate => Ok(None),
        }
    }

    /// The `schedule` section of a live definition. Immediate has none.
    pub fn to_live_schedule(&self) -> Option<Value> {
        match self {
            Recurrence::Cron(fields) | Recurrence::Once { cron: fields, .. } => {
                Some(fields.to_json())
            }
            // translate() caps minutes at MAX_INTERVAL_MINUTES, far below overflow
            Recurrence::Interval { minutes } => Some(json!({
                "__type__": "interval",
                "every": minutes.saturating_mul(60),
                "relative": false,
            })),
            Recurrence::Immediate => None,
        }
    }
}

/// Translate a typed spec into a recurrence. Pure: no clock, no I/O.
pub fn translate(spec: &ScheduleSpec) -> Result<Recurrence> {
    match spec {
        ScheduleSpec::WeeklyDays { days } => {
            let indices: BTreeSet<usize> = days.iter().filter_map(|d| weekday_index(d)).collect();
            let day_of_week = indices
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",");
            Ok(Recurrence::Cron(CronFields {
                day_of_week,
                ..CronFields::midnight()
            }))
        }
        ScheduleSpec::MonthlyDates { dates } => Ok(Recurrence::Cron(CronFields {
            day_of_month: dates.join(","),
            ..CronFields::midnight()
        })),
        ScheduleSpec::Once { at } => {
            let naive = NaiveDateTime::parse_from_str(at, ONCE_FORMAT).map_err(|_| {
                SchedulerError::Validation(format!(
                    "invalid one-time date '{at}', expected YYYY-MM-DD HH:MM"
                ))
            })?;
            let at = naive.and_utc();
            Ok(Recurrence::Once {
                at,
                cron: CronFields {
                    minute: at.minute().to_string(),
                    hour: at.hour().to_string(),
                    day_of_month: at.day().to_string(),
                    month_of_year: at.month().to_string(),
                    day_of_week: "*".into(),
                },
            })
        }
        ScheduleSpec::Periodic { unit, frequency } => {
            let minutes = frequency
                .checked_mul(unit.minutes())
                .filter(|m| *m <= MAX_INTERVAL_MINUTES)
                .ok_or_else(|| {
                    SchedulerError::Validation(format!("frequency {frequency} is too large"))
                })?;
            Ok(Recurrence::Interval { minutes })
        }
        ScheduleSpec::Immediate => Ok(Recurrence::Immediate),
    }
}

/// Parse the type tag and data, then translate.
pub fn translate_request(schedule_type: ScheduleType, data: &Value) -> Result<Recurrence> {
    translate(&ScheduleSpec::parse(schedule_type, data)?)
}

/// Cron index of a weekday name (abbreviated or full, any case); 0 = Sunday.
pub fn weekday_index(name: &str) -> Option<usize> {
    let upper = name.trim().to_uppercase();
    WEEKDAYS
        .iter()
        .position(|(short, long)| upper == *short || upper == *long)
}

fn string_values(data: &Value, field: &str) -> Result<Vec<String>> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.trim().to_string()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(SchedulerError::Validation(format!(
                    "{field} entries must be strings, got {other}"
                ))),
            })
            .collect(),
        Some(other) => Err(SchedulerError::Validation(format!(
            "{field} must be a list, got {other}"
        ))),
    }
}

fn positive_integer(v: &Value) -> Result<u64> {
    let n = match v {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match n {
        Some(n) if n > 0 => Ok(n),
        _ => Err(SchedulerError::Validation(format!(
            "FREQUENCY must be a positive integer, got {v}"
        ))),
    }
}
