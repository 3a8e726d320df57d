//! Contract with the external live scheduler.
//!
//! The live scheduler owns the actively-firing copy of every schedule: a
//! serialized definition, a "next fire" score in an ordered index, and run
//! history. Entries are addressed by key `"{prefix}:{name}"`; the ordered
//! index itself lives at `"{prefix}::schedule"` and is never a schedule.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::LiveError;
use crate::recurrence::Recurrence;

/// Everything needed to materialize one live schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveEntry {
    pub name: String,
    /// Dispatch target (the task's executor).
    pub task: String,
    pub recurrence: Recurrence,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

/// Serialized definition as stored in the live scheduler.
///
/// Field names match RedBeat's entry keyword arguments, so a beat process
/// can rebuild the entry from this JSON alone. The `schedule` section is kept
/// as raw JSON: entries written by other producers are still readable and
/// classified by shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveDefinition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Value>,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl LiveDefinition {
    pub fn from_entry(entry: &LiveEntry) -> Self {
        Self {
            name: Some(entry.name.clone()),
            task: Some(entry.task.clone()),
            schedule: entry.recurrence.to_live_schedule(),
            args: entry.args.clone(),
            kwargs: entry.kwargs.clone(),
            options: Map::new(),
            enabled: true,
        }
    }

    /// Parse a stored definition. Undecodable JSON reads as an empty
    /// definition so one bad entry cannot hide the rest of the namespace.
    pub fn parse_lenient(key: &str, raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(def) => def,
            Err(e) => {
                warn!(key, "undecodable live definition: {e}");
                Self::default()
            }
        }
    }
}

/// Run history of one live entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMetadata {
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_run_count: u64,
}

/// `last_run_at` as the live store writes it: a RedBeat-tagged datetime of
/// UTC components. The tag and zone are optional on read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastRunParts {
    #[serde(rename = "__type__", default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    pub second: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microsecond: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl LastRunParts {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        use chrono::{Datelike, Timelike};
        Self {
            type_tag: Some("datetime".to_string()),
            year: Some(at.year()),
            month: Some(at.month()),
            day: Some(at.day()),
            hour: Some(at.hour()),
            minute: Some(at.minute()),
            second: Some(at.second()),
            microsecond: Some(at.timestamp_subsec_micros()),
            timezone: Some("UTC".to_string()),
        }
    }

    /// `None` unless every component through `second` is present and valid.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let date = NaiveDate::from_ymd_opt(self.year?, self.month?, self.day?)?;
        let time = date.and_hms_micro_opt(
            self.hour?,
            self.minute?,
            self.second?,
            self.microsecond.unwrap_or(0),
        )?;
        Some(time.and_utc())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRunMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<LastRunParts>,
    #[serde(default)]
    pub total_run_count: u64,
}

impl RunMetadata {
    /// Decode the stored `meta` JSON. Anything unreadable means "never ran".
    pub fn parse_lenient(raw: &str) -> Self {
        match serde_json::from_str::<RawRunMeta>(raw) {
            Ok(meta) => Self {
                last_run_at: meta.last_run_at.and_then(|p| p.to_datetime()),
                total_run_count: meta.total_run_count,
            },
            Err(_) => Self::default(),
        }
    }

    pub fn to_json(&self) -> String {
        let raw = RawRunMeta {
            last_run_at: self.last_run_at.map(LastRunParts::from_datetime),
            total_run_count: self.total_run_count,
        };
        serde_json::to_string(&raw).unwrap_or_else(|_| "{}".to_string())
    }
}

/// The external firing engine's schedule store.
///
/// `create`, `update` and `delete` take schedule names; read methods take the
/// full key, since that is what [`LiveScheduler::enumerate`] yields.
#[async_trait]
pub trait LiveScheduler: Send + Sync {
    /// Namespace prefix of every key this scheduler owns.
    fn key_prefix(&self) -> &str;

    /// Key of the live entry called `name`.
    fn key_for(&self, name: &str) -> String {
        format!("{}:{}", self.key_prefix(), name)
    }

    /// Key of the ordered next-fire index.
    fn index_key(&self) -> String {
        format!("{}::schedule", self.key_prefix())
    }

    /// Materialize a fresh entry. Existing entries are replaced and their
    /// run history reset.
    async fn create(&self, entry: &LiveEntry) -> Result<(), LiveError>;

    /// Replace the definition of an entry, keeping its run history.
    async fn update(&self, entry: &LiveEntry) -> Result<(), LiveError>;

    /// Remove an entry and its index score. Absent entries are not an error.
    async fn delete(&self, name: &str) -> Result<(), LiveError>;

    /// Next-fire score (epoch seconds) from the ordered index.
    async fn next_fire_score(&self, key: &str) -> Result<Option<f64>, LiveError>;

    /// `Ok(None)` when no entry exists at `key`.
    async fn get_definition(&self, key: &str) -> Result<Option<LiveDefinition>, LiveError>;

    async fn get_run_metadata(&self, key: &str) -> Result<Option<RunMetadata>, LiveError>;

    /// Lazily list every entry key in the namespace, excluding the index key.
    fn enumerate(&self) -> BoxStream<'_, Result<String, LiveError>>;
}

/// Seconds-since-epoch score for `at`.
pub fn score_for(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::CronFields;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn definition_carries_redbeat_layout() {
        let entry = LiveEntry {
            name: "nightly_abc".into(),
            task: "executors.run_script".into(),
            recurrence: Recurrence::Cron(CronFields {
                day_of_week: "1,3".into(),
                minute: "0".into(),
                hour: "0".into(),
                ..CronFields::default()
            }),
            args: vec![json!("sync.py")],
            kwargs: Map::new(),
        };
        let def = LiveDefinition::from_entry(&entry);
        let v = serde_json::to_value(&def).unwrap();
        assert_eq!(v["name"], "nightly_abc");
        assert_eq!(v["task"], "executors.run_script");
        assert_eq!(v["enabled"], true);
        assert_eq!(v["options"], json!({}));
        assert_eq!(
            v["schedule"],
            json!({
                "__type__": "crontab",
                "minute": "0",
                "hour": "0",
                "day_of_month": "*",
                "month_of_year": "*",
                "day_of_week": "1,3",
            })
        );
        // every key must be a RedBeat entry keyword argument
        let keys: Vec<&str> = v.as_object().unwrap().keys().map(String::as_str).collect();
        for key in keys {
            assert!(
                ["name", "task", "schedule", "args", "kwargs", "options", "enabled"].contains(&key),
                "unexpected definition key {key}"
            );
        }
    }

    #[test]
    fn interval_definition_is_typed_in_seconds() {
        let entry = LiveEntry {
            name: "hourly_x".into(),
            task: "t".into(),
            recurrence: Recurrence::Interval { minutes: 90 },
            args: vec![],
            kwargs: Map::new(),
        };
        let v = serde_json::to_value(LiveDefinition::from_entry(&entry)).unwrap();
        assert_eq!(
            v["schedule"],
            json!({ "__type__": "interval", "every": 5400, "relative": false })
        );
    }

    #[test]
    fn run_metadata_writes_tagged_utc_datetime() {
        let at = Utc.with_ymd_and_hms(2030, 5, 6, 7, 8, 9).unwrap();
        let meta = RunMetadata {
            last_run_at: Some(at),
            total_run_count: 1,
        };
        let v: Value = serde_json::from_str(&meta.to_json()).unwrap();
        assert_eq!(v["last_run_at"]["__type__"], "datetime");
        assert_eq!(v["last_run_at"]["timezone"], "UTC");
        assert_eq!(v["last_run_at"]["hour"], 7);
    }

    #[test]
    fn lenient_definition_tolerates_garbage() {
        assert_eq!(
            LiveDefinition::parse_lenient("redbeat:x", "not json"),
            LiveDefinition::default()
        );
        let def = LiveDefinition::parse_lenient("redbeat:x", r#"{"task":"celery.backend_cleanup"}"#);
        assert_eq!(def.task.as_deref(), Some("celery.backend_cleanup"));
        assert!(def.schedule.is_none());
        assert!(def.enabled);
    }

    #[test]
    fn run_metadata_requires_complete_timestamp() {
        let full = RunMetadata::parse_lenient(
            r#"{"last_run_at":{"year":2030,"month":1,"day":2,"hour":3,"minute":4,"second":5,"microsecond":6},"total_run_count":7}"#,
        );
        assert_eq!(full.total_run_count, 7);
        assert_eq!(
            full.last_run_at.unwrap(),
            Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap() + chrono::Duration::microseconds(6)
        );

        let partial = RunMetadata::parse_lenient(
            r#"{"last_run_at":{"year":2030,"month":1,"day":2},"total_run_count":3}"#,
        );
        assert!(partial.last_run_at.is_none());
        assert_eq!(partial.total_run_count, 3);

        assert_eq!(RunMetadata::parse_lenient("{oops"), RunMetadata::default());
    }

    #[test]
    fn run_metadata_json_round_trip_keeps_components() {
        let at = Utc.with_ymd_and_hms(2030, 5, 6, 7, 8, 9).unwrap();
        let meta = RunMetadata {
            last_run_at: Some(at),
            total_run_count: 2,
        };
        assert_eq!(RunMetadata::parse_lenient(&meta.to_json()), meta);
    }

    #[test]
    fn score_is_epoch_seconds() {
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(score_for(at), 1_893_456_000.0);
    }
}
