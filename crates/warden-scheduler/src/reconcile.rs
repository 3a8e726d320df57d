//! Read-side reconciliation of live entries with durable records.
//!
//! Nothing here is cached: every call re-reads the live store, so the answer
//! reflects what the firing engine will actually do.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::StreamExt;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use warden_core::types::DisplayTime;

use crate::error::{LiveError, Result, SchedulerError};
use crate::live::{LiveDefinition, LiveScheduler};
use crate::store::ScheduleStore;
use crate::types::{
    Consistency, LiveScheduleList, LiveScheduleStatus, ScheduleShape, ScheduleStatus,
    ScheduleView,
};

const CRON_KEYS: [&str; 5] = [
    "minute",
    "hour",
    "day_of_week",
    "day_of_month",
    "month_of_year",
];

enum Lookup {
    Missing,
    Internal(String),
    Live(LiveScheduleStatus),
}

pub struct Reconciler {
    live: Arc<dyn LiveScheduler>,
    store: Arc<ScheduleStore>,
    internal_prefixes: Vec<String>,
    tz: Tz,
}

impl Reconciler {
    /// Entries whose task starts with any of `internal_prefixes` are hidden.
    /// Times are localized to `tz` for display.
    pub fn new(
        live: Arc<dyn LiveScheduler>,
        store: Arc<ScheduleStore>,
        internal_prefixes: Vec<String>,
        tz: Tz,
    ) -> Self {
        Self {
            live,
            store,
            internal_prefixes,
            tz,
        }
    }

    pub async fn list_live(&self) -> Result<LiveScheduleList> {
        self.list_live_at(Utc::now()).await
    }

    /// Status of every non-internal entry in the namespace as of `now`.
    /// Entries that cannot be read are logged and skipped.
    #[instrument(skip(self))]
    pub async fn list_live_at(&self, now: DateTime<Utc>) -> Result<LiveScheduleList> {
        let mut keys = self.live.enumerate();
        let mut tasks = Vec::new();
        while let Some(key) = keys.next().await {
            let key = key?;
            match self.lookup(&key, now).await {
                Ok(Lookup::Live(status)) => tasks.push(status),
                Ok(Lookup::Internal(task)) => debug!(%key, %task, "skipping internal entry"),
                Ok(Lookup::Missing) => debug!(%key, "entry vanished during enumeration"),
                Err(LiveError::Malformed { key, reason }) => {
                    warn!(%key, "skipping unreadable live entry: {reason}")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(LiveScheduleList {
            total_tasks: tasks.len(),
            tasks,
        })
    }

    /// Status of one entry, addressed by full key or by bare schedule name.
    #[instrument(skip(self))]
    pub async fn live_status(&self, key_or_name: &str) -> Result<LiveScheduleStatus> {
        let key = self.normalize_key(key_or_name);
        if key == self.live.index_key() {
            return Err(SchedulerError::Validation(format!(
                "'{key}' is the scheduler index, not a schedule"
            )));
        }
        match self.lookup(&key, Utc::now()).await {
            Ok(Lookup::Live(status)) => Ok(status),
            Ok(Lookup::Missing) => Err(SchedulerError::NotFound(format!("live schedule '{key}'"))),
            Ok(Lookup::Internal(task)) => Err(SchedulerError::Validation(format!(
                "'{key}' belongs to internal task '{task}'"
            ))),
            Err(LiveError::Malformed { key, reason }) => Err(SchedulerError::Validation(format!(
                "'{key}' is not a live schedule: {reason}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Durable record merged with its live status.
    #[instrument(skip(self))]
    pub async fn schedule_view(&self, schedule_id: &str) -> Result<ScheduleView> {
        let schedule = self
            .store
            .get(schedule_id)?
            .ok_or_else(|| SchedulerError::NotFound(format!("schedule '{schedule_id}'")))?;

        let live = match schedule.live_schedule_name.as_deref() {
            Some(name) => match self.lookup(&self.live.key_for(name), Utc::now()).await? {
                Lookup::Live(status) => Some(status),
                Lookup::Missing | Lookup::Internal(_) => None,
            },
            None => None,
        };
        let consistency = match (schedule.cancelled, live.is_some()) {
            (false, false) => Consistency::MissingLive,
            (true, true) => Consistency::LingeringLive,
            _ => Consistency::InSync,
        };
        if consistency != Consistency::InSync {
            warn!(%schedule_id, ?consistency, "durable record and live store disagree");
        }
        Ok(ScheduleView {
            schedule,
            live,
            consistency,
        })
    }

    fn normalize_key(&self, key_or_name: &str) -> String {
        let prefix = format!("{}:", self.live.key_prefix());
        if key_or_name.starts_with(&prefix) {
            key_or_name.to_string()
        } else {
            self.live.key_for(key_or_name)
        }
    }

    fn is_internal(&self, task: &str) -> bool {
        self.internal_prefixes
            .iter()
            .any(|p| !p.is_empty() && task.starts_with(p.as_str()))
    }

    async fn lookup(&self, key: &str, now: DateTime<Utc>) -> std::result::Result<Lookup, LiveError> {
        let Some(definition) = self.live.get_definition(key).await? else {
            return Ok(Lookup::Missing);
        };
        let task = definition.task.clone().unwrap_or_default();
        if self.is_internal(&task) {
            return Ok(Lookup::Internal(task));
        }

        let meta = self.live.get_run_metadata(key).await?.unwrap_or_default();
        let score = self.live.next_fire_score(key).await?;
        let (shape, details) = classify_shape(&definition);

        Ok(Lookup::Live(LiveScheduleStatus {
            task_key: key.to_string(),
            task_name: clean_task_name(raw_name(key, &definition)),
            schedule_type: shape,
            schedule_status: classify_status(score, now),
            schedule_details: details,
            next_run: score
                .and_then(datetime_from_score)
                .map(|at| DisplayTime::new(at, self.tz)),
            last_run: meta.last_run_at.map(|at| DisplayTime::new(at, self.tz)),
            total_run_count: meta.total_run_count,
        }))
    }
}

/// `active` when the score lies after `now`, `expired` at or before it,
/// `inactive` without a score.
pub fn classify_status(score: Option<f64>, now: DateTime<Utc>) -> ScheduleStatus {
    match score.map(datetime_from_score) {
        None => ScheduleStatus::Inactive,
        Some(None) => ScheduleStatus::Unknown,
        Some(Some(at)) if at <= now => ScheduleStatus::Expired,
        Some(Some(_)) => ScheduleStatus::Active,
    }
}

/// Recurrence shape of a stored definition and the details shown for it.
pub fn classify_shape(definition: &LiveDefinition) -> (ScheduleShape, Value) {
    let Some(schedule) = definition.schedule.as_ref() else {
        return (ScheduleShape::Immediate, json!({ "every": null }));
    };
    let Some(fields) = schedule.as_object() else {
        return (ScheduleShape::Unknown, json!({ "every": null }));
    };
    let tag = fields.get("__type__").and_then(Value::as_str);
    if tag == Some("interval") || (tag.is_none() && fields.contains_key("every")) {
        let every = fields.get("every").cloned().unwrap_or(Value::Null);
        return (ScheduleShape::Interval, json!({ "every": every }));
    }
    if tag == Some("crontab") || (tag.is_none() && CRON_KEYS.iter().any(|k| fields.contains_key(*k)))
    {
        let mut expression = fields.clone();
        expression.remove("__type__");
        return (ScheduleShape::Crontab, Value::Object(expression));
    }
    (ScheduleShape::Unknown, json!({ "every": null }))
}

/// Strip the `_<uuid>` suffix that makes live names unique.
pub fn clean_task_name(raw: &str) -> String {
    static UUID_SUFFIX: OnceLock<Regex> = OnceLock::new();
    let re = UUID_SUFFIX
        .get_or_init(|| Regex::new(r"_[0-9a-fA-F-]{36}$").expect("uuid suffix pattern is valid"));
    re.replace(raw, "").into_owned()
}

fn raw_name<'a>(key: &'a str, definition: &'a LiveDefinition) -> &'a str {
    match definition.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => name,
        None => key.split_once(':').map_or(key, |(_, rest)| rest),
    }
}

fn datetime_from_score(score: f64) -> Option<DateTime<Utc>> {
    if !score.is_finite() {
        return None;
    }
    let secs = score.floor();
    let nanos = ((score - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{score_for, LiveEntry};
    use crate::memory::MemoryLiveScheduler;
    use crate::recurrence::{CronFields, Recurrence};
    use crate::types::{Schedule, ScheduleType};
    use chrono::{Duration, TimeZone};
    use serde_json::Map;

    const ID: &str = "0b6f6f0e-3c43-4d7e-9f52-4d1f0f3a9c11";

    fn setup() -> (Arc<MemoryLiveScheduler>, Arc<ScheduleStore>, Reconciler) {
        let live = Arc::new(MemoryLiveScheduler::new("redbeat"));
        let store = Arc::new(ScheduleStore::new(crate::db::test_support::memory_db()));
        let reconciler = Reconciler::new(
            live.clone(),
            store.clone(),
            vec!["celery.".to_string()],
            chrono_tz::Europe::Berlin,
        );
        (live, store, reconciler)
    }

    fn entry(name: &str, recurrence: Recurrence) -> LiveEntry {
        LiveEntry {
            name: name.to_string(),
            task: "executors.run_script".to_string(),
            recurrence,
            args: vec![],
            kwargs: Map::new(),
        }
    }

    fn schedule(live_name: &str, cancelled: bool) -> Schedule {
        Schedule {
            schedule_id: ID.to_string(),
            user_schedule_name: "nightly".to_string(),
            live_schedule_name: Some(live_name.to_string()),
            task_name: "sync_users".to_string(),
            args: vec![],
            kwargs: Map::new(),
            schedule_type: ScheduleType::Periodic,
            schedule_data: json!({ "FREQUENCY_TYPE": "HOURS", "FREQUENCY": 1 }),
            cancelled,
            created_by: None,
            last_updated_by: None,
            created_at: Utc::now().to_rfc3339(),
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn status_follows_score() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap();
        let past = score_for(now - Duration::seconds(1));
        let future = score_for(now + Duration::seconds(3600));
        assert_eq!(classify_status(Some(past), now), ScheduleStatus::Expired);
        assert_eq!(classify_status(Some(future), now), ScheduleStatus::Active);
        assert_eq!(classify_status(None, now), ScheduleStatus::Inactive);
        assert_eq!(classify_status(Some(f64::NAN), now), ScheduleStatus::Unknown);
    }

    #[test]
    fn shape_follows_schedule_section() {
        let with = |schedule: Option<Value>| LiveDefinition {
            schedule,
            ..Default::default()
        };

        let (shape, details) = classify_shape(&with(Some(json!({ "every": 3600 }))));
        assert_eq!(shape, ScheduleShape::Interval);
        assert_eq!(details, json!({ "every": 3600 }));

        let cron = json!({ "minute": "0", "hour": "0", "day_of_week": "1" });
        let (shape, details) = classify_shape(&with(Some(cron.clone())));
        assert_eq!(shape, ScheduleShape::Crontab);
        assert_eq!(details, cron);

        let typed = json!({ "__type__": "interval", "every": 60.0, "relative": false });
        let (shape, details) = classify_shape(&with(Some(typed)));
        assert_eq!(shape, ScheduleShape::Interval);
        assert_eq!(details, json!({ "every": 60.0 }));

        let mut typed_cron = cron.clone();
        typed_cron["__type__"] = json!("crontab");
        let (shape, details) = classify_shape(&with(Some(typed_cron)));
        assert_eq!(shape, ScheduleShape::Crontab);
        assert_eq!(details, cron);

        let solar = json!({ "__type__": "solar", "event": "sunrise" });
        assert_eq!(classify_shape(&with(Some(solar))).0, ScheduleShape::Unknown);
        assert_eq!(classify_shape(&with(Some(json!({})))).0, ScheduleShape::Unknown);
        assert_eq!(classify_shape(&with(Some(json!(5)))).0, ScheduleShape::Unknown);
        let (shape, details) = classify_shape(&with(None));
        assert_eq!(shape, ScheduleShape::Immediate);
        assert_eq!(details, json!({ "every": null }));
    }

    #[test]
    fn task_name_loses_uuid_suffix() {
        assert_eq!(clean_task_name(&format!("nightly_{ID}")), "nightly");
        assert_eq!(
            clean_task_name(&format!("daily_sync_{}", ID.to_uppercase())),
            "daily_sync"
        );
        assert_eq!(clean_task_name("nightly_report"), "nightly_report");
    }

    #[test]
    fn raw_name_falls_back_to_key() {
        let def = LiveDefinition::default();
        assert_eq!(raw_name("redbeat:legacy_job", &def), "legacy_job");
        let named = LiveDefinition {
            name: Some("named".into()),
            ..Default::default()
        };
        assert_eq!(raw_name("redbeat:other", &named), "named");
    }

    #[tokio::test]
    async fn list_skips_internal_tasks() {
        let (live, _, reconciler) = setup();
        let name = format!("nightly_{ID}");
        live.create(&entry(&name, Recurrence::Interval { minutes: 60 }))
            .await
            .unwrap();
        live.insert_raw(
            "redbeat:celery.backend_cleanup",
            LiveDefinition {
                task: Some("celery.backend_cleanup".into()),
                schedule: Some(json!({ "minute": "0", "hour": "4" })),
                ..Default::default()
            },
            None,
        );

        let list = reconciler.list_live().await.unwrap();
        assert_eq!(list.total_tasks, 1);
        let status = &list.tasks[0];
        assert_eq!(status.task_key, format!("redbeat:{name}"));
        assert_eq!(status.task_name, "nightly");
        assert_eq!(status.schedule_type, ScheduleShape::Interval);
        assert_eq!(status.schedule_status, ScheduleStatus::Active);
        assert_eq!(status.schedule_details, json!({ "every": 3600 }));
        assert!(status.next_run.is_some());
        assert!(status.last_run.is_none());
        assert_eq!(status.total_run_count, 0);
    }

    #[tokio::test]
    async fn run_history_is_rendered_in_both_zones() {
        let (live, _, reconciler) = setup();
        let cron = CronFields {
            minute: "0".into(),
            hour: "0".into(),
            ..CronFields::default()
        };
        live.create(&entry("midnight", Recurrence::Cron(cron)))
            .await
            .unwrap();
        let ran = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(live.record_run("redbeat:midnight", ran));
        let overdue = Utc::now() - Duration::seconds(1);
        live.set_score("redbeat:midnight", Some(score_for(overdue)));

        let status = reconciler.live_status("midnight").await.unwrap();
        assert_eq!(status.schedule_type, ScheduleShape::Crontab);
        assert_eq!(status.schedule_status, ScheduleStatus::Expired);
        assert_eq!(status.total_run_count, 1);
        let last = status.last_run.unwrap();
        assert_eq!(last.utc, "2020-01-01 00:00:00 UTC");
        assert!(last.local.contains("01:00 AM"), "{}", last.local);
    }

    #[tokio::test]
    async fn single_lookup_rejects_index_and_internal_keys() {
        let (live, _, reconciler) = setup();
        live.insert_raw(
            "redbeat:celery.backend_cleanup",
            LiveDefinition {
                task: Some("celery.backend_cleanup".into()),
                ..Default::default()
            },
            None,
        );

        let err = reconciler.live_status("redbeat::schedule").await.unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        let err = reconciler
            .live_status("redbeat:celery.backend_cleanup")
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        let err = reconciler.live_status("missing").await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn view_reports_consistency() {
        let (live, store, reconciler) = setup();
        let name = format!("nightly_{ID}");
        store.insert(&schedule(&name, false)).unwrap();

        let view = reconciler.schedule_view(ID).await.unwrap();
        assert_eq!(view.consistency, Consistency::MissingLive);
        assert!(view.live.is_none());

        live.create(&entry(&name, Recurrence::Interval { minutes: 60 }))
            .await
            .unwrap();
        let view = reconciler.schedule_view(ID).await.unwrap();
        assert_eq!(view.consistency, Consistency::InSync);
        assert_eq!(view.live.unwrap().task_name, "nightly");

        store.set_cancelled(ID, true, None).unwrap();
        let view = reconciler.schedule_view(ID).await.unwrap();
        assert_eq!(view.consistency, Consistency::LingeringLive);

        live.delete(&name).await.unwrap();
        let view = reconciler.schedule_view(ID).await.unwrap();
        assert_eq!(view.consistency, Consistency::InSync);

        let err = reconciler.schedule_view("nope").await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }
}
