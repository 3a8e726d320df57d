use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use warden_catalog::{Task, TaskCatalog};
use warden_core::types::{Page, PageRequest};

use crate::adhoc::{AdHocExecutor, AdHocRequest};
use crate::error::{Result, SchedulerError};
use crate::live::{LiveEntry, LiveScheduler};
use crate::recurrence::{translate_request, Recurrence};
use crate::store::ScheduleStore;
use crate::types::{
    CreateOutcome, Schedule, SchedulePatch, ScheduleRequest, ScheduleType, TaskRequest,
    DEFAULT_USER_SCHEDULE_NAME,
};

/// Schedule lifecycle orchestration.
///
/// Keeps the durable record and the live entry consistent without a shared
/// transaction. Each operation makes at most one durable write and one live
/// call, ordered so a failure leaves the safer state:
///
/// | Operation  | Order                          | On live failure               |
/// |------------|--------------------------------|-------------------------------|
/// | create     | live create, then insert       | nothing written               |
/// | update     | live update, then write        | record unchanged              |
/// | cancel     | flag cancelled, then live delete | flag kept, `LiveCleanupFailed` |
/// | reschedule | live create, then clear flag   | record still cancelled        |
pub struct ScheduleEngine {
    catalog: Arc<TaskCatalog>,
    store: Arc<ScheduleStore>,
    live: Arc<dyn LiveScheduler>,
    adhoc: Arc<AdHocExecutor>,
}

impl ScheduleEngine {
    pub fn new(
        catalog: Arc<TaskCatalog>,
        store: Arc<ScheduleStore>,
        live: Arc<dyn LiveScheduler>,
        adhoc: Arc<AdHocExecutor>,
    ) -> Self {
        Self {
            catalog,
            store,
            live,
            adhoc,
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn adhoc(&self) -> &AdHocExecutor {
        &self.adhoc
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Validate, translate and materialize a new schedule.
    ///
    /// `IMMEDIATE` requests are dispatched through the ad-hoc executor and
    /// leave no schedule row or live entry.
    #[instrument(skip(self, req), fields(task_name = ?req.task_name, schedule_type = ?req.schedule_type))]
    pub async fn create(&self, req: ScheduleRequest) -> Result<CreateOutcome> {
        let task_name = req
            .task_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SchedulerError::Validation("task_name is required".into()))?;
        let task = self.schedulable_task(task_name)?;
        let kwargs = self.collect_parameters(&task.task_name, &req.parameters)?;

        let user_schedule_name = req
            .user_schedule_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_USER_SCHEDULE_NAME)
            .to_string();
        let schedule_type: ScheduleType = req
            .schedule_type
            .as_deref()
            .ok_or_else(|| SchedulerError::Validation("schedule_type is required".into()))?
            .parse()?;

        let schedule_id = Uuid::new_v4().to_string();
        let live_name = (schedule_type != ScheduleType::Immediate)
            .then(|| format!("{user_schedule_name}_{schedule_id}"));
        let recurrence = translate_request(schedule_type, &req.schedule)?;
        let args = build_args(
            &task,
            &user_schedule_name,
            live_name.as_deref(),
            schedule_type,
            &req.schedule,
        );

        let Some(live_name) = live_name else {
            let record = self
                .adhoc
                .execute(AdHocRequest {
                    task_name: task.task_name.clone(),
                    user_schedule_name,
                    executor: task.executor.clone(),
                    args,
                    kwargs,
                    created_by: req.created_by,
                })
                .await?;
            return Ok(CreateOutcome::Dispatched(record));
        };

        ensure_fireable(&recurrence, Utc::now())?;
        let entry = LiveEntry {
            name: live_name.clone(),
            task: task.executor.clone(),
            recurrence,
            args: args.clone(),
            kwargs: kwargs.clone(),
        };
        self.live.create(&entry).await?;

        let now = Utc::now().to_rfc3339();
        let schedule = Schedule {
            schedule_id: schedule_id.clone(),
            user_schedule_name,
            live_schedule_name: Some(live_name.clone()),
            task_name: task.task_name.clone(),
            args,
            kwargs,
            schedule_type,
            schedule_data: req.schedule,
            cancelled: false,
            created_by: req.created_by,
            last_updated_by: None,
            created_at: now.clone(),
            updated_at: now,
        };
        if let Err(e) = self.store.insert(&schedule) {
            warn!(%live_name, "insert failed after live create, removing live entry: {e}");
            if let Err(cleanup) = self.live.delete(&live_name).await {
                warn!(%live_name, "live entry left behind: {cleanup}");
            }
            return Err(e);
        }

        info!(%schedule_id, %live_name, %schedule_type, "schedule created");
        Ok(CreateOutcome::Scheduled {
            schedule_id,
            live_schedule_name: live_name,
        })
    }

    /// Apply `patch` to an active schedule and push the result live.
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        task_name: &str,
        live_schedule_name: &str,
        patch: SchedulePatch,
    ) -> Result<Schedule> {
        let current = self
            .store
            .find(task_name, live_schedule_name)?
            .filter(|s| !s.cancelled)
            .ok_or_else(|| not_found(task_name, live_schedule_name))?;
        let task = self.catalog.get_task(task_name)?;

        let mut next = current.clone();
        if let Some(ref parameters) = patch.parameters {
            next.kwargs = self.collect_parameters(task_name, parameters)?;
        }
        if let Some(ref raw) = patch.schedule_type {
            let schedule_type: ScheduleType = raw.parse()?;
            if schedule_type == ScheduleType::Immediate {
                return Err(SchedulerError::Validation(
                    "a scheduled task cannot be switched to IMMEDIATE".into(),
                ));
            }
            next.schedule_type = schedule_type;
        }
        if let Some(data) = patch.schedule {
            next.schedule_data = data;
        }

        let recurrence = translate_request(next.schedule_type, &next.schedule_data)?;
        ensure_fireable(&recurrence, Utc::now())?;
        next.args = build_args(
            &task,
            &next.user_schedule_name,
            Some(live_schedule_name),
            next.schedule_type,
            &next.schedule_data,
        );
        next.last_updated_by = patch.last_updated_by.or(next.last_updated_by);
        next.updated_at = Utc::now().to_rfc3339();

        let entry = LiveEntry {
            name: live_schedule_name.to_string(),
            task: task.executor.clone(),
            recurrence,
            args: next.args.clone(),
            kwargs: next.kwargs.clone(),
        };
        self.live.update(&entry).await?;

        if let Err(e) = self.store.update(&next) {
            warn!(live_name = %live_schedule_name, "write failed after live update, restoring: {e}");
            match live_entry_for(&current, &task) {
                Ok(previous) => {
                    if let Err(restore) = self.live.update(&previous).await {
                        warn!(live_name = %live_schedule_name, "live entry diverged: {restore}");
                    }
                }
                Err(rebuild) => warn!("previous live entry not rebuildable: {rebuild}"),
            }
            return Err(e);
        }

        info!(schedule_id = %next.schedule_id, live_name = %live_schedule_name, "schedule updated");
        Ok(next)
    }

    /// Flag a schedule cancelled and remove its live entry.
    ///
    /// The durable flag is committed first and is not rolled back when the
    /// live delete fails; the caller gets `LiveCleanupFailed` instead.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        task_name: &str,
        live_schedule_name: &str,
        actor: Option<&str>,
    ) -> Result<Schedule> {
        let schedule = self
            .store
            .find(task_name, live_schedule_name)?
            .ok_or_else(|| not_found(task_name, live_schedule_name))?;
        self.store.set_cancelled(&schedule.schedule_id, true, actor)?;
        let schedule = self.store.get(&schedule.schedule_id)?.unwrap_or(schedule);

        if let Err(source) = self.live.delete(live_schedule_name).await {
            warn!(live_name = %live_schedule_name, "cancelled in store, live delete failed: {source}");
            return Err(SchedulerError::LiveCleanupFailed {
                live_name: live_schedule_name.to_string(),
                source,
            });
        }

        info!(schedule_id = %schedule.schedule_id, live_name = %live_schedule_name, "schedule cancelled");
        Ok(schedule)
    }

    /// Recreate the live entry of a cancelled schedule from its stored data.
    #[instrument(skip(self))]
    pub async fn reschedule(
        &self,
        task_name: &str,
        live_schedule_name: &str,
        actor: Option<&str>,
    ) -> Result<Schedule> {
        let schedule = self
            .store
            .find(task_name, live_schedule_name)?
            .filter(|s| s.cancelled)
            .ok_or_else(|| {
                SchedulerError::NotFound(format!(
                    "cancelled schedule '{live_schedule_name}' for task '{task_name}'"
                ))
            })?;
        let task = self.catalog.get_task(task_name)?;
        if task.cancelled {
            return Err(SchedulerError::InvalidState(format!(
                "task '{task_name}' is cancelled and cannot be rescheduled"
            )));
        }

        let entry = live_entry_for(&schedule, &task)?;
        ensure_fireable(&entry.recurrence, Utc::now())?;
        self.live.create(&entry).await?;

        if let Err(e) = self.store.set_cancelled(&schedule.schedule_id, false, actor) {
            warn!(live_name = %live_schedule_name, "write failed after live create, removing: {e}");
            if let Err(cleanup) = self.live.delete(live_schedule_name).await {
                warn!(live_name = %live_schedule_name, "live entry left behind: {cleanup}");
            }
            return Err(e);
        }
        let schedule = self
            .store
            .get(&schedule.schedule_id)?
            .ok_or_else(|| not_found(task_name, live_schedule_name))?;

        info!(schedule_id = %schedule.schedule_id, live_name = %live_schedule_name, "schedule rescheduled");
        Ok(schedule)
    }

    /// Cancel an ad-hoc run by its tracking id.
    pub async fn cancel_adhoc(
        &self,
        task_name: &str,
        request_id: &str,
        actor: Option<&str>,
    ) -> Result<TaskRequest> {
        self.adhoc.cancel(task_name, request_id, actor).await
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn schedule(&self, schedule_id: &str) -> Result<Schedule> {
        self.store
            .get(schedule_id)?
            .ok_or_else(|| SchedulerError::NotFound(format!("schedule '{schedule_id}'")))
    }

    pub fn schedules(&self) -> Result<Vec<Schedule>> {
        self.store.list()
    }

    pub fn page_schedules(&self, query: Option<&str>, req: PageRequest) -> Result<Page<Schedule>> {
        self.store.page(query, req)
    }

    /// Schedules of a known task; `NotFound` for unknown tasks.
    pub fn schedules_for_task(&self, task_name: &str) -> Result<Vec<Schedule>> {
        self.catalog.get_task(task_name)?;
        self.store.list_for_task(task_name)
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn schedulable_task(&self, task_name: &str) -> Result<Task> {
        let task = self.catalog.get_task(task_name)?;
        if task.cancelled {
            return Err(SchedulerError::InvalidState(format!(
                "task '{task_name}' is cancelled and cannot be scheduled"
            )));
        }
        Ok(task)
    }

    /// Pick the declared parameters out of `provided`, in declaration order.
    /// Undeclared keys are dropped.
    fn collect_parameters(
        &self,
        task_name: &str,
        provided: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let mut kwargs = Map::new();
        for param in self.catalog.list_parameters(task_name)? {
            match provided.get(&param.parameter_name) {
                Some(value) => {
                    kwargs.insert(param.parameter_name, value.clone());
                }
                None => {
                    return Err(SchedulerError::MissingParameter {
                        name: param.parameter_name,
                    })
                }
            }
        }
        Ok(kwargs)
    }
}

fn not_found(task_name: &str, live_schedule_name: &str) -> SchedulerError {
    SchedulerError::NotFound(format!(
        "schedule '{live_schedule_name}' for task '{task_name}'"
    ))
}

/// Positional arguments every executor receives:
/// `[script_name, user_task_name, task_name, user_schedule_name,
///   live_schedule_name, schedule_type, schedule_data]`.
pub fn build_args(
    task: &Task,
    user_schedule_name: &str,
    live_schedule_name: Option<&str>,
    schedule_type: ScheduleType,
    schedule_data: &Value,
) -> Vec<Value> {
    vec![
        json!(task.script_name),
        json!(task.user_task_name),
        json!(task.task_name),
        json!(user_schedule_name),
        json!(live_schedule_name),
        json!(schedule_type.as_str()),
        schedule_data.clone(),
    ]
}

/// Rebuild the live entry of a stored schedule with the task's current executor.
fn live_entry_for(schedule: &Schedule, task: &Task) -> Result<LiveEntry> {
    let name = schedule.live_schedule_name.clone().ok_or_else(|| {
        SchedulerError::InvalidState(format!(
            "schedule '{}' has no live entry",
            schedule.schedule_id
        ))
    })?;
    Ok(LiveEntry {
        name,
        task: task.executor.clone(),
        recurrence: translate_request(schedule.schedule_type, &schedule.schedule_data)?,
        args: schedule.args.clone(),
        kwargs: schedule.kwargs.clone(),
    })
}

/// Reject recurrences that can never fire, before any side effect.
fn ensure_fireable(recurrence: &Recurrence, now: DateTime<Utc>) -> Result<()> {
    match recurrence {
        Recurrence::Immediate => Err(SchedulerError::InvalidSchedule(
            "either an interval or a cron schedule is required".into(),
        )),
        Recurrence::Interval { minutes: 0 } => Err(SchedulerError::InvalidSchedule(
            "interval must be at least one minute".into(),
        )),
        Recurrence::Once { at, .. } => {
            if *at <= now {
                return Err(SchedulerError::Validation(format!(
                    "one-time date {} is not in the future",
                    at.format("%Y-%m-%d %H:%M")
                )));
            }
            Ok(())
        }
        Recurrence::Cron(_) | Recurrence::Interval { .. } => {
            match recurrence.next_fire_after(now)? {
                Some(_) => Ok(()),
                None => Err(SchedulerError::InvalidSchedule(
                    "schedule never reaches a representable fire time".into(),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;
    use futures_util::stream::BoxStream;
    use serde_json::json;
    use warden_catalog::{AddParameters, NewParameter, NewTask};

    use super::*;
    use crate::adhoc::MemoryExecutionBackend;
    use crate::db::test_support::SharedDb;
    use crate::error::LiveError;
    use crate::live::{LiveDefinition, RunMetadata};
    use crate::memory::MemoryLiveScheduler;
    use crate::requests::RequestStore;

    /// Memory scheduler whose write calls can be switched to fail.
    struct FlakyLive {
        inner: MemoryLiveScheduler,
        fail_create: AtomicBool,
        fail_update: AtomicBool,
        fail_delete: AtomicBool,
    }

    impl FlakyLive {
        fn new() -> Self {
            Self {
                inner: MemoryLiveScheduler::new("redbeat"),
                fail_create: AtomicBool::new(false),
                fail_update: AtomicBool::new(false),
                fail_delete: AtomicBool::new(false),
            }
        }

        fn down(flag: &AtomicBool) -> std::result::Result<(), LiveError> {
            if flag.load(Ordering::SeqCst) {
                Err(LiveError::Unavailable("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl LiveScheduler for FlakyLive {
        fn key_prefix(&self) -> &str {
            self.inner.key_prefix()
        }
        async fn create(&self, entry: &LiveEntry) -> std::result::Result<(), LiveError> {
            Self::down(&self.fail_create)?;
            self.inner.create(entry).await
        }
        async fn update(&self, entry: &LiveEntry) -> std::result::Result<(), LiveError> {
            Self::down(&self.fail_update)?;
            self.inner.update(entry).await
        }
        async fn delete(&self, name: &str) -> std::result::Result<(), LiveError> {
            Self::down(&self.fail_delete)?;
            self.inner.delete(name).await
        }
        async fn next_fire_score(&self, key: &str) -> std::result::Result<Option<f64>, LiveError> {
            self.inner.next_fire_score(key).await
        }
        async fn get_definition(
            &self,
            key: &str,
        ) -> std::result::Result<Option<LiveDefinition>, LiveError> {
            self.inner.get_definition(key).await
        }
        async fn get_run_metadata(
            &self,
            key: &str,
        ) -> std::result::Result<Option<RunMetadata>, LiveError> {
            self.inner.get_run_metadata(key).await
        }
        fn enumerate(&self) -> BoxStream<'_, std::result::Result<String, LiveError>> {
            self.inner.enumerate()
        }
    }

    struct Harness {
        engine: ScheduleEngine,
        catalog: Arc<TaskCatalog>,
        live: Arc<FlakyLive>,
        backend: Arc<MemoryExecutionBackend>,
        _db: SharedDb,
    }

    fn harness() -> Harness {
        let db = SharedDb::new();
        let catalog = Arc::new(TaskCatalog::new(db.connect()));
        let store_conn = db.connect();
        let requests_conn = db.connect();

        let live = Arc::new(FlakyLive::new());
        let backend = Arc::new(MemoryExecutionBackend::new());
        let adhoc = Arc::new(AdHocExecutor::new(
            backend.clone(),
            Arc::new(RequestStore::new(requests_conn, 14)),
        ));
        let engine = ScheduleEngine::new(
            catalog.clone(),
            Arc::new(ScheduleStore::new(store_conn)),
            live.clone(),
            adhoc,
        );

        catalog
            .create_task(&NewTask {
                task_name: Some("T1".into()),
                user_task_name: Some("Sync users".into()),
                executor: Some("executors.run_script".into()),
                script_name: Some("sync.py".into()),
                ..Default::default()
            })
            .unwrap();
        catalog
            .add_parameters(
                "T1",
                &AddParameters {
                    parameters: vec![NewParameter {
                        parameter_name: Some("region".into()),
                        data_type: Some("text".into()),
                        description: None,
                    }],
                    created_by: None,
                },
            )
            .unwrap();

        Harness {
            engine,
            catalog,
            live,
            backend,
            _db: db,
        }
    }

    fn request(schedule_type: &str, schedule: Value) -> ScheduleRequest {
        ScheduleRequest {
            user_schedule_name: Some("nightly".into()),
            task_name: Some("T1".into()),
            parameters: json!({ "region": "eu" }).as_object().unwrap().clone(),
            schedule_type: Some(schedule_type.into()),
            schedule,
            created_by: Some("admin".into()),
        }
    }

    fn periodic_hours(n: u64) -> ScheduleRequest {
        request("PERIODIC", json!({ "FREQUENCY_TYPE": "HOURS", "FREQUENCY": n }))
    }

    async fn scheduled(h: &Harness, req: ScheduleRequest) -> (String, String) {
        match h.engine.create(req).await.unwrap() {
            CreateOutcome::Scheduled {
                schedule_id,
                live_schedule_name,
            } => (schedule_id, live_schedule_name),
            other => panic!("expected a live schedule, got {other:?}"),
        }
    }

    async fn live_definition(h: &Harness, name: &str) -> Option<LiveDefinition> {
        h.live
            .get_definition(&h.live.key_for(name))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn periodic_create_materializes_interval_entry() {
        let h = harness();
        let (id, live_name) = scheduled(&h, periodic_hours(2)).await;
        assert_eq!(live_name, format!("nightly_{id}"));

        let def = live_definition(&h, &live_name).await.unwrap();
        let schedule = def.schedule.unwrap();
        assert_eq!(schedule["__type__"], "interval");
        assert_eq!(schedule["every"], 120 * 60);
        assert_eq!(def.task.as_deref(), Some("executors.run_script"));
        assert_eq!(def.kwargs["region"], "eu");
        assert_eq!(def.args[4], json!(live_name));

        let row = h.engine.schedule(&id).unwrap();
        assert!(!row.cancelled);
        assert_eq!(row.schedule_type, ScheduleType::Periodic);
        assert_eq!(row.args[0], "sync.py");
        assert_eq!(row.args[5], "PERIODIC");
    }

    #[tokio::test]
    async fn missing_parameter_has_no_side_effects() {
        let h = harness();
        let mut req = periodic_hours(1);
        req.parameters = Map::new();
        let err = h.engine.create(req).await.unwrap_err();
        match err {
            SchedulerError::MissingParameter { name } => assert_eq!(name, "region"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(h.engine.schedules().unwrap().is_empty());
        assert!(h.live.inner.is_empty());
    }

    #[tokio::test]
    async fn undeclared_parameters_are_dropped() {
        let h = harness();
        let mut req = periodic_hours(1);
        req.parameters.insert("extra".into(), json!(1));
        let (id, _) = scheduled(&h, req).await;
        let row = h.engine.schedule(&id).unwrap();
        assert_eq!(row.kwargs.len(), 1);
        assert!(row.kwargs.contains_key("region"));
    }

    #[tokio::test]
    async fn live_failure_leaves_no_row() {
        let h = harness();
        h.live.fail_create.store(true, Ordering::SeqCst);
        let err = h.engine.create(periodic_hours(1)).await.unwrap_err();
        assert_eq!(err.code(), "ADAPTER_ERROR");
        assert!(!err.durable_change_applied());
        assert!(h.engine.schedules().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_and_cancelled_tasks_are_rejected() {
        let h = harness();
        let mut req = periodic_hours(1);
        req.task_name = Some("ghost".into());
        assert_eq!(h.engine.create(req).await.unwrap_err().code(), "NOT_FOUND");

        h.catalog.cancel_task("T1", None).unwrap();
        let err = h.engine.create(periodic_hours(1)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidState(_)));
    }

    #[tokio::test]
    async fn bad_schedule_input_is_validation() {
        let h = harness();
        for req in [
            request("HOURLY", json!({})),
            request("PERIODIC", json!({ "FREQUENCY_TYPE": "FORTNIGHTS" })),
            request("ONCE", json!({})),
            request("ONCE", json!({ "VALUES": "2001-01-01 00:00" })),
        ] {
            let err = h.engine.create(req).await.unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR", "{err}");
        }
        assert!(h.live.inner.is_empty());
    }

    #[tokio::test]
    async fn weekly_without_known_days_is_invalid_schedule() {
        let h = harness();
        let err = h
            .engine
            .create(request("WEEKLY_SPECIFIC_DAYS", json!({ "VALUES": ["Funday"] })))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule(_)));
        assert!(h.live.inner.is_empty());
        assert!(h.engine.schedules().unwrap().is_empty());
    }

    #[tokio::test]
    async fn once_in_future_is_one_shot() {
        let h = harness();
        let (_, live_name) = scheduled(&h, request("ONCE", json!({ "VALUES": "2099-03-04 05:06" }))).await;
        let def = live_definition(&h, &live_name).await.unwrap();
        let schedule = def.schedule.unwrap();
        assert_eq!(schedule["__type__"], "crontab");
        assert_eq!(schedule["minute"], "6");
        assert_eq!(schedule["hour"], "5");
        assert_eq!(schedule["day_of_month"], "4");
        assert_eq!(schedule["month_of_year"], "3");

        let at = Utc.with_ymd_and_hms(2099, 3, 4, 5, 6, 0).unwrap();
        assert!(h.live.inner.record_run(&h.live.key_for(&live_name), at));
        assert!(live_definition(&h, &live_name).await.is_none());
    }

    #[tokio::test]
    async fn oversized_interval_is_rejected_before_side_effects() {
        let h = harness();
        let req = request(
            "PERIODIC",
            json!({ "FREQUENCY_TYPE": "MINUTES", "FREQUENCY": 400_000_000_000_000_000u64 }),
        );
        let err = h.engine.create(req).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR", "{err}");
        assert!(h.live.inner.is_empty());
        assert!(h.engine.schedules().unwrap().is_empty());
    }

    #[test]
    fn unrepresentable_interval_is_not_fireable() {
        let now = Utc::now();
        for minutes in [i64::MAX as u64, u64::MAX] {
            let err = ensure_fireable(&Recurrence::Interval { minutes }, now).unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidSchedule(_)), "{minutes}: {err}");
        }
        assert!(ensure_fireable(&Recurrence::Interval { minutes: 60 }, now).is_ok());
    }

    #[tokio::test]
    async fn immediate_dispatches_without_schedule_row() {
        let h = harness();
        let mut req = request("IMMEDIATE", Value::Null);
        req.user_schedule_name = None;
        let outcome = h.engine.create(req).await.unwrap();
        let record = match outcome {
            CreateOutcome::Dispatched(r) => r,
            other => panic!("expected dispatch, got {other:?}"),
        };
        assert_eq!(record.user_schedule_name, "Immediate");
        assert_eq!(record.args[4], Value::Null);
        assert_eq!(h.backend.queued().len(), 1);
        assert!(h.engine.schedules().unwrap().is_empty());
        assert!(h.live.inner.is_empty());
    }

    #[tokio::test]
    async fn update_switches_recurrence_and_rebuilds_args() {
        let h = harness();
        let (id, live_name) = scheduled(&h, periodic_hours(1)).await;

        let patch = SchedulePatch {
            parameters: Some(json!({ "region": "us" }).as_object().unwrap().clone()),
            schedule_type: Some("WEEKLY_SPECIFIC_DAYS".into()),
            schedule: Some(json!({ "VALUES": ["Mon", "Fri"] })),
            last_updated_by: Some("ops".into()),
        };
        let updated = h.engine.update("T1", &live_name, patch).await.unwrap();
        assert_eq!(updated.schedule_type, ScheduleType::WeeklySpecificDays);
        assert_eq!(updated.args[5], "WEEKLY_SPECIFIC_DAYS");
        assert_eq!(updated.kwargs["region"], "us");

        let def = live_definition(&h, &live_name).await.unwrap();
        assert_eq!(def.schedule.unwrap()["day_of_week"], "1,5");
        assert_eq!(def.kwargs["region"], "us");
        assert_eq!(h.engine.schedule(&id).unwrap(), updated);
    }

    #[tokio::test]
    async fn update_failure_keeps_record() {
        let h = harness();
        let (id, live_name) = scheduled(&h, periodic_hours(1)).await;
        let before = h.engine.schedule(&id).unwrap();

        h.live.fail_update.store(true, Ordering::SeqCst);
        let patch = SchedulePatch {
            schedule: Some(json!({ "FREQUENCY_TYPE": "DAYS", "FREQUENCY": 1 })),
            ..Default::default()
        };
        let err = h.engine.update("T1", &live_name, patch).await.unwrap_err();
        assert_eq!(err.code(), "ADAPTER_ERROR");
        assert_eq!(h.engine.schedule(&id).unwrap(), before);
    }

    #[tokio::test]
    async fn update_rejects_immediate_and_missing_parameters() {
        let h = harness();
        let (id, live_name) = scheduled(&h, periodic_hours(1)).await;
        let row_before = h.engine.schedule(&id).unwrap();
        let live_before = live_definition(&h, &live_name).await.unwrap();

        let to_immediate = SchedulePatch {
            schedule_type: Some("IMMEDIATE".into()),
            ..Default::default()
        };
        let err = h.engine.update("T1", &live_name, to_immediate).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));

        let no_params = SchedulePatch {
            parameters: Some(Map::new()),
            ..Default::default()
        };
        let err = h.engine.update("T1", &live_name, no_params).await.unwrap_err();
        match err {
            SchedulerError::MissingParameter { name } => assert_eq!(name, "region"),
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(h.engine.schedule(&id).unwrap(), row_before);
        assert_eq!(live_definition(&h, &live_name).await.unwrap(), live_before);
    }

    #[tokio::test]
    async fn cancel_removes_live_entry() {
        let h = harness();
        let (id, live_name) = scheduled(&h, periodic_hours(1)).await;

        let row = h.engine.cancel("T1", &live_name, Some("ops")).await.unwrap();
        assert!(row.cancelled);
        assert_eq!(row.last_updated_by.as_deref(), Some("ops"));
        assert!(live_definition(&h, &live_name).await.is_none());
        assert!(h.engine.schedule(&id).unwrap().cancelled);

        let err = h
            .engine
            .update("T1", &live_name, SchedulePatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancel_unknown_pair_is_not_found() {
        let h = harness();
        let err = h.engine.cancel("T1", "nope_123", None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_live_delete_keeps_cancellation() {
        let h = harness();
        let (id, live_name) = scheduled(&h, periodic_hours(1)).await;

        h.live.fail_delete.store(true, Ordering::SeqCst);
        let err = h.engine.cancel("T1", &live_name, None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::LiveCleanupFailed { .. }));
        assert!(err.durable_change_applied());
        assert!(h.engine.schedule(&id).unwrap().cancelled);
        assert!(live_definition(&h, &live_name).await.is_some());
    }

    #[tokio::test]
    async fn cancel_then_reschedule_restores_entry() {
        let h = harness();
        let (id, live_name) = scheduled(&h, periodic_hours(2)).await;
        let original = live_definition(&h, &live_name).await.unwrap();

        h.engine.cancel("T1", &live_name, None).await.unwrap();
        let row = h.engine.reschedule("T1", &live_name, Some("ops")).await.unwrap();
        assert!(!row.cancelled);
        assert_eq!(row.schedule_id, id);

        let restored = live_definition(&h, &live_name).await.unwrap();
        assert_eq!(restored, original);
    }

    #[tokio::test]
    async fn reschedule_requires_cancelled_schedule() {
        let h = harness();
        let (_, live_name) = scheduled(&h, periodic_hours(1)).await;
        let err = h.engine.reschedule("T1", &live_name, None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
    }

    #[tokio::test]
    async fn reschedule_failure_stays_cancelled() {
        let h = harness();
        let (id, live_name) = scheduled(&h, periodic_hours(1)).await;
        h.engine.cancel("T1", &live_name, None).await.unwrap();

        h.live.fail_create.store(true, Ordering::SeqCst);
        let err = h.engine.reschedule("T1", &live_name, None).await.unwrap_err();
        assert_eq!(err.code(), "ADAPTER_ERROR");
        assert!(h.engine.schedule(&id).unwrap().cancelled);
    }

    #[tokio::test]
    async fn reschedule_of_cancelled_task_is_invalid_state() {
        let h = harness();
        let (_, live_name) = scheduled(&h, periodic_hours(1)).await;
        h.engine.cancel("T1", &live_name, None).await.unwrap();
        h.catalog.cancel_task("T1", None).unwrap();

        let err = h.engine.reschedule("T1", &live_name, None).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidState(_)));
    }
}
