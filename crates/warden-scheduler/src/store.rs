use std::sync::Mutex;

use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use warden_core::types::{search_patterns, Page, PageRequest};

use crate::error::{Result, SchedulerError};
use crate::types::{Schedule, ScheduleType};

const SCHEDULE_SELECT_SQL: &str = "SELECT schedule_id, user_schedule_name, live_schedule_name,
        task_name, args, kwargs, schedule_type, schedule_data, cancelled,
        created_by, last_updated_by, created_at, updated_at
     FROM task_schedules";

/// Durable schedule records.
///
/// Owns its own connection so the engine can read and write schedules while
/// the catalog is being queried elsewhere. No lock is held across an await:
/// every method runs to completion synchronously.
pub struct ScheduleStore {
    db: Mutex<Connection>,
}

impl ScheduleStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.schedule_id))]
    pub fn insert(&self, schedule: &Schedule) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO task_schedules
             (schedule_id, user_schedule_name, live_schedule_name, task_name, args, kwargs,
              schedule_type, schedule_data, cancelled, created_by, last_updated_by,
              created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                schedule.schedule_id,
                schedule.user_schedule_name,
                schedule.live_schedule_name,
                schedule.task_name,
                serde_json::to_string(&schedule.args).map_err(to_sql_err)?,
                serde_json::to_string(&schedule.kwargs).map_err(to_sql_err)?,
                schedule.schedule_type.as_str(),
                serde_json::to_string(&schedule.schedule_data).map_err(to_sql_err)?,
                schedule.cancelled as i32,
                schedule.created_by,
                schedule.last_updated_by,
                schedule.created_at,
                schedule.updated_at,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation
                    && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                SchedulerError::Conflict(format!(
                    "schedule '{}' already exists",
                    schedule
                        .live_schedule_name
                        .as_deref()
                        .unwrap_or(&schedule.schedule_id)
                ))
            }
            other => SchedulerError::Database(other),
        })?;
        Ok(())
    }

    /// Retrieve a schedule by id, returning `None` if it does not exist.
    #[instrument(skip(self))]
    pub fn get(&self, schedule_id: &str) -> Result<Option<Schedule>> {
        let db = self.db.lock().unwrap();
        let sql = format!("{SCHEDULE_SELECT_SQL} WHERE schedule_id = ?1");
        match db.query_row(&sql, params![schedule_id], row_to_schedule) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SchedulerError::Database(e)),
        }
    }

    /// Look up the schedule a task owns under `live_schedule_name`, cancelled or not.
    #[instrument(skip(self))]
    pub fn find(&self, task_name: &str, live_schedule_name: &str) -> Result<Option<Schedule>> {
        let db = self.db.lock().unwrap();
        let sql =
            format!("{SCHEDULE_SELECT_SQL} WHERE task_name = ?1 AND live_schedule_name = ?2");
        match db.query_row(&sql, params![task_name, live_schedule_name], row_to_schedule) {
            Ok(s) => {
                debug!(cancelled = s.cancelled, "schedule found");
                Ok(Some(s))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SchedulerError::Database(e)),
        }
    }

    /// All schedules, newest first.
    pub fn list(&self) -> Result<Vec<Schedule>> {
        let db = self.db.lock().unwrap();
        let sql = format!("{SCHEDULE_SELECT_SQL} ORDER BY created_at DESC, schedule_id");
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Schedules of one task, newest first.
    #[instrument(skip(self))]
    pub fn list_for_task(&self, task_name: &str) -> Result<Vec<Schedule>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "{SCHEDULE_SELECT_SQL} WHERE task_name = ?1 ORDER BY created_at DESC, schedule_id"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![task_name], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Newest-first page, optionally filtered on task name.
    #[instrument(skip(self))]
    pub fn page(&self, query: Option<&str>, req: PageRequest) -> Result<Page<Schedule>> {
        let term = query.unwrap_or("").trim().to_string();
        let [p1, p2, p3] = search_patterns(&term);
        let filter = "(?1 = '' OR task_name LIKE ?2 OR task_name LIKE ?3 OR task_name LIKE ?4)";

        let db = self.db.lock().unwrap();
        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM task_schedules WHERE {filter}"),
            params![term, p1, p2, p3],
            |row| row.get(0),
        )?;
        let sql = format!(
            "{SCHEDULE_SELECT_SQL} WHERE {filter}
             ORDER BY created_at DESC, schedule_id LIMIT ?5 OFFSET ?6"
        );
        let mut stmt = db.prepare(&sql)?;
        let items = stmt
            .query_map(
                params![term, p1, p2, p3, req.limit(), req.offset()],
                row_to_schedule,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, req))
    }

    /// Persist the mutable fields of an existing schedule.
    #[instrument(skip(self, schedule), fields(schedule_id = %schedule.schedule_id))]
    pub fn update(&self, schedule: &Schedule) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE task_schedules
             SET args=?2, kwargs=?3, schedule_type=?4, schedule_data=?5,
                 last_updated_by=?6, updated_at=?7
             WHERE schedule_id=?1",
            params![
                schedule.schedule_id,
                serde_json::to_string(&schedule.args).map_err(to_sql_err)?,
                serde_json::to_string(&schedule.kwargs).map_err(to_sql_err)?,
                schedule.schedule_type.as_str(),
                serde_json::to_string(&schedule.schedule_data).map_err(to_sql_err)?,
                schedule.last_updated_by,
                schedule.updated_at,
            ],
        )?;
        if n == 0 {
            return Err(SchedulerError::NotFound(format!(
                "schedule '{}'",
                schedule.schedule_id
            )));
        }
        Ok(())
    }

    /// Flip the cancellation flag and stamp the audit fields.
    #[instrument(skip(self))]
    pub fn set_cancelled(
        &self,
        schedule_id: &str,
        cancelled: bool,
        actor: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE task_schedules
             SET cancelled=?2, last_updated_by=COALESCE(?3, last_updated_by), updated_at=?4
             WHERE schedule_id=?1",
            params![schedule_id, cancelled as i32, actor, now],
        )?;
        if n == 0 {
            return Err(SchedulerError::NotFound(format!("schedule '{schedule_id}'")));
        }
        Ok(())
    }
}

fn to_sql_err(e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
}

/// Decode a JSON TEXT column.
pub(crate) fn json_column<T: DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    let type_str: String = row.get(6)?;
    let schedule_type: ScheduleType = type_str.parse().map_err(|e: SchedulerError| {
        rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.to_string().into())
    })?;
    Ok(Schedule {
        schedule_id: row.get(0)?,
        user_schedule_name: row.get(1)?,
        live_schedule_name: row.get(2)?,
        task_name: row.get(3)?,
        args: json_column(row, 4)?,
        kwargs: json_column(row, 5)?,
        schedule_type,
        schedule_data: json_column(row, 7)?,
        cancelled: row.get::<_, i32>(8)? != 0,
        created_by: row.get(9)?,
        last_updated_by: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> ScheduleStore {
        ScheduleStore::new(crate::db::test_support::memory_db())
    }

    fn schedule(id: &str, task: &str) -> Schedule {
        let now = chrono::Utc::now().to_rfc3339();
        Schedule {
            schedule_id: id.to_string(),
            user_schedule_name: "nightly".to_string(),
            live_schedule_name: Some(format!("nightly_{id}")),
            task_name: task.to_string(),
            args: vec![json!("sync.py"), json!("Sync")],
            kwargs: json!({ "region": "eu" }).as_object().unwrap().clone(),
            schedule_type: ScheduleType::Periodic,
            schedule_data: json!({ "FREQUENCY_TYPE": "HOURS", "FREQUENCY": 2 }),
            cancelled: false,
            created_by: Some("admin".to_string()),
            last_updated_by: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[test]
    fn insert_then_find_by_task_and_live_name() {
        let s = store();
        let rec = schedule("a1", "sync_users");
        s.insert(&rec).unwrap();

        let found = s.find("sync_users", "nightly_a1").unwrap().unwrap();
        assert_eq!(found, rec);
        assert!(s.find("other_task", "nightly_a1").unwrap().is_none());
        assert_eq!(s.get("a1").unwrap().unwrap().kwargs["region"], "eu");
    }

    #[test]
    fn duplicate_live_name_is_conflict() {
        let s = store();
        s.insert(&schedule("a1", "t")).unwrap();
        let mut dup = schedule("a2", "t");
        dup.live_schedule_name = Some("nightly_a1".to_string());
        assert!(matches!(s.insert(&dup), Err(SchedulerError::Conflict(_))));
    }

    #[test]
    fn live_name_required_for_recurring_types() {
        let s = store();
        let mut rec = schedule("a1", "t");
        rec.live_schedule_name = None;
        assert!(matches!(s.insert(&rec), Err(SchedulerError::Database(_))));
    }

    #[test]
    fn cancel_flag_round_trips() {
        let s = store();
        s.insert(&schedule("a1", "t")).unwrap();
        s.set_cancelled("a1", true, Some("ops")).unwrap();
        let rec = s.get("a1").unwrap().unwrap();
        assert!(rec.cancelled);
        assert_eq!(rec.last_updated_by.as_deref(), Some("ops"));

        s.set_cancelled("a1", false, None).unwrap();
        let rec = s.get("a1").unwrap().unwrap();
        assert!(!rec.cancelled);
        assert_eq!(rec.last_updated_by.as_deref(), Some("ops"));

        assert!(matches!(
            s.set_cancelled("missing", true, None),
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[test]
    fn update_rewrites_recurrence_fields() {
        let s = store();
        let mut rec = schedule("a1", "t");
        s.insert(&rec).unwrap();
        rec.schedule_type = ScheduleType::WeeklySpecificDays;
        rec.schedule_data = json!({ "VALUES": ["Mon"] });
        rec.last_updated_by = Some("ops".to_string());
        s.update(&rec).unwrap();

        let back = s.get("a1").unwrap().unwrap();
        assert_eq!(back.schedule_type, ScheduleType::WeeklySpecificDays);
        assert_eq!(back.schedule_data, json!({ "VALUES": ["Mon"] }));
    }

    #[test]
    fn page_filters_on_task_name() {
        let s = store();
        s.insert(&schedule("a1", "sync_users")).unwrap();
        s.insert(&schedule("a2", "sync_users")).unwrap();
        s.insert(&schedule("a3", "cleanup")).unwrap();

        let page = s.page(Some("sync users"), PageRequest::new(1, 10)).unwrap();
        assert_eq!(page.total, 2);
        assert!(page.items.iter().all(|r| r.task_name == "sync_users"));

        let all = s.page(None, PageRequest::new(2, 2)).unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.pages, 2);
        assert_eq!(all.items.len(), 1);

        assert_eq!(s.list_for_task("cleanup").unwrap().len(), 1);
        assert_eq!(s.list().unwrap().len(), 3);
    }
}
