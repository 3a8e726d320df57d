use std::sync::Mutex;

use chrono::{Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use tracing::instrument;
use warden_core::types::{search_patterns, Page, PageRequest};

use crate::error::{Result, SchedulerError};
use crate::store::json_column;
use crate::types::{RequestStatus, TaskRequest};

const REQUEST_SELECT_SQL: &str = "SELECT request_id, task_name, user_schedule_name, executor,
        args, kwargs, status, created_by, last_updated_by, created_at, updated_at
     FROM task_requests";

/// Audit trail of ad-hoc dispatches.
pub struct RequestStore {
    db: Mutex<Connection>,
    retention_days: u32,
}

impl RequestStore {
    /// Wrap an initialised connection. Listings only look back
    /// `retention_days`; rows are never deleted here.
    pub fn new(conn: Connection, retention_days: u32) -> Self {
        Self {
            db: Mutex::new(conn),
            retention_days,
        }
    }

    fn cutoff(&self) -> String {
        (Utc::now() - Duration::days(i64::from(self.retention_days))).to_rfc3339()
    }

    #[instrument(skip(self, request), fields(request_id = %request.request_id))]
    pub fn insert(&self, request: &TaskRequest) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO task_requests
             (request_id, task_name, user_schedule_name, executor, args, kwargs, status,
              created_by, last_updated_by, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                request.request_id,
                request.task_name,
                request.user_schedule_name,
                request.executor,
                serde_json::Value::from(request.args.clone()).to_string(),
                serde_json::Value::from(request.kwargs.clone()).to_string(),
                request.status.as_str(),
                request.created_by,
                request.last_updated_by,
                request.created_at,
                request.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Look up a request of `task_name` by tracking id.
    #[instrument(skip(self))]
    pub fn find(&self, task_name: &str, request_id: &str) -> Result<Option<TaskRequest>> {
        let db = self.db.lock().unwrap();
        let sql = format!("{REQUEST_SELECT_SQL} WHERE task_name = ?1 AND request_id = ?2");
        match db.query_row(&sql, params![task_name, request_id], row_to_request) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(SchedulerError::Database(e)),
        }
    }

    #[instrument(skip(self))]
    pub fn set_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        actor: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE task_requests
             SET status=?2, last_updated_by=COALESCE(?3, last_updated_by), updated_at=?4
             WHERE request_id=?1",
            params![request_id, status.as_str(), actor, now],
        )?;
        if n == 0 {
            return Err(SchedulerError::NotFound(format!("request '{request_id}'")));
        }
        Ok(())
    }

    /// Requests inside the retention window, newest first.
    pub fn list_recent(&self) -> Result<Vec<TaskRequest>> {
        let db = self.db.lock().unwrap();
        let sql = format!("{REQUEST_SELECT_SQL} WHERE created_at >= ?1 ORDER BY created_at DESC");
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map(params![self.cutoff()], row_to_request)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Page of recent requests, optionally filtered on task name.
    #[instrument(skip(self))]
    pub fn page_recent(&self, query: Option<&str>, req: PageRequest) -> Result<Page<TaskRequest>> {
        let term = query.unwrap_or("").trim().to_string();
        let [p1, p2, p3] = search_patterns(&term);
        let filter = "created_at >= ?1 AND
            (?2 = '' OR task_name LIKE ?3 OR task_name LIKE ?4 OR task_name LIKE ?5)";
        let cutoff = self.cutoff();

        let db = self.db.lock().unwrap();
        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM task_requests WHERE {filter}"),
            params![cutoff, term, p1, p2, p3],
            |row| row.get(0),
        )?;
        let sql = format!(
            "{REQUEST_SELECT_SQL} WHERE {filter} ORDER BY created_at DESC LIMIT ?6 OFFSET ?7"
        );
        let mut stmt = db.prepare(&sql)?;
        let items = stmt
            .query_map(
                params![cutoff, term, p1, p2, p3, req.limit(), req.offset()],
                row_to_request,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page::new(items, total as u64, req))
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRequest> {
    let status_str: String = row.get(6)?;
    let status: RequestStatus = status_str
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into()))?;
    Ok(TaskRequest {
        request_id: row.get(0)?,
        task_name: row.get(1)?,
        user_schedule_name: row.get(2)?,
        executor: row.get(3)?,
        args: json_column(row, 4)?,
        kwargs: json_column(row, 5)?,
        status,
        created_by: row.get(7)?,
        last_updated_by: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
