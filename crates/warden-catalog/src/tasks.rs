use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::info;
use warden_core::types::{search_patterns, Page, PageRequest};

use crate::db::{row_to_task, TASK_SELECT_SQL};
use crate::error::{is_unique_violation, CatalogError, Result};
use crate::methods::get_method;
use crate::types::{required, NewTask, Task, TaskPatch};

/// Insert a new task definition.
///
/// When an execution method is referenced it must exist, and its executor is
/// used if the payload does not name one explicitly.
pub fn create_task(conn: &Connection, new: &NewTask) -> Result<Task> {
    let task_name = required(&new.task_name, "task_name")?;
    let user_task_name = required(&new.user_task_name, "user_task_name")?;

    if get_task(conn, task_name)?.is_some() {
        return Err(CatalogError::AlreadyExists(format!("task '{task_name}'")));
    }

    let method_executor = match new.internal_execution_method.as_deref() {
        Some(key) => {
            let method = get_method(conn, key)?.ok_or_else(|| {
                CatalogError::Invalid(format!("unknown execution method '{key}'"))
            })?;
            method.executor
        }
        None => None,
    };
    let executor = new
        .executor
        .clone()
        .filter(|e| !e.trim().is_empty())
        .or(method_executor)
        .ok_or_else(|| CatalogError::Invalid("missing required field: executor".to_string()))?;

    let now = Utc::now().to_rfc3339();
    let task = Task {
        task_name: task_name.to_string(),
        user_task_name: user_task_name.to_string(),
        execution_method: new.execution_method.clone(),
        internal_execution_method: new.internal_execution_method.clone(),
        executor,
        script_name: new.script_name.clone(),
        script_path: new.script_path.clone(),
        description: new.description.clone(),
        cancelled: false,
        created_by: new.created_by.clone(),
        last_updated_by: None,
        created_at: now.clone(),
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO tasks
            (task_name, user_task_name, execution_method, internal_execution_method,
             executor, script_name, script_path, description, cancelled,
             created_by, last_updated_by, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,0,?9,?10,?11,?12)",
        params![
            task.task_name,
            task.user_task_name,
            task.execution_method,
            task.internal_execution_method,
            task.executor,
            task.script_name,
            task.script_path,
            task.description,
            task.created_by,
            task.last_updated_by,
            task.created_at,
            task.updated_at,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CatalogError::AlreadyExists(format!("task '{}'", task.task_name))
        } else {
            CatalogError::Database(e)
        }
    })?;
    info!(task_name = %task.task_name, executor = %task.executor, "task defined");
    Ok(task)
}

/// Load a task by name. Returns None instead of an error when absent so
/// callers decide whether missing is exceptional in their context.
pub fn get_task(conn: &Connection, task_name: &str) -> Result<Option<Task>> {
    let sql = format!("{TASK_SELECT_SQL} WHERE task_name = ?1");
    match conn.query_row(&sql, params![task_name], row_to_task) {
        Ok(t) => Ok(Some(t)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(CatalogError::Database(e)),
    }
}

/// All tasks, newest first.
pub fn list_tasks(conn: &Connection) -> Result<Vec<Task>> {
    let sql = format!("{TASK_SELECT_SQL} ORDER BY created_at DESC, task_name");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_task)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Newest-first page of tasks, optionally filtered on the user-facing name.
pub fn page_tasks(conn: &Connection, query: Option<&str>, req: PageRequest) -> Result<Page<Task>> {
    let term = query.unwrap_or("").trim().to_string();
    let [p1, p2, p3] = search_patterns(&term);
    let filter = "(?1 = '' OR user_task_name LIKE ?2 OR user_task_name LIKE ?3
                   OR user_task_name LIKE ?4)";

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM tasks WHERE {filter}"),
        params![term, p1, p2, p3],
        |row| row.get(0),
    )?;

    let sql = format!(
        "{TASK_SELECT_SQL} WHERE {filter} ORDER BY created_at DESC, task_name LIMIT ?5 OFFSET ?6"
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(
            params![term, p1, p2, p3, req.limit(), req.offset()],
            row_to_task,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Page::new(items, total as u64, req))
}

/// Apply the present fields of `patch` to a live (not cancelled) task.
pub fn update_task(conn: &Connection, task_name: &str, patch: &TaskPatch) -> Result<Task> {
    let mut task = get_task(conn, task_name)?
        .ok_or_else(|| CatalogError::NotFound(format!("task '{task_name}'")))?;
    if task.cancelled {
        return Err(CatalogError::Cancelled(task_name.to_string()));
    }

    if let Some(ref key) = patch.internal_execution_method {
        if get_method(conn, key)?.is_none() {
            return Err(CatalogError::Invalid(format!(
                "unknown execution method '{key}'"
            )));
        }
        task.internal_execution_method = Some(key.clone());
    }
    if let Some(ref v) = patch.user_task_name {
        task.user_task_name = v.clone();
    }
    if let Some(ref v) = patch.execution_method {
        task.execution_method = Some(v.clone());
    }
    if let Some(ref v) = patch.executor {
        if v.trim().is_empty() {
            return Err(CatalogError::Invalid("executor cannot be empty".to_string()));
        }
        task.executor = v.clone();
    }
    if let Some(ref v) = patch.script_name {
        task.script_name = Some(v.clone());
    }
    if let Some(ref v) = patch.script_path {
        task.script_path = Some(v.clone());
    }
    if let Some(ref v) = patch.description {
        task.description = Some(v.clone());
    }
    task.last_updated_by = patch.last_updated_by.clone().or(task.last_updated_by);
    task.updated_at = Utc::now().to_rfc3339();

    conn.execute(
        "UPDATE tasks SET
            user_task_name=?2, execution_method=?3, internal_execution_method=?4,
            executor=?5, script_name=?6, script_path=?7, description=?8,
            last_updated_by=?9, updated_at=?10
         WHERE task_name=?1",
        params![
            task.task_name,
            task.user_task_name,
            task.execution_method,
            task.internal_execution_method,
            task.executor,
            task.script_name,
            task.script_path,
            task.description,
            task.last_updated_by,
            task.updated_at,
        ],
    )?;
    Ok(task)
}

/// Flag a task as cancelled. Idempotent; existing schedules are untouched.
pub fn cancel_task(conn: &Connection, task_name: &str, actor: Option<&str>) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let n = conn.execute(
        "UPDATE tasks SET cancelled=1, last_updated_by=COALESCE(?2, last_updated_by), updated_at=?3
         WHERE task_name=?1",
        params![task_name, actor, now],
    )?;
    if n == 0 {
        return Err(CatalogError::NotFound(format!("task '{task_name}'")));
    }
    info!(%task_name, "task cancelled");
    Ok(())
}
