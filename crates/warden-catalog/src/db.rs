use rusqlite::{Connection, Result};

use crate::types::{ExecutionMethod, Task, TaskParameter};

pub(crate) const METHOD_SELECT_SQL: &str = "SELECT internal_execution_method, execution_method,
        executor, description, created_by, last_updated_by, created_at, updated_at
     FROM execution_methods";

pub(crate) const TASK_SELECT_SQL: &str = "SELECT task_name, user_task_name, execution_method,
        internal_execution_method, executor, script_name, script_path, description,
        cancelled, created_by, last_updated_by, created_at, updated_at
     FROM tasks";

pub(crate) const PARAM_SELECT_SQL: &str = "SELECT param_id, task_name, parameter_name, data_type,
        description, created_by, last_updated_by, created_at, updated_at
     FROM task_params";

/// Map a SELECT row (column order from METHOD_SELECT_SQL) to an ExecutionMethod.
pub(crate) fn row_to_method(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionMethod> {
    Ok(ExecutionMethod {
        internal_execution_method: row.get(0)?,
        execution_method: row.get(1)?,
        executor: row.get(2)?,
        description: row.get(3)?,
        created_by: row.get(4)?,
        last_updated_by: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Map a SELECT row (column order from TASK_SELECT_SQL) to a Task.
pub(crate) fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        task_name: row.get(0)?,
        user_task_name: row.get(1)?,
        execution_method: row.get(2)?,
        internal_execution_method: row.get(3)?,
        executor: row.get(4)?,
        script_name: row.get(5)?,
        script_path: row.get(6)?,
        description: row.get(7)?,
        cancelled: row.get::<_, i32>(8)? != 0,
        created_by: row.get(9)?,
        last_updated_by: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

/// Map a SELECT row (column order from PARAM_SELECT_SQL) to a TaskParameter.
pub(crate) fn row_to_param(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskParameter> {
    Ok(TaskParameter {
        param_id: row.get(0)?,
        task_name: row.get(1)?,
        parameter_name: row.get(2)?,
        data_type: row.get(3)?,
        description: row.get(4)?,
        created_by: row.get(5)?,
        last_updated_by: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

/// Initialise all tables for the catalog. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_execution_methods_table(conn)?;
    create_tasks_table(conn)?;
    create_params_table(conn)?;
    Ok(())
}

fn create_execution_methods_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS execution_methods (
            internal_execution_method TEXT PRIMARY KEY NOT NULL,
            execution_method          TEXT NOT NULL,
            executor                  TEXT,
            description               TEXT,
            created_by                TEXT,
            last_updated_by           TEXT,
            created_at                TEXT NOT NULL,
            updated_at                TEXT NOT NULL
        );",
    )
}

fn create_tasks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            task_name                 TEXT PRIMARY KEY NOT NULL,
            user_task_name            TEXT NOT NULL,
            execution_method          TEXT,
            internal_execution_method TEXT
                REFERENCES execution_methods(internal_execution_method) ON DELETE SET NULL,
            executor                  TEXT NOT NULL,
            script_name               TEXT,
            script_path               TEXT,
            description               TEXT,
            cancelled                 INTEGER NOT NULL DEFAULT 0,
            created_by                TEXT,
            last_updated_by           TEXT,
            created_at                TEXT NOT NULL,
            updated_at                TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_user_task_name ON tasks (user_task_name);",
    )
}

fn create_params_table(conn: &Connection) -> Result<()> {
    // param_id doubles as declaration order: schedule validation walks
    // parameters in ascending param_id.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS task_params (
            param_id        INTEGER PRIMARY KEY AUTOINCREMENT,
            task_name       TEXT NOT NULL REFERENCES tasks(task_name) ON DELETE CASCADE,
            parameter_name  TEXT NOT NULL,
            data_type       TEXT NOT NULL,
            description     TEXT,
            created_by      TEXT,
            last_updated_by TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE(task_name, parameter_name)
        );",
    )
}
