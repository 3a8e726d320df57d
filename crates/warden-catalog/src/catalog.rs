use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;
use warden_core::types::{Page, PageRequest};

use crate::error::{CatalogError, Result};
use crate::types::{
    AddParameters, ExecutionMethod, ExecutionMethodPatch, NewExecutionMethod, NewTask,
    ParameterPatch, Task, TaskParameter, TaskPatch,
};
use crate::{methods, params, tasks};

/// Thread-safe handle over the catalog tables.
///
/// Wraps a dedicated SQLite connection in a `Mutex`, the same way every other
/// warden subsystem owns its connection. Calls are short and never held
/// across an `.await`.
pub struct TaskCatalog {
    db: Mutex<Connection>,
}

impl TaskCatalog {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    // ── Execution methods ────────────────────────────────────────────────────

    pub fn create_method(&self, new: &NewExecutionMethod) -> Result<ExecutionMethod> {
        let conn = self.db.lock().unwrap();
        methods::create_method(&conn, new)
    }

    pub fn get_method(&self, key: &str) -> Result<ExecutionMethod> {
        let conn = self.db.lock().unwrap();
        methods::get_method(&conn, key)?
            .ok_or_else(|| CatalogError::NotFound(format!("execution method '{key}'")))
    }

    pub fn list_methods(&self) -> Result<Vec<ExecutionMethod>> {
        let conn = self.db.lock().unwrap();
        methods::list_methods(&conn)
    }

    pub fn page_methods(
        &self,
        query: Option<&str>,
        req: PageRequest,
    ) -> Result<Page<ExecutionMethod>> {
        let conn = self.db.lock().unwrap();
        methods::page_methods(&conn, query, req)
    }

    pub fn update_method(&self, key: &str, patch: &ExecutionMethodPatch) -> Result<ExecutionMethod> {
        let conn = self.db.lock().unwrap();
        methods::update_method(&conn, key, patch)
    }

    pub fn delete_method(&self, key: &str) -> Result<()> {
        let conn = self.db.lock().unwrap();
        methods::delete_method(&conn, key)
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    pub fn create_task(&self, new: &NewTask) -> Result<Task> {
        let conn = self.db.lock().unwrap();
        tasks::create_task(&conn, new)
    }

    /// Look up a task by name; `NotFound` when absent.
    pub fn get_task(&self, task_name: &str) -> Result<Task> {
        let conn = self.db.lock().unwrap();
        debug!(task_name, "catalog lookup");
        tasks::get_task(&conn, task_name)?
            .ok_or_else(|| CatalogError::NotFound(format!("task '{task_name}'")))
    }

    pub fn task_exists(&self, task_name: &str) -> Result<bool> {
        let conn = self.db.lock().unwrap();
        Ok(tasks::get_task(&conn, task_name)?.is_some())
    }

    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        let conn = self.db.lock().unwrap();
        tasks::list_tasks(&conn)
    }

    pub fn page_tasks(&self, query: Option<&str>, req: PageRequest) -> Result<Page<Task>> {
        let conn = self.db.lock().unwrap();
        tasks::page_tasks(&conn, query, req)
    }

    pub fn update_task(&self, task_name: &str, patch: &TaskPatch) -> Result<Task> {
        let conn = self.db.lock().unwrap();
        tasks::update_task(&conn, task_name, patch)
    }

    pub fn cancel_task(&self, task_name: &str, actor: Option<&str>) -> Result<()> {
        let conn = self.db.lock().unwrap();
        tasks::cancel_task(&conn, task_name, actor)
    }

    // ── Parameters ───────────────────────────────────────────────────────────

    pub fn add_parameters(&self, task_name: &str, req: &AddParameters) -> Result<Vec<TaskParameter>> {
        let mut conn = self.db.lock().unwrap();
        params::add_parameters(&mut conn, task_name, req)
    }

    /// Declared parameters of `task_name` in declaration order.
    pub fn list_parameters(&self, task_name: &str) -> Result<Vec<TaskParameter>> {
        let conn = self.db.lock().unwrap();
        params::list_parameters(&conn, task_name)
    }

    pub fn page_parameters(&self, task_name: &str, req: PageRequest) -> Result<Page<TaskParameter>> {
        let conn = self.db.lock().unwrap();
        params::page_parameters(&conn, task_name, req)
    }

    pub fn update_parameter(
        &self,
        task_name: &str,
        param_id: i64,
        patch: &ParameterPatch,
    ) -> Result<TaskParameter> {
        let conn = self.db.lock().unwrap();
        params::update_parameter(&conn, task_name, param_id, patch)
    }

    pub fn delete_parameter(&self, task_name: &str, param_id: i64) -> Result<()> {
        let conn = self.db.lock().unwrap();
        params::delete_parameter(&conn, task_name, param_id)
    }
}
