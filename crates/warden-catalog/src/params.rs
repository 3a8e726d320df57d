use chrono::Utc;
use rusqlite::{params, Connection};
use warden_core::types::{Page, PageRequest};

use crate::db::{row_to_param, PARAM_SELECT_SQL};
use crate::error::{is_unique_violation, CatalogError, Result};
use crate::tasks::get_task;
use crate::types::{required, AddParameters, ParameterPatch, TaskParameter};

/// Declare one or more parameters on a task in a single transaction.
///
/// Either every parameter is inserted or none are.
pub fn add_parameters(
    conn: &mut Connection,
    task_name: &str,
    req: &AddParameters,
) -> Result<Vec<TaskParameter>> {
    let task = get_task(conn, task_name)?
        .ok_or_else(|| CatalogError::NotFound(format!("task '{task_name}'")))?;
    if task.cancelled {
        return Err(CatalogError::Cancelled(task_name.to_string()));
    }
    if req.parameters.is_empty() {
        return Err(CatalogError::Invalid("no parameters provided".to_string()));
    }

    // Validate the whole batch before touching the table.
    let mut validated = Vec::with_capacity(req.parameters.len());
    for p in &req.parameters {
        let name = required(&p.parameter_name, "parameter_name")?;
        let data_type = required(&p.data_type, "data_type")?;
        validated.push((name.to_string(), data_type.to_string(), p.description.clone()));
    }

    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    let mut created = Vec::with_capacity(validated.len());
    for (name, data_type, description) in validated {
        tx.execute(
            "INSERT INTO task_params
                (task_name, parameter_name, data_type, description,
                 created_by, last_updated_by, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,NULL,?6,?6)",
            params![task_name, name, data_type, description, req.created_by, now],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                CatalogError::AlreadyExists(format!(
                    "parameter '{name}' on task '{task_name}'"
                ))
            } else {
                CatalogError::Database(e)
            }
        })?;
        created.push(TaskParameter {
            param_id: tx.last_insert_rowid(),
            task_name: task_name.to_string(),
            parameter_name: name,
            data_type,
            description,
            created_by: req.created_by.clone(),
            last_updated_by: None,
            created_at: now.clone(),
            updated_at: now.clone(),
        });
    }
    tx.commit()?;
    Ok(created)
}

/// Parameters of a task in declaration order.
pub fn list_parameters(conn: &Connection, task_name: &str) -> Result<Vec<TaskParameter>> {
    let sql = format!("{PARAM_SELECT_SQL} WHERE task_name = ?1 ORDER BY param_id");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![task_name], row_to_param)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Newest-first page of a task's parameters.
pub fn page_parameters(
    conn: &Connection,
    task_name: &str,
    req: PageRequest,
) -> Result<Page<TaskParameter>> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM task_params WHERE task_name = ?1",
        params![task_name],
        |row| row.get(0),
    )?;
    let sql = format!(
        "{PARAM_SELECT_SQL} WHERE task_name = ?1 ORDER BY param_id DESC LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(params![task_name, req.limit(), req.offset()], row_to_param)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Page::new(items, total as u64, req))
}

fn get_parameter(conn: &Connection, task_name: &str, param_id: i64) -> Result<TaskParameter> {
    let sql = format!("{PARAM_SELECT_SQL} WHERE task_name = ?1 AND param_id = ?2");
    match conn.query_row(&sql, params![task_name, param_id], row_to_param) {
        Ok(p) => Ok(p),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(CatalogError::NotFound(format!(
            "parameter {param_id} on task '{task_name}'"
        ))),
        Err(e) => Err(CatalogError::Database(e)),
    }
}

/// Apply the present fields of `patch` to one parameter.
pub fn update_parameter(
    conn: &Connection,
    task_name: &str,
    param_id: i64,
    patch: &ParameterPatch,
) -> Result<TaskParameter> {
    let mut param = get_parameter(conn, task_name, param_id)?;

    if let Some(ref v) = patch.parameter_name {
        if v.trim().is_empty() {
            return Err(CatalogError::Invalid("parameter_name cannot be empty".to_string()));
        }
        param.parameter_name = v.trim().to_string();
    }
    if let Some(ref v) = patch.data_type {
        if v.trim().is_empty() {
            return Err(CatalogError::Invalid("data_type cannot be empty".to_string()));
        }
        param.data_type = v.trim().to_string();
    }
    if let Some(ref v) = patch.description {
        param.description = Some(v.clone());
    }
    param.last_updated_by = patch.last_updated_by.clone().or(param.last_updated_by);
    param.updated_at = Utc::now().to_rfc3339();

    conn.execute(
        "UPDATE task_params
         SET parameter_name=?3, data_type=?4, description=?5, last_updated_by=?6, updated_at=?7
         WHERE task_name=?1 AND param_id=?2",
        params![
            task_name,
            param_id,
            param.parameter_name,
            param.data_type,
            param.description,
            param.last_updated_by,
            param.updated_at,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CatalogError::AlreadyExists(format!(
                "parameter '{}' on task '{task_name}'",
                param.parameter_name
            ))
        } else {
            CatalogError::Database(e)
        }
    })?;
    Ok(param)
}

pub fn delete_parameter(conn: &Connection, task_name: &str, param_id: i64) -> Result<()> {
    let n = conn.execute(
        "DELETE FROM task_params WHERE task_name = ?1 AND param_id = ?2",
        params![task_name, param_id],
    )?;
    if n == 0 {
        return Err(CatalogError::NotFound(format!(
            "parameter {param_id} on task '{task_name}'"
        )));
    }
    Ok(())
}
