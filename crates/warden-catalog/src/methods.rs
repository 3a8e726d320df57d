use chrono::Utc;
use rusqlite::{params, Connection};
use warden_core::types::{search_patterns, Page, PageRequest};

use crate::db::{row_to_method, METHOD_SELECT_SQL};
use crate::error::{is_unique_violation, CatalogError, Result};
use crate::types::{required, ExecutionMethod, ExecutionMethodPatch, NewExecutionMethod};

/// Insert a new execution method. The internal key must be unused.
pub fn create_method(conn: &Connection, new: &NewExecutionMethod) -> Result<ExecutionMethod> {
    let label = required(&new.execution_method, "execution_method")?;
    let key = required(&new.internal_execution_method, "internal_execution_method")?;

    if get_method(conn, key)?.is_some() {
        return Err(CatalogError::AlreadyExists(format!(
            "execution method '{key}'"
        )));
    }

    let now = Utc::now().to_rfc3339();
    let method = ExecutionMethod {
        internal_execution_method: key.to_string(),
        execution_method: label.to_string(),
        executor: new.executor.clone(),
        description: new.description.clone(),
        created_by: new.created_by.clone(),
        last_updated_by: None,
        created_at: now.clone(),
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO execution_methods
            (internal_execution_method, execution_method, executor, description,
             created_by, last_updated_by, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        params![
            method.internal_execution_method,
            method.execution_method,
            method.executor,
            method.description,
            method.created_by,
            method.last_updated_by,
            method.created_at,
            method.updated_at,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            CatalogError::AlreadyExists(format!("execution method '{key}'"))
        } else {
            CatalogError::Database(e)
        }
    })?;
    Ok(method)
}

/// Load a method by its internal key. Returns None when absent.
pub fn get_method(conn: &Connection, key: &str) -> Result<Option<ExecutionMethod>> {
    let sql = format!("{METHOD_SELECT_SQL} WHERE internal_execution_method = ?1");
    match conn.query_row(&sql, params![key], row_to_method) {
        Ok(m) => Ok(Some(m)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(CatalogError::Database(e)),
    }
}

/// All methods, ordered by internal key descending.
pub fn list_methods(conn: &Connection) -> Result<Vec<ExecutionMethod>> {
    let sql = format!("{METHOD_SELECT_SQL} ORDER BY internal_execution_method DESC");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], row_to_method)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Newest-first page of methods, optionally filtered by a search term on the key.
pub fn page_methods(
    conn: &Connection,
    query: Option<&str>,
    req: PageRequest,
) -> Result<Page<ExecutionMethod>> {
    let [p1, p2, p3] = search_patterns(query.unwrap_or(""));
    let filter = "(?1 = '' OR internal_execution_method LIKE ?2
                   OR internal_execution_method LIKE ?3 OR internal_execution_method LIKE ?4)";
    let term = query.unwrap_or("").trim().to_string();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM execution_methods WHERE {filter}"),
        params![term, p1, p2, p3],
        |row| row.get(0),
    )?;

    let sql = format!(
        "{METHOD_SELECT_SQL} WHERE {filter} ORDER BY created_at DESC LIMIT ?5 OFFSET ?6"
    );
    let mut stmt = conn.prepare(&sql)?;
    let items = stmt
        .query_map(
            params![term, p1, p2, p3, req.limit(), req.offset()],
            row_to_method,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(Page::new(items, total as u64, req))
}

/// Apply the present fields of `patch`. Returns the updated row.
pub fn update_method(
    conn: &Connection,
    key: &str,
    patch: &ExecutionMethodPatch,
) -> Result<ExecutionMethod> {
    let mut method = get_method(conn, key)?
        .ok_or_else(|| CatalogError::NotFound(format!("execution method '{key}'")))?;

    if let Some(ref v) = patch.execution_method {
        method.execution_method = v.clone();
    }
    if let Some(ref v) = patch.executor {
        method.executor = Some(v.clone());
    }
    if let Some(ref v) = patch.description {
        method.description = Some(v.clone());
    }
    method.last_updated_by = patch.last_updated_by.clone().or(method.last_updated_by);
    method.updated_at = Utc::now().to_rfc3339();

    conn.execute(
        "UPDATE execution_methods
         SET execution_method=?2, executor=?3, description=?4, last_updated_by=?5, updated_at=?6
         WHERE internal_execution_method=?1",
        params![
            method.internal_execution_method,
            method.execution_method,
            method.executor,
            method.description,
            method.last_updated_by,
            method.updated_at,
        ],
    )?;
    Ok(method)
}

pub fn delete_method(conn: &Connection, key: &str) -> Result<()> {
    let n = conn.execute(
        "DELETE FROM execution_methods WHERE internal_execution_method = ?1",
        params![key],
    )?;
    if n == 0 {
        return Err(CatalogError::NotFound(format!("execution method '{key}'")));
    }
    Ok(())
}
