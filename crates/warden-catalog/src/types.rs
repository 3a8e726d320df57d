use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

/// How a task executor is dispatched. Keyed by `internal_execution_method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMethod {
    pub internal_execution_method: String,
    /// Human-facing label.
    pub execution_method: String,
    /// Backing executor (the queue-side task identifier).
    pub executor: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub last_updated_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Payload for creating an execution method. Fields are optional so a missing
/// value becomes a 400 with a readable message rather than a body rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewExecutionMethod {
    pub execution_method: Option<String>,
    pub internal_execution_method: Option<String>,
    pub executor: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionMethodPatch {
    pub execution_method: Option<String>,
    pub executor: Option<String>,
    pub description: Option<String>,
    pub last_updated_by: Option<String>,
}

/// A schedulable task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique, stable identifier referenced by parameters and schedules.
    pub task_name: String,
    pub user_task_name: String,
    pub execution_method: Option<String>,
    pub internal_execution_method: Option<String>,
    pub executor: String,
    pub script_name: Option<String>,
    pub script_path: Option<String>,
    pub description: Option<String>,
    /// Cancelled tasks keep their schedules but cannot be scheduled again.
    pub cancelled: bool,
    pub created_by: Option<String>,
    pub last_updated_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub task_name: Option<String>,
    pub user_task_name: Option<String>,
    pub execution_method: Option<String>,
    pub internal_execution_method: Option<String>,
    /// May be omitted when the referenced execution method names an executor.
    pub executor: Option<String>,
    pub script_name: Option<String>,
    pub script_path: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<String>,
}

/// Only the fields present are applied; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub user_task_name: Option<String>,
    pub execution_method: Option<String>,
    pub internal_execution_method: Option<String>,
    pub executor: Option<String>,
    pub script_name: Option<String>,
    pub script_path: Option<String>,
    pub description: Option<String>,
    pub last_updated_by: Option<String>,
}

/// A parameter a task declares. Every schedule of the task must supply it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskParameter {
    pub param_id: i64,
    pub task_name: String,
    pub parameter_name: String,
    pub data_type: String,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub last_updated_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewParameter {
    pub parameter_name: Option<String>,
    pub data_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddParameters {
    #[serde(default)]
    pub parameters: Vec<NewParameter>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParameterPatch {
    pub parameter_name: Option<String>,
    pub data_type: Option<String>,
    pub description: Option<String>,
    pub last_updated_by: Option<String>,
}

/// Return the trimmed value of a required field, or an `Invalid` error naming it.
pub(crate) fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(CatalogError::Invalid(format!("missing required field: {field}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_rejects_blank_and_absent() {
        assert!(required(&None, "task_name").is_err());
        assert!(required(&Some("   ".to_string()), "task_name").is_err());
        assert_eq!(required(&Some(" t1 ".to_string()), "task_name").unwrap(), "t1");
    }

    #[test]
    fn patch_deserializes_with_absent_fields() {
        let patch: TaskPatch = serde_json::from_str(r#"{"description":"nightly"}"#).unwrap();
        assert_eq!(patch.description.as_deref(), Some("nightly"));
        assert!(patch.script_name.is_none());
    }
}
