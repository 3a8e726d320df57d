use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_core::DisplayTime;

use crate::error::SchedulerError;

/// User-schedule label used when a request does not provide one.
pub const DEFAULT_USER_SCHEDULE_NAME: &str = "Immediate";

/// The five user-facing schedule shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    WeeklySpecificDays,
    MonthlySpecificDates,
    Once,
    Periodic,
    Immediate,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::WeeklySpecificDays => "WEEKLY_SPECIFIC_DAYS",
            ScheduleType::MonthlySpecificDates => "MONTHLY_SPECIFIC_DATES",
            ScheduleType::Once => "ONCE",
            ScheduleType::Periodic => "PERIODIC",
            ScheduleType::Immediate => "IMMEDIATE",
        }
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "WEEKLY_SPECIFIC_DAYS" => Ok(ScheduleType::WeeklySpecificDays),
            "MONTHLY_SPECIFIC_DATES" => Ok(ScheduleType::MonthlySpecificDates),
            "ONCE" => Ok(ScheduleType::Once),
            "PERIODIC" => Ok(ScheduleType::Periodic),
            "IMMEDIATE" => Ok(ScheduleType::Immediate),
            other => Err(SchedulerError::Validation(format!(
                "invalid schedule type: {other}"
            ))),
        }
    }
}

/// Incoming create payload. Loosely typed on purpose: every field is checked
/// by the engine so bad input becomes a `Validation` error, not a body rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleRequest {
    pub user_schedule_name: Option<String>,
    pub task_name: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub schedule_type: Option<String>,
    /// Type-specific data (`VALUES`, `FREQUENCY_TYPE`, `FREQUENCY`).
    #[serde(default)]
    pub schedule: Value,
    pub created_by: Option<String>,
}

/// Partial update of a schedule. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulePatch {
    pub parameters: Option<Map<String, Value>>,
    pub schedule_type: Option<String>,
    pub schedule: Option<Value>,
    pub last_updated_by: Option<String>,
}

/// Durable record of one recurring or one-off schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub schedule_id: String,
    pub user_schedule_name: String,
    /// Name of the live entry. `None` only for immediate dispatches.
    pub live_schedule_name: Option<String>,
    pub task_name: String,
    /// Positional arguments handed to the executor.
    pub args: Vec<Value>,
    /// Declared parameter values, keyed by parameter name.
    pub kwargs: Map<String, Value>,
    pub schedule_type: ScheduleType,
    /// The original type-specific data, kept so the entry can be rebuilt.
    pub schedule_data: Value,
    pub cancelled: bool,
    pub created_by: Option<String>,
    pub last_updated_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Lifecycle of an ad-hoc request audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Submitted,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Submitted => "SUBMITTED",
            RequestStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(RequestStatus::Submitted),
            "CANCELLED" => Ok(RequestStatus::Cancelled),
            other => Err(format!("unknown request status: {other}")),
        }
    }
}

/// Audit row written for every immediate dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Tracking id returned by the execution backend.
    pub request_id: String,
    pub task_name: String,
    pub user_schedule_name: String,
    pub executor: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub status: RequestStatus,
    pub created_by: Option<String>,
    pub last_updated_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Result of a create call: either a live schedule or an immediate dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreateOutcome {
    Scheduled {
        schedule_id: String,
        live_schedule_name: String,
    },
    Dispatched(TaskRequest),
}

// ── Live status ───────────────────────────────────────────────────────────────

/// Recurrence shape as recorded in a live entry's definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleShape {
    Interval,
    Crontab,
    Unknown,
    Immediate,
}

/// Derived status of a live entry relative to wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Next fire time is in the future.
    Active,
    /// Next fire time has passed without being advanced.
    Expired,
    /// No next fire time is recorded.
    Inactive,
    /// A score exists but cannot be read as a timestamp.
    Unknown,
}

/// Observable state of one live entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveScheduleStatus {
    pub task_key: String,
    pub task_name: String,
    pub schedule_type: ScheduleShape,
    pub schedule_status: ScheduleStatus,
    pub schedule_details: Value,
    pub next_run: Option<DisplayTime>,
    pub last_run: Option<DisplayTime>,
    pub total_run_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveScheduleList {
    pub total_tasks: usize,
    pub tasks: Vec<LiveScheduleStatus>,
}

/// Agreement between the durable record and the live store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    InSync,
    /// Active in the store but no live entry exists.
    MissingLive,
    /// Cancelled in the store but the live entry still exists.
    LingeringLive,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleView {
    pub schedule: Schedule,
    pub live: Option<LiveScheduleStatus>,
    pub consistency: Consistency,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_type_parses_known_tags_only() {
        assert_eq!(
            "PERIODIC".parse::<ScheduleType>().unwrap(),
            ScheduleType::Periodic
        );
        assert_eq!(
            " WEEKLY_SPECIFIC_DAYS ".parse::<ScheduleType>().unwrap(),
            ScheduleType::WeeklySpecificDays
        );
        let err = "HOURLY".parse::<ScheduleType>().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn schedule_type_serializes_as_wire_tag() {
        let json = serde_json::to_string(&ScheduleType::MonthlySpecificDates).unwrap();
        assert_eq!(json, "\"MONTHLY_SPECIFIC_DATES\"");
        assert_eq!(ScheduleType::Once.to_string(), "ONCE");
    }

    #[test]
    fn request_defaults_missing_collections() {
        let req: ScheduleRequest =
            serde_json::from_str(r#"{"task_name":"t1","schedule_type":"IMMEDIATE"}"#).unwrap();
        assert!(req.parameters.is_empty());
        assert!(req.schedule.is_null());
        assert!(req.user_schedule_name.is_none());
    }
}
