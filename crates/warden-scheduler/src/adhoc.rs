//! Immediate (non-recurring) dispatch.
//!
//! Ad-hoc runs never touch the live scheduler: the job goes straight to an
//! [`ExecutionBackend`] and an audit row is written to `task_requests`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{ExecError, Result, SchedulerError};
use crate::requests::RequestStore;
use crate::types::{RequestStatus, TaskRequest};

/// One job handed to an execution backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchJob {
    /// Tracking id, assigned before dispatch.
    pub id: String,
    /// Executor the worker should run.
    pub task: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub submitted_at: String,
}

/// The queue that actually runs tasks.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Enqueue `job` for immediate execution.
    async fn dispatch(&self, job: &DispatchJob) -> std::result::Result<(), ExecError>;

    /// Ask workers to drop or terminate the job with `tracking_id`.
    async fn revoke(&self, tracking_id: &str) -> std::result::Result<(), ExecError>;
}

/// In-process backend that records jobs instead of running them.
#[derive(Default)]
pub struct MemoryExecutionBackend {
    queued: Mutex<Vec<DispatchJob>>,
    revoked: Mutex<HashSet<String>>,
}

impl MemoryExecutionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queued(&self) -> Vec<DispatchJob> {
        self.queued.lock().unwrap().clone()
    }

    pub fn is_revoked(&self, tracking_id: &str) -> bool {
        self.revoked.lock().unwrap().contains(tracking_id)
    }
}

#[async_trait]
impl ExecutionBackend for MemoryExecutionBackend {
    async fn dispatch(&self, job: &DispatchJob) -> std::result::Result<(), ExecError> {
        self.queued.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn revoke(&self, tracking_id: &str) -> std::result::Result<(), ExecError> {
        self.revoked.lock().unwrap().insert(tracking_id.to_string());
        Ok(())
    }
}

/// Input for [`AdHocExecutor::execute`].
#[derive(Debug, Clone)]
pub struct AdHocRequest {
    pub task_name: String,
    pub user_schedule_name: String,
    pub executor: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub created_by: Option<String>,
}

/// Dispatches immediate runs and keeps their audit trail.
pub struct AdHocExecutor {
    backend: Arc<dyn ExecutionBackend>,
    requests: Arc<RequestStore>,
}

impl AdHocExecutor {
    pub fn new(backend: Arc<dyn ExecutionBackend>, requests: Arc<RequestStore>) -> Self {
        Self { backend, requests }
    }

    pub fn requests(&self) -> &RequestStore {
        &self.requests
    }

    /// Dispatch now and record the submission. Backend failures surface as
    /// `Execution` errors and leave no audit row.
    #[instrument(skip(self, req), fields(task_name = %req.task_name))]
    pub async fn execute(&self, req: AdHocRequest) -> Result<TaskRequest> {
        let now = Utc::now().to_rfc3339();
        let job = DispatchJob {
            id: Uuid::new_v4().to_string(),
            task: req.executor.clone(),
            args: req.args.clone(),
            kwargs: req.kwargs.clone(),
            submitted_at: now.clone(),
        };
        self.backend.dispatch(&job).await?;

        let record = TaskRequest {
            request_id: job.id,
            task_name: req.task_name,
            user_schedule_name: req.user_schedule_name,
            executor: req.executor,
            args: req.args,
            kwargs: req.kwargs,
            status: RequestStatus::Submitted,
            created_by: req.created_by,
            last_updated_by: None,
            created_at: now.clone(),
            updated_at: now,
        };
        if let Err(e) = self.requests.insert(&record) {
            warn!(request_id = %record.request_id, "dispatched but audit insert failed: {e}");
            return Err(e);
        }
        info!(request_id = %record.request_id, executor = %record.executor, "ad-hoc task dispatched");
        Ok(record)
    }

    /// Flag the request cancelled, then revoke it on the backend.
    ///
    /// The flag is committed first and stays set when revoke fails; that case
    /// is reported as `RevokeFailed`.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        task_name: &str,
        request_id: &str,
        actor: Option<&str>,
    ) -> Result<TaskRequest> {
        let mut record = self.requests.find(task_name, request_id)?.ok_or_else(|| {
            SchedulerError::NotFound(format!(
                "ad-hoc request '{request_id}' for task '{task_name}'"
            ))
        })?;
        self.requests
            .set_status(request_id, RequestStatus::Cancelled, actor)?;
        record.status = RequestStatus::Cancelled;

        if let Err(source) = self.backend.revoke(request_id).await {
            warn!(%request_id, "request cancelled but revoke failed: {source}");
            return Err(SchedulerError::RevokeFailed {
                request_id: request_id.to_string(),
                source,
            });
        }
        info!(%request_id, "ad-hoc task cancelled and revoked");
        Ok(record)
    }
}
