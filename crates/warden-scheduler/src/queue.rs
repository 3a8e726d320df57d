use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::adhoc::{DispatchJob, ExecutionBackend};
use crate::error::ExecError;

/// Redis list queue: one list per executor at `{queue_prefix}:{executor}`.
///
/// Workers BRPOP their executor's list and consult the `revoked` set before
/// running a job.
pub struct RedisQueueBackend {
    conn: ConnectionManager,
    queue_prefix: String,
    revoked_key: String,
}

impl RedisQueueBackend {
    pub async fn connect(
        url: &str,
        queue_prefix: impl Into<String>,
        revoked_key: impl Into<String>,
    ) -> Result<Self, ExecError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let queue_prefix = queue_prefix.into();
        info!(%queue_prefix, "execution backend connected to redis");
        Ok(Self {
            conn,
            queue_prefix,
            revoked_key: revoked_key.into(),
        })
    }

    fn queue_key(&self, executor: &str) -> String {
        format!("{}:{}", self.queue_prefix, executor)
    }
}

#[async_trait]
impl ExecutionBackend for RedisQueueBackend {
    async fn dispatch(&self, job: &DispatchJob) -> Result<(), ExecError> {
        let payload = serde_json::to_string(job)?;
        let key = self.queue_key(&job.task);
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(&key, payload).await?;
        debug!(%key, id = %job.id, "job enqueued");
        Ok(())
    }

    async fn revoke(&self, tracking_id: &str) -> Result<(), ExecError> {
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(&self.revoked_key, tracking_id).await?;
        Ok(())
    }
}
