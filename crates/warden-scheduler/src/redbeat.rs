//! Redis live scheduler in the RedBeat layout.
//!
//! Each entry is a hash at `{prefix}:{name}` with a JSON `definition` field
//! and a JSON `meta` field (run history). Schedules and timestamps carry
//! RedBeat's `__type__` tags (`crontab`, `interval`, `datetime`). Next-fire
//! times are scores in the sorted set `{prefix}::schedule`, so a RedBeat beat
//! process picks entries up without any coordination with warden.
//!
//! RedBeat has no single-shot schedule, so one-shot entries get an `EXPIREAT`
//! shortly after their instant. Once the hash is gone the beat process drops
//! the dangling index member on its next tick, and the pinned crontab never
//! fires again the following year.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{BoxStream, StreamExt};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use crate::error::LiveError;
use crate::live::{score_for, LiveDefinition, LiveEntry, LiveScheduler, RunMetadata};

const SCAN_BATCH: usize = 200;

pub struct RedisLiveScheduler {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisLiveScheduler {
    /// Connect to `url`. The connection manager reconnects on its own.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, LiveError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        let prefix = prefix.into();
        info!(%prefix, "live scheduler connected to redis");
        Ok(Self { conn, prefix })
    }

    fn score(entry: &LiveEntry) -> Result<Option<f64>, LiveError> {
        entry
            .recurrence
            .next_fire_after(Utc::now())
            .map(|next| next.map(score_for))
            .map_err(|e| LiveError::Rejected {
                name: entry.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Write the definition and score; reset run history when `fresh`.
    async fn write(&self, entry: &LiveEntry, fresh: bool) -> Result<(), LiveError> {
        let score = Self::score(entry)?;
        let key = self.key_for(&entry.name);
        let pipe = write_pipeline(&self.index_key(), &key, entry, score, fresh)?;

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        debug!(%key, ?score, fresh, "live entry written");
        Ok(())
    }

    /// Fetch a hash field, rejecting keys that are not hashes.
    async fn hash_field(&self, key: &str, field: &str) -> Result<Option<String>, LiveError> {
        let mut conn = self.conn.clone();
        let kind: String = redis::cmd("TYPE").arg(key).query_async(&mut conn).await?;
        match kind.as_str() {
            "none" => Ok(None),
            "hash" => Ok(conn.hget(key, field).await?),
            other => Err(LiveError::Malformed {
                key: key.to_string(),
                reason: format!("expected a hash, found {other}"),
            }),
        }
    }
}

/// Commands that materialize `entry` at `key`, applied as one transaction.
fn write_pipeline(
    index_key: &str,
    key: &str,
    entry: &LiveEntry,
    score: Option<f64>,
    fresh: bool,
) -> Result<redis::Pipeline, LiveError> {
    let definition = serde_json::to_string(&LiveDefinition::from_entry(entry))?;

    let mut pipe = redis::pipe();
    pipe.atomic().hset(key, "definition", definition).ignore();
    if fresh {
        pipe.hset(key, "meta", RunMetadata::default().to_json())
            .ignore();
    }
    match score {
        Some(score) => pipe.zadd(index_key, key, score).ignore(),
        None => pipe.zrem(index_key, key).ignore(),
    };
    match entry.recurrence.expires_at() {
        Some(at) => pipe.cmd("EXPIREAT").arg(key).arg(at.timestamp()).ignore(),
        None => pipe.cmd("PERSIST").arg(key).ignore(),
    };
    Ok(pipe)
}

#[async_trait]
impl LiveScheduler for RedisLiveScheduler {
    fn key_prefix(&self) -> &str {
        &self.prefix
    }

    async fn create(&self, entry: &LiveEntry) -> Result<(), LiveError> {
        self.write(entry, true).await
    }

    async fn update(&self, entry: &LiveEntry) -> Result<(), LiveError> {
        self.write(entry, false).await
    }

    async fn delete(&self, name: &str) -> Result<(), LiveError> {
        let key = self.key_for(name);
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .zrem(self.index_key(), &key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        debug!(%key, "live entry deleted");
        Ok(())
    }

    async fn next_fire_score(&self, key: &str) -> Result<Option<f64>, LiveError> {
        let mut conn = self.conn.clone();
        Ok(conn.zscore(self.index_key(), key).await?)
    }

    async fn get_definition(&self, key: &str) -> Result<Option<LiveDefinition>, LiveError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        if !exists {
            return Ok(None);
        }
        // A hash without a definition field still counts as an entry.
        let raw = self.hash_field(key, "definition").await?;
        Ok(Some(LiveDefinition::parse_lenient(
            key,
            raw.as_deref().unwrap_or("{}"),
        )))
    }

    async fn get_run_metadata(&self, key: &str) -> Result<Option<RunMetadata>, LiveError> {
        Ok(self
            .hash_field(key, "meta")
            .await?
            .map(|raw| RunMetadata::parse_lenient(&raw)))
    }

    fn enumerate(&self) -> BoxStream<'_, Result<String, LiveError>> {
        let pattern = format!("{}:*", self.prefix);
        let index = self.index_key();
        let mut conn = self.conn.clone();
        async_stream::try_stream! {
            let mut cursor: u64 = 0;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await?;
                for key in keys {
                    if key != index {
                        yield key;
                    }
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::{CronFields, Recurrence};
    use chrono::TimeZone;
    use serde_json::Map;

    const INDEX: &str = "redbeat::schedule";
    const KEY: &str = "redbeat:nightly_1";

    fn packed(pipe: &redis::Pipeline) -> String {
        String::from_utf8_lossy(&pipe.get_packed_pipeline()).into_owned()
    }

    fn entry(recurrence: Recurrence) -> LiveEntry {
        LiveEntry {
            name: "nightly_1".into(),
            task: "executors.run_script".into(),
            recurrence,
            args: vec![],
            kwargs: Map::new(),
        }
    }

    #[test]
    fn one_shot_hash_expires_after_its_instant() {
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let once = entry(Recurrence::Once {
            at,
            cron: CronFields::default(),
        });
        let pipe = write_pipeline(INDEX, KEY, &once, Some(score_for(at)), true).unwrap();
        let cmds = packed(&pipe);
        assert!(cmds.contains("EXPIREAT"));
        let expiry = (at + chrono::Duration::minutes(60)).timestamp().to_string();
        assert!(cmds.contains(&expiry));
        assert!(!cmds.contains("PERSIST"));
    }

    #[test]
    fn recurring_hash_has_its_expiry_cleared() {
        let hourly = entry(Recurrence::Interval { minutes: 60 });
        let pipe = write_pipeline(INDEX, KEY, &hourly, Some(1.0), false).unwrap();
        let cmds = packed(&pipe);
        assert!(cmds.contains("PERSIST"));
        assert!(!cmds.contains("EXPIREAT"));
        assert!(cmds.contains(r#""__type__":"interval""#));
        assert!(!cmds.contains("meta"));
    }
}
