use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use crate::error::LiveError;
use crate::live::{score_for, LiveDefinition, LiveEntry, LiveScheduler, RunMetadata};
use crate::recurrence::Recurrence;

#[derive(Debug, Clone)]
struct Slot {
    definition: LiveDefinition,
    recurrence: Option<Recurrence>,
    meta: RunMetadata,
    score: Option<f64>,
}

/// Process-local live scheduler.
///
/// Keeps the same key layout and scoring rules as the Redis store, but
/// nothing fires on its own: [`MemoryLiveScheduler::record_run`] stands in for
/// the external beat loop. State is lost on restart.
pub struct MemoryLiveScheduler {
    prefix: String,
    slots: DashMap<String, Slot>,
}

impl MemoryLiveScheduler {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            slots: DashMap::new(),
        }
    }

    fn score(entry: &LiveEntry, now: DateTime<Utc>) -> Result<Option<f64>, LiveError> {
        entry
            .recurrence
            .next_fire_after(now)
            .map(|next| next.map(score_for))
            .map_err(|e| LiveError::Rejected {
                name: entry.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Record a fire of the entry at `key` at time `at`, as the beat loop
    /// would: bump the run count, stamp `last_run_at` and advance the score.
    /// One-shot entries are removed instead of rescheduled.
    pub fn record_run(&self, key: &str, at: DateTime<Utc>) -> bool {
        let one_shot = match self.slots.get_mut(key) {
            None => return false,
            Some(mut slot) => {
                slot.meta.total_run_count += 1;
                slot.meta.last_run_at = Some(at);
                slot.score = slot
                    .recurrence
                    .as_ref()
                    .and_then(|r| r.next_fire_after(at).ok().flatten())
                    .map(score_for);
                slot.recurrence.as_ref().is_some_and(Recurrence::is_one_shot)
            }
        };
        if one_shot {
            self.slots.remove(key);
        }
        true
    }

    /// Overwrite the next-fire score of an entry.
    #[cfg(test)]
    pub(crate) fn set_score(&self, key: &str, score: Option<f64>) {
        if let Some(mut slot) = self.slots.get_mut(key) {
            slot.score = score;
        }
    }

    /// Store a definition written by some other producer (no recurrence).
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, key: &str, definition: LiveDefinition, score: Option<f64>) {
        self.slots.insert(
            key.to_string(),
            Slot {
                definition,
                recurrence: None,
                meta: RunMetadata::default(),
                score,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(&self.key_for(name))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl LiveScheduler for MemoryLiveScheduler {
    fn key_prefix(&self) -> &str {
        &self.prefix
    }

    async fn create(&self, entry: &LiveEntry) -> Result<(), LiveError> {
        let score = Self::score(entry, Utc::now())?;
        let key = self.key_for(&entry.name);
        debug!(%key, ?score, "memory live create");
        self.slots.insert(
            key,
            Slot {
                definition: LiveDefinition::from_entry(entry),
                recurrence: Some(entry.recurrence.clone()),
                meta: RunMetadata::default(),
                score,
            },
        );
        Ok(())
    }

    async fn update(&self, entry: &LiveEntry) -> Result<(), LiveError> {
        let score = Self::score(entry, Utc::now())?;
        let key = self.key_for(&entry.name);
        let meta = self
            .slots
            .get(&key)
            .map(|s| s.meta.clone())
            .unwrap_or_default();
        self.slots.insert(
            key,
            Slot {
                definition: LiveDefinition::from_entry(entry),
                recurrence: Some(entry.recurrence.clone()),
                meta,
                score,
            },
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), LiveError> {
        self.slots.remove(&self.key_for(name));
        Ok(())
    }

    async fn next_fire_score(&self, key: &str) -> Result<Option<f64>, LiveError> {
        Ok(self.slots.get(key).and_then(|s| s.score))
    }

    async fn get_definition(&self, key: &str) -> Result<Option<LiveDefinition>, LiveError> {
        Ok(self.slots.get(key).map(|s| s.definition.clone()))
    }

    async fn get_run_metadata(&self, key: &str) -> Result<Option<RunMetadata>, LiveError> {
        Ok(self.slots.get(key).map(|s| s.meta.clone()))
    }

    fn enumerate(&self) -> BoxStream<'_, Result<String, LiveError>> {
        let index = self.index_key();
        let mut keys: Vec<String> = self
            .slots
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| *k != index)
            .collect();
        keys.sort();
        stream::iter(keys.into_iter().map(Ok)).boxed()
    }
}
