//! Last-known-good content per source instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::{StateDir, StateError, StateKind};
use crate::{ContentUnit, UtcDateTime};

/// Content captured from the latest successful fetch of one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source_id: String,
    pub content: ContentUnit,
    pub captured_at: UtcDateTime,
}

impl CacheEntry {
    pub fn new(source_id: impl Into<String>, content: ContentUnit) -> Self {
        Self {
            source_id: source_id.into(),
            content,
            captured_at: UtcDateTime::now(),
        }
    }

    pub fn captured_at(mut self, captured_at: UtcDateTime) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn age_at(&self, now: UtcDateTime) -> Duration {
        now.duration_since(self.captured_at)
    }

    pub fn is_fresh_at(&self, max_age: Duration, now: UtcDateTime) -> bool {
        self.age_at(now) <= max_age
    }
}

/// Fallback cache keyed by source instance id.
///
/// Entries are never expired proactively; readers filter by age. With a
/// state directory configured, entries are also written to disk so a later
/// process can fall back to them.
#[derive(Debug, Clone, Default)]
pub struct FallbackCache {
    entries: Arc<tokio::sync::RwLock<HashMap<String, CacheEntry>>>,
    state_dir: Option<StateDir>,
}

impl FallbackCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn persistent(state_dir: StateDir) -> Self {
        Self {
            entries: Arc::default(),
            state_dir: Some(state_dir),
        }
    }

    /// Latest entry for `source_id`, regardless of age.
    pub async fn get(&self, source_id: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.entries.read().await.get(source_id) {
            return Some(entry.clone());
        }

        let state_dir = self.state_dir.as_ref()?;
        let loaded = match state_dir
            .read::<CacheEntry>(StateKind::Cache, source_id)
            .await
        {
            Ok(loaded) => loaded?,
            Err(error) => {
                tracing::warn!(source_id, error = %error, "ignoring unreadable cache entry");
                return None;
            }
        };

        let mut entries = self.entries.write().await;
        Some(
            entries
                .entry(source_id.to_owned())
                .or_insert(loaded)
                .clone(),
        )
    }

    /// Latest entry for `source_id` if it is no older than `max_age`.
    pub async fn get_fresh(&self, source_id: &str, max_age: Duration) -> Option<CacheEntry> {
        let entry = self.get(source_id).await?;
        let age = entry.age_at(UtcDateTime::now());
        if age <= max_age {
            Some(entry)
        } else {
            tracing::debug!(
                source_id,
                age_seconds = age.as_secs(),
                max_age_seconds = max_age.as_secs(),
                "cached content too old for fallback"
            );
            None
        }
    }

    /// Writes or overwrites the entry for its source id.
    ///
    /// The in-memory entry is always updated; the returned error only
    /// reports a failed disk write.
    pub async fn put(&self, entry: CacheEntry) -> Result<(), StateError> {
        let source_id = entry.source_id.clone();
        if let Some(state_dir) = &self.state_dir {
            let written = state_dir.write(StateKind::Cache, &source_id, &entry).await;
            self.entries.write().await.insert(source_id, entry);
            written
        } else {
            self.entries.write().await.insert(source_id, entry);
            Ok(())
        }
    }

    /// Number of entries held in memory.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(value: u64) -> Duration {
        Duration::from_secs(value * 3600)
    }

    #[tokio::test]
    async fn put_overwrites_previous_entry() {
        let cache = FallbackCache::in_memory();

        cache
            .put(CacheEntry::new("stock", ContentUnit::from_lines(["AAPL $180"])))
            .await
            .expect("put");
        cache
            .put(CacheEntry::new("stock", ContentUnit::from_lines(["AAPL $181"])))
            .await
            .expect("put");

        let entry = cache.get("stock").await.expect("entry present");
        assert_eq!(entry.content.lines, vec![String::from("AAPL $181")]);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn fresh_read_filters_by_age() {
        let cache = FallbackCache::in_memory();
        let now = UtcDateTime::now();

        cache
            .put(
                CacheEntry::new("weather_home", ContentUnit::from_lines(["54°F"]))
                    .captured_at(now.saturating_sub(hours(2))),
            )
            .await
            .expect("put");
        cache
            .put(
                CacheEntry::new("weather_cabin", ContentUnit::from_lines(["41°F"]))
                    .captured_at(now.saturating_sub(hours(30))),
            )
            .await
            .expect("put");

        assert!(cache.get_fresh("weather_home", hours(24)).await.is_some());
        assert!(cache.get_fresh("weather_cabin", hours(24)).await.is_none());
        assert!(cache.get("weather_cabin").await.is_some());
    }

    #[tokio::test]
    async fn persistent_cache_survives_new_instance() {
        let dir = tempfile::tempdir().expect("tempdir");
        let content = ContentUnit::from_lines(["Battery: 81%"]).with_layout("centered");

        let cache = FallbackCache::persistent(StateDir::new(dir.path()));
        cache
            .put(CacheEntry::new("tesla", content.clone()))
            .await
            .expect("put");

        let reloaded = FallbackCache::persistent(StateDir::new(dir.path()));
        let entry = reloaded.get("tesla").await.expect("loaded from disk");
        assert_eq!(entry.content, content);
        assert!(reloaded.get("ferry").await.is_none());
    }
}
