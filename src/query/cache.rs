//! Time-boxed result cache keyed by query fingerprint.

use super::models::{QueryFingerprint, ResultRow};
use crate::config::CacheConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub rows: Vec<ResultRow>,
    pub captured_at: Instant,
    pub captured_at_utc: DateTime<Utc>,
    pub execution_time: Duration,
    pub hit_count: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) > ttl
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub entries: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<QueryFingerprint, CacheEntry>,
    hits: u64,
    misses: u64,
    expirations: u64,
    evictions: u64,
}

#[derive(Debug)]
pub struct ResultCache {
    config: CacheConfig,
    state: RwLock<CacheState>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.ttl_seconds)
    }

    /// Cached rows for `fingerprint`, if present and not expired.
    pub async fn get(&self, fingerprint: &QueryFingerprint) -> Option<Vec<ResultRow>> {
        if !self.config.enabled {
            return None;
        }

        let ttl = self.ttl();
        let now = Instant::now();
        let mut state = self.state.write().await;

        let expired = match state.entries.get_mut(fingerprint) {
            Some(entry) if !entry.is_expired(now, ttl) => {
                entry.hit_count += 1;
                let rows = entry.rows.clone();
                state.hits += 1;
                return Some(rows);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            state.entries.remove(fingerprint);
            state.expirations += 1;
            debug!(fingerprint = %fingerprint, "Cache entry expired");
        }
        state.misses += 1;
        None
    }

    pub async fn put(
        &self,
        fingerprint: QueryFingerprint,
        rows: Vec<ResultRow>,
        execution_time: Duration,
    ) {
        if !self.config.enabled {
            return;
        }

        let mut state = self.state.write().await;
        state.entries.insert(
            fingerprint,
            CacheEntry {
                rows,
                captured_at: Instant::now(),
                captured_at_utc: Utc::now(),
                execution_time,
                hit_count: 0,
            },
        );

        if state.entries.len() > self.config.max_entries {
            let evicted = Self::trim_oldest(&mut state, self.trim_count());
            debug!(evicted, "Cache size guard trimmed oldest entries");
        }
    }

    /// Number of entries dropped when the size guard fires.
    fn trim_count(&self) -> usize {
        ((self.config.max_entries as f64 * self.config.trim_fraction).ceil() as usize).max(1)
    }

    fn trim_oldest(state: &mut CacheState, count: usize) -> usize {
        let mut by_age: Vec<(QueryFingerprint, Instant)> = state
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.captured_at))
            .collect();
        by_age.sort_by_key(|(_, captured_at)| *captured_at);

        let mut evicted = 0;
        for (key, _) in by_age.into_iter().take(count) {
            state.entries.remove(&key);
            evicted += 1;
        }
        state.evictions += evicted as u64;
        evicted
    }

    /// Hit counter of a live entry.
    pub async fn hit_count(&self, fingerprint: &QueryFingerprint) -> Option<u64> {
        let state = self.state.read().await;
        state.entries.get(fingerprint).map(|e| e.hit_count)
    }

    pub async fn purge_expired(&self) -> usize {
        let ttl = self.ttl();
        let now = Instant::now();
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now, ttl));
        let purged = before - state.entries.len();
        state.expirations += purged as u64;
        purged
    }

    /// Drop every entry belonging to one subject.
    pub async fn invalidate_subject(&self, subject_id: i64) -> usize {
        let mut state = self.state.write().await;
        let before = state.entries.len();
        state.entries.retain(|key, _| key.subject_id() != subject_id);
        before - state.entries.len()
    }

    pub async fn clear(&self) {
        self.state.write().await.entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let lookups = state.hits + state.misses;
        CacheStats {
            enabled: self.config.enabled,
            entries: state.entries.len(),
            capacity: self.config.max_entries,
            ttl_seconds: self.config.ttl_seconds,
            hits: state.hits,
            misses: state.misses,
            expirations: state.expirations,
            evictions: state.evictions,
            hit_ratio: if lookups > 0 {
                state.hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }
}
