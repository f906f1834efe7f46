use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};

use super::{CounterStore, TTL_MISSING, TTL_PERSISTENT};
use crate::error::{GateError, Result};

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// Writes between sweeps of expired entries
pub const SWEEP_INTERVAL: u64 = 1024;

/// In-process counter store with Redis expiry semantics.
///
/// Only correct for a single process; use [`super::RedisCounterStore`] when
/// several instances share limits. Runs on the tokio clock, so a paused test
/// runtime controls expiry. Expired entries are dropped when read and swept
/// every [`SWEEP_INTERVAL`] writes.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Entry>>,
    writes: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until swept
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Drop every expired entry, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        Self::sweep(&mut entries, Instant::now())
    }

    fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Count a write and sweep once every [`SWEEP_INTERVAL`] writes
    fn note_write(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % SWEEP_INTERVAL == 0 {
            let purged = Self::sweep(entries, now);
            tracing::debug!(purged, remaining = entries.len(), "Swept expired counters");
        }
    }

    /// Live entry for `key`, dropping it first when it has expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut entries = self.entries.lock().await;
        Ok(Self::live(&mut entries, key, Instant::now()).map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: i64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        self.note_write(&mut entries, Instant::now());
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        self.note_write(&mut entries, now);

        if Self::live(&mut entries, key, now).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: 0,
                    expires_at: None,
                },
            );
        }

        let entry = entries
            .get_mut(key)
            .ok_or_else(|| GateError::Store(format!("counter {} vanished", key)))?;
        entry.value = entry
            .value
            .checked_add(1)
            .ok_or_else(|| GateError::Store(format!("counter {} would overflow", key)))?;
        Ok(entry.value)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if Self::live(&mut entries, key, now).is_none() {
            return Ok(false);
        }
        if seconds == 0 {
            entries.remove(key);
            return Ok(true);
        }
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(now + Duration::from_secs(seconds));
        }
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let ttl = match Self::live(&mut entries, key, now) {
            None => TTL_MISSING,
            Some(Entry {
                expires_at: None, ..
            }) => TTL_PERSISTENT,
            Some(Entry {
                expires_at: Some(deadline),
                ..
            }) => {
                // rounded to the nearest second, as Redis reports it
                let remaining_ms = deadline.duration_since(now).as_millis();
                ((remaining_ms + 500) / 1000) as i64
            }
        };
        Ok(ttl)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
