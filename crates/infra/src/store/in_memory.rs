//! In-memory shared store for tests/dev.
//!
//! Mirrors the Redis semantics the rest of the crate relies on: TTL expiry
//! (evaluated against an injectable [`Clock`]), FIFO lists with a blocking pop
//! that checks lists in order, and integer-scored sorted sets.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use ticketing_core::{Clock, SystemClock};

use super::{SharedStore, StoreError};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, i64>,
    ordered: BTreeSet<(i64, String)>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: i64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(old, member.to_string()));
        }
        self.ordered.insert((score, member.to_string()));
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    values: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
    sets: HashMap<String, SortedSet>,
}

impl State {
    /// Drop `key` if its TTL has lapsed and return the live entry, if any.
    fn live(&mut self, key: &str, now: DateTime<Utc>) -> Option<&Entry> {
        let expired = self.values.get(key).is_some_and(|e| e.expires_at <= now);
        if expired {
            self.values.remove(key);
        }
        self.values.get(key)
    }
}

/// In-memory store. Intended for tests/dev; not optimized for performance.
#[derive(Debug)]
pub struct InMemoryStore {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    pushed: Condvar,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Evaluate TTLs against `clock` instead of the system clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
            pushed: Condvar::new(),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore for InMemoryStore {
    fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Command(format!("ttl out of range: {e}")))?;
        let expires_at = self.clock.now() + ttl;

        let mut state = self.lock()?;
        state.values.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        Ok(state.live(key, now).map(|e| e.value.clone()))
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        Ok(state.live(key, now).is_some())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        let was_live = state.live(key, now).is_some();
        state.values.remove(key);
        Ok(was_live)
    }

    fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        if state.live(key, now).is_some_and(|e| e.value == expected) {
            state.values.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .lists
            .entry(list.to_string())
            .or_default()
            .push_front(value.to_string());
        drop(state);
        self.pushed.notify_all();
        Ok(())
    }

    fn push_head(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(value.to_string());
        drop(state);
        self.pushed.notify_all();
        Ok(())
    }

    fn blocking_pop(
        &self,
        lists: &[&str],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;

        loop {
            for list in lists {
                if let Some(value) = state.lists.get_mut(*list).and_then(VecDeque::pop_back) {
                    return Ok(Some((list.to_string(), value)));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let (guard, _) = self
                .pushed
                .wait_timeout(state, deadline - now)
                .map_err(|_| StoreError::Unavailable("in-memory store lock poisoned".to_string()))?;
            state = guard;
        }
    }

    fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        let state = self.lock()?;
        Ok(state.lists.get(list).map_or(0, VecDeque::len))
    }

    fn list_range(&self, list: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .lists
            .get(list)
            .map(|l| l.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn list_remove(&self, list: &str, value: &str) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let Some(items) = state.lists.get_mut(list) else {
            return Ok(false);
        };
        match items.iter().position(|v| v == value) {
            Some(idx) => {
                items.remove(idx);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_trim(&self, list: &str, keep: usize) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if let Some(items) = state.lists.get_mut(list) {
            items.truncate(keep);
        }
        Ok(())
    }

    fn schedule(&self, set: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member, score);
        Ok(())
    }

    fn unschedule(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        Ok(state.sets.get_mut(set).is_some_and(|s| s.remove(member)))
    }

    fn take_due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>, StoreError> {
        let mut state = self.lock()?;
        let Some(sorted) = state.sets.get_mut(set) else {
            return Ok(Vec::new());
        };

        let due: Vec<String> = sorted
            .ordered
            .iter()
            .take_while(|(score, _)| *score <= max_score)
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect();

        for member in &due {
            sorted.remove(member);
        }
        Ok(due)
    }

    fn scheduled_len(&self, set: &str) -> Result<usize, StoreError> {
        let state = self.lock()?;
        Ok(state.sets.get(set).map_or(0, |s| s.scores.len()))
    }
}
