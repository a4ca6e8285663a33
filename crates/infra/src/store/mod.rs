//! Shared key-value/list substrate behind OTPs and the job queue.
//!
//! The notification subsystem never holds authoritative state in process: codes,
//! queued jobs, claims and results all live in a [`SharedStore`]. Each method is
//! one atomic store operation; callers compose them without transactions.
//!
//! Lists follow Redis semantics: [`SharedStore::push`] adds at the tail of the
//! queue and [`SharedStore::blocking_pop`] takes from the head, so each list is
//! FIFO. Sorted sets hold members scored by an integer (milliseconds since the
//! epoch for everything in this crate).

use std::sync::Arc;
use std::time::Duration;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;
#[cfg(test)]
pub(crate) mod test_support;

pub use in_memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),
    #[error("store command error: {0}")]
    Command(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Store abstraction injected into every component that needs shared state.
pub trait SharedStore: Send + Sync {
    /// Check that the store answers.
    fn ping(&self) -> Result<(), StoreError>;

    /// Write `value` under `key`, replacing any previous value, expiring after `ttl`.
    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Read a live value.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete a key. Returns whether a live value was removed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete `key` only while it still holds `expected`, atomically.
    fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Append to the tail of a list (LPUSH).
    fn push(&self, list: &str, value: &str) -> Result<(), StoreError>;

    /// Put a value back at the head of a list so it is popped next (RPUSH).
    fn push_head(&self, list: &str, value: &str) -> Result<(), StoreError>;

    /// Pop from the first non-empty list, checking `lists` in order (BRPOP).
    ///
    /// Blocks up to `timeout` when all lists are empty and then returns
    /// `Ok(None)`. On success returns `(list, value)`.
    fn blocking_pop(
        &self,
        lists: &[&str],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError>;

    fn list_len(&self, list: &str) -> Result<usize, StoreError>;

    /// Up to `limit` values, most recently pushed first.
    fn list_range(&self, list: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Remove one occurrence of `value`. Returns whether it was present.
    fn list_remove(&self, list: &str, value: &str) -> Result<bool, StoreError>;

    /// Keep only the `keep` most recently pushed values (LTRIM).
    fn list_trim(&self, list: &str, keep: usize) -> Result<(), StoreError>;

    /// Add (or re-score) a member of a sorted set (ZADD).
    fn schedule(&self, set: &str, member: &str, score: i64) -> Result<(), StoreError>;

    /// Remove a member of a sorted set. Returns whether it was present.
    fn unschedule(&self, set: &str, member: &str) -> Result<bool, StoreError>;

    /// Atomically remove and return up to `limit` members with score `<= max_score`,
    /// lowest score first.
    fn take_due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>, StoreError>;

    fn scheduled_len(&self, set: &str) -> Result<usize, StoreError>;
}

impl<S: SharedStore + ?Sized> SharedStore for Arc<S> {
    fn ping(&self) -> Result<(), StoreError> {
        (**self).ping()
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        (**self).set_with_ttl(key, value, ttl)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        (**self).exists(key)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        (**self).delete(key)
    }

    fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        (**self).delete_if_eq(key, expected)
    }

    fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        (**self).push(list, value)
    }

    fn push_head(&self, list: &str, value: &str) -> Result<(), StoreError> {
        (**self).push_head(list, value)
    }

    fn blocking_pop(
        &self,
        lists: &[&str],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        (**self).blocking_pop(lists, timeout)
    }

    fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        (**self).list_len(list)
    }

    fn list_range(&self, list: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        (**self).list_range(list, limit)
    }

    fn list_remove(&self, list: &str, value: &str) -> Result<bool, StoreError> {
        (**self).list_remove(list, value)
    }

    fn list_trim(&self, list: &str, keep: usize) -> Result<(), StoreError> {
        (**self).list_trim(list, keep)
    }

    fn schedule(&self, set: &str, member: &str, score: i64) -> Result<(), StoreError> {
        (**self).schedule(set, member, score)
    }

    fn unschedule(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        (**self).unschedule(set, member)
    }

    fn take_due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>, StoreError> {
        (**self).take_due(set, max_score, limit)
    }

    fn scheduled_len(&self, set: &str) -> Result<usize, StoreError> {
        (**self).scheduled_len(set)
    }
}
