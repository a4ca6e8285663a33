//! In-memory store with hooks for interleaving and fault tests.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::{InMemoryStore, SharedStore, StoreError};

type Hook = Box<dyn Fn(&InMemoryStore) + Send + Sync>;

#[derive(Default)]
pub(crate) struct HookedStore {
    inner: Arc<InMemoryStore>,
    after_get: Option<Hook>,
    before_pop: Option<Hook>,
    lists_offline: bool,
}

impl fmt::Debug for HookedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookedStore")
            .field("inner", &self.inner)
            .field("lists_offline", &self.lists_offline)
            .finish_non_exhaustive()
    }
}

impl HookedStore {
    pub(crate) fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Run `hook` after every `get`, before its value is returned.
    pub(crate) fn after_get(
        mut self,
        hook: impl Fn(&InMemoryStore) + Send + Sync + 'static,
    ) -> Self {
        self.after_get = Some(Box::new(hook));
        self
    }

    /// Run `hook` when a blocking pop starts.
    pub(crate) fn before_pop(
        mut self,
        hook: impl Fn(&InMemoryStore) + Send + Sync + 'static,
    ) -> Self {
        self.before_pop = Some(Box::new(hook));
        self
    }

    /// Fail every list push.
    pub(crate) fn lists_offline(mut self) -> Self {
        self.lists_offline = true;
        self
    }

    fn check_lists(&self) -> Result<(), StoreError> {
        if self.lists_offline {
            return Err(StoreError::Unavailable("lists offline".into()));
        }
        Ok(())
    }
}

impl SharedStore for HookedStore {
    fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping()
    }

    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.inner.set_with_ttl(key, value, ttl)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.inner.get(key)?;
        if let Some(hook) = &self.after_get {
            hook(&self.inner);
        }
        Ok(value)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key)
    }

    fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.inner.delete_if_eq(key, expected)
    }

    fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        self.check_lists()?;
        self.inner.push(list, value)
    }

    fn push_head(&self, list: &str, value: &str) -> Result<(), StoreError> {
        self.check_lists()?;
        self.inner.push_head(list, value)
    }

    fn blocking_pop(
        &self,
        lists: &[&str],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        if let Some(hook) = &self.before_pop {
            hook(&self.inner);
        }
        self.inner.blocking_pop(lists, timeout)
    }

    fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        self.inner.list_len(list)
    }

    fn list_range(&self, list: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        self.inner.list_range(list, limit)
    }

    fn list_remove(&self, list: &str, value: &str) -> Result<bool, StoreError> {
        self.inner.list_remove(list, value)
    }

    fn list_trim(&self, list: &str, keep: usize) -> Result<(), StoreError> {
        self.inner.list_trim(list, keep)
    }

    fn schedule(&self, set: &str, member: &str, score: i64) -> Result<(), StoreError> {
        self.inner.schedule(set, member, score)
    }

    fn unschedule(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        self.inner.unschedule(set, member)
    }

    fn take_due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>, StoreError> {
        self.inner.take_due(set, max_score, limit)
    }

    fn scheduled_len(&self, set: &str) -> Result<usize, StoreError> {
        self.inner.scheduled_len(set)
    }
}
