//! Redis-backed shared store.
//!
//! - **Strings**: `SET key value PX ttl` for codes, claims and results
//! - **Lists**: `LPUSH` to enqueue, `BRPOP` across lists to dequeue
//! - **Sorted sets**: delayed jobs and claim deadlines, drained by a Lua script
//!   so a member is handed to exactly one caller

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use super::{SharedStore, StoreError};

/// Remove and return members scored at or below ARGV[1], at most ARGV[2] of them.
const TAKE_DUE_SCRIPT: &str = r"
local items = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, item in ipairs(items) do
    redis.call('ZREM', KEYS[1], item)
end
return items
";

/// Delete KEYS[1] if it still holds ARGV[1].
const DELETE_IF_EQ_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

#[derive(Debug, Clone)]
pub struct RedisStore {
    client: Arc<redis::Client>,
    take_due: Arc<redis::Script>,
    delete_if_eq: Arc<redis::Script>,
}

impl RedisStore {
    /// Create a store for a Redis URL (e.g. "redis://localhost:6379").
    ///
    /// No connection is made until the first command; call [`SharedStore::ping`]
    /// to fail fast.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            take_due: Arc::new(redis::Script::new(TAKE_DUE_SCRIPT)),
            delete_if_eq: Arc::new(redis::Script::new(DELETE_IF_EQ_SCRIPT)),
        })
    }

    fn connection(&self) -> Result<redis::Connection, StoreError> {
        self.client
            .get_connection()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

fn command_error(op: &'static str) -> impl FnOnce(redis::RedisError) -> StoreError {
    move |e| {
        if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            StoreError::Connection(format!("{op} failed: {e}"))
        } else {
            StoreError::Command(format!("{op} failed: {e}"))
        }
    }
}

impl SharedStore for RedisStore {
    fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING")
            .query(&mut conn)
            .map_err(command_error("PING"))?;
        Ok(())
    }

    #[instrument(skip(self, value), fields(ttl_ms = ttl.as_millis() as u64), err)]
    fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        // PX rejects 0, and a zero TTL means "already expired".
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query(&mut conn)
            .map_err(command_error("SET"))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection()?;
        redis::cmd("GET")
            .arg(key)
            .query(&mut conn)
            .map_err(command_error("GET"))
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let count: u64 = redis::cmd("EXISTS")
            .arg(key)
            .query(&mut conn)
            .map_err(command_error("EXISTS"))?;
        Ok(count > 0)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query(&mut conn)
            .map_err(command_error("DEL"))?;
        Ok(removed > 0)
    }

    fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let removed: u64 = self
            .delete_if_eq
            .key(key)
            .arg(expected)
            .invoke(&mut conn)
            .map_err(command_error("delete_if_eq script"))?;
        Ok(removed > 0)
    }

    fn push(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: u64 = redis::cmd("LPUSH")
            .arg(list)
            .arg(value)
            .query(&mut conn)
            .map_err(command_error("LPUSH"))?;
        Ok(())
    }

    fn push_head(&self, list: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: u64 = redis::cmd("RPUSH")
            .arg(list)
            .arg(value)
            .query(&mut conn)
            .map_err(command_error("RPUSH"))?;
        Ok(())
    }

    fn blocking_pop(
        &self,
        lists: &[&str],
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        let mut conn = self.connection()?;
        // BRPOP treats 0 as "block forever"; never ask for that.
        let timeout_secs = timeout.as_secs_f64().max(0.01);
        redis::cmd("BRPOP")
            .arg(lists)
            .arg(timeout_secs)
            .query(&mut conn)
            .map_err(command_error("BRPOP"))
    }

    fn list_len(&self, list: &str) -> Result<usize, StoreError> {
        let mut conn = self.connection()?;
        redis::cmd("LLEN")
            .arg(list)
            .query(&mut conn)
            .map_err(command_error("LLEN"))
    }

    fn list_range(&self, list: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection()?;
        redis::cmd("LRANGE")
            .arg(list)
            .arg(0)
            .arg(limit as i64 - 1)
            .query(&mut conn)
            .map_err(command_error("LRANGE"))
    }

    fn list_remove(&self, list: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let removed: u64 = redis::cmd("LREM")
            .arg(list)
            .arg(1)
            .arg(value)
            .query(&mut conn)
            .map_err(command_error("LREM"))?;
        Ok(removed > 0)
    }

    fn list_trim(&self, list: &str, keep: usize) -> Result<(), StoreError> {
        if keep == 0 {
            return self.delete(list).map(|_| ());
        }
        let mut conn = self.connection()?;
        let _: () = redis::cmd("LTRIM")
            .arg(list)
            .arg(0)
            .arg(keep as i64 - 1)
            .query(&mut conn)
            .map_err(command_error("LTRIM"))?;
        Ok(())
    }

    fn schedule(&self, set: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let _: u64 = redis::cmd("ZADD")
            .arg(set)
            .arg(score)
            .arg(member)
            .query(&mut conn)
            .map_err(command_error("ZADD"))?;
        Ok(())
    }

    fn unschedule(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection()?;
        let removed: u64 = redis::cmd("ZREM")
            .arg(set)
            .arg(member)
            .query(&mut conn)
            .map_err(command_error("ZREM"))?;
        Ok(removed > 0)
    }

    fn take_due(&self, set: &str, max_score: i64, limit: usize) -> Result<Vec<String>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection()?;
        self.take_due
            .key(set)
            .arg(max_score)
            .arg(limit)
            .invoke(&mut conn)
            .map_err(command_error("take_due script"))
    }

    fn scheduled_len(&self, set: &str) -> Result<usize, StoreError> {
        let mut conn = self.connection()?;
        redis::cmd("ZCARD")
            .arg(set)
            .query(&mut conn)
            .map_err(command_error("ZCARD"))
    }
}

#[cfg(test)]
mod tests {
    //! Run against a live server: `REDIS_URL=redis://localhost:6379 cargo test
    //! -p ticketing-infra --features redis -- --ignored`.

    use super::*;

    fn store() -> RedisStore {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        RedisStore::new(url).unwrap()
    }

    fn unique(prefix: &str) -> String {
        format!("test:{prefix}:{}", uuid::Uuid::now_v7())
    }

    #[test]
    #[ignore = "requires a running Redis server"]
    fn ttl_values_round_trip() {
        let store = store();
        let key = unique("kv");

        store.set_with_ttl(&key, "v", Duration::from_secs(5)).unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("v"));
        assert!(store.delete(&key).unwrap());
        assert!(!store.exists(&key).unwrap());
    }

    #[test]
    #[ignore = "requires a running Redis server"]
    fn delete_if_eq_keeps_replaced_value() {
        let store = store();
        let key = unique("cad");

        store.set_with_ttl(&key, "new", Duration::from_secs(5)).unwrap();
        assert!(!store.delete_if_eq(&key, "old").unwrap());
        assert!(store.delete_if_eq(&key, "new").unwrap());
        assert!(!store.exists(&key).unwrap());
    }

    #[test]
    #[ignore = "requires a running Redis server"]
    fn list_trim_keeps_most_recent() {
        let store = store();
        let list = unique("trim");
        for v in ["a", "b", "c"] {
            store.push(&list, v).unwrap();
        }

        store.list_trim(&list, 2).unwrap();
        assert_eq!(store.list_range(&list, 10).unwrap(), vec!["c", "b"]);
        store.delete(&list).unwrap();
    }

    #[test]
    #[ignore = "requires a running Redis server"]
    fn blocking_pop_honors_list_order() {
        let store = store();
        let high = unique("high");
        let low = unique("low");

        store.push(&low, "l").unwrap();
        store.push(&high, "h").unwrap();

        let popped = store
            .blocking_pop(&[&high, &low], Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(popped, (high.clone(), "h".to_string()));
        assert!(store.blocking_pop(&[&high], Duration::from_millis(100)).unwrap().is_none());
        store.delete(&low).unwrap();
    }

    #[test]
    #[ignore = "requires a running Redis server"]
    fn take_due_is_exclusive() {
        let store = store();
        let set = unique("delayed");

        store.schedule(&set, "a", 10).unwrap();
        store.schedule(&set, "b", 20).unwrap();
        store.schedule(&set, "c", 30).unwrap();

        assert_eq!(store.take_due(&set, 20, 10).unwrap(), vec!["a", "b"]);
        assert!(store.take_due(&set, 20, 10).unwrap().is_empty());
        assert_eq!(store.scheduled_len(&set).unwrap(), 1);
        store.delete(&set).unwrap();
    }
}
