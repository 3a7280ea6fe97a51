use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::KeyValueStore;
use crate::errors::StoreError;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    ZSet(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// In-process implementation of the keyed store with the same TTL, hash and
/// sorted-set semantics as the Redis-backed one. Used by tests and by local
/// runs without a Redis.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| !entry.expired());
        f(&mut entries)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::Malformed(format!("{key} is not a string"))),
            None => Ok(None),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: ttl.map(|t| Instant::now() + t),
                },
            );
        });
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            entries.remove(key);
        });
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.with_entries(|entries| entries.contains_key(key)))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        });
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.with_entries(|entries| {
            let current = match entries.get(key) {
                Some(Entry { value: Value::Str(s), .. }) => s
                    .parse::<i64>()
                    .map_err(|_| StoreError::Malformed(format!("{key} is not an integer")))?,
                Some(_) => {
                    return Err(StoreError::Malformed(format!("{key} is not a string")))
                }
                None => 0,
            };
            let next = current + 1;
            let expires_at = entries.get(key).and_then(|e| e.expires_at);
            entries.insert(
                key.to_string(),
                Entry { value: Value::Str(next.to_string()), expires_at },
            );
            Ok(next)
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Hash(map) => {
                    map.insert(field.to_string(), value.to_string());
                    Ok(())
                }
                _ => Err(StoreError::Malformed(format!("{key} is not a hash"))),
            }
        })
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry { value: Value::Hash(map), .. }) => Ok(map.get(field).cloned()),
            Some(_) => Err(StoreError::Malformed(format!("{key} is not a hash"))),
            None => Ok(None),
        })
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            if let Some(Entry { value: Value::Hash(map), .. }) = entries.get_mut(key) {
                map.remove(field);
            }
        });
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry { value: Value::Hash(map), .. }) => Ok(map.clone()),
            Some(_) => Err(StoreError::Malformed(format!("{key} is not a hash"))),
            None => Ok(HashMap::new()),
        })
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::ZSet(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::ZSet(set) => {
                    set.insert(member.to_string(), score);
                    Ok(())
                }
                _ => Err(StoreError::Malformed(format!("{key} is not a sorted set"))),
            }
        })
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        self.with_entries(|entries| {
            let set = match entries.get(key) {
                Some(Entry { value: Value::ZSet(set), .. }) => set,
                Some(_) => {
                    return Err(StoreError::Malformed(format!("{key} is not a sorted set")))
                }
                None => return Ok(Vec::new()),
            };

            let mut members: Vec<(&String, &f64)> = set.iter().collect();
            members.sort_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)));

            let len = members.len() as isize;
            let clamp = |i: isize| -> isize {
                let i = if i < 0 { len + i } else { i };
                i.clamp(0, len.max(0))
            };
            let start = clamp(start);
            let stop = clamp(stop).min(len - 1);
            if len == 0 || start > stop {
                return Ok(Vec::new());
            }

            Ok(members[start as usize..=stop as usize]
                .iter()
                .map(|(member, _)| (*member).clone())
                .collect())
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            if let Some(Entry { value: Value::ZSet(set), .. }) = entries.get_mut(key) {
                set.remove(member);
            }
        });
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry { value: Value::ZSet(set), .. }) => Ok(set.len() as u64),
            Some(_) => Err(StoreError::Malformed(format!("{key} is not a sorted set"))),
            None => Ok(0),
        })
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<u64, StoreError> {
        self.with_entries(|entries| {
            if let Some(Entry { value: Value::ZSet(set), .. }) = entries.get_mut(key) {
                let before = set.len();
                set.retain(|_, score| *score < min || *score > max);
                Ok((before - set.len()) as u64)
            } else {
                Ok(0)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn string_ttl_expires() {
        let store = MemoryStore::new();
        store.set("k", "v", Some(Duration::from_millis(10))).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn incr_starts_at_one() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("counter").await.unwrap(), 1);
        assert_eq!(store.incr("counter").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn hash_round_trip() {
        let store = MemoryStore::new();
        store.hset("h", "a", "1").await.unwrap();
        store.hset("h", "b", "2").await.unwrap();

        assert_eq!(store.hget("h", "a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.hgetall("h").await.unwrap().len(), 2);

        store.hdel("h", "a").await.unwrap();
        assert_eq!(store.hget("h", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zset_orders_by_score() {
        let store = MemoryStore::new();
        store.zadd("z", 30.0, "c").await.unwrap();
        store.zadd("z", 10.0, "a").await.unwrap();
        store.zadd("z", 20.0, "b").await.unwrap();

        assert_eq!(store.zrange("z", 0, -1).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.zrange("z", 0, 0).await.unwrap(), vec!["a"]);
        assert_eq!(store.zcard("z").await.unwrap(), 3);

        store.zrem("z", "b").await.unwrap();
        assert_eq!(store.zrange("z", 0, -1).await.unwrap(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn zremrangebyscore_is_inclusive() {
        let store = MemoryStore::new();
        for (score, member) in [(1.0, "a"), (2.0, "b"), (3.0, "c")] {
            store.zadd("z", score, member).await.unwrap();
        }

        let removed = store.zremrangebyscore("z", 1.0, 2.0).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.zrange("z", 0, -1).await.unwrap(), vec!["c"]);
    }
}
