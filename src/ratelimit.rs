use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::kv::KeyValueStore;

/// A named admission quota: at most `limit` events per sliding `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub name: &'static str,
    pub limit: u64,
    pub window: Duration,
}

impl Quota {
    pub const fn new(name: &'static str, limit: u64, window_secs: u64) -> Self {
        Self {
            name,
            limit,
            window: Duration::from_secs(window_secs),
        }
    }
}

/// Canonical quotas. Identifiers are scoped per quota name, so a user id and
/// an IP never collide in the store.
pub const MESSAGE_USER: Quota = Quota::new("messageUser", 60, 60);
pub const MESSAGE_IP: Quota = Quota::new("messageIP", 100, 60);
pub const WEBSOCKET_IP: Quota = Quota::new("websocketIP", 10, 300);
pub const API_USER: Quota = Quota::new("apiUser", 1000, 3600);
pub const ROOM_JOIN_USER: Quota = Quota::new("roomJoinUser", 20, 300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u64,
    /// Unix millisecond timestamp at which the window frees a slot.
    pub reset_at_ms: u64,
    /// Whole seconds a denied caller should wait, rounded up.
    pub retry_after_secs: u64,
}

/// Sliding-window rate limiter over the keyed store's sorted sets.
///
/// Each admission records its own timestamp as both score and member; the
/// window slides by evicting members older than `now - window` before every
/// decision. A store failure fails open with a logged warning.
pub struct SlidingWindowLimiter {
    store: Arc<dyn KeyValueStore>,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn check(&self, quota: Quota, id: &str) -> Decision {
        match self.try_check(quota, id).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(quota = quota.name, id, "rate limiter store error, failing open: {err}");
                let now_ms = Utc::now().timestamp_millis() as u64;
                Decision {
                    allowed: true,
                    remaining: quota.limit.saturating_sub(1),
                    reset_at_ms: now_ms + quota.window.as_millis() as u64,
                    retry_after_secs: 0,
                }
            }
        }
    }

    async fn try_check(&self, quota: Quota, id: &str) -> Result<Decision, crate::errors::StoreError> {
        let key = format!("ratelimit:{}:{}", quota.name, id);
        let now_ms = Utc::now().timestamp_millis() as u64;
        let window_ms = quota.window.as_millis() as u64;

        self.store
            .zremrangebyscore(&key, 0.0, (now_ms - window_ms) as f64)
            .await?;

        let cardinality = self.store.zcard(&key).await?;
        if cardinality >= quota.limit {
            let oldest = self.store.zrange(&key, 0, 0).await?;
            let oldest_ms = oldest
                .first()
                .and_then(|m| m.parse::<u64>().ok())
                .unwrap_or(now_ms);
            let reset_at_ms = oldest_ms + window_ms;
            let retry_after_secs = reset_at_ms.saturating_sub(now_ms).div_ceil(1000);
            return Ok(Decision {
                allowed: false,
                remaining: 0,
                reset_at_ms,
                retry_after_secs,
            });
        }

        self.store
            .zadd(&key, now_ms as f64, &now_ms.to_string())
            .await?;
        self.store.expire(&key, quota.window).await?;

        Ok(Decision {
            allowed: true,
            remaining: quota.limit - cardinality - 1,
            reset_at_ms: now_ms + window_ms,
            retry_after_secs: 0,
        })
    }
}
