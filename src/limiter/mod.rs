//! Sliding-window rate limiting over a durable keyed store
//!
//! Each account is throttled by two rules that must both pass: 1 hit per
//! minute and 60 hits per hour. Hits live in a Redis sorted set keyed by
//! `(namespace, account, window)` so multiple gateway replicas coordinate
//! on the same counters. An in-memory backend mirrors the semantics for
//! tests and single-process deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use redis::Script;

use crate::error::AppResult;

/// Namespace shared by all account buckets
pub const NAMESPACE: &str = "botmgr";

/// A `(hits, window)` pair applied per namespaced key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRule {
    /// Maximum hits accepted inside the window
    pub hits: i64,
    /// Window size in seconds
    pub window_secs: i64,
}

/// One request per account per minute
pub const PER_MINUTE: RateRule = RateRule {
    hits: 1,
    window_secs: 60,
};

/// Sixty requests per account per hour
pub const PER_HOUR: RateRule = RateRule {
    hits: 60,
    window_secs: 3600,
};

/// Atomically prune, count, and conditionally record a hit.
const HIT_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], 0, ARGV[1] - ARGV[2])
local count = redis.call('ZCARD', KEYS[1])
if count < tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[4])
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

enum Backend {
    Redis(redis::aio::ConnectionManager),
    /// Hit timestamps (epoch millis) per bucket key
    Memory(Mutex<HashMap<String, Vec<i64>>>),
}

/// Moving-window rate limiter
pub struct RateLimiter {
    backend: Backend,
    namespace: String,
}

impl RateLimiter {
    /// Limiter backed by the shared Redis store.
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self {
            backend: Backend::Redis(conn),
            namespace: NAMESPACE.to_string(),
        }
    }

    /// Process-local limiter with identical semantics. Used by tests and
    /// single-replica deployments that skip Redis.
    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(HashMap::new())),
            namespace: NAMESPACE.to_string(),
        }
    }

    fn bucket_key(&self, rule: &RateRule, key: &str) -> String {
        format!("{}:{}:{}", self.namespace, key, rule.window_secs)
    }

    /// Would a hit be accepted right now? Never records anything.
    pub async fn test(&self, rule: &RateRule, key: &str) -> AppResult<bool> {
        let bucket = self.bucket_key(rule, key);
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = rule.window_secs * 1000;

        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let (count,): (i64,) = redis::pipe()
                    .cmd("ZREMRANGEBYSCORE")
                    .arg(&bucket)
                    .arg(0)
                    .arg(now_ms - window_ms)
                    .ignore()
                    .cmd("ZCARD")
                    .arg(&bucket)
                    .query_async(&mut conn)
                    .await?;
                Ok(count < rule.hits)
            }
            Backend::Memory(buckets) => {
                let mut buckets = buckets.lock().unwrap();
                let hits = buckets.entry(bucket).or_default();
                hits.retain(|&t| t > now_ms - window_ms);
                Ok((hits.len() as i64) < rule.hits)
            }
        }
    }

    /// Attempt to record a hit, returning acceptance.
    pub async fn hit(&self, rule: &RateRule, key: &str) -> AppResult<bool> {
        let bucket = self.bucket_key(rule, key);
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = rule.window_secs * 1000;

        match &self.backend {
            Backend::Redis(conn) => {
                let mut conn = conn.clone();
                let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());
                let accepted: i64 = Script::new(HIT_SCRIPT)
                    .key(&bucket)
                    .arg(now_ms)
                    .arg(window_ms)
                    .arg(rule.hits)
                    .arg(member)
                    .invoke_async(&mut conn)
                    .await?;
                Ok(accepted == 1)
            }
            Backend::Memory(buckets) => {
                let mut buckets = buckets.lock().unwrap();
                let hits = buckets.entry(bucket).or_default();
                hits.retain(|&t| t > now_ms - window_ms);
                if (hits.len() as i64) < rule.hits {
                    hits.push(now_ms);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Both per-account rules accept a hypothetical hit.
    pub async fn allows(&self, key: &str) -> AppResult<bool> {
        Ok(self.test(&PER_MINUTE, key).await? && self.test(&PER_HOUR, key).await?)
    }

    /// Commit a hit against both per-account rules.
    ///
    /// The minute rule is the tight one, so it is charged first; the hour
    /// rule rejecting afterwards still reports the account busy.
    pub async fn commit(&self, key: &str) -> AppResult<bool> {
        if !self.hit(&PER_MINUTE, key).await? {
            return Ok(false);
        }
        self.hit(&PER_HOUR, key).await
    }
}
