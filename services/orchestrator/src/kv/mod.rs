//! KV primitives over Redis (spec.md §4.1). Grounded on
//! `original_source/app/services/redis_service.py`'s `RedisService`: the
//! same operation set, the same fail-open/fail-closed split per
//! operation (sliding-window admits fail open, lease acquisition drops the
//! caller's request, blacklist checks are fail-closed at the caller —
//! see `token_service.rs`).

use std::time::Duration;

use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use uuid::Uuid;

#[derive(Clone)]
pub struct KvStore {
    conn: ConnectionManager,
}

/// A held lease. Carries the random token used to make release safe against
/// releasing a successor's lease after our own expired (spec.md §4.1).
pub struct LeaseHandle {
    key: String,
    token: String,
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

impl KvStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }

    pub async fn get_string(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let n: i64 = conn.exists(key).await?;
        Ok(n > 0)
    }

    pub async fn ttl(&self, key: &str) -> anyhow::Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.ttl(key).await?)
    }

    /// Atomic `INCR` + `EXPIRE`, used for the failed-login counter
    /// (spec.md §3 "Failed-login counter"). Returns the post-increment value.
    pub async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> anyhow::Result<i64> {
        let mut conn = self.conn.clone();
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    /// Acquire a single-writer lease with `SET key token NX EX ttl`, blocking
    /// (via short polling sleeps) up to `blocking_timeout`.
    pub async fn acquire_lease(
        &self,
        key: &str,
        ttl: Duration,
        blocking_timeout: Duration,
    ) -> anyhow::Result<Option<LeaseHandle>> {
        let lock_key = format!("lock:{key}");
        let token = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + blocking_timeout;

        loop {
            let mut conn = self.conn.clone();
            let acquired: bool = redis::cmd("SET")
                .arg(&lock_key)
                .arg(&token)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async::<_, Option<String>>(&mut conn)
                .await?
                .is_some();

            if acquired {
                return Ok(Some(LeaseHandle {
                    key: lock_key,
                    token,
                }));
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Release only if the current holder token matches ours — prevents
    /// releasing a successor's lease after ours expired under load.
    pub async fn release_lease(&self, handle: LeaseHandle) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let script = Script::new(RELEASE_SCRIPT);
        let _: i64 = script
            .key(&handle.key)
            .arg(&handle.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Sliding-window admission (spec.md §4.1). Fails open: an unreachable
    /// store admits the request, because this limiter protects capacity,
    /// not correctness.
    pub async fn sliding_window_admit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> (bool, u32) {
        match self.try_sliding_window_admit(key, limit, window).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, %key, "rate limit store unreachable, failing open");
                (true, limit)
            }
        }
    }

    async fn try_sliding_window_admit(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
    ) -> anyhow::Result<(bool, u32)> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let window_start = now - window.as_secs_f64();
        let jittered_ttl = window.as_secs() + 2;

        let (_, count_after_prune, _, _): (i64, i64, i64, bool) = redis::pipe()
            .atomic()
            .zrembyscore(key, "-inf", window_start)
            .zcard(key)
            .zadd(key, now.to_string(), now)
            .expire(key, jittered_ttl as i64)
            .query_async(&mut conn)
            .await?;

        let allowed = (count_after_prune as u32) < limit;
        let remaining = limit.saturating_sub(count_after_prune as u32 + 1);
        Ok((allowed, remaining))
    }

    pub async fn add_to_sorted_set_with_score(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_script_only_deletes_matching_token() {
        assert!(RELEASE_SCRIPT.contains("redis.call(\"get\", KEYS[1])"));
        assert!(RELEASE_SCRIPT.contains("ARGV[1]"));
    }
}
