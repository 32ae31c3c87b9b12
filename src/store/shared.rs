//! Narrow trait over the fast shared store (§4.11): exec-mode CAS, per-signer
//! nonce allocation, token-bucket rate limiting, and notification dedup. A
//! Redis-class implementation backs production; an in-memory fake lets
//! callers (rate limiter, nonce manager, exec gate) be tested without a
//! running server.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use alloy::primitives::Address;
use chrono::Utc;
use redis::AsyncCommands;

use crate::types::{ExecMode, ExecModeState, UserId};

pub trait SharedStore: Send + Sync {
    /// Current exec mode; defaults to `DRY`/no-stop on first read (§3).
    fn get_exec_mode(&self) -> impl Future<Output = Result<ExecModeState, redis::RedisError>> + Send;

    /// Unconditional write, used by C8's admin operations.
    fn set_exec_mode(
        &self,
        state: ExecModeState,
    ) -> impl Future<Output = Result<(), redis::RedisError>> + Send;

    /// Atomic-increment the per-signer nonce counter and return the value to
    /// use. Never derived from a local counter (§5).
    fn next_nonce(
        &self,
        signer: Address,
    ) -> impl Future<Output = Result<u64, redis::RedisError>> + Send;

    /// Resync the stored nonce to a chain-observed value, e.g. after a
    /// `nonce too low`/`nonce already used` broadcast failure (§4.8).
    fn reset_nonce(
        &self,
        signer: Address,
        value: u64,
    ) -> impl Future<Output = Result<(), redis::RedisError>> + Send;

    /// Token-bucket check: consumes one token from `key`'s bucket of size
    /// `limit` refilling over `window`; returns `false` if exhausted (§4.7).
    fn allow(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> impl Future<Output = Result<bool, redis::RedisError>> + Send;

    /// Notification dedup: returns `true` if `key` was already seen within
    /// `ttl` (and records it if not) — `dedup:{signal_id}` (§4.6, §6).
    fn dedup_seen(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, redis::RedisError>> + Send;

    /// Adds `amount` to `key`'s rolling-window accumulator (first write sets
    /// the window's expiry) and returns the new total. Backs the hourly
    /// notional cap, which sums dollar amounts rather than call counts
    /// (§4.7).
    fn add_usage(
        &self,
        key: &str,
        amount: u64,
        window: Duration,
    ) -> impl Future<Output = Result<u64, redis::RedisError>> + Send;
}

/// Redis-class implementation.
#[derive(Clone)]
pub struct RedisSharedStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisSharedStore {
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }
}

impl SharedStore for RedisSharedStore {
    async fn get_exec_mode(&self) -> Result<ExecModeState, redis::RedisError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get("exec_mode").await?;
        Ok(raw
            .and_then(|s| serde_json::from_str::<WireExecModeState>(&s).ok())
            .map(Into::into)
            .unwrap_or_default())
    }

    async fn set_exec_mode(&self, state: ExecModeState) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let wire = WireExecModeState::from(state);
        let raw = serde_json::to_string(&wire).unwrap_or_default();
        let _: () = conn.set("exec_mode", raw).await?;
        Ok(())
    }

    async fn next_nonce(&self, signer: Address) -> Result<u64, redis::RedisError> {
        let mut conn = self.conn.clone();
        let key = format!("nonces:{signer}");
        let value: i64 = conn.incr(&key, 1).await?;
        Ok((value - 1).max(0) as u64)
    }

    async fn reset_nonce(&self, signer: Address, value: u64) -> Result<(), redis::RedisError> {
        let mut conn = self.conn.clone();
        let key = format!("nonces:{signer}");
        let _: () = conn.set(&key, value as i64).await?;
        Ok(())
    }

    async fn allow(&self, key: &str, limit: u64, window: Duration) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        let bucket_key = format!("rl:{key}");
        let count: i64 = conn.incr(&bucket_key, 1).await?;
        if count == 1 {
            let _: () = conn.expire(&bucket_key, window.as_secs() as i64).await?;
        }
        Ok((count as u64) <= limit)
    }

    async fn dedup_seen(&self, key: &str, ttl: Duration) -> Result<bool, redis::RedisError> {
        let mut conn = self.conn.clone();
        let dedup_key = format!("dedup:{key}");
        // SET NX EX returns OK only if the key was absent; a `None` reply
        // means it was already there, i.e. already seen.
        let already_seen: bool = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async::<Option<String>>(&mut conn)
            .await
            .map(|v| v.is_none())?;
        Ok(already_seen)
    }

    async fn add_usage(&self, key: &str, amount: u64, window: Duration) -> Result<u64, redis::RedisError> {
        let mut conn = self.conn.clone();
        let usage_key = format!("usage:{key}");
        let total: i64 = conn.incr(&usage_key, amount as i64).await?;
        if total == amount as i64 {
            let _: () = conn.expire(&usage_key, window.as_secs() as i64).await?;
        }
        Ok(total.max(0) as u64)
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct WireExecModeState {
    live: bool,
    emergency_stop: bool,
    updated_by: UserId,
    updated_at: chrono::DateTime<Utc>,
}

impl From<ExecModeState> for WireExecModeState {
    fn from(s: ExecModeState) -> Self {
        Self {
            live: matches!(s.mode, ExecMode::Live),
            emergency_stop: s.emergency_stop,
            updated_by: s.updated_by,
            updated_at: s.updated_at,
        }
    }
}

impl From<WireExecModeState> for ExecModeState {
    fn from(w: WireExecModeState) -> Self {
        Self {
            mode: if w.live { ExecMode::Live } else { ExecMode::Dry },
            emergency_stop: w.emergency_stop,
            updated_by: w.updated_by,
            updated_at: w.updated_at,
        }
    }
}

/// In-memory fake, testable without a running Redis-class server (§4.11).
#[derive(Default)]
pub struct InMemorySharedStore {
    inner: Mutex<InMemoryInner>,
}

#[derive(Default)]
struct InMemoryInner {
    exec_mode: Option<ExecModeState>,
    nonces: HashMap<Address, u64>,
    buckets: HashMap<String, (u64, Instant)>,
    dedup: HashMap<String, Instant>,
    usage: HashMap<String, (u64, Instant)>,
}

impl SharedStore for InMemorySharedStore {
    async fn get_exec_mode(&self) -> Result<ExecModeState, redis::RedisError> {
        Ok(self.inner.lock().unwrap().exec_mode.clone().unwrap_or_default())
    }

    async fn set_exec_mode(&self, state: ExecModeState) -> Result<(), redis::RedisError> {
        self.inner.lock().unwrap().exec_mode = Some(state);
        Ok(())
    }

    async fn next_nonce(&self, signer: Address) -> Result<u64, redis::RedisError> {
        let mut guard = self.inner.lock().unwrap();
        let entry = guard.nonces.entry(signer).or_insert(0);
        let value = *entry;
        *entry += 1;
        Ok(value)
    }

    async fn reset_nonce(&self, signer: Address, value: u64) -> Result<(), redis::RedisError> {
        self.inner.lock().unwrap().nonces.insert(signer, value);
        Ok(())
    }

    async fn allow(&self, key: &str, limit: u64, window: Duration) -> Result<bool, redis::RedisError> {
        let mut guard = self.inner.lock().unwrap();
        let now = Instant::now();
        let entry = guard
            .buckets
            .entry(key.to_string())
            .or_insert((0, now + window));
        if now >= entry.1 {
            entry.0 = 0;
            entry.1 = now + window;
        }
        entry.0 += 1;
        Ok(entry.0 <= limit)
    }

    async fn dedup_seen(&self, key: &str, ttl: Duration) -> Result<bool, redis::RedisError> {
        let mut guard = self.inner.lock().unwrap();
        let now = Instant::now();
        guard.dedup.retain(|_, expires_at| *expires_at > now);
        if let Some(expires_at) = guard.dedup.get(key) {
            if *expires_at > now {
                return Ok(true);
            }
        }
        guard.dedup.insert(key.to_string(), now + ttl);
        Ok(false)
    }

    async fn add_usage(&self, key: &str, amount: u64, window: Duration) -> Result<u64, redis::RedisError> {
        let mut guard = self.inner.lock().unwrap();
        let now = Instant::now();
        let entry = guard.usage.entry(key.to_string()).or_insert((0, now + window));
        if now >= entry.1 {
            entry.0 = 0;
            entry.1 = now + window;
        }
        entry.0 += amount;
        Ok(entry.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    #[tokio::test]
    async fn nonce_allocation_is_monotonic() {
        let store = InMemorySharedStore::default();
        let addr = address!("0x00000000000000000000000000000000000004");
        let a = store.next_nonce(addr).await.unwrap();
        let b = store.next_nonce(addr).await.unwrap();
        assert_eq!(b, a + 1);
    }

    #[tokio::test]
    async fn dedup_suppresses_within_ttl() {
        let store = InMemorySharedStore::default();
        assert!(!store.dedup_seen("sig-1", Duration::from_secs(300)).await.unwrap());
        assert!(store.dedup_seen("sig-1", Duration::from_secs(300)).await.unwrap());
    }

    #[tokio::test]
    async fn token_bucket_rejects_past_limit() {
        let store = InMemorySharedStore::default();
        for _ in 0..5 {
            assert!(store.allow("u1:opens", 5, Duration::from_secs(60)).await.unwrap());
        }
        assert!(!store.allow("u1:opens", 5, Duration::from_secs(60)).await.unwrap());
    }
}
