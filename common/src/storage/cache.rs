use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::utils::config::AppConfig;

/// Atomic fixed-window counter state, keyed in the shared cache.
const FIXED_WINDOW_SCRIPT: &str = r"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local period = tonumber(ARGV[2])

local current = redis.call('get', key)
if not current then
    redis.call('setex', key, period, 1)
    return {1, limit - 1, period}
end

if tonumber(current) >= limit then
    local ttl = redis.call('ttl', key)
    return {0, 0, ttl}
end

local new_val = redis.call('incr', key)
local ttl = redis.call('ttl', key)
return {1, limit - new_val, ttl}
";

/// Outcome of one fixed-window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_epoch_secs: u64,
}

#[derive(Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

#[derive(Clone)]
struct MemoryWindow {
    count: u64,
    expires_at: Instant,
    reset_epoch_secs: u64,
}

/// TTL key-value cache with JSON-serialized values. Backed by Redis when a
/// URL is configured, by an in-process map otherwise. Reads never raise:
/// missing, expired or undecodable entries are all reported as absent.
#[derive(Clone)]
pub struct CacheProvider {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Redis {
        manager: ConnectionManager,
    },
    Memory {
        entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
        windows: Arc<Mutex<HashMap<String, MemoryWindow>>>,
    },
}

impl CacheProvider {
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, AppError> {
        match &cfg.redis_url {
            Some(url) if !url.is_empty() => {
                let client = redis::Client::open(url.as_str())
                    .map_err(|e| AppError::external("Cache", e))?;
                let manager = client
                    .get_connection_manager()
                    .await
                    .map_err(|e| AppError::external("Cache", e))?;
                info!(url = %url, "cache provider initialized");
                Ok(Self {
                    backend: Backend::Redis { manager },
                })
            }
            _ => {
                warn!("no cache url configured, using in-memory cache");
                Ok(Self::memory())
            }
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory {
                entries: Arc::new(Mutex::new(HashMap::new())),
                windows: Arc::new(Mutex::new(HashMap::new())),
            },
        }
    }

    /// Absent for missing or expired keys; deserialization errors are
    /// logged and reported as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match &self.backend {
            Backend::Redis { manager } => {
                let mut conn = manager.clone();
                match conn.get::<_, Option<String>>(key).await {
                    Ok(value) => value,
                    Err(e) => {
                        error!(key, error = %e, "cache read failed");
                        return None;
                    }
                }
            }
            Backend::Memory { entries, .. } => {
                let mut guard = entries.lock().await;
                match guard.get(key) {
                    Some(entry) if entry.expires_at.is_some_and(|at| Instant::now() > at) => {
                        guard.remove(key);
                        None
                    }
                    Some(entry) => Some(entry.value.clone()),
                    None => None,
                }
            }
        }?;

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "failed to deserialize cached value");
                None
            }
        }
    }

    /// Write-through set. Provider errors are logged and swallowed; callers
    /// must not depend on the write having happened.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                error!(key, error = %e, "failed to serialize cache value");
                return;
            }
        };

        match &self.backend {
            Backend::Redis { manager } => {
                let mut conn = manager.clone();
                let result = match ttl {
                    Some(ttl) => {
                        conn.set_ex::<_, _, ()>(key, serialized, ttl.as_secs())
                            .await
                    }
                    None => conn.set::<_, _, ()>(key, serialized).await,
                };
                if let Err(e) = result {
                    error!(key, error = %e, "cache write failed");
                }
            }
            Backend::Memory { entries, .. } => {
                entries.lock().await.insert(
                    key.to_string(),
                    MemoryEntry {
                        value: serialized,
                        expires_at: ttl.map(|ttl| Instant::now() + ttl),
                    },
                );
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match &self.backend {
            Backend::Redis { manager } => {
                let mut conn = manager.clone();
                match conn.del::<_, i64>(key).await {
                    Ok(n) => n > 0,
                    Err(e) => {
                        error!(key, error = %e, "cache delete failed");
                        false
                    }
                }
            }
            Backend::Memory { entries, .. } => entries.lock().await.remove(key).is_some(),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match &self.backend {
            Backend::Redis { manager } => {
                let mut conn = manager.clone();
                match conn.exists::<_, bool>(key).await {
                    Ok(found) => found,
                    Err(e) => {
                        error!(key, error = %e, "cache exists check failed");
                        false
                    }
                }
            }
            Backend::Memory { entries, .. } => {
                let mut guard = entries.lock().await;
                match guard.get(key) {
                    Some(entry) if entry.expires_at.is_some_and(|at| Instant::now() > at) => {
                        guard.remove(key);
                        false
                    }
                    Some(_) => true,
                    None => false,
                }
            }
        }
    }

    pub async fn clear(&self) {
        match &self.backend {
            Backend::Redis { manager } => {
                let mut conn = manager.clone();
                let result: redis::RedisResult<()> =
                    redis::cmd("FLUSHDB").query_async(&mut conn).await;
                if let Err(e) = result {
                    error!(error = %e, "cache clear failed");
                }
            }
            Backend::Memory { entries, windows } => {
                entries.lock().await.clear();
                windows.lock().await.clear();
            }
        }
    }

    /// Liveness probe (PING-equivalent).
    pub async fn health_check(&self) -> bool {
        match &self.backend {
            Backend::Redis { manager } => {
                let mut conn = manager.clone();
                let result: redis::RedisResult<String> =
                    redis::cmd("PING").query_async(&mut conn).await;
                result.is_ok()
            }
            Backend::Memory { .. } => true,
        }
    }

    /// Atomic increment-and-check over a fixed window. Race-free for
    /// concurrent callers on the same key; errors bubble up so the rate
    /// limiter can fail open.
    pub async fn incr_fixed_window(
        &self,
        key: &str,
        limit: u64,
        period: Duration,
    ) -> Result<WindowDecision, AppError> {
        let now_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        match &self.backend {
            Backend::Redis { manager } => {
                let mut conn = manager.clone();
                let script = redis::Script::new(FIXED_WINDOW_SCRIPT);
                let (allowed, remaining, ttl): (i64, i64, i64) = script
                    .key(key)
                    .arg(limit)
                    .arg(period.as_secs())
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| AppError::external("Cache", e))?;

                Ok(WindowDecision {
                    allowed: allowed == 1,
                    remaining: remaining.max(0) as u64,
                    reset_epoch_secs: now_epoch.saturating_add(ttl.max(0) as u64),
                })
            }
            Backend::Memory { windows, .. } => {
                let mut guard = windows.lock().await;
                let now = Instant::now();

                let window = guard.get(key).filter(|w| w.expires_at > now).cloned();
                match window {
                    None => {
                        guard.insert(
                            key.to_string(),
                            MemoryWindow {
                                count: 1,
                                expires_at: now + period,
                                reset_epoch_secs: now_epoch.saturating_add(period.as_secs()),
                            },
                        );
                        Ok(WindowDecision {
                            allowed: true,
                            remaining: limit.saturating_sub(1),
                            reset_epoch_secs: now_epoch.saturating_add(period.as_secs()),
                        })
                    }
                    Some(w) if w.count >= limit => Ok(WindowDecision {
                        allowed: false,
                        remaining: 0,
                        reset_epoch_secs: w.reset_epoch_secs,
                    }),
                    Some(w) => {
                        let new_count = w.count.saturating_add(1);
                        guard.insert(
                            key.to_string(),
                            MemoryWindow {
                                count: new_count,
                                ..w
                            },
                        );
                        Ok(WindowDecision {
                            allowed: true,
                            remaining: limit.saturating_sub(new_count),
                            reset_epoch_secs: w.reset_epoch_secs,
                        })
                    }
                }
            }
        }
    }
}
