//! Per-channel sliding-window send quotas.
//!
//! A quota is owned by the channel, not by a campaign: every campaign in the process (and,
//! with `RedisQuota`, every process) draws from the same window.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::errors::PipelineError;
use crate::models::Channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Throttled { retry_after: Duration },
}

/// At most `max_sends` admissions in any window of length `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimit {
    pub max_sends: u32,
    pub window: Duration,
}

#[async_trait]
pub trait ChannelQuota: Send + Sync {
    /// Consumes one slot if the window has room. The decision and the consumption are
    /// a single atomic step.
    async fn try_acquire(&self, channel: Channel) -> Result<Admission, PipelineError>;
}

// ────────────────────────────────────────────────────────────────────────────
// In-process
// ────────────────────────────────────────────────────────────────────────────

pub struct SlidingWindowQuota {
    limits: HashMap<Channel, QuotaLimit>,
    admitted: Mutex<HashMap<Channel, VecDeque<Instant>>>,
}

impl SlidingWindowQuota {
    /// Channels without a limit are unthrottled.
    pub fn new(limits: HashMap<Channel, QuotaLimit>) -> Self {
        Self {
            limits,
            admitted: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ChannelQuota for SlidingWindowQuota {
    async fn try_acquire(&self, channel: Channel) -> Result<Admission, PipelineError> {
        let Some(limit) = self.limits.get(&channel).copied() else {
            return Ok(Admission::Allowed);
        };
        if limit.max_sends == 0 {
            return Ok(Admission::Throttled {
                retry_after: limit.window,
            });
        }

        let now = Instant::now();
        let mut admitted = self.admitted.lock().await;
        let window = admitted.entry(channel).or_default();

        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= limit.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if (window.len() as u32) < limit.max_sends {
            window.push_back(now);
            return Ok(Admission::Allowed);
        }

        let retry_after = window
            .front()
            .map(|oldest| limit.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(limit.window);
        debug!(%channel, retry_after_ms = retry_after.as_millis() as u64, "Channel quota full");
        Ok(Admission::Throttled { retry_after })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Redis
// ────────────────────────────────────────────────────────────────────────────

/// Trims the window, then admits if there is room. Returns 0 when admitted, otherwise the
/// milliseconds until the oldest entry leaves the window.
///
/// KEYS[1] sorted set of admissions, ARGV: now_ms, window_ms, max_sends, member
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  redis.call('PEXPIRE', key, window)
  return 0
end

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local wait = window
if oldest[2] then
  wait = tonumber(oldest[2]) + window - now
end
if wait < 1 then
  wait = 1
end
return wait
"#;

/// Quota shared by every process pointed at the same Redis.
pub struct RedisQuota {
    connection: MultiplexedConnection,
    limits: HashMap<Channel, QuotaLimit>,
    key_prefix: String,
    script: redis::Script,
}

impl RedisQuota {
    pub async fn connect(
        client: &redis::Client,
        limits: HashMap<Channel, QuotaLimit>,
    ) -> Result<Self, PipelineError> {
        let connection = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            connection,
            limits,
            key_prefix: "talent-pipeline:quota".to_string(),
            script: redis::Script::new(SLIDING_WINDOW_SCRIPT),
        })
    }

    fn key(&self, channel: Channel) -> String {
        format!("{}:{}", self.key_prefix, channel.as_str())
    }
}

#[async_trait]
impl ChannelQuota for RedisQuota {
    async fn try_acquire(&self, channel: Channel) -> Result<Admission, PipelineError> {
        let Some(limit) = self.limits.get(&channel).copied() else {
            return Ok(Admission::Allowed);
        };

        let mut conn = self.connection.clone();
        let wait_ms: i64 = self
            .script
            .key(self.key(channel))
            .arg(Utc::now().timestamp_millis())
            .arg(limit.window.as_millis() as i64)
            .arg(limit.max_sends)
            .arg(Uuid::new_v4().to_string())
            .invoke_async(&mut conn)
            .await?;

        if wait_ms <= 0 {
            Ok(Admission::Allowed)
        } else {
            Ok(Admission::Throttled {
                retry_after: Duration::from_millis(wait_ms as u64),
            })
        }
    }
}
