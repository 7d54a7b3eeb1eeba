//! Job store backend on Redis.
//!
//! Layout (all keys share a configurable prefix):
//! - `<prefix>:data`    hash, job ID -> JSON record
//! - `<prefix>:queue`   sorted set, encoded entry -> priority
//! - `<prefix>:workers` hash, worker ID -> last heartbeat (unix millis)
//! - `<prefix>:seq`     counter for enqueue sequence numbers
//!
//! `ZPOPMAX` gives the atomic dequeue. Record updates are compare-and-swap
//! Lua scripts keyed on the `version` field of the stored JSON.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};

use genq_models::{Job, JobId, WorkerHeartbeat};

use super::{QueueBackend, QueueEntry};
use crate::error::{QueueError, QueueResult};

/// Replace the record in ARGV[1] with ARGV[3] if its version is ARGV[2].
/// Returns 1 on success, 0 on version mismatch, -1 when missing.
const SWAP_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if not current then
    return -1
end
if tonumber(cjson.decode(current)['version']) ~= tonumber(ARGV[2]) then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
return 1
"#;

/// Same as the swap script, then ZADD ARGV[5] with score ARGV[4] to KEYS[2].
const SWAP_AND_ENQUEUE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if not current then
    return -1
end
if tonumber(cjson.decode(current)['version']) ~= tonumber(ARGV[2]) then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[3])
redis.call('ZADD', KEYS[2], ARGV[4], ARGV[5])
return 1
"#;

/// Delete the record in ARGV[1] if its version is ARGV[2].
const DELETE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if not current then
    return -1
end
if tonumber(cjson.decode(current)['version']) ~= tonumber(ARGV[2]) then
    return 0
end
redis.call('HDEL', KEYS[1], ARGV[1])
return 1
"#;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the store touches
    pub key_prefix: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "generation_jobs".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX")
                .unwrap_or_else(|_| "generation_jobs".to_string()),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }
}

/// Backend shared by all producers and workers through one Redis instance.
pub struct RedisBackend {
    conn: MultiplexedConnection,
    data_key: String,
    queue_key: String,
    workers_key: String,
    seq_key: String,
    swap_script: Script,
    swap_and_enqueue_script: Script,
    delete_script: Script,
}

impl RedisBackend {
    /// Connect and verify the server answers.
    ///
    /// Fails with [`QueueError::StoreUnavailable`]; nothing works without
    /// the store, so callers should treat this as fatal.
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| QueueError::store_unavailable(format!("invalid Redis URL: {}", e)))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::store_unavailable(e.to_string()))?;

        let backend = Self {
            conn,
            data_key: config.key("data"),
            queue_key: config.key("queue"),
            workers_key: config.key("workers"),
            seq_key: config.key("seq"),
            swap_script: Script::new(SWAP_SCRIPT),
            swap_and_enqueue_script: Script::new(SWAP_AND_ENQUEUE_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        };

        backend
            .ping()
            .await
            .map_err(|e| QueueError::store_unavailable(e.to_string()))?;

        info!("Connected to job store with prefix '{}'", config.key_prefix);
        Ok(backend)
    }

    /// Connect using environment configuration.
    pub async fn from_env() -> QueueResult<Self> {
        Self::connect(&QueueConfig::from_env()).await
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    fn script_outcome(outcome: i64, job_id: &JobId) -> bool {
        match outcome {
            1 => true,
            0 => {
                debug!("Version mismatch on job {}", job_id);
                false
            }
            _ => {
                debug!("Job {} no longer exists", job_id);
                false
            }
        }
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn ping(&self) -> QueueResult<()> {
        let mut conn = self.conn();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn next_seq(&self) -> QueueResult<u64> {
        let mut conn = self.conn();
        let seq: u64 = conn.incr(&self.seq_key, 1).await?;
        Ok(seq)
    }

    async fn insert_queued(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.conn();
        let payload = serde_json::to_string(job)?;
        let entry = QueueEntry::for_job(job);

        redis::pipe()
            .atomic()
            .hset(&self.data_key, job.id.as_str(), payload)
            .ignore()
            .zadd(&self.queue_key, entry.member(), entry.priority)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }

    async fn load_job(&self, job_id: &JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn();
        let payload: Option<String> = conn.hget(&self.data_key, job_id.as_str()).await?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn load_all_jobs(&self) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn();
        let payloads: Vec<String> = conn.hvals(&self.data_key).await?;

        let mut jobs = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match serde_json::from_str::<Job>(&payload) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping unparseable job record: {}", e),
            }
        }

        Ok(jobs)
    }

    async fn swap_job(&self, job: &Job, expected_version: u64) -> QueueResult<bool> {
        let mut conn = self.conn();
        let payload = serde_json::to_string(job)?;

        let outcome: i64 = self
            .swap_script
            .key(&self.data_key)
            .arg(job.id.as_str())
            .arg(expected_version)
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        Ok(Self::script_outcome(outcome, &job.id))
    }

    async fn swap_and_enqueue(
        &self,
        job: &Job,
        expected_version: u64,
        entry: &QueueEntry,
    ) -> QueueResult<bool> {
        let mut conn = self.conn();
        let payload = serde_json::to_string(job)?;

        let outcome: i64 = self
            .swap_and_enqueue_script
            .key(&self.data_key)
            .key(&self.queue_key)
            .arg(job.id.as_str())
            .arg(expected_version)
            .arg(payload)
            .arg(entry.priority)
            .arg(entry.member())
            .invoke_async(&mut conn)
            .await?;

        Ok(Self::script_outcome(outcome, &job.id))
    }

    async fn delete_job(&self, job_id: &JobId, expected_version: u64) -> QueueResult<bool> {
        let mut conn = self.conn();

        let outcome: i64 = self
            .delete_script
            .key(&self.data_key)
            .arg(job_id.as_str())
            .arg(expected_version)
            .invoke_async(&mut conn)
            .await?;

        Ok(Self::script_outcome(outcome, job_id))
    }

    async fn pop_max(&self) -> QueueResult<Option<QueueEntry>> {
        let mut conn = self.conn();
        let popped: Vec<(String, f64)> = conn.zpopmax(&self.queue_key, 1).await?;

        match popped.into_iter().next() {
            Some((member, score)) => Ok(Some(QueueEntry::from_member(&member, score)?)),
            None => Ok(None),
        }
    }

    async fn remove_entry(&self, entry: &QueueEntry) -> QueueResult<bool> {
        let mut conn = self.conn();
        let removed: u64 = conn.zrem(&self.queue_key, entry.member()).await?;
        Ok(removed > 0)
    }

    async fn queue_len(&self) -> QueueResult<u64> {
        let mut conn = self.conn();
        let len: u64 = conn.zcard(&self.queue_key).await?;
        Ok(len)
    }

    async fn record_heartbeat(&self, worker_id: &str, at: DateTime<Utc>) -> QueueResult<()> {
        let mut conn = self.conn();
        conn.hset::<_, _, _, ()>(&self.workers_key, worker_id, at.timestamp_millis())
            .await?;
        Ok(())
    }

    async fn heartbeats(&self) -> QueueResult<Vec<WorkerHeartbeat>> {
        let mut conn = self.conn();
        let raw: HashMap<String, i64> = conn.hgetall(&self.workers_key).await?;

        Ok(raw
            .into_iter()
            .filter_map(|(worker_id, millis)| {
                DateTime::from_timestamp_millis(millis)
                    .map(|at| WorkerHeartbeat::new(worker_id, at))
            })
            .collect())
    }

    async fn remove_heartbeat(&self, worker_id: &str) -> QueueResult<()> {
        let mut conn = self.conn();
        conn.hdel::<_, _, ()>(&self.workers_key, worker_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.redis_url, "redis://localhost:6379");
        assert_eq!(config.key("queue"), "generation_jobs:queue");
    }
}
