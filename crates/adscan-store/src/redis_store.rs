//! Redis-backed job store.
//!
//! Layout under `{prefix}`:
//! - `job:{id}`: JSON job record
//! - `status:{status}`: ZSET of job ids scored by last transition time (ms)
//! - `checkpoints:{id}`: HASH stage -> JSON checkpoint
//! - `attempts:{id}`: LIST of JSON stage attempts
//!
//! Transitions read the record, evaluate the state machine in Rust, then
//! commit with a Lua script that swaps the record only if its `version` is
//! unchanged. A lost race re-reads and re-evaluates.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use tracing::{debug, warn};

use adscan_models::{
    Expected, Job, JobId, JobSpec, JobStatus, JobUpdate, StageAttempt, StageCheckpoint, WorkerId,
};

use crate::error::{StoreError, StoreResult};
use crate::metrics::{record_cas_retry, record_transition, result_label};
use crate::store::{ensure_lease_holder, JobStore, MAX_ATTEMPTS_PER_JOB};

/// Swap the job record if its version matches ARGV[1] and rescore its id in the
/// successor's status set, moving it out of the old set if the status changed.
///
/// Returns 1 on success, 0 on version mismatch, -1 if the job is gone.
const TRANSITION_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local stored = cjson.decode(current)
if tonumber(stored['version']) ~= tonumber(ARGV[1]) then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
if KEYS[2] ~= KEYS[3] then
  redis.call('ZREM', KEYS[2], ARGV[3])
end
redis.call('ZADD', KEYS[3], ARGV[4], ARGV[3])
return 1
"#;

/// Write a checkpoint only while ARGV[1] holds the processing lease.
const CHECKPOINT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
local job = cjson.decode(current)
if job['status'] ~= 'processing' or type(job['lease']) ~= 'table' or job['lease']['owner'] ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[2], ARGV[2], ARGV[3])
return 1
"#;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key namespace
    pub key_prefix: String,
    /// Re-read attempts after a lost version race
    pub cas_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "adscan".to_string(),
            cas_retries: 5,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "adscan".to_string()),
            cas_retries: std::env::var("STORE_CAS_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        }
    }
}

/// Job store on Redis.
pub struct RedisJobStore {
    client: redis::Client,
    config: StoreConfig,
    transition_script: redis::Script,
    checkpoint_script: redis::Script,
}

impl RedisJobStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            transition_script: redis::Script::new(TRANSITION_SCRIPT),
            checkpoint_script: redis::Script::new(CHECKPOINT_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(StoreConfig::from_env())
    }

    fn job_key(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.config.key_prefix, id)
    }

    fn status_key(&self, status: JobStatus) -> String {
        format!("{}:status:{}", self.config.key_prefix, status)
    }

    fn checkpoints_key(&self, id: &JobId) -> String {
        format!("{}:checkpoints:{}", self.config.key_prefix, id)
    }

    fn attempts_key(&self, id: &JobId) -> String {
        format!("{}:attempts:{}", self.config.key_prefix, id)
    }

    async fn load(&self, conn: &mut redis::aio::MultiplexedConnection, id: &JobId) -> StoreResult<Job> {
        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        let raw = raw.ok_or_else(|| StoreError::not_found(id))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn try_transition(
        &self,
        id: &JobId,
        expected: &Expected,
        next: JobStatus,
        update: &JobUpdate,
    ) -> StoreResult<Job> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        for attempt in 0..=self.config.cas_retries {
            let current = self.load(&mut conn, id).await?;
            let successor = current.apply_transition(expected, next, update.clone(), Utc::now())?;
            let payload = serde_json::to_string(&successor)?;

            let swapped: i64 = self
                .transition_script
                .key(self.job_key(id))
                .key(self.status_key(current.status))
                .key(self.status_key(successor.status))
                .arg(current.version)
                .arg(payload)
                .arg(id.as_str())
                .arg(successor.updated_at.timestamp_millis())
                .invoke_async(&mut conn)
                .await?;

            match swapped {
                1 => return Ok(successor),
                -1 => return Err(StoreError::not_found(id)),
                _ => {
                    debug!(job_id = %id, attempt, "Version moved during transition, re-reading");
                    record_cas_retry("transition");
                }
            }
        }

        warn!(job_id = %id, "Giving up on transition after repeated version conflicts");
        Err(StoreError::Contention(id.clone()))
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, spec: JobSpec) -> StoreResult<JobId> {
        spec.validate().map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        let job = Job::new(spec, Utc::now());
        let payload = serde_json::to_string(&job)?;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.job_key(&job.id))
            .arg(payload)
            .arg("NX")
            .ignore()
            .cmd("ZADD")
            .arg(self.status_key(JobStatus::Pending))
            .arg(job.updated_at.timestamp_millis())
            .arg(job.id.as_str())
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %job.id, platform = %job.platform, "Created job");
        Ok(job.id)
    }

    async fn get(&self, id: &JobId) -> StoreResult<Job> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        self.load(&mut conn, id).await
    }

    async fn transition(
        &self,
        id: &JobId,
        expected: Expected,
        next: JobStatus,
        update: JobUpdate,
    ) -> StoreResult<Job> {
        let result = self.try_transition(id, &expected, next, &update).await;
        record_transition(next.as_str(), result_label(&result));
        result
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> StoreResult<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ids: Vec<String> = conn.zrange(self.status_key(status), 0, limit as isize - 1).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.job_key(&JobId::from_string(id.as_str()))).collect();
        let raws: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;

        let mut jobs = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            let job: Job = serde_json::from_str(&raw)?;
            // The index can trail the record by one transition.
            if job.status == status {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn save_checkpoint(&self, id: &JobId, owner: &WorkerId, checkpoint: StageCheckpoint) -> StoreResult<()> {
        let payload = serde_json::to_string(&checkpoint)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let written: i64 = self
            .checkpoint_script
            .key(self.job_key(id))
            .key(self.checkpoints_key(id))
            .arg(owner.as_str())
            .arg(checkpoint.stage.as_str())
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        match written {
            1 => Ok(()),
            -1 => Err(StoreError::not_found(id)),
            _ => {
                // Produce the same message the in-memory store does.
                let job = self.load(&mut conn, id).await?;
                ensure_lease_holder(&job, owner)?;
                Err(StoreError::stale(format!("checkpoint for job {id} rejected")))
            }
        }
    }

    async fn checkpoints(&self, id: &JobId) -> StoreResult<Vec<StageCheckpoint>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raws: Vec<String> = conn.hvals(self.checkpoints_key(id)).await?;

        let mut checkpoints = raws
            .iter()
            .map(|raw| serde_json::from_str::<StageCheckpoint>(raw))
            .collect::<Result<Vec<_>, _>>()?;
        checkpoints.sort_by_key(|c| c.stage);
        Ok(checkpoints)
    }

    async fn record_attempt(&self, id: &JobId, attempt: StageAttempt) -> StoreResult<()> {
        let payload = serde_json::to_string(&attempt)?;
        let key = self.attempts_key(id);
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let _: () = redis::pipe()
            .atomic()
            .rpush(&key, payload)
            .ignore()
            .ltrim(&key, -(MAX_ATTEMPTS_PER_JOB as isize), -1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn attempts(&self, id: &JobId) -> StoreResult<Vec<StageAttempt>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raws: Vec<String> = conn.lrange(self.attempts_key(id), 0, -1).await?;
        raws.iter()
            .map(|raw| serde_json::from_str(raw).map_err(StoreError::from))
            .collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
