//! Redis-backed job queue (durable, at-least-once delivery).
//!
//! ## Keys
//!
//! For queue `logs` under the default prefix:
//!
//! - `clientdesk:logs:job:<id>`: job document (JSON)
//! - `clientdesk:logs:wait`: list of ready job ids (LPUSH in, RPOPLPUSH out)
//! - `clientdesk:logs:active`: list of claimed job ids
//! - `clientdesk:logs:leases`: sorted set of claimed job ids scored by lease expiry (ms)
//! - `clientdesk:logs:delayed`: sorted set of job ids scored by due time (ms)
//! - `clientdesk:logs:completed` / `clientdesk:logs:failed`: sorted sets scored by finish time
//!
//! Every move of a job id between these keys is one Lua script, so an id is
//! always in exactly one of wait, active, delayed, completed or failed. A claim
//! writes its lease in the same script that moves the id to `active`; if the
//! worker dies before the job document is updated, the lease still expires and
//! the stalled sweep releases the id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};

use super::queue::{JobQueue, QueueError};
use super::types::{Job, JobCounts, JobId, JobOptions, JobState, to_chrono};

/// Default key prefix
const DEFAULT_PREFIX: &str = "clientdesk";

/// Upper bound on delayed jobs promoted per claim
const PROMOTE_BATCH: usize = 100;

/// Moves due delayed ids to the wait list.
///
/// KEYS: delayed, wait. ARGV: now (ms), batch size.
const PROMOTE_LUA: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[1], id)
  redis.call('LPUSH', KEYS[2], id)
end
return #due
"#;

/// Moves the oldest waiting id to `active` and records its lease.
///
/// KEYS: wait, active, leases. ARGV: lease expiry (ms).
const CLAIM_LUA: &str = r#"
local id = redis.call('RPOPLPUSH', KEYS[1], KEYS[2])
if not id then
  return false
end
redis.call('ZADD', KEYS[3], ARGV[1], id)
return id
"#;

/// Writes the post-attempt document and moves the id out of `active`, provided
/// the stored document is still the claim being settled.
///
/// KEYS: job, active, leases, destination. ARGV: id, attempts, document,
/// `zadd` | `lpush`, score.
const SETTLE_LUA: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return 0
end
local current = cjson.decode(raw)
if current['state'] ~= 'active' or tonumber(current['attempts']) ~= tonumber(ARGV[2]) then
  return 0
end
if redis.call('LREM', KEYS[2], 1, ARGV[1]) == 0 then
  return 0
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('SET', KEYS[1], ARGV[3])
if ARGV[4] == 'zadd' then
  redis.call('ZADD', KEYS[4], ARGV[5], ARGV[1])
else
  redis.call('LPUSH', KEYS[4], ARGV[1])
end
return 1
"#;

/// Releases one expired claim. The document must still be the one the caller
/// read; an empty replacement document drops the id.
///
/// KEYS: job, active, leases, destination. ARGV: id, now (ms), expected
/// document, new document, `zadd` | `rpush`, score.
/// Returns 1 when released, 0 when the lease is gone or not yet expired, -1
/// when the document changed underneath.
const RECOVER_LUA: &str = r#"
local expiry = redis.call('ZSCORE', KEYS[3], ARGV[1])
if not expiry or tonumber(expiry) > tonumber(ARGV[2]) then
  return 0
end
if (redis.call('GET', KEYS[1]) or '') ~= ARGV[3] then
  return -1
end
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('LREM', KEYS[2], 1, ARGV[1])
if ARGV[4] == '' then
  return 1
end
redis.call('SET', KEYS[1], ARGV[4])
if ARGV[5] == 'zadd' then
  redis.call('ZADD', KEYS[4], ARGV[6], ARGV[1])
else
  redis.call('RPUSH', KEYS[4], ARGV[1])
end
return 1
"#;

/// Moves a failed id back to the wait list with a reset document.
///
/// KEYS: failed, job, wait. ARGV: id, document.
const RETRY_LUA: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('SET', KEYS[2], ARGV[2])
redis.call('LPUSH', KEYS[3], ARGV[1])
return 1
"#;

struct Scripts {
    promote: redis::Script,
    claim: redis::Script,
    settle: redis::Script,
    recover: redis::Script,
    retry: redis::Script,
}

impl Scripts {
    fn new() -> Self {
        Self {
            promote: redis::Script::new(PROMOTE_LUA),
            claim: redis::Script::new(CLAIM_LUA),
            settle: redis::Script::new(SETTLE_LUA),
            recover: redis::Script::new(RECOVER_LUA),
            retry: redis::Script::new(RETRY_LUA),
        }
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    prefix: String,
    scripts: Arc<Scripts>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl RedisJobQueue {
    /// Connect to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `connect_timeout` - bound on establishing the initial connection
    pub async fn connect(redis_url: &str, connect_timeout: Duration) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| QueueError::Timeout(connect_timeout))??;

        Ok(Self {
            conn,
            prefix: DEFAULT_PREFIX.to_string(),
            scripts: Arc::new(Scripts::new()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, queue: &str, suffix: &str) -> String {
        format!("{}:{}:{}", self.prefix, queue, suffix)
    }

    fn job_key(&self, queue: &str, id: impl std::fmt::Display) -> String {
        format!("{}:{}:job:{}", self.prefix, queue, id)
    }

    fn conn(&self) -> Result<ConnectionManager, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Unavailable("queue closed".to_string()));
        }
        Ok(self.conn.clone())
    }

    async fn load_raw(&self, conn: &mut ConnectionManager, queue: &str, id: impl std::fmt::Display) -> Result<Option<String>, QueueError> {
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.job_key(queue, id))
            .query_async(conn)
            .await?;
        Ok(raw)
    }

    async fn load(&self, conn: &mut ConnectionManager, queue: &str, id: JobId) -> Result<Option<Job>, QueueError> {
        let raw = self.load_raw(conn, queue, id).await?;
        raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
    }

    async fn store(&self, conn: &mut ConnectionManager, job: &Job) -> Result<(), QueueError> {
        let doc = serde_json::to_string(job)?;
        redis::cmd("SET")
            .arg(self.job_key(&job.queue, job.id))
            .arg(doc)
            .query_async::<_, ()>(conn)
            .await?;
        Ok(())
    }

    async fn load_many(&self, conn: &mut ConnectionManager, queue: &str, ids: Vec<String>) -> Result<Vec<Job>, QueueError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids.iter().map(|id| self.job_key(queue, id)).collect();
        let docs: Vec<Option<String>> = redis::cmd("MGET").arg(keys).query_async(conn).await?;

        let mut jobs = Vec::with_capacity(docs.len());
        for doc in docs.into_iter().flatten() {
            jobs.push(serde_json::from_str(&doc)?);
        }
        Ok(jobs)
    }

    /// Move due delayed jobs onto the wait list.
    async fn promote_delayed(&self, conn: &mut ConnectionManager, queue: &str) -> Result<(), QueueError> {
        self.scripts
            .promote
            .key(self.key(queue, "delayed"))
            .key(self.key(queue, "wait"))
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .invoke_async::<_, i64>(conn)
            .await?;
        Ok(())
    }

    /// Take the next waiting id and hold it for `lease`. The job document is
    /// not touched.
    async fn reserve(&self, conn: &mut ConnectionManager, queue: &str, lease: Duration) -> Result<Option<String>, QueueError> {
        let expires_at = Utc::now() + to_chrono(lease);
        let id: Option<String> = self
            .scripts
            .claim
            .key(self.key(queue, "wait"))
            .key(self.key(queue, "active"))
            .key(self.key(queue, "leases"))
            .arg(expires_at.timestamp_millis())
            .invoke_async(conn)
            .await?;
        Ok(id)
    }

    /// Release one expired claim. Returns whether it was released.
    async fn release_stalled(&self, conn: &mut ConnectionManager, queue: &str, raw_id: &str) -> Result<bool, QueueError> {
        let current = self.load_raw(conn, queue, raw_id).await?;

        let (next_doc, mode, score, destination) = match &current {
            None => {
                warn!(job_id = %raw_id, queue = %queue, "leased id has no job document, dropping");
                (String::new(), "rpush", 0, self.key(queue, "wait"))
            }
            Some(raw) => {
                let mut job: Job = serde_json::from_str(raw)?;
                if job.mark_stalled() {
                    (serde_json::to_string(&job)?, "rpush", 0, self.key(queue, "wait"))
                } else {
                    warn!(job_id = %job.id, queue = %queue, attempts = job.attempts, "job stalled on its final attempt");
                    let finished_ms = job.finished_at.unwrap_or_else(Utc::now).timestamp_millis();
                    (serde_json::to_string(&job)?, "zadd", finished_ms, self.key(queue, "failed"))
                }
            }
        };

        let released: i64 = self
            .scripts
            .recover
            .key(self.job_key(queue, raw_id))
            .key(self.key(queue, "active"))
            .key(self.key(queue, "leases"))
            .key(destination)
            .arg(raw_id)
            .arg(Utc::now().timestamp_millis())
            .arg(current.unwrap_or_default())
            .arg(next_doc)
            .arg(mode)
            .arg(score)
            .invoke_async(conn)
            .await?;

        if released < 0 {
            debug!(job_id = %raw_id, queue = %queue, "job changed during stalled sweep, retrying next sweep");
        }
        Ok(released == 1)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    #[instrument(skip(self, payload, options), fields(queue = %queue), err)]
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: JsonValue,
        options: &JobOptions,
    ) -> Result<JobId, QueueError> {
        let mut conn = self.conn()?;
        let job = Job::new(queue, name, payload, options);
        let doc = serde_json::to_string(&job)?;

        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.job_key(queue, job.id))
            .arg(doc)
            .ignore()
            .cmd("LPUSH")
            .arg(self.key(queue, "wait"))
            .arg(job.id.to_string())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!(job_id = %job.id, "job enqueued");
        Ok(job.id)
    }

    async fn claim_next(&self, queue: &str, lease: Duration) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn()?;
        self.promote_delayed(&mut conn, queue).await?;

        let Some(raw_id) = self.reserve(&mut conn, queue, lease).await? else {
            return Ok(None);
        };

        let id: JobId = raw_id
            .parse()
            .map_err(|e: uuid::Error| QueueError::Serialization(e.to_string()))?;
        let Some(mut job) = self.load(&mut conn, queue, id).await? else {
            warn!(job_id = %id, queue = %queue, "claimed id has no job document, dropping");
            redis::pipe()
                .atomic()
                .cmd("LREM")
                .arg(self.key(queue, "active"))
                .arg(1)
                .arg(&raw_id)
                .ignore()
                .cmd("ZREM")
                .arg(self.key(queue, "leases"))
                .arg(&raw_id)
                .ignore()
                .query_async::<_, ()>(&mut conn)
                .await?;
            return Ok(None);
        };

        // If this write fails the lease still expires and the sweep releases the id.
        job.mark_active(lease);
        self.store(&mut conn, &job).await?;
        Ok(Some(job))
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, queue = %job.queue, state = job.state.as_str()), err)]
    async fn settle(&self, job: &Job) -> Result<(), QueueError> {
        let mut conn = self.conn()?;
        let id = job.id.to_string();

        let (mode, score, destination) = match (job.state, job.scheduled_at) {
            (JobState::Completed, _) => (
                "zadd",
                job.finished_at.unwrap_or_else(Utc::now).timestamp_millis(),
                self.key(&job.queue, "completed"),
            ),
            (JobState::Failed, _) => (
                "zadd",
                job.finished_at.unwrap_or_else(Utc::now).timestamp_millis(),
                self.key(&job.queue, "failed"),
            ),
            (JobState::Waiting, Some(at)) => ("zadd", at.timestamp_millis(), self.key(&job.queue, "delayed")),
            (JobState::Waiting, None) => ("lpush", 0, self.key(&job.queue, "wait")),
            (JobState::Active, _) => {
                return Err(QueueError::InvalidState(format!("job {} settled while active", job.id)));
            }
        };

        let settled: i64 = self
            .scripts
            .settle
            .key(self.job_key(&job.queue, job.id))
            .key(self.key(&job.queue, "active"))
            .key(self.key(&job.queue, "leases"))
            .key(destination)
            .arg(&id)
            .arg(job.attempts)
            .arg(serde_json::to_string(job)?)
            .arg(mode)
            .arg(score)
            .invoke_async(&mut conn)
            .await?;

        if settled == 0 {
            return Err(QueueError::InvalidState(format!(
                "job {} is no longer held by this attempt",
                job.id
            )));
        }
        Ok(())
    }

    async fn recover_stalled(&self, queue: &str) -> Result<usize, QueueError> {
        let mut conn = self.conn()?;
        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.key(queue, "leases"))
            .arg("-inf")
            .arg(Utc::now().timestamp_millis())
            .query_async(&mut conn)
            .await?;

        let mut released = 0;
        for raw_id in expired {
            if self.release_stalled(&mut conn, queue, &raw_id).await? {
                released += 1;
            }
        }
        Ok(released)
    }

    async fn get(&self, queue: &str, id: JobId) -> Result<Option<Job>, QueueError> {
        let mut conn = self.conn()?;
        self.load(&mut conn, queue, id).await
    }

    async fn counts(&self, queue: &str) -> Result<JobCounts, QueueError> {
        let mut conn = self.conn()?;
        let (waiting, active, delayed, completed, failed): (u64, u64, u64, u64, u64) = redis::pipe()
            .cmd("LLEN")
            .arg(self.key(queue, "wait"))
            .cmd("LLEN")
            .arg(self.key(queue, "active"))
            .cmd("ZCARD")
            .arg(self.key(queue, "delayed"))
            .cmd("ZCARD")
            .arg(self.key(queue, "completed"))
            .cmd("ZCARD")
            .arg(self.key(queue, "failed"))
            .query_async(&mut conn)
            .await?;

        Ok(JobCounts {
            waiting,
            delayed,
            active,
            completed,
            failed,
        })
    }

    async fn list(&self, queue: &str, state: JobState, limit: usize) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.conn()?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = limit as isize - 1;

        let ids: Vec<String> = match state {
            JobState::Waiting => {
                let mut ids: Vec<String> = redis::cmd("LRANGE")
                    .arg(self.key(queue, "wait"))
                    .arg(0)
                    .arg(stop)
                    .query_async(&mut conn)
                    .await?;
                let delayed: Vec<String> = redis::cmd("ZRANGE")
                    .arg(self.key(queue, "delayed"))
                    .arg(0)
                    .arg(stop)
                    .query_async(&mut conn)
                    .await?;
                ids.extend(delayed);
                ids.truncate(limit);
                ids
            }
            JobState::Active => {
                redis::cmd("LRANGE")
                    .arg(self.key(queue, "active"))
                    .arg(0)
                    .arg(stop)
                    .query_async(&mut conn)
                    .await?
            }
            JobState::Completed | JobState::Failed => {
                redis::cmd("ZREVRANGE")
                    .arg(self.key(queue, state.as_str()))
                    .arg(0)
                    .arg(stop)
                    .query_async(&mut conn)
                    .await?
            }
        };

        self.load_many(&mut conn, queue, ids).await
    }

    #[instrument(skip(self), fields(queue = %queue, job_id = %id), err)]
    async fn retry_failed(&self, queue: &str, id: JobId) -> Result<Job, QueueError> {
        let mut conn = self.conn()?;
        let Some(mut job) = self.load(&mut conn, queue, id).await? else {
            return Err(QueueError::NotFound(id));
        };

        let state = job.state;
        job.reset_for_retry();

        let moved: i64 = self
            .scripts
            .retry
            .key(self.key(queue, "failed"))
            .key(self.job_key(queue, id))
            .key(self.key(queue, "wait"))
            .arg(id.to_string())
            .arg(serde_json::to_string(&job)?)
            .invoke_async(&mut conn)
            .await?;
        if moved == 0 {
            return Err(QueueError::InvalidState(format!(
                "job {id} is {}, only failed jobs can be retried",
                state.as_str()
            )));
        }
        Ok(job)
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
