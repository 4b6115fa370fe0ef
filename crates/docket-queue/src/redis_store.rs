//! Redis-backed job and document stores.
//!
//! Rows are hashes whose fields hold JSON-encoded values. Pending jobs are
//! indexed in a sorted set ordered by priority then age; claimed jobs in a
//! second sorted set scored by claim time. Claims and status transitions
//! run as Lua scripts so each is a single atomic conditional update.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docket_models::{
    Document, DocumentId, DocumentStatus, Extraction, Job, JobId, JobStatus, LeaseId, NewJob,
};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::store::{DocumentStore, JobStore};

/// Stale index entries skipped per `find_next_pending` call.
const MAX_STALE_SKIPS: usize = 8;

/// Priorities beyond this still order correctly but lose millisecond FIFO.
const PRIORITY_SCORE_CLAMP: i32 = 500;

/// Moves a job from pending to processing if it is still pending.
///
/// KEYS: job hash, pending index, processing index
/// ARGV: id, expected status, new status, started_at, started_ms, lease
const CLAIM_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then return -1 end
if current ~= ARGV[2] then return 0 end
redis.call('HSET', KEYS[1], 'status', ARGV[3], 'started_at', ARGV[4], 'lease_id', ARGV[6])
redis.call('ZREM', KEYS[2], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[5], ARGV[1])
return 1
"#;

/// Applies field updates to a processing job held under the given lease and
/// leaves the lease index.
///
/// KEYS: job hash, pending index, processing index
/// ARGV: id, expected status, expected lease, pending score or '', then
/// field/value pairs (an empty value deletes the field)
const TRANSITION_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then return -1 end
if current ~= ARGV[2] then return 0 end
if redis.call('HGET', KEYS[1], 'lease_id') ~= ARGV[3] then return -2 end
for i = 5, #ARGV, 2 do
  if ARGV[i + 1] == '' then
    redis.call('HDEL', KEYS[1], ARGV[i])
  else
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
  end
end
redis.call('ZREM', KEYS[3], ARGV[1])
if ARGV[4] ~= '' then
  redis.call('ZADD', KEYS[2], ARGV[4], ARGV[1])
end
return 1
"#;

/// Updates fields of an existing hash.
///
/// KEYS: row hash
/// ARGV: field/value pairs (an empty value deletes the field)
const UPDATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
for i = 1, #ARGV, 2 do
  if ARGV[i + 1] == '' then
    redis.call('HDEL', KEYS[1], ARGV[i])
  else
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
  end
end
return 1
"#;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "docket".to_string(),
        }
    }
}

impl RedisStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        }
    }

    pub async fn connect(&self) -> QueueResult<MultiplexedConnection> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))?;
        info!(prefix = %self.key_prefix, "Connected to Redis");
        Ok(conn)
    }
}

#[derive(Debug, Clone)]
struct KeySpace {
    prefix: String,
}

impl KeySpace {
    fn job(&self, id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, id)
    }

    fn pending(&self) -> String {
        format!("{}:jobs:pending", self.prefix)
    }

    fn processing(&self) -> String {
        format!("{}:jobs:processing", self.prefix)
    }

    fn document(&self, id: &DocumentId) -> String {
        format!("{}:doc:{}", self.prefix, id)
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> QueueResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// Flatten a struct into `(field, json)` pairs.
pub(crate) fn encode_fields<T: Serialize>(value: &T) -> QueueResult<Vec<(String, String)>> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map
            .into_iter()
            .map(|(field, value)| (field, value.to_string()))
            .collect()),
        other => Err(QueueError::corrupt(
            "<encode>",
            format!("expected an object, got {other}"),
        )),
    }
}

/// Rebuild a struct from `(field, json)` pairs.
pub(crate) fn decode_fields<T: DeserializeOwned>(
    key: &str,
    fields: HashMap<String, String>,
) -> QueueResult<T> {
    let mut map = serde_json::Map::with_capacity(fields.len());
    for (field, raw) in fields {
        let value = serde_json::from_str(&raw)
            .map_err(|e| QueueError::corrupt(key, format!("field {field}: {e}")))?;
        map.insert(field, value);
    }
    serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| QueueError::corrupt(key, e.to_string()))
}

/// Sort key for the pending index: higher priority first, then older first.
pub(crate) fn pending_score(priority: i32, created_at: DateTime<Utc>) -> f64 {
    let priority = priority.clamp(-PRIORITY_SCORE_CLAMP, PRIORITY_SCORE_CLAMP) as f64;
    -priority * 1e13 + created_at.timestamp_millis() as f64
}

/// One field update for a script: `None` deletes the field.
type FieldUpdate = (&'static str, Option<String>);

/// Job store in Redis.
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    keys: KeySpace,
    claim_script: Script,
    transition_script: Script,
}

impl RedisJobStore {
    pub fn new(conn: MultiplexedConnection, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            keys: KeySpace {
                prefix: key_prefix.into(),
            },
            claim_script: Script::new(CLAIM_SCRIPT),
            transition_script: Script::new(TRANSITION_SCRIPT),
        }
    }

    pub async fn connect(config: &RedisStoreConfig) -> QueueResult<Self> {
        Ok(Self::new(config.connect().await?, config.key_prefix.clone()))
    }

    async fn transition(
        &self,
        id: &JobId,
        lease: &LeaseId,
        to: JobStatus,
        requeue_score: Option<f64>,
        updates: Vec<FieldUpdate>,
    ) -> QueueResult<()> {
        let key = self.keys.job(id);
        let mut conn = self.conn.clone();

        let mut invocation = self.transition_script.prepare_invoke();
        invocation
            .key(&key)
            .key(self.keys.pending())
            .key(self.keys.processing())
            .arg(id.as_str())
            .arg(encode(&JobStatus::Processing)?)
            .arg(encode(lease)?)
            .arg(requeue_score.map(|s| s.to_string()).unwrap_or_default())
            .arg("status")
            .arg(encode(&to)?);
        for (field, value) in updates {
            invocation.arg(field).arg(value.unwrap_or_default());
        }

        let code: i32 = invocation.invoke_async(&mut conn).await?;
        match code {
            1 => {
                debug!(job_id = %id, to = %to, "Job transitioned");
                Ok(())
            }
            -1 => Err(QueueError::job_not_found(id.as_str())),
            -2 => Err(QueueError::lease_lost(id.as_str())),
            _ => {
                let current: Option<String> = conn.hget(&key, "status").await?;
                let from = current
                    .and_then(|raw| serde_json::from_str::<JobStatus>(&raw).ok())
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                Err(QueueError::invalid_transition(id.as_str(), from, to))
            }
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, job: NewJob) -> QueueResult<Job> {
        let job = job.into_job(Utc::now());
        let fields = encode_fields(&job)?;
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(self.keys.job(&job.id), fields.as_slice())
            .ignore()
            .zadd(
                self.keys.pending(),
                job.id.as_str(),
                pending_score(job.priority, job.created_at),
            )
            .ignore()
            .query_async(&mut conn)
            .await?;

        debug!(job_id = %job.id, job_type = %job.job_type, "Enqueued job");
        Ok(job)
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let key = self.keys.job(id);
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_fields(&key, fields).map(Some)
    }

    async fn find_next_pending(&self) -> QueueResult<Option<Job>> {
        let mut conn = self.conn.clone();

        for _ in 0..MAX_STALE_SKIPS {
            let head: Vec<String> = conn.zrange(self.keys.pending(), 0, 0).await?;
            let Some(id) = head.into_iter().next() else {
                return Ok(None);
            };

            match self.get(&JobId::from_string(id.as_str())).await? {
                Some(job) if job.status == JobStatus::Pending => return Ok(Some(job)),
                _ => {
                    warn!(job_id = %id, "Dropping stale pending index entry");
                    let _: () = conn.zrem(self.keys.pending(), &id).await?;
                }
            }
        }

        Ok(None)
    }

    async fn try_claim(
        &self,
        id: &JobId,
        lease: &LeaseId,
        now: DateTime<Utc>,
    ) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let code: i32 = self
            .claim_script
            .key(self.keys.job(id))
            .key(self.keys.pending())
            .key(self.keys.processing())
            .arg(id.as_str())
            .arg(encode(&JobStatus::Pending)?)
            .arg(encode(&JobStatus::Processing)?)
            .arg(encode(&now)?)
            .arg(now.timestamp_millis())
            .arg(encode(lease)?)
            .invoke_async(&mut conn)
            .await?;

        Ok(code == 1)
    }

    async fn complete(&self, id: &JobId, lease: &LeaseId, now: DateTime<Utc>) -> QueueResult<()> {
        self.transition(
            id,
            lease,
            JobStatus::Complete,
            None,
            vec![
                ("completed_at", Some(encode(&now)?)),
                ("error_message", None),
            ],
        )
        .await
    }

    async fn requeue(
        &self,
        id: &JobId,
        lease: &LeaseId,
        attempts: u32,
        error: &str,
    ) -> QueueResult<()> {
        let job = self
            .get(id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(id.as_str()))?;

        self.transition(
            id,
            lease,
            JobStatus::Pending,
            Some(pending_score(job.priority, job.created_at)),
            vec![
                ("attempts", Some(encode(&attempts)?)),
                ("error_message", Some(encode(error)?)),
                ("started_at", None),
                ("lease_id", None),
            ],
        )
        .await
    }

    async fn fail(
        &self,
        id: &JobId,
        lease: &LeaseId,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        self.transition(
            id,
            lease,
            JobStatus::Failed,
            None,
            vec![
                ("attempts", Some(encode(&attempts)?)),
                ("error_message", Some(encode(error)?)),
                ("completed_at", Some(encode(&now)?)),
            ],
        )
        .await
    }

    async fn expired_leases(&self, started_before: DateTime<Utc>) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        // Exclusive upper bound
        let max = format!("({}", started_before.timestamp_millis());
        let ids: Vec<String> = conn
            .zrangebyscore(self.keys.processing(), "-inf", max)
            .await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get(&JobId::from_string(id)).await? {
                if job.status == JobStatus::Processing {
                    jobs.push(job);
                }
            }
        }
        Ok(jobs)
    }
}

/// Document store in Redis.
pub struct RedisDocumentStore {
    conn: MultiplexedConnection,
    keys: KeySpace,
    update_script: Script,
}

impl RedisDocumentStore {
    pub fn new(conn: MultiplexedConnection, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            keys: KeySpace {
                prefix: key_prefix.into(),
            },
            update_script: Script::new(UPDATE_SCRIPT),
        }
    }

    pub async fn connect(config: &RedisStoreConfig) -> QueueResult<Self> {
        Ok(Self::new(config.connect().await?, config.key_prefix.clone()))
    }

    async fn update(&self, id: &DocumentId, mut updates: Vec<FieldUpdate>) -> QueueResult<()> {
        updates.push(("updated_at", Some(encode(&Utc::now())?)));

        let mut conn = self.conn.clone();
        let mut invocation = self.update_script.prepare_invoke();
        invocation.key(self.keys.document(id));
        for (field, value) in updates {
            invocation.arg(field).arg(value.unwrap_or_default());
        }

        let code: i32 = invocation.invoke_async(&mut conn).await?;
        if code == 1 {
            Ok(())
        } else {
            Err(QueueError::document_not_found(id.as_str()))
        }
    }
}

#[async_trait]
impl DocumentStore for RedisDocumentStore {
    async fn insert(&self, document: Document) -> QueueResult<()> {
        let key = self.keys.document(&document.id);
        let fields = encode_fields(&document)?;
        let mut conn = self.conn.clone();

        let _: () = redis::pipe()
            .atomic()
            .del(&key)
            .ignore()
            .hset_multiple(&key, fields.as_slice())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &DocumentId) -> QueueResult<Option<Document>> {
        let key = self.keys.document(id);
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_fields(&key, fields).map(Some)
    }

    async fn save_extraction(
        &self,
        id: &DocumentId,
        extraction: &Extraction,
        content_hash: &str,
    ) -> QueueResult<()> {
        self.update(
            id,
            vec![
                ("extracted_text", Some(encode(&extraction.text)?)),
                ("chunks", Some(encode(&extraction.chunks)?)),
                ("content_hash", Some(encode(content_hash)?)),
            ],
        )
        .await
    }

    async fn save_analysis(
        &self,
        id: &DocumentId,
        analysis: &serde_json::Value,
    ) -> QueueResult<()> {
        self.update(id, vec![("analysis", Some(encode(analysis)?))])
            .await
    }

    async fn save_transcript(
        &self,
        id: &DocumentId,
        transcript: &str,
        content_hash: &str,
    ) -> QueueResult<()> {
        self.update(
            id,
            vec![
                ("transcript", Some(encode(transcript)?)),
                ("content_hash", Some(encode(content_hash)?)),
            ],
        )
        .await
    }

    async fn set_progress(&self, id: &DocumentId, progress: u8) -> QueueResult<()> {
        self.update(id, vec![("progress", Some(encode(&progress.min(100))?))])
            .await
    }

    async fn set_status(&self, id: &DocumentId, status: DocumentStatus) -> QueueResult<()> {
        let mut updates = vec![("status", Some(encode(&status)?))];
        if status != DocumentStatus::Failed {
            updates.push(("error_message", None));
        }
        self.update(id, updates).await
    }

    async fn mark_failed(&self, id: &DocumentId, message: &str) -> QueueResult<()> {
        self.update(
            id,
            vec![
                ("status", Some(encode(&DocumentStatus::Failed)?)),
                ("error_message", Some(encode(message)?)),
            ],
        )
        .await
    }
}
