//! The durable priority queue: at-most-one-in-flight-per-key job store with atomic
//! leasing, heartbeat-based zombie recovery, and per-namespace fairness.
//!
//! Grounded on the transactional claim pattern of `casparian_sentinel/db/queue.rs`
//! (`UPDATE ... WHERE status = ...` inside a transaction), generalized from a flat
//! FIFO queue to a priority queue with a fairness cap and lease ownership checks.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cf_protocol::{ErrorCode, JobStatus, Priority, StepKind, RETRYABLE_DEFAULT};
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use uuid::Uuid;

/// How many times a job may be reclaimed from a silent worker before it is given up on
/// and moved to a terminal `ERROR` instead of back to `WAITING`.
const MAX_ZOMBIE_RETRIES: i64 = 3;

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub kind: StepKind,
    pub dataset: String,
    pub config: Option<String>,
    pub split: Option<String>,
    pub revision: String,
    pub priority: Priority,
    pub difficulty: i64,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub owner_id: Option<String>,
    pub zombie_count: i64,
}

/// The set of error codes that make a finished job eligible for refresh rather than
/// terminal. Configurable per store instance; defaults to `cf_protocol::RETRYABLE_DEFAULT`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retryable: Vec<ErrorCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retryable: RETRYABLE_DEFAULT.to_vec(),
        }
    }
}

fn sentinel(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn unsentinel(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_dt(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
}

fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> JobRecord {
    JobRecord {
        job_id: row.get(0),
        kind: row.get::<String, _>(1).parse().expect("stored kind is always valid"),
        dataset: row.get(2),
        config: unsentinel(row.get(3)),
        split: unsentinel(row.get(4)),
        revision: row.get(5),
        priority: row.get::<String, _>(6).parse().expect("stored priority is always valid"),
        difficulty: row.get(7),
        status: row.get::<String, _>(8).parse().expect("stored status is always valid"),
        created_at: DateTime::parse_from_rfc3339(&row.get::<String, _>(9))
            .expect("stored timestamp is always valid")
            .with_timezone(&Utc),
        started_at: parse_dt(row.get(10)),
        last_heartbeat_at: parse_dt(row.get(11)),
        finished_at: parse_dt(row.get(12)),
        owner_id: row.get(13),
        zombie_count: row.get(14),
    }
}

const SELECT_COLUMNS: &str = "job_id, kind, dataset, config, split, revision, priority, difficulty, \
     status, created_at, started_at, last_heartbeat_at, finished_at, owner_id, zombie_count";

pub struct QueueStore {
    pool: SqlitePool,
}

impl QueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                dataset TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '',
                split TEXT NOT NULL DEFAULT '',
                revision TEXT NOT NULL,
                priority TEXT NOT NULL,
                difficulty INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                last_heartbeat_at TEXT,
                finished_at TEXT,
                owner_id TEXT,
                zombie_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_inflight ON jobs(kind, dataset, config, split) \
             WHERE status IN ('WAITING', 'STARTED')",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// No-op if a WAITING/STARTED job already exists for the key (invariant 1); raises
    /// its priority if the requested priority is higher and it is still WAITING. Never
    /// lowers priority, and never touches a STARTED job's priority.
    pub async fn upsert(
        &self,
        kind: StepKind,
        dataset: &str,
        config: Option<String>,
        split: Option<String>,
        revision: &str,
        priority: Priority,
        difficulty: i64,
    ) -> anyhow::Result<String> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM jobs WHERE kind = ? AND dataset = ? AND config = ? AND split = ? \
                 AND status IN ('WAITING', 'STARTED')"
            ),
        )
        .bind(kind.as_str())
        .bind(dataset)
        .bind(sentinel(&config))
        .bind(sentinel(&split))
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            let job = row_to_job(&row);
            if job.status == JobStatus::Waiting {
                let raised = job.priority.raised_to(priority);
                if raised != job.priority {
                    sqlx::query("UPDATE jobs SET priority = ? WHERE job_id = ?")
                        .bind(raised.as_str())
                        .bind(&job.job_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
            tx.commit().await?;
            return Ok(job.job_id);
        }

        let job_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, kind, dataset, config, split, revision, priority, difficulty, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'WAITING', ?)
            "#,
        )
        .bind(&job_id)
        .bind(kind.as_str())
        .bind(dataset)
        .bind(sentinel(&config))
        .bind(sentinel(&split))
        .bind(revision)
        .bind(priority.as_str())
        .bind(difficulty)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job_id)
    }

    /// Atomic lease: picks the highest-priority WAITING job among `allowed_kinds` (or any
    /// kind, if `None`) whose dataset namespace has fewer than `max_jobs_per_namespace`
    /// STARTED jobs, and flips it to STARTED. Selection among ties: oldest `created_at`,
    /// then lowest difficulty. Namespace load is a skip filter, not a tiebreak: a
    /// namespace at its cap is passed over entirely rather than merely deprioritized.
    pub async fn start_one(
        &self,
        allowed_kinds: Option<&[StepKind]>,
        worker_id: &str,
        max_jobs_per_namespace: u32,
    ) -> anyhow::Result<Option<JobRecord>> {
        let candidates = self.candidates(allowed_kinds).await?;

        for job in candidates {
            let namespace = cf_protocol::namespace_of(&job.dataset).to_string();
            let started_in_namespace = self.started_count_for_namespace(&namespace).await?;
            if started_in_namespace >= max_jobs_per_namespace as i64 {
                continue;
            }

            let now = Utc::now().to_rfc3339();
            let result = sqlx::query(
                "UPDATE jobs SET status = 'STARTED', owner_id = ?, started_at = ?, last_heartbeat_at = ? \
                 WHERE job_id = ? AND status = 'WAITING'",
            )
            .bind(worker_id)
            .bind(&now)
            .bind(&now)
            .bind(&job.job_id)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                let mut leased = job;
                leased.status = JobStatus::Started;
                leased.owner_id = Some(worker_id.to_string());
                return Ok(Some(leased));
            }
            // Lost the race to another worker; try the next candidate.
        }
        // Every candidate was either raced away or namespace-capped; nothing to offer.
        Ok(None)
    }

    async fn candidates(&self, allowed_kinds: Option<&[StepKind]>) -> anyhow::Result<Vec<JobRecord>> {
        let priority_rank = "CASE priority WHEN 'HIGH' THEN 2 WHEN 'NORMAL' THEN 1 ELSE 0 END";
        let query = match allowed_kinds {
            None => format!(
                "SELECT {SELECT_COLUMNS} FROM jobs WHERE status = 'WAITING' \
                 ORDER BY {priority_rank} DESC, created_at ASC, difficulty ASC LIMIT 50"
            ),
            Some(kinds) => {
                let placeholders = kinds.iter().map(|_| "?").collect::<Vec<_>>().join(",");
                format!(
                    "SELECT {SELECT_COLUMNS} FROM jobs WHERE status = 'WAITING' AND kind IN ({placeholders}) \
                     ORDER BY {priority_rank} DESC, created_at ASC, difficulty ASC LIMIT 50"
                )
            }
        };

        let mut q = sqlx::query(&query);
        if let Some(kinds) = allowed_kinds {
            for kind in kinds {
                q = q.bind(kind.as_str());
            }
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_job).collect())
    }

    async fn started_count_for_namespace(&self, namespace: &str) -> anyhow::Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM jobs WHERE status = 'STARTED' AND (dataset = ? OR dataset LIKE ?)",
        )
        .bind(namespace)
        .bind(format!("{namespace}/%"))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get(0))
    }

    /// Refreshes `last_heartbeat_at` only if `owner_id == worker_id` and the job is STARTED.
    pub async fn heartbeat(&self, job_id: &str, worker_id: &str) -> anyhow::Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE jobs SET last_heartbeat_at = ? WHERE job_id = ? AND owner_id = ? AND status = 'STARTED'",
        )
        .bind(now)
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Whether a WAITING/STARTED job currently occupies the given dispatch key; this is
    /// what `DatasetState`'s `JobState.in_process` reads (invariant 1's "at most one").
    pub async fn counts_in_flight_for_key(
        &self,
        kind: StepKind,
        dataset: &str,
        config: Option<&str>,
        split: Option<&str>,
    ) -> anyhow::Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) FROM jobs WHERE kind = ? AND dataset = ? AND config = ? AND split = ? \
             AND status IN ('WAITING', 'STARTED')",
        )
        .bind(kind.as_str())
        .bind(dataset)
        .bind(config.unwrap_or(""))
        .bind(split.unwrap_or(""))
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.get(0);
        Ok(count > 0)
    }

    /// Transitions STARTED -> `final_status`; rejects (no-op) on owner mismatch or if the
    /// job is not currently STARTED.
    pub async fn finish(&self, job_id: &str, worker_id: &str, final_status: JobStatus) -> anyhow::Result<bool> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE jobs SET status = ?, finished_at = ? WHERE job_id = ? AND owner_id = ? AND status = 'STARTED'",
        )
        .bind(final_status.as_str())
        .bind(now)
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Scans STARTED jobs whose heartbeat has gone silent past `max_silence` and returns
    /// them to WAITING, or to ERROR with `JobRunnerCrashedError` once retried beyond
    /// `MAX_ZOMBIE_RETRIES`. Returns the ids of jobs it touched.
    pub async fn reclaim_zombies(&self, now: DateTime<Utc>, max_silence: ChronoDuration) -> anyhow::Result<Vec<String>> {
        let rows = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE status = 'STARTED'"))
            .fetch_all(&self.pool)
            .await?;

        let mut reclaimed = Vec::new();
        for row in rows {
            let job = row_to_job(&row);
            let Some(last_heartbeat) = job.last_heartbeat_at else {
                continue;
            };
            if now - last_heartbeat <= max_silence {
                continue;
            }

            if job.zombie_count + 1 > MAX_ZOMBIE_RETRIES {
                sqlx::query(
                    "UPDATE jobs SET status = 'ERROR', finished_at = ?, zombie_count = zombie_count + 1 \
                     WHERE job_id = ? AND status = 'STARTED'",
                )
                .bind(now.to_rfc3339())
                .bind(&job.job_id)
                .execute(&self.pool)
                .await?;
            } else {
                sqlx::query(
                    "UPDATE jobs SET status = 'WAITING', owner_id = NULL, started_at = NULL, \
                     last_heartbeat_at = NULL, zombie_count = zombie_count + 1 \
                     WHERE job_id = ? AND status = 'STARTED'",
                )
                .bind(&job.job_id)
                .execute(&self.pool)
                .await?;
            }
            reclaimed.push(job.job_id);
        }
        Ok(reclaimed)
    }

    /// Cancels any in-flight job for the key, used when a dataset is deleted.
    pub async fn cancel_by_key(
        &self,
        kind: StepKind,
        dataset: &str,
        config: Option<&str>,
        split: Option<&str>,
    ) -> anyhow::Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'CANCELLED', finished_at = ? \
             WHERE kind = ? AND dataset = ? AND config = ? AND split = ? AND status IN ('WAITING', 'STARTED')",
        )
        .bind(now)
        .bind(kind.as_str())
        .bind(dataset)
        .bind(config.unwrap_or(""))
        .bind(split.unwrap_or(""))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Cancels every in-flight job for a dataset regardless of kind/config/split, used
    /// when a dataset is deleted or renamed on the hub.
    pub async fn cancel_all_for_dataset(&self, dataset: &str) -> anyhow::Result<u64> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE jobs SET status = 'CANCELLED', finished_at = ? \
             WHERE dataset = ? AND status IN ('WAITING', 'STARTED')",
        )
        .bind(now)
        .bind(dataset)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn counts_by_status(&self) -> anyhow::Result<HashMap<JobStatus, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = HashMap::new();
        for row in rows {
            let status: String = row.get(0);
            let count: i64 = row.get(1);
            if let Ok(status) = status.parse() {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }
}
