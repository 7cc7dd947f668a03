//! The durable cache store: a `(kind, dataset, config, split)` -> artifact mapping with
//! conditional upsert, backed by sqlite through `sqlx`. Grounded on the transactional
//! claim pattern of `casparian_sentinel/db/queue.rs`, adapted from job claiming to
//! revision/version-conditioned writes.

use std::collections::HashSet;

use cf_protocol::{ErrorCode, StepKind};
use sqlx::{sqlite::SqlitePool, Row};

/// `config`/`split` are stored as an empty-string sentinel rather than `NULL`, since
/// SQLite's uniqueness semantics treat distinct `NULL`s as non-equal — the same
/// dash-placeholder convention `ArtifactKey::Display` uses.
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

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub kind: StepKind,
    pub dataset: String,
    pub config: Option<String>,
    pub split: Option<String>,
    pub revision: String,
    pub content: Vec<u8>,
    pub http_status: u16,
    pub error_code: Option<ErrorCode>,
    pub details: Option<Vec<u8>>,
    pub progress: f64,
    pub job_runner_version: i64,
    pub attempts: i64,
    pub updated_at: String,
}

impl CacheEntry {
    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }
}

/// Cheap variant of [`CacheEntry`] that omits the content blob, used by hot paths
/// (planning, fan-out) that only need status/revision/version/progress.
#[derive(Debug, Clone)]
pub struct CacheHeader {
    pub kind: StepKind,
    pub dataset: String,
    pub config: Option<String>,
    pub split: Option<String>,
    pub revision: String,
    pub http_status: u16,
    pub error_code: Option<ErrorCode>,
    pub progress: f64,
    pub job_runner_version: i64,
    pub attempts: i64,
}

impl CacheHeader {
    pub fn is_success(&self) -> bool {
        self.error_code.is_none()
    }

    fn not_found(kind: StepKind, dataset: &str, config: &Option<String>, split: &Option<String>) -> Self {
        Self {
            kind,
            dataset: dataset.to_string(),
            config: config.clone(),
            split: split.clone(),
            revision: String::new(),
            http_status: 404,
            error_code: Some(ErrorCode::ResponseNotFound),
            progress: 0.0,
            job_runner_version: 0,
            attempts: 0,
        }
    }
}

fn error_code_to_str(code: &Option<ErrorCode>) -> Option<&'static str> {
    code.as_ref().map(ErrorCode::as_str)
}

fn error_code_from_str(s: Option<String>) -> Option<ErrorCode> {
    s.and_then(|s| all_error_codes().into_iter().find(|c| c.as_str() == s))
}

fn all_error_codes() -> Vec<ErrorCode> {
    use ErrorCode::*;
    vec![
        ParameterMissing,
        InvalidParameter,
        DatasetInBlockList,
        ExternalUnauthenticated,
        ExternalAuthenticated,
        DatasetNotFound,
        ConfigNotFound,
        SplitNotFound,
        ResponseNotFound,
        ResponseNotReady,
        ClientConnectionError,
        NoGitRevisionError,
        TooBigContent,
        DatasetTooBigFromHub,
        DatasetTooBigFromDatasets,
        PreviousStepFormatError,
        StatsComputationError,
        JobRunnerCrashedError,
        JobRunnerExceededMaximumDurationError,
        ResponseAlreadyComputedError,
        Unexpected,
    ]
}

/// Durable cache store over a sqlite pool.
pub struct CacheStore {
    pool: SqlitePool,
}

impl CacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the backing table and indices if they do not already exist.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                kind TEXT NOT NULL,
                dataset TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '',
                split TEXT NOT NULL DEFAULT '',
                revision TEXT NOT NULL,
                content BLOB NOT NULL,
                http_status INTEGER NOT NULL,
                error_code TEXT,
                details BLOB,
                progress REAL NOT NULL DEFAULT 1.0,
                job_runner_version INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (kind, dataset, config, split)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_dataset ON cache_entries(dataset)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cache_kind_status ON cache_entries(kind, http_status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Conditional upsert (invariant 2: within a revision, a lower `runner_version` never
    /// overwrites a higher one). Attempts resets to 0 on success, increments on error.
    pub async fn upsert(
        &self,
        kind: StepKind,
        dataset: &str,
        config: Option<String>,
        split: Option<String>,
        revision: &str,
        content: Vec<u8>,
        http_status: u16,
        error_code: Option<ErrorCode>,
        details: Option<Vec<u8>>,
        progress: f64,
        job_runner_version: i64,
    ) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String, i64, i64)> = sqlx::query(
            r#"
            SELECT revision, job_runner_version, attempts FROM cache_entries
            WHERE kind = ? AND dataset = ? AND config = ? AND split = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(dataset)
        .bind(sentinel(&config))
        .bind(sentinel(&split))
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| (row.get(0), row.get(1), row.get(2)));

        if let Some((existing_revision, existing_version, _)) = &existing {
            if existing_revision == revision && *existing_version > job_runner_version {
                tx.commit().await?;
                return Ok(false);
            }
        }

        let attempts = if error_code.is_some() {
            existing.map(|(_, _, attempts)| attempts + 1).unwrap_or(1)
        } else {
            0
        };
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO cache_entries
                (kind, dataset, config, split, revision, content, http_status, error_code,
                 details, progress, job_runner_version, attempts, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (kind, dataset, config, split) DO UPDATE SET
                revision = excluded.revision,
                content = excluded.content,
                http_status = excluded.http_status,
                error_code = excluded.error_code,
                details = excluded.details,
                progress = excluded.progress,
                job_runner_version = excluded.job_runner_version,
                attempts = excluded.attempts,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(kind.as_str())
        .bind(dataset)
        .bind(sentinel(&config))
        .bind(sentinel(&split))
        .bind(revision)
        .bind(content)
        .bind(http_status as i64)
        .bind(error_code_to_str(&error_code))
        .bind(details)
        .bind(progress)
        .bind(job_runner_version)
        .bind(attempts)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn get(
        &self,
        kind: StepKind,
        dataset: &str,
        config: Option<&str>,
        split: Option<&str>,
    ) -> anyhow::Result<Option<CacheEntry>> {
        let row = sqlx::query(
            r#"
            SELECT kind, dataset, config, split, revision, content, http_status, error_code,
                   details, progress, job_runner_version, attempts, updated_at
            FROM cache_entries
            WHERE kind = ? AND dataset = ? AND config = ? AND split = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(dataset)
        .bind(config.unwrap_or(""))
        .bind(split.unwrap_or(""))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CacheEntry {
            kind,
            dataset: row.get(1),
            config: unsentinel(row.get(2)),
            split: unsentinel(row.get(3)),
            revision: row.get(4),
            content: row.get(5),
            http_status: row.get::<i64, _>(6) as u16,
            error_code: error_code_from_str(row.get(7)),
            details: row.get(8),
            progress: row.get(9),
            job_runner_version: row.get(10),
            attempts: row.get(11),
            updated_at: row.get(12),
        }))
    }

    /// Cheap variant of [`Self::get`] that omits the content/details blobs.
    pub async fn get_without_content(
        &self,
        kind: StepKind,
        dataset: &str,
        config: Option<&str>,
        split: Option<&str>,
    ) -> anyhow::Result<Option<CacheHeader>> {
        let row = sqlx::query(
            r#"
            SELECT revision, http_status, error_code, progress, job_runner_version, attempts
            FROM cache_entries
            WHERE kind = ? AND dataset = ? AND config = ? AND split = ?
            "#,
        )
        .bind(kind.as_str())
        .bind(dataset)
        .bind(config.unwrap_or(""))
        .bind(split.unwrap_or(""))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| CacheHeader {
            kind,
            dataset: dataset.to_string(),
            config: config.map(String::from),
            split: split.map(String::from),
            revision: row.get(0),
            http_status: row.get::<i64, _>(1) as u16,
            error_code: error_code_from_str(row.get(2)),
            progress: row.get(3),
            job_runner_version: row.get(4),
            attempts: row.get(5),
        }))
    }

    /// The "preferred predecessor" rule: among `kinds`, the first with a successful
    /// entry; if none succeeded, the last with any entry; if none exist, a synthetic
    /// not-found header. Ties are broken by the caller-supplied order.
    pub async fn best(
        &self,
        kinds: &[StepKind],
        dataset: &str,
        config: Option<&str>,
        split: Option<&str>,
    ) -> anyhow::Result<CacheHeader> {
        assert!(!kinds.is_empty(), "best() requires a non-empty kinds list");

        let mut last_any: Option<CacheHeader> = None;
        for &kind in kinds {
            if let Some(header) = self.get_without_content(kind, dataset, config, split).await? {
                if header.is_success() {
                    return Ok(header);
                }
                last_any = Some(header);
            }
        }

        Ok(last_any.unwrap_or_else(|| {
            CacheHeader::not_found(
                kinds[kinds.len() - 1],
                dataset,
                &config.map(String::from),
                &split.map(String::from),
            )
        }))
    }

    /// Mass removal of every entry for `dataset`, used on hub deletion.
    pub async fn delete_by_dataset(&self, dataset: &str) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE dataset = ?")
            .bind(dataset)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Distinct `(config, split)` pairs known for `kind`/`dataset`, used during fan-out to
    /// enumerate the (dataset, config, split) combinations a successor applies to.
    pub async fn entries_for_successors(
        &self,
        kind: StepKind,
        dataset: &str,
    ) -> anyhow::Result<Vec<(Option<String>, Option<String>)>> {
        let rows = sqlx::query(
            "SELECT DISTINCT config, split FROM cache_entries WHERE kind = ? AND dataset = ?",
        )
        .bind(kind.as_str())
        .bind(dataset)
        .fetch_all(&self.pool)
        .await?;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let config: String = row.get(0);
            let split: String = row.get(1);
            let pair = (unsentinel(config), unsentinel(split));
            if seen.insert(pair.clone()) {
                out.push(pair);
            }
        }
        Ok(out)
    }
}
