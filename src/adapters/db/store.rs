// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::app::types::{JobRow, JobState, NewJobRow, Progress};

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("invalid job state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, JobStoreError>;

/// Async store for job rows and their ongoing (progress) siblings.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (or create) a file-backed SQLite DB.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let url = format!("sqlite://{}", path.as_ref().to_string_lossy());
        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Open an in-memory store (handy for tests).
    pub async fn open_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        // Improve concurrency for file DBs.
        let _ = sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
              id TEXT PRIMARY KEY,
              name TEXT NOT NULL,
              guild_id TEXT NOT NULL,
              expiry_secs INTEGER,
              output TEXT,
              fields TEXT NOT NULL DEFAULT '{}',
              statuses TEXT NOT NULL DEFAULT '[]',
              resumable INTEGER NOT NULL DEFAULT 0,
              state TEXT NOT NULL DEFAULT 'pending',
              created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
            );
            CREATE INDEX IF NOT EXISTS idx_jobs_guild_id ON jobs(guild_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE TABLE IF NOT EXISTS ongoing_jobs (
              id TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
              state TEXT NOT NULL DEFAULT '',
              data TEXT NOT NULL DEFAULT '{}',
              initial_opts TEXT NOT NULL DEFAULT '{}'
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Creates the job row and its ongoing sibling in a single transaction.
    pub async fn create_job(&self, job: &NewJobRow) -> Result<()> {
        let fields = serde_json::to_string(&job.fields)?;
        let initial_opts = serde_json::to_string(&job.initial_opts)?;
        let expiry_secs = job.expiry.map(|expiry| expiry.as_secs() as i64);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO jobs (id, name, guild_id, expiry_secs, fields, resumable, state) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.guild_id)
        .bind(expiry_secs)
        .bind(fields)
        .bind(job.resumable)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO ongoing_jobs (id, state, data, initial_opts) VALUES (?1, '', '{}', ?2)")
            .bind(&job.id)
            .bind(initial_opts)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<JobRow>> {
        let row = sqlx::query(
            "SELECT id, name, guild_id, expiry_secs, output, fields, statuses, resumable, state, created_at \
             FROM jobs WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| job_row_from(&row)).transpose()
    }

    pub async fn set_job_state(&self, id: &str, state: JobState) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET state = ?1 WHERE id = ?2")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(JobStoreError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Appends one snapshot to the job's `statuses` JSON array in place.
    pub async fn append_status(&self, id: &str, status: &serde_json::Value) -> Result<()> {
        let encoded = serde_json::to_string(status)?;
        let result =
            sqlx::query("UPDATE jobs SET statuses = json_insert(statuses, '$[#]', json(?1)) WHERE id = ?2")
                .bind(encoded)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(JobStoreError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn set_output_filename(&self, id: &str, filename: &str) -> Result<()> {
        let result = sqlx::query("UPDATE jobs SET output = json_object('filename', ?1) WHERE id = ?2")
            .bind(filename)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(JobStoreError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn initial_opts(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let row = sqlx::query("SELECT initial_opts FROM ongoing_jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("initial_opts")?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    pub async fn get_progress(&self, id: &str) -> Result<Option<Progress>> {
        let row = sqlx::query("SELECT state, data FROM ongoing_jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let state: String = row.try_get("state")?;
                let raw: String = row.try_get("data")?;
                Ok(Some(Progress {
                    state,
                    data: serde_json::from_str(&raw)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// The single-statement UPDATE keeps the `(state, data)` tuple atomic
    /// from a reader's point of view.
    pub async fn set_progress(&self, id: &str, progress: &Progress) -> Result<()> {
        let data = serde_json::to_string(&progress.data)?;
        let result = sqlx::query("UPDATE ongoing_jobs SET state = ?1, data = ?2 WHERE id = ?3")
            .bind(&progress.state)
            .bind(data)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(JobStoreError::JobNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn remove_ongoing(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM ongoing_jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_jobs_in_state(&self, state: JobState) -> Result<Vec<JobRow>> {
        let rows = sqlx::query(
            "SELECT id, name, guild_id, expiry_secs, output, fields, statuses, resumable, state, created_at \
             FROM jobs WHERE state = ?1 ORDER BY created_at",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_row_from).collect()
    }

    /// Startup sweep: `pending` rows have no runner and cannot be resumed.
    pub async fn sweep_pending_to_failed(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE jobs SET state = 'failed' WHERE state = 'pending'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn job_row_from(row: &SqliteRow) -> Result<JobRow> {
    let state_raw: String = row.try_get("state")?;
    let state = JobState::parse(&state_raw)
        .ok_or_else(|| JobStoreError::InvalidState(state_raw.clone()))?;

    let fields_raw: String = row.try_get("fields")?;
    let statuses_raw: String = row.try_get("statuses")?;
    let output_raw: Option<String> = row.try_get("output")?;
    let output_filename = match output_raw {
        Some(raw) => {
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            value
                .get("filename")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        }
        None => None,
    };
    let expiry_secs: Option<i64> = row.try_get("expiry_secs")?;

    Ok(JobRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        guild_id: row.try_get("guild_id")?,
        expiry: expiry_secs.map(|secs| Duration::from_secs(secs.max(0) as u64)),
        output_filename,
        fields: serde_json::from_str(&fields_raw)?,
        statuses: serde_json::from_str(&statuses_raw)?,
        resumable: row.try_get("resumable")?,
        state,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_job(id: &str) -> NewJobRow {
        NewJobRow {
            id: id.to_string(),
            name: "guild_create_backup".to_string(),
            guild_id: "G".to_string(),
            expiry: None,
            fields: json!({"options": {"per_channel": 100}}),
            resumable: true,
            initial_opts: json!({"options": {}}),
        }
    }

    #[tokio::test]
    async fn create_and_fetch_round_trip() {
        let store = JobStore::open_memory().await.unwrap();
        store.create_job(&new_job("j1")).await.unwrap();

        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.id, "j1");
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.fields["options"]["per_channel"], 100);
        assert!(job.statuses.is_empty());
        assert!(job.output_filename.is_none());
        assert!(job.resumable);

        assert!(store.get_job("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_transitions_and_output() {
        let store = JobStore::open_memory().await.unwrap();
        store.create_job(&new_job("j1")).await.unwrap();

        store.set_job_state("j1", JobState::Running).await.unwrap();
        store
            .set_output_filename("j1", "antiraid-backup-x.iblfile")
            .await
            .unwrap();
        store.set_job_state("j1", JobState::Completed).await.unwrap();

        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(
            job.output_filename.as_deref(),
            Some("antiraid-backup-x.iblfile")
        );
    }

    #[tokio::test]
    async fn statuses_append_in_order() {
        let store = JobStore::open_memory().await.unwrap();
        store.create_job(&new_job("j1")).await.unwrap();

        store
            .append_status("j1", &json!({"level": "info", "msg": "started"}))
            .await
            .unwrap();
        store
            .append_status("j1", &json!({"level": "error", "msg": "boom", "step": "create_new_roles"}))
            .await
            .unwrap();

        let job = store.get_job("j1").await.unwrap().unwrap();
        assert_eq!(job.statuses.len(), 2);
        assert_eq!(job.statuses[0]["msg"], "started");
        assert_eq!(job.statuses[1]["step"], "create_new_roles");
    }

    #[tokio::test]
    async fn progress_round_trips() {
        let store = JobStore::open_memory().await.unwrap();
        store.create_job(&new_job("j1")).await.unwrap();

        // A fresh job has empty progress.
        let progress = store.get_progress("j1").await.unwrap().unwrap();
        assert_eq!(progress, Progress::start());

        let mut data = serde_json::Map::new();
        data.insert("restoredRoleMap".to_string(), json!({"a": "b"}));
        let update = Progress {
            state: "create_new_channels".to_string(),
            data,
        };
        store.set_progress("j1", &update).await.unwrap();
        assert_eq!(store.get_progress("j1").await.unwrap().unwrap(), update);
    }

    #[tokio::test]
    async fn initial_opts_survive_until_ongoing_removed() {
        let store = JobStore::open_memory().await.unwrap();
        store.create_job(&new_job("j1")).await.unwrap();

        let opts = store.initial_opts("j1").await.unwrap().unwrap();
        assert_eq!(opts, json!({"options": {}}));

        store.remove_ongoing("j1").await.unwrap();
        assert!(store.initial_opts("j1").await.unwrap().is_none());
        assert!(store.get_progress("j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_rewrites_only_pending_rows() {
        let store = JobStore::open_memory().await.unwrap();
        store.create_job(&new_job("j1")).await.unwrap();
        store.create_job(&new_job("j2")).await.unwrap();
        store.set_job_state("j2", JobState::Running).await.unwrap();

        let swept = store.sweep_pending_to_failed().await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(
            store.get_job("j1").await.unwrap().unwrap().state,
            JobState::Failed
        );
        assert_eq!(
            store.get_job("j2").await.unwrap().unwrap().state,
            JobState::Running
        );
    }

    #[tokio::test]
    async fn list_jobs_filters_by_state() {
        let store = JobStore::open_memory().await.unwrap();
        store.create_job(&new_job("j1")).await.unwrap();
        store.create_job(&new_job("j2")).await.unwrap();
        store.set_job_state("j1", JobState::Running).await.unwrap();

        let running = store.list_jobs_in_state(JobState::Running).await.unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, "j1");
    }
}
