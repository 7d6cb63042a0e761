// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::adapters::db::{JobStore, JobStoreError};
use crate::app::errors::{JobError, JobResult};
use crate::app::ports::{JobStorePort, ProgressStorePort};
use crate::app::types::{JobRow, JobState, NewJobRow, Progress};

/// Outbound adapter implementing the store ports, translating
/// persistence-specific errors into app-level errors so the job core stays
/// free of DB details.
#[derive(Clone)]
pub struct SqliteStoreAdapter {
    store: Arc<JobStore>,
}

impl SqliteStoreAdapter {
    pub fn new(store: JobStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

fn map_store_error(err: JobStoreError) -> JobError {
    match err {
        JobStoreError::JobNotFound(id) => JobError::validation(format!("job {id} not found")),
        other => JobError::internal(other.to_string()),
    }
}

#[async_trait]
impl JobStorePort for SqliteStoreAdapter {
    async fn create_job(&self, job: &NewJobRow) -> JobResult<()> {
        self.store.create_job(job).await.map_err(map_store_error)
    }

    async fn get_job(&self, id: &str) -> JobResult<Option<JobRow>> {
        self.store.get_job(id).await.map_err(map_store_error)
    }

    async fn set_job_state(&self, id: &str, state: JobState) -> JobResult<()> {
        self.store
            .set_job_state(id, state)
            .await
            .map_err(map_store_error)
    }

    async fn append_status(&self, id: &str, status: Value) -> JobResult<()> {
        self.store
            .append_status(id, &status)
            .await
            .map_err(map_store_error)
    }

    async fn set_output_filename(&self, id: &str, filename: &str) -> JobResult<()> {
        self.store
            .set_output_filename(id, filename)
            .await
            .map_err(map_store_error)
    }

    async fn initial_opts(&self, id: &str) -> JobResult<Option<Value>> {
        self.store.initial_opts(id).await.map_err(map_store_error)
    }

    async fn remove_ongoing(&self, id: &str) -> JobResult<()> {
        self.store.remove_ongoing(id).await.map_err(map_store_error)
    }

    async fn list_jobs_in_state(&self, state: JobState) -> JobResult<Vec<JobRow>> {
        self.store
            .list_jobs_in_state(state)
            .await
            .map_err(map_store_error)
    }

    async fn sweep_pending_to_failed(&self) -> JobResult<u64> {
        self.store
            .sweep_pending_to_failed()
            .await
            .map_err(map_store_error)
    }
}

#[async_trait]
impl ProgressStorePort for SqliteStoreAdapter {
    async fn get(&self, job_id: &str) -> JobResult<Option<Progress>> {
        self.store.get_progress(job_id).await.map_err(map_store_error)
    }

    async fn set(&self, job_id: &str, progress: &Progress) -> JobResult<()> {
        self.store
            .set_progress(job_id, progress)
            .await
            .map_err(map_store_error)
    }
}
