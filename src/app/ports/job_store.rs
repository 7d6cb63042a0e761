// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use serde_json::Value;

use crate::app::errors::JobResult;
use crate::app::types::{JobRow, JobState, NewJobRow};

#[async_trait]
pub trait JobStorePort: Send + Sync {
    /// Insert the job row and its ongoing sibling in one transaction.
    async fn create_job(&self, job: &NewJobRow) -> JobResult<()>;
    async fn get_job(&self, id: &str) -> JobResult<Option<JobRow>>;
    async fn set_job_state(&self, id: &str, state: JobState) -> JobResult<()>;
    /// Append one observation snapshot to the job's `statuses` list.
    async fn append_status(&self, id: &str, status: Value) -> JobResult<()>;
    async fn set_output_filename(&self, id: &str, filename: &str) -> JobResult<()>;
    /// The serialized job options persisted at creation, if the ongoing row
    /// still exists.
    async fn initial_opts(&self, id: &str) -> JobResult<Option<Value>>;
    async fn remove_ongoing(&self, id: &str) -> JobResult<()>;
    async fn list_jobs_in_state(&self, state: JobState) -> JobResult<Vec<JobRow>>;
    /// Startup sweep: every `pending` row is forced to `failed`. Returns the
    /// number of rows rewritten.
    async fn sweep_pending_to_failed(&self) -> JobResult<u64>;
}
