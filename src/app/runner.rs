// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! The runner harness owns a job's lifecycle once it is handed off: it binds
//! the tenant context and logger span, drives `exec` in its own task so
//! panics are contained, records statuses, stores the output and marks the
//! final state.

use std::sync::Arc;

use serde_json::json;
use time::format_description::well_known::Rfc3339;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::app::errors::JobError;
use crate::app::ports::{ClockPort, JobStorePort, ObjectStoragePort, ProgressStorePort, guild_bucket};
use crate::app::types::JobState;
use crate::jobs::{JobEnv, JobImpl, ProgressHandle};

pub(crate) struct Runner {
    pub jobs: Arc<dyn JobStorePort>,
    pub progress: Arc<dyn ProgressStorePort>,
    pub storage: Arc<dyn ObjectStoragePort>,
    pub clock: Arc<dyn ClockPort>,
}

impl Runner {
    pub fn spawn(self, env: JobEnv, job_id: String, job: Box<dyn JobImpl>) -> JoinHandle<()> {
        let span = tracing::info_span!(
            "job",
            job_id = %job_id,
            name = job.name(),
            guild_id = %env.guild_id
        );
        tokio::spawn(async move { self.run(env, job_id, job).await }.instrument(span))
    }

    async fn run(self, env: JobEnv, job_id: String, job: Box<dyn JobImpl>) {
        if let Err(err) = self.jobs.set_job_state(&job_id, JobState::Running).await {
            tracing::error!(error = %err, "failed to mark job running");
            return;
        }
        self.status(&job_id, json!({"level": "info", "msg": "job started"}))
            .await;

        let progress = ProgressHandle::new(job_id.clone(), self.progress.clone());
        let exec_env = env.clone();
        let task = tokio::spawn(async move { job.exec(&exec_env, &progress).await });

        let outcome = match task.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_panic() => {
                Err(JobError::internal("job panicked during execution"))
            }
            Err(join_err) => Err(JobError::internal(format!("job task failed: {join_err}"))),
        };

        match outcome {
            Ok(output) => {
                if let Some(output) = output {
                    let bucket = guild_bucket(&env.guild_id);
                    let dir = format!("jobs/{job_id}");
                    tracing::info!(filename = %output.filename, bytes = output.data.len(), "storing job output");
                    if let Err(err) = self
                        .storage
                        .save(&bucket, &dir, &output.filename, &output.data)
                        .await
                    {
                        self.fail(&job_id, &err).await;
                        return;
                    }
                    if let Err(err) = self
                        .jobs
                        .set_output_filename(&job_id, &output.filename)
                        .await
                    {
                        tracing::error!(error = %err, "failed to record job output");
                    }
                }

                self.status(&job_id, json!({"level": "info", "msg": "job completed"}))
                    .await;
                if let Err(err) = self.jobs.set_job_state(&job_id, JobState::Completed).await {
                    tracing::error!(error = %err, "failed to mark job completed");
                }
                // The ongoing sibling only exists while the job can still
                // make progress; a failed resumable job keeps its row.
                if let Err(err) = self.jobs.remove_ongoing(&job_id).await {
                    tracing::warn!(error = %err, "failed to remove ongoing row");
                }
                tracing::info!("job completed");
            }
            Err(err) => self.fail(&job_id, &err).await,
        }
    }

    async fn fail(&self, job_id: &str, err: &JobError) {
        tracing::error!(error = %err, step = err.step_name(), "job failed");
        let mut status = json!({"level": "error", "msg": err.to_string()});
        if let Some(step) = err.step_name() {
            status["step"] = json!(step);
        }
        self.status(job_id, status).await;
        if let Err(store_err) = self.jobs.set_job_state(job_id, JobState::Failed).await {
            tracing::error!(error = %store_err, "failed to mark job failed");
        }
    }

    async fn status(&self, job_id: &str, mut status: serde_json::Value) {
        if let Ok(now) = self.clock.now_utc().format(&Rfc3339) {
            status["ts"] = json!(now);
        }
        if let Err(err) = self.jobs.append_status(job_id, status).await {
            tracing::warn!(error = %err, "failed to append job status");
        }
    }
}
