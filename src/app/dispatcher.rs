// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! The dispatcher is the single entry point for job work: it resolves names
//! against the registry, validates fresh instances, persists rows, hands
//! running jobs to the runner harness, and reconciles persisted state at
//! startup.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::app::concurrency::ConcurrencyRegistry;
use crate::app::errors::{JobError, JobResult};
use crate::app::ports::{ClockPort, JobStorePort, ObjectStoragePort, PlatformPort, ProgressStorePort};
use crate::app::runner::Runner;
use crate::app::types::{JobState, NewJobRow, Spawn, SpawnResponse, User};
use crate::jobs::{JobEnv, JobImpl, JobRegistry, OperationMode};

pub struct Dispatcher {
    registry: JobRegistry,
    jobs: Arc<dyn JobStorePort>,
    progress: Arc<dyn ProgressStorePort>,
    platform: Arc<dyn PlatformPort>,
    storage: Arc<dyn ObjectStoragePort>,
    clock: Arc<dyn ClockPort>,
    concurrency: ConcurrencyRegistry,
    bot_user: User,
    cancel_tx: watch::Sender<bool>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: JobRegistry,
        jobs: Arc<dyn JobStorePort>,
        progress: Arc<dyn ProgressStorePort>,
        platform: Arc<dyn PlatformPort>,
        storage: Arc<dyn ObjectStoragePort>,
        clock: Arc<dyn ClockPort>,
        bot_user: User,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Dispatcher {
            registry,
            jobs,
            progress,
            platform,
            storage,
            clock,
            concurrency: ConcurrencyRegistry::new(),
            bot_user,
            cancel_tx,
        }
    }

    /// Signals every running job to stop at its next suspension point.
    pub fn shutdown(&self) {
        let _ = self.cancel_tx.send(true);
    }

    fn env_for(&self, guild_id: &str) -> JobEnv {
        JobEnv::new(
            guild_id.to_string(),
            self.bot_user.clone(),
            OperationMode::Jobs,
            self.platform.clone(),
            self.storage.clone(),
            self.clock.clone(),
            self.concurrency.clone(),
            self.cancel_tx.subscribe(),
        )
    }

    /// Handles a `/spawn` request: create and/or execute, or resume by id.
    pub async fn spawn(&self, spawn: Spawn) -> JobResult<SpawnResponse> {
        if spawn.guild_id.is_empty() {
            return Err(JobError::validation("guild_id is required"));
        }
        if !self.registry.contains(&spawn.name) {
            return Err(JobError::validation(format!(
                "job {} does not exist on registry",
                spawn.name
            )));
        }

        let (id, job) = if spawn.create {
            let mut job = self.registry.construct(&spawn.name, spawn.data)?;
            let env = self.env_for(&spawn.guild_id);
            job.validate(&env).await?;

            let id = Uuid::new_v4().to_string();
            self.jobs
                .create_job(&NewJobRow {
                    id: id.clone(),
                    name: job.name().to_string(),
                    guild_id: spawn.guild_id.clone(),
                    expiry: job.expiry(),
                    fields: job.fields(),
                    resumable: job.resumable(),
                    initial_opts: job.initial_opts()?,
                })
                .await?;
            (id, job)
        } else {
            if spawn.id.is_empty() {
                return Err(JobError::validation("id is required when create is false"));
            }
            let row = self
                .jobs
                .get_job(&spawn.id)
                .await?
                .ok_or_else(|| JobError::validation(format!("job {} not found", spawn.id)))?;
            if row.guild_id != spawn.guild_id {
                return Err(JobError::validation("job does not belong to this guild"));
            }
            if !row.resumable {
                return Err(JobError::validation(format!(
                    "job {} is not resumable",
                    row.id
                )));
            }
            let opts = self.jobs.initial_opts(&row.id).await?.ok_or_else(|| {
                JobError::validation(format!("job {} has no stored options to resume from", row.id))
            })?;

            let mut job = self.registry.construct(&row.name, opts)?;
            let env = self.env_for(&spawn.guild_id);
            job.validate(&env).await?;
            (row.id, job)
        };

        if spawn.execute {
            self.execute(id.clone(), job, &spawn.guild_id);
        }

        Ok(SpawnResponse { id })
    }

    fn execute(&self, job_id: String, job: Box<dyn JobImpl>, guild_id: &str) {
        let runner = Runner {
            jobs: self.jobs.clone(),
            progress: self.progress.clone(),
            storage: self.storage.clone(),
            clock: self.clock.clone(),
        };
        runner.spawn(self.env_for(guild_id), job_id, job);
    }

    /// Startup sweep: `pending` rows have no runner and cannot be resumed.
    /// Must run before the RPC surface accepts traffic.
    pub async fn startup_sweep(&self) -> JobResult<u64> {
        let swept = self.jobs.sweep_pending_to_failed().await?;
        if swept > 0 {
            tracing::info!(swept, "marked stale pending jobs as failed");
        }
        Ok(swept)
    }

    /// Reconciles `running` rows left over from a previous process: resumable
    /// jobs are re-spawned from their persisted progress, the rest are marked
    /// failed.
    pub async fn resume_ongoing(&self) -> JobResult<()> {
        let running = self.jobs.list_jobs_in_state(JobState::Running).await?;
        for row in running {
            if !row.resumable {
                tracing::warn!(job_id = %row.id, "running job is not resumable, marking failed");
                self.mark_unresumable(&row.id).await;
                continue;
            }

            let opts = match self.jobs.initial_opts(&row.id).await? {
                Some(opts) => opts,
                None => {
                    tracing::warn!(job_id = %row.id, "running job has no stored options, marking failed");
                    self.mark_unresumable(&row.id).await;
                    continue;
                }
            };

            let env = self.env_for(&row.guild_id);
            let job = match self.registry.construct(&row.name, opts) {
                Ok(mut job) => match job.validate(&env).await {
                    Ok(()) => job,
                    Err(err) => {
                        tracing::warn!(job_id = %row.id, error = %err, "resumed job failed validation");
                        self.mark_unresumable(&row.id).await;
                        continue;
                    }
                },
                Err(err) => {
                    tracing::warn!(job_id = %row.id, error = %err, "failed to reconstruct job");
                    self.mark_unresumable(&row.id).await;
                    continue;
                }
            };

            tracing::info!(job_id = %row.id, name = %row.name, "resuming job");
            self.execute(row.id, job, &row.guild_id);
        }
        Ok(())
    }

    async fn mark_unresumable(&self, job_id: &str) {
        if let Err(err) = self.jobs.set_job_state(job_id, JobState::Failed).await {
            tracing::error!(job_id, error = %err, "failed to mark job failed");
        }
    }
}
