// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! The job implementations and the environment they run against.

pub mod backups;
pub mod moderation;

#[cfg(test)]
pub(crate) mod testutil;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::app::concurrency::ConcurrencyRegistry;
use crate::app::errors::{JobError, JobResult};
use crate::app::ports::{ClockPort, ObjectStoragePort, PlatformPort, ProgressStorePort};
use crate::app::types::{Download, Output, Progress, User};

/// Which deployment the job runs under. Server jobs get their constraints
/// from the tenant's plan; local jobs must bring explicit constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Jobs,
    LocalJobs,
}

impl OperationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationMode::Jobs => "jobs",
            OperationMode::LocalJobs => "localjobs",
        }
    }
}

/// Everything a running job is bound to: the tenant, the platform, shared
/// registries and the job-scoped cancellation signal.
#[derive(Clone)]
pub struct JobEnv {
    pub guild_id: String,
    pub bot_user: User,
    pub mode: OperationMode,
    pub platform: Arc<dyn PlatformPort>,
    pub storage: Arc<dyn ObjectStoragePort>,
    pub clock: Arc<dyn ClockPort>,
    pub concurrency: ConcurrencyRegistry,
    cancel: watch::Receiver<bool>,
}

impl JobEnv {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guild_id: String,
        bot_user: User,
        mode: OperationMode,
        platform: Arc<dyn PlatformPort>,
        storage: Arc<dyn ObjectStoragePort>,
        clock: Arc<dyn ClockPort>,
        concurrency: ConcurrencyRegistry,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        JobEnv {
            guild_id,
            bot_user,
            mode,
            platform,
            storage,
            clock,
            concurrency,
            cancel,
        }
    }

    /// Errors with `Cancelled` once the job's cancellation signal fired.
    pub fn ensure_active(&self) -> JobResult<()> {
        if *self.cancel.borrow() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// A cancellable sleep; every rate-limit pause goes through here so
    /// shutdown interrupts promptly.
    pub async fn sleep(&self, duration: Duration) -> JobResult<()> {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancel.wait_for(|cancelled| *cancelled) => Err(JobError::Cancelled),
        }
    }

    /// Fetch a backup payload. `job://<job_id>/<filename>` resolves through
    /// object storage to the stored output of a previous job for this guild;
    /// anything else is downloaded from the platform side.
    pub async fn download_backup(
        &self,
        source: &str,
        max_bytes: u64,
        timeout: Duration,
    ) -> JobResult<Vec<u8>> {
        if let Some(rest) = source.strip_prefix("job://") {
            let bucket = crate::app::ports::guild_bucket(&self.guild_id);
            let path = format!("jobs/{rest}");
            let data = self.storage.read(&bucket, &path).await?;
            if data.len() as u64 > max_bytes {
                return Err(JobError::format(format!(
                    "backup too large, expected less than {max_bytes} bytes, got {} bytes",
                    data.len()
                )));
            }
            return Ok(data);
        }

        let Download { bytes, .. } = self.platform.download(source, max_bytes, timeout).await?;
        Ok(bytes)
    }
}

/// Handle step code uses to read and persist its job's progress.
#[derive(Clone)]
pub struct ProgressHandle {
    job_id: String,
    store: Arc<dyn ProgressStorePort>,
}

impl ProgressHandle {
    pub fn new(job_id: String, store: Arc<dyn ProgressStorePort>) -> Self {
        ProgressHandle { job_id, store }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn get(&self) -> JobResult<Option<Progress>> {
        self.store.get(&self.job_id).await
    }

    pub async fn set(&self, progress: &Progress) -> JobResult<()> {
        self.store.set(&self.job_id, progress).await
    }
}

/// Preset options for running a job locally, with per-field commentary.
#[derive(Debug, Clone)]
pub struct PresetInfo {
    pub runnable: bool,
    pub preset: Value,
    pub comments: HashMap<&'static str, &'static str>,
}

/// A job that can be spawned by name. Sensitive inputs never leave through
/// `fields`; `validate` fills plan constraints and defaults before `exec`.
#[async_trait]
pub trait JobImpl: Send + Sync {
    fn name(&self) -> &'static str;

    /// Public, redacted view of the job's inputs for the job row.
    fn fields(&self) -> Value;

    fn expiry(&self) -> Option<Duration>;

    fn resumable(&self) -> bool;

    /// Serialized form persisted with the ongoing row so the job can be
    /// reconstructed on resume.
    fn initial_opts(&self) -> JobResult<Value>;

    async fn validate(&mut self, env: &JobEnv) -> JobResult<()>;

    async fn exec<'a>(
        &'a self,
        env: &'a JobEnv,
        progress: &'a ProgressHandle,
    ) -> JobResult<Option<Output>>;

    fn local_presets(&self) -> PresetInfo;
}

type Constructor = fn(Value) -> JobResult<Box<dyn JobImpl>>;

/// Named constructors for every job the server can run. Write-once at
/// startup; each spawn constructs a fresh instance from the request data.
pub struct JobRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry {
            constructors: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = JobRegistry::new();
        registry.register(
            backups::create::JOB_NAME,
            backups::create::ServerBackupCreate::from_spawn_data,
        );
        registry.register(
            backups::restore::JOB_NAME,
            backups::restore::ServerBackupRestore::from_spawn_data,
        );
        registry.register(
            moderation::msgprune::JOB_NAME,
            moderation::msgprune::MessagePrune::from_spawn_data,
        );
        registry
    }

    pub fn register(&mut self, name: &'static str, constructor: Constructor) {
        self.constructors.insert(name, constructor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn construct(&self, name: &str, data: Value) -> JobResult<Box<dyn JobImpl>> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            JobError::validation(format!("job {name} does not exist on registry"))
        })?;
        constructor(data)
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        JobRegistry::with_defaults()
    }
}

/// Spawn `data` deserialized into a concrete options struct; a null payload
/// means "all defaults".
pub(crate) fn options_from_spawn_data<T>(data: Value) -> JobResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data)
        .map_err(|err| JobError::validation(format!("invalid job data: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_the_default_jobs() {
        let registry = JobRegistry::with_defaults();
        assert!(registry.contains("guild_create_backup"));
        assert!(registry.contains("guild_restore_backup"));
        assert!(registry.contains("message_prune"));
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn unknown_job_name_is_a_validation_error() {
        let registry = JobRegistry::with_defaults();
        let err = registry.construct("nope", Value::Null).unwrap_err();
        assert!(err.to_string().contains("does not exist on registry"));
        assert!(err.is_rejection());
    }

    #[test]
    fn construct_builds_a_fresh_instance_from_data() {
        let registry = JobRegistry::with_defaults();
        let job = registry
            .construct(
                "guild_create_backup",
                serde_json::json!({"options": {"per_channel": 25}}),
            )
            .unwrap();
        assert_eq!(job.name(), "guild_create_backup");
        assert!(!job.resumable());
    }
}
