// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::JobResult;
use crate::app::types::Progress;

/// Durable `(state, data)` tuple per job. `set` must be atomic from a
/// reader's point of view: a concurrent `get` sees either the old or the new
/// tuple, never a partial write.
#[async_trait]
pub trait ProgressStorePort: Send + Sync {
    async fn get(&self, job_id: &str) -> JobResult<Option<Progress>>;
    async fn set(&self, job_id: &str, progress: &Progress) -> JobResult<()>;
}

/// Local-run variant: disables resume without changing step semantics.
pub struct NoopProgressStore;

#[async_trait]
impl ProgressStorePort for NoopProgressStore {
    async fn get(&self, _job_id: &str) -> JobResult<Option<Progress>> {
        Ok(None)
    }

    async fn set(&self, _job_id: &str, _progress: &Progress) -> JobResult<()> {
        Ok(())
    }
}
