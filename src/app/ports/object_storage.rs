// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::JobResult;

/// Thin façade over wherever large job outputs live.
#[async_trait]
pub trait ObjectStoragePort: Send + Sync {
    async fn save(&self, bucket: &str, dir: &str, filename: &str, data: &[u8]) -> JobResult<()>;
    async fn read(&self, bucket: &str, path: &str) -> JobResult<Vec<u8>>;
}

pub fn guild_bucket(guild_id: &str) -> String {
    format!("guilds.{guild_id}")
}
