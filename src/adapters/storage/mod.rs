// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Local-directory object storage: buckets are directories under a base
//! path. Large deployments would swap an S3-like adapter in behind the same
//! port.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::app::errors::{JobError, JobResult};
use crate::app::ports::ObjectStoragePort;

pub struct LocalObjectStorage {
    base: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(base: PathBuf) -> Self {
        LocalObjectStorage { base }
    }

    fn resolve(&self, bucket: &str, path: &str) -> JobResult<PathBuf> {
        let relative = Path::new(bucket).join(path);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(JobError::validation(format!(
                        "invalid object path {bucket}/{path}"
                    )));
                }
            }
        }
        Ok(self.base.join(relative))
    }
}

#[async_trait]
impl ObjectStoragePort for LocalObjectStorage {
    async fn save(&self, bucket: &str, dir: &str, filename: &str, data: &[u8]) -> JobResult<()> {
        if filename.is_empty() {
            return Err(JobError::validation("filename cannot be empty"));
        }
        let target = self.resolve(bucket, &format!("{dir}/{filename}"))?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|err| {
                JobError::internal(format!("failed to create object directory: {err}"))
            })?;
        }
        tokio::fs::write(&target, data)
            .await
            .map_err(|err| JobError::internal(format!("failed to write object: {err}")))
    }

    async fn read(&self, bucket: &str, path: &str) -> JobResult<Vec<u8>> {
        let target = self.resolve(bucket, path)?;
        match tokio::fs::read(&target).await {
            Ok(data) => Ok(data),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(JobError::platform(
                format!("object {bucket}/{path} not found"),
            )),
            Err(err) => Err(JobError::internal(format!("failed to read object: {err}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let storage = LocalObjectStorage::new(dir.path().to_path_buf());

        storage
            .save("guilds.G", "jobs/j1", "backup.iblfile", b"payload")
            .await
            .unwrap();
        let data = storage
            .read("guilds.G", "jobs/j1/backup.iblfile")
            .await
            .unwrap();
        assert_eq!(data, b"payload");
    }

    #[tokio::test]
    async fn missing_object_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = LocalObjectStorage::new(dir.path().to_path_buf());
        let err = storage.read("guilds.G", "jobs/nope").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn empty_filename_is_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = LocalObjectStorage::new(dir.path().to_path_buf());
        let err = storage.save("b", "d", "", b"x").await.unwrap_err();
        assert!(err.to_string().contains("filename cannot be empty"));
    }

    #[tokio::test]
    async fn path_traversal_is_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = LocalObjectStorage::new(dir.path().to_path_buf());
        let err = storage.read("b", "../escape").await.unwrap_err();
        assert!(err.to_string().contains("invalid object path"));
    }
}
