// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod job_store;
pub mod object_storage;
pub mod platform;
pub mod progress_store;

pub use clock::ClockPort;
pub use job_store::JobStorePort;
pub use object_storage::{ObjectStoragePort, guild_bucket};
pub use platform::PlatformPort;
pub use progress_store::{NoopProgressStore, ProgressStorePort};
