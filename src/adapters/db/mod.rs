// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod sqlite_store;
pub mod store;

pub use sqlite_store::SqliteStoreAdapter;
pub use store::{JobStore, JobStoreError};
