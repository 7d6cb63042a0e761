// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use dashmap::DashMap;

/// Per-tenant running-job counters, keyed by job category. `try_acquire` is
/// an atomic compare-and-increment; the returned guard decrements on drop, so
/// a slot is released on every exit path including panics.
#[derive(Clone, Default)]
pub struct ConcurrencyRegistry {
    counts: Arc<DashMap<(String, String), u32>>,
}

impl ConcurrencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, category: &str, tenant: &str) -> u32 {
        self.counts
            .get(&(category.to_string(), tenant.to_string()))
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    pub fn try_acquire(
        &self,
        category: &str,
        tenant: &str,
        limit: u32,
    ) -> Option<ConcurrencyGuard> {
        let key = (category.to_string(), tenant.to_string());
        let mut entry = self.counts.entry(key.clone()).or_insert(0);
        if *entry >= limit {
            return None;
        }
        *entry += 1;
        drop(entry);
        Some(ConcurrencyGuard {
            counts: Arc::clone(&self.counts),
            key,
        })
    }

    fn release(counts: &DashMap<(String, String), u32>, key: &(String, String)) {
        if let Some(mut entry) = counts.get_mut(key) {
            if *entry > 0 {
                *entry -= 1;
            }
        }
    }
}

pub struct ConcurrencyGuard {
    counts: Arc<DashMap<(String, String), u32>>,
    key: (String, String),
}

impl Drop for ConcurrencyGuard {
    fn drop(&mut self) {
        ConcurrencyRegistry::release(&self.counts, &self.key);
    }
}
