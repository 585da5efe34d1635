// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Shared model instance pool
//!
//! Reference-counted cache of expensive local model handles keyed by model
//! identifier, so reconfiguring away and back does not force a reload.
//! All mutation goes through `acquire`/`release`; tearing a pooled handle
//! down directly would corrupt the refcount accounting for other holders.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::engine::ModelHandle;
use crate::error::Result;

/// Introspection row for one pooled instance
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub model_id: String,
    pub ref_count: usize,
    pub last_used: DateTime<Utc>,
}

struct PoolEntry {
    handle: Arc<dyn ModelHandle>,
    ref_count: usize,
    last_used: DateTime<Utc>,
}

/// Reference-counted cache of model handles
///
/// The entry map is guarded by an async mutex held across factory
/// invocation, so acquire/release pairs for the same key can never tear the
/// refcount or double-invoke teardown.
#[derive(Default)]
pub struct InstancePool {
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl InstancePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pooled handle for `model_id`, building one on first use
    ///
    /// An existing entry has its refcount incremented; otherwise `factory`
    /// runs and, on success, the handle is stored with a refcount of one.
    /// A factory failure (including cancellation) stores nothing.
    pub async fn acquire<F, Fut>(
        &self,
        model_id: &str,
        factory: F,
    ) -> Result<Arc<dyn ModelHandle>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<dyn ModelHandle>>>,
    {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(model_id) {
            entry.ref_count += 1;
            entry.last_used = Utc::now();
            tracing::debug!(
                target: "quill.pool",
                model_id,
                ref_count = entry.ref_count,
                "reusing pooled instance"
            );
            return Ok(entry.handle.clone());
        }

        let handle = factory().await?;
        tracing::info!(target: "quill.pool", model_id, "pooled new instance");
        entries.insert(
            model_id.to_string(),
            PoolEntry {
                handle: handle.clone(),
                ref_count: 1,
                last_used: Utc::now(),
            },
        );
        Ok(handle)
    }

    /// Drop one reference; tears the instance down when the count hits zero
    ///
    /// Releasing an id with no entry is a logged no-op. Returns whether the
    /// instance was torn down.
    pub async fn release(&self, model_id: &str) -> bool {
        let mut entries = self.entries.lock().await;

        let Some(entry) = entries.get_mut(model_id) else {
            tracing::warn!(target: "quill.pool", model_id, "release for unknown instance ignored");
            return false;
        };

        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            tracing::debug!(
                target: "quill.pool",
                model_id,
                ref_count = entry.ref_count,
                "released pooled reference"
            );
            return false;
        }

        if let Some(entry) = entries.remove(model_id) {
            drop(entries);
            tracing::info!(target: "quill.pool", model_id, "tearing down pooled instance");
            entry.handle.close().await;
        }
        true
    }

    /// Snapshot of every pooled instance
    pub async fn status(&self) -> Vec<PoolStatus> {
        self.entries
            .lock()
            .await
            .iter()
            .map(|(model_id, entry)| PoolStatus {
                model_id: model_id.clone(),
                ref_count: entry.ref_count,
                last_used: entry.last_used,
            })
            .collect()
    }

    /// Whether an entry exists for `model_id`
    pub async fn contains(&self, model_id: &str) -> bool {
        self.entries.lock().await.contains_key(model_id)
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
