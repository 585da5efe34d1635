// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider support probing
//!
//! Per-provider feature detection with memoized results. Probing and
//! construction fallback walk the same fixed priority order but are
//! triggered by different failure classes: probing is optimistic
//! (environment capability), fallback is pessimistic (a construction that
//! actually failed). A probe that reports supported is trusted until
//! construction fails; results are invalidated only by an explicit reset.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::engine::{EngineCatalog, SupportResult};
use crate::error::{QuillError, Result};

/// Memoizing feature-detection prober over an engine catalog
#[derive(Clone)]
pub struct SupportProber {
    catalog: Arc<EngineCatalog>,
    cache: Arc<Mutex<HashMap<String, SupportResult>>>,
}

impl SupportProber {
    pub fn new(catalog: Arc<EngineCatalog>) -> Self {
        Self {
            catalog,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether a provider is usable in the current environment
    ///
    /// Credentialed providers always report supported; their usability is
    /// gated by credential presence, checked at construction time. Local
    /// providers delegate to the engine's own probe, memoized per name.
    pub async fn check_support(&self, provider: &str) -> Result<SupportResult> {
        let descriptor = self
            .catalog
            .descriptor(provider)
            .ok_or_else(|| QuillError::UnknownProvider(provider.to_string()))?;

        if !descriptor.local {
            return Ok(SupportResult::supported());
        }

        if let Some(cached) = self.cache.lock().unwrap().get(provider) {
            return Ok(cached.clone());
        }

        let engine = self
            .catalog
            .engine(provider)
            .ok_or_else(|| QuillError::UnknownProvider(provider.to_string()))?;

        let result = engine.check_support().await;
        tracing::debug!(
            target: "quill.probe",
            provider,
            supported = result.supported,
            reason = ?result.reason,
            "support probe"
        );

        self.cache
            .lock()
            .unwrap()
            .insert(provider.to_string(), result.clone());
        Ok(result)
    }

    /// First local provider in priority order whose probe reports supported
    pub async fn auto_select_local(&self) -> Option<String> {
        for name in self.catalog.local_order() {
            match self.check_support(name).await {
                Ok(result) if result.supported => return Some(name.clone()),
                Ok(_) => continue,
                Err(_) => continue,
            }
        }
        None
    }

    /// Next candidate after a provider that failed construction, or none
    ///
    /// Only meaningful for local providers; a name outside the priority
    /// order has no fallback.
    pub fn next_fallback(&self, provider: &str) -> Option<String> {
        let order = self.catalog.local_order();
        let index = order.iter().position(|n| n == provider)?;
        order.get(index + 1).cloned()
    }

    /// Drop all memoized probe results
    pub fn reset(&self) {
        self.cache.lock().unwrap().clear();
    }
}
