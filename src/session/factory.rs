// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Session construction
//!
//! Produces a ready model handle for one concrete (provider, model,
//! credential) triple, or fails with a typed cause. Local providers go
//! through support probing, the shared instance pool, and a progress-
//! reported download phase; credentialed providers are built directly.
//! Auto-select walks the fixed local priority order and falls back on
//! construction failure, never on cancellation.

use std::sync::Arc;

use crate::engine::{Availability, CapabilityProvider, EngineCatalog, ModelHandle};
use crate::error::{ProviderAttempt, QuillError, Result};
use crate::pool::InstancePool;
use crate::probe::SupportProber;
use crate::progress::{CancelToken, ProgressChannel, ProgressStatus};

/// A constructed session: the handle plus what it corresponds to
#[derive(Clone, Debug)]
pub struct SessionHandle {
    /// Provider the handle belongs to
    pub provider: String,

    /// Resolved model identifier
    pub model: String,

    /// Ready-to-generate model handle
    pub handle: Arc<dyn ModelHandle>,

    /// Opaque release key for the instance pool, when pool-eligible
    pub pool_key: Option<String>,
}

/// Result of an auto-select construction
#[derive(Debug)]
pub struct AutoSelectOutcome {
    /// The working session
    pub session: SessionHandle,

    /// Candidates that were skipped or failed before this one succeeded
    pub attempts: Vec<ProviderAttempt>,
}

/// Builds sessions from the engine catalog, prober, and instance pool
#[derive(Clone)]
pub struct SessionFactory {
    catalog: Arc<EngineCatalog>,
    prober: SupportProber,
    pool: Arc<InstancePool>,
}

impl SessionFactory {
    pub fn new(catalog: Arc<EngineCatalog>, pool: Arc<InstancePool>) -> Self {
        let prober = SupportProber::new(catalog.clone());
        Self {
            catalog,
            prober,
            pool,
        }
    }

    pub fn catalog(&self) -> &Arc<EngineCatalog> {
        &self.catalog
    }

    pub fn prober(&self) -> &SupportProber {
        &self.prober
    }

    pub fn pool(&self) -> &Arc<InstancePool> {
        &self.pool
    }

    /// Construct a session for an explicitly requested provider
    pub async fn create_for_provider(
        &self,
        provider: &str,
        model: Option<&str>,
        credential: Option<&str>,
        progress: &ProgressChannel,
        cancel: &CancelToken,
    ) -> Result<SessionHandle> {
        self.create_inner(provider, model, false, credential, progress, cancel)
            .await
    }

    /// Construct a session by walking the local priority order
    ///
    /// Probe failures and construction failures advance to the next
    /// candidate and are recorded; cancellation propagates immediately.
    /// The requested model is treated as a hint: it is used only when the
    /// selected engine actually lists it.
    pub async fn create_with_auto_select(
        &self,
        model_hint: Option<&str>,
        credential: Option<&str>,
        progress: &ProgressChannel,
        cancel: &CancelToken,
    ) -> Result<AutoSelectOutcome> {
        cancel.check()?;

        let mut attempts: Vec<ProviderAttempt> = Vec::new();
        let mut candidate = self.catalog.local_order().first().cloned();

        while let Some(name) = candidate {
            cancel.check()?;

            let support = self.prober.check_support(&name).await?;
            if !support.supported {
                tracing::debug!(
                    target: "quill.session.factory",
                    provider = %name,
                    reason = support.reason_text(),
                    "auto-select skipping unsupported provider"
                );
                attempts.push(ProviderAttempt::new(&name, support.reason_text()));
                candidate = self.prober.next_fallback(&name);
                continue;
            }

            match self
                .create_inner(&name, model_hint, true, credential, progress, cancel)
                .await
            {
                Ok(session) => {
                    tracing::info!(
                        target: "quill.session.factory",
                        provider = %name,
                        model = %session.model,
                        skipped = attempts.len(),
                        "auto-select committed"
                    );
                    return Ok(AutoSelectOutcome { session, attempts });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        target: "quill.session.factory",
                        provider = %name,
                        error = %e,
                        "auto-select candidate failed construction, falling back"
                    );
                    attempts.push(ProviderAttempt::new(&name, e.to_string()));
                    candidate = self.prober.next_fallback(&name);
                }
            }
        }

        Err(QuillError::AllProvidersFailed { attempts })
    }

    async fn create_inner(
        &self,
        provider: &str,
        requested_model: Option<&str>,
        model_is_hint: bool,
        credential: Option<&str>,
        progress: &ProgressChannel,
        cancel: &CancelToken,
    ) -> Result<SessionHandle> {
        let descriptor = self
            .catalog
            .descriptor(provider)
            .ok_or_else(|| QuillError::UnknownProvider(provider.to_string()))?
            .clone();
        let engine = self.catalog.engine(provider).ok_or_else(|| {
            QuillError::Construction {
                provider: provider.to_string(),
                message: "no engine implementation registered".to_string(),
            }
        })?;

        cancel.check()?;

        if descriptor.local {
            let support = self.prober.check_support(provider).await?;
            if !support.supported {
                return Err(QuillError::UnsupportedEnvironment {
                    provider: provider.to_string(),
                    reason: support.reason_text().to_string(),
                });
            }
            cancel.check()?;

            let model_id = resolve_model(engine.as_ref(), requested_model, model_is_hint);
            progress.send_progress(
                &format!("Preparing {}", model_id),
                None,
                ProgressStatus::Loading,
            );

            let handle = self
                .pool
                .acquire(&model_id, || {
                    build_local_handle(engine.clone(), provider, &model_id, progress, cancel)
                })
                .await?;

            // A cancel that lands after the pool committed must not leak
            // the freshly acquired reference.
            if cancel.is_cancelled() {
                self.pool.release(&model_id).await;
                return Err(QuillError::Cancelled);
            }

            Ok(SessionHandle {
                provider: provider.to_string(),
                model: model_id.clone(),
                handle,
                pool_key: Some(model_id),
            })
        } else {
            let Some(key) = credential else {
                let source = descriptor
                    .credential_source
                    .as_deref()
                    .unwrap_or("API_KEY");
                return Err(QuillError::CredentialMissing {
                    provider: provider.to_string(),
                    guidance: format!(
                        "Set {} with the key command, then send again.",
                        source
                    ),
                });
            };

            cancel.check()?;
            let model_id = resolve_model(engine.as_ref(), requested_model, model_is_hint);
            let handle = engine.create_handle(&model_id, Some(key)).await?;
            cancel.check()?;

            Ok(SessionHandle {
                provider: provider.to_string(),
                model: model_id,
                handle,
                pool_key: None,
            })
        }
    }
}

/// Pick the concrete model id for an engine
///
/// In hint mode an unlisted request falls back to the engine default rather
/// than failing: an auto-selected engine is not required to know a model
/// string meant for some other provider.
fn resolve_model(
    engine: &dyn CapabilityProvider,
    requested: Option<&str>,
    requested_is_hint: bool,
) -> String {
    match requested {
        Some(id) if !requested_is_hint => id.to_string(),
        Some(id) => {
            if engine.list_models(None).iter().any(|m| m.id == id) {
                id.to_string()
            } else {
                engine.default_model()
            }
        }
        None => engine.default_model(),
    }
}

/// Build one local handle, driving its download phase with progress
async fn build_local_handle(
    engine: Arc<dyn CapabilityProvider>,
    provider: &str,
    model_id: &str,
    progress: &ProgressChannel,
    cancel: &CancelToken,
) -> Result<Arc<dyn ModelHandle>> {
    let handle = engine.create_handle(model_id, None).await?;

    match handle.availability() {
        Availability::Unavailable => {
            return Err(QuillError::Construction {
                provider: provider.to_string(),
                message: format!("model {} is unavailable in this environment", model_id),
            });
        }
        Availability::Downloadable | Availability::Downloading => {
            tracing::info!(
                target: "quill.session.factory",
                provider,
                model = model_id,
                "starting model download"
            );

            let channel = progress.clone();
            let mut forward = move |pct: Option<f32>, text: &str| {
                channel.send_progress(text, pct, ProgressStatus::Loading);
            };
            handle.begin_download(&mut forward, cancel).await?;
            cancel.check()?;
        }
        Availability::Available => {}
    }

    Ok(handle)
}
