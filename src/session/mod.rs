// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat session management
//!
//! Tracks pending (requested but not yet applied) versus active (currently
//! materialized) configuration, decides when a session must be rebuilt, and
//! runs the single `send` operation: lazily construct a session, dispatch
//! the prompt, and demultiplex the result stream into text chunks,
//! tool-call events, and tool-result events.

pub mod commands;
pub mod factory;
pub mod toolpack;

use std::sync::Arc;

use futures::StreamExt;

use crate::config::SettingsSnapshot;
use crate::engine::{EngineCatalog, GenEvent, GenRequest};
use crate::error::{QuillError, Result};
use crate::pool::InstancePool;
use crate::progress::{CancelToken, ProgressChannel, ProgressStatus};

use self::factory::{SessionFactory, SessionHandle};
use self::toolpack::{PackLoader, ToolPackRegistry};

/// Output hooks for one send call
///
/// Frontends implement this to render streamed text and tool activity.
pub trait SendObserver {
    fn on_text_delta(&mut self, _text: &str) {}

    /// Human-readable notice about tool activity, interleaved with text
    fn on_notice(&mut self, _text: &str) {}

    fn on_tool_call(&mut self, _name: &str, _args: &serde_json::Value) {}

    fn on_tool_result(
        &mut self,
        _name: &str,
        _args: &serde_json::Value,
        _result: &serde_json::Value,
    ) {
    }
}

/// No-op observer for callers that don't need output hooks
#[derive(Debug, Default)]
pub struct NoopSendObserver;

impl SendObserver for NoopSendObserver {}

/// What the user last asked for, possibly never yet realized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub credential: Option<String>,
}

impl PendingConfig {
    pub fn is_empty(&self) -> bool {
        self.provider.is_none() && self.model.is_none() && self.credential.is_none()
    }
}

/// What the currently live model handle corresponds to
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConfig {
    pub provider: String,
    pub model: String,
    pub credential: Option<String>,
}

/// Coarse session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    PendingOnly,
    Active,
}

struct ActiveSession {
    config: ActiveConfig,
    session: SessionHandle,
}

/// One logical chat session: configuration, lifecycle, and dispatch
pub struct ChatSessionManager {
    settings: SettingsSnapshot,
    factory: SessionFactory,
    pending: PendingConfig,
    active: Option<ActiveSession>,
    tool_packs: ToolPackRegistry,
    progress: ProgressChannel,
}

impl ChatSessionManager {
    /// Create a manager over an engine catalog and a (possibly shared) pool
    pub fn new(
        catalog: Arc<EngineCatalog>,
        pool: Arc<InstancePool>,
        settings: SettingsSnapshot,
    ) -> Self {
        Self {
            settings,
            factory: SessionFactory::new(catalog, pool),
            pending: PendingConfig::default(),
            active: None,
            tool_packs: ToolPackRegistry::with_builtin_packs(),
            progress: ProgressChannel::new(),
        }
    }

    /// Replace the settings snapshot (called on the host's settings-change
    /// notification; never read from ambient state)
    pub fn update_settings(&mut self, settings: SettingsSnapshot) {
        self.settings = settings;
    }

    pub fn settings(&self) -> &SettingsSnapshot {
        &self.settings
    }

    /// The progress/cancellation channel consumers subscribe to
    pub fn progress(&self) -> &ProgressChannel {
        &self.progress
    }

    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    /// Current coarse lifecycle state
    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Active
        } else if self.pending.is_empty() {
            SessionState::NoSession
        } else {
            SessionState::PendingOnly
        }
    }

    /// Pending configuration snapshot
    pub fn pending(&self) -> &PendingConfig {
        &self.pending
    }

    /// Active configuration, if a session is materialized
    pub fn active(&self) -> Option<&ActiveConfig> {
        self.active.as_ref().map(|a| &a.config)
    }

    /// Select a provider (and optionally model/credential) for the next send
    pub async fn set_provider(
        &mut self,
        name: &str,
        model: Option<&str>,
        credential: Option<&str>,
    ) -> Result<String> {
        if self.factory.catalog().descriptor(name).is_none() {
            return Err(QuillError::UnknownProvider(name.to_string()));
        }

        self.pending.provider = Some(name.to_string());
        if let Some(model) = model {
            self.pending.model = Some(model.to_string());
        }
        if let Some(credential) = credential {
            self.pending.credential = Some(credential.to_string());
        }
        self.invalidate_active().await;

        tracing::info!(target: "quill.session", provider = name, "provider selected");
        Ok(format!(
            "Provider set to '{}'. The next message will use it.",
            name
        ))
    }

    /// Select a model for the next send
    pub async fn set_model(&mut self, name: &str) -> Result<String> {
        self.pending.model = Some(name.to_string());
        self.invalidate_active().await;

        tracing::info!(target: "quill.session", model = name, "model selected");
        Ok(format!("Model set to '{}'.", name))
    }

    /// Store a credential for the next send
    ///
    /// Only invalidates the live session when one is active; a credential
    /// recorded before any construction simply becomes part of pending.
    pub async fn set_credential(&mut self, key: &str) -> Result<String> {
        self.pending.credential = Some(key.to_string());
        if self.active.is_some() {
            self.invalidate_active().await;
        }

        let provider = self
            .pending
            .provider
            .as_deref()
            .or(self.settings.default_provider.as_deref())
            .unwrap_or("");
        let check = crate::config::looks_like_key(provider, key);
        tracing::info!(target: "quill.session", provider, "credential stored");

        Ok(match check {
            crate::config::KeyCheck::Suspicious(warning) => {
                format!("Credential stored. Warning: {}.", warning)
            }
            _ => "Credential stored.".to_string(),
        })
    }

    /// Whether the next send must (re)build the session
    ///
    /// Once auto-select has committed to a working provider, sends without
    /// an explicit provider change stick to it; a pending model string in
    /// auto-select mode was only a hint and never forces a silent provider
    /// switch.
    pub fn needs_refresh(&self) -> bool {
        let Some(active) = self.active.as_ref() else {
            return true;
        };

        match self.pending.provider.as_deref() {
            Some(provider) => {
                provider != active.config.provider
                    || self
                        .pending
                        .model
                        .as_deref()
                        .map(|m| m != active.config.model)
                        .unwrap_or(false)
            }
            None => false,
        }
    }

    /// Send a prompt, lazily constructing the session first when needed
    ///
    /// Returns the accumulated model text. Cancellation is checked before
    /// construction, before dispatch, and before each streamed event; it
    /// surfaces as [`QuillError::Cancelled`], never as partial text.
    pub async fn send(
        &mut self,
        prompt: &str,
        observer: &mut dyn SendObserver,
        cancel: &CancelToken,
    ) -> Result<String> {
        cancel.check()?;

        if self.needs_refresh() {
            self.progress.open();
            self.progress.attach_token(cancel);

            let built = self.construct(cancel).await;
            match &built {
                Ok(()) => {
                    self.progress
                        .send_progress("Session ready", Some(1.0), ProgressStatus::Complete);
                }
                Err(e) if e.is_cancelled() => {
                    self.progress.send_progress(
                        "Session construction cancelled",
                        None,
                        ProgressStatus::Cancelled,
                    );
                }
                Err(e) => {
                    self.progress.send_progress(
                        &format!("Session construction failed: {}", e),
                        None,
                        ProgressStatus::Error,
                    );
                }
            }
            self.progress.close();
            built?;
        }

        let Some(active) = self.active.as_ref() else {
            return Err(QuillError::Config(
                "no active session after construction".to_string(),
            ));
        };

        let request = GenRequest::new(prompt).with_tools(self.tool_packs.enabled_tools());
        tracing::debug!(
            target: "quill.session",
            provider = %active.config.provider,
            model = %active.config.model,
            tools = request.tools.len(),
            "dispatching prompt"
        );

        cancel.check()?;
        let mut stream = active.session.handle.generate(request, cancel).await?;
        let mut text = String::new();

        while let Some(event) = stream.next().await {
            cancel.check()?;

            match event? {
                GenEvent::TextDelta(delta) => {
                    text.push_str(&delta);
                    observer.on_text_delta(&delta);
                }
                GenEvent::ToolCall { name, args } => {
                    tracing::info!(
                        target: "quill.session",
                        tool = %name,
                        "model requested tool"
                    );
                    observer.on_tool_call(&name, &args);
                    observer.on_notice(&format!("[calling tool {}]", name));
                }
                GenEvent::ToolResult { name, args, result } => {
                    observer.on_tool_result(&name, &args, &result);
                    observer.on_notice(&format!("[tool {} completed]", name));
                }
            }
        }

        Ok(text)
    }

    /// Enable a tool pack (lazy load-on-enable, idempotent)
    pub fn enable_tool_pack(&mut self, name: &str) -> Result<String> {
        self.tool_packs.enable(name)
    }

    /// Disable a tool pack
    pub fn disable_tool_pack(&mut self, name: &str) -> Result<String> {
        self.tool_packs.disable(name)
    }

    /// Names of currently enabled packs
    pub fn enabled_tool_packs(&self) -> Vec<String> {
        self.tool_packs.enabled_packs()
    }

    /// Names of every registered pack
    pub fn available_tool_packs(&self) -> Vec<String> {
        self.tool_packs.available_packs()
    }

    /// Make a custom pack available
    pub fn register_tool_pack(&mut self, name: impl Into<String>, loader: PackLoader) {
        self.tool_packs.register_pack(name, loader);
    }

    /// Release held resources and clear all session state
    ///
    /// Safe to call even if no session was ever constructed.
    pub async fn shutdown(&mut self) {
        self.invalidate_active().await;
        self.pending = PendingConfig::default();
        self.progress.close();
        tracing::info!(target: "quill.session", "session manager shut down");
    }

    /// Build the session for the configuration as it stands right now
    ///
    /// A mutation that lands while construction is suspended does not
    /// redirect it; the resolved snapshot below is what gets built.
    async fn construct(&mut self, cancel: &CancelToken) -> Result<()> {
        // Mutators always clear Active before leaving pending state behind,
        // but release defensively so a stale handle can never leak.
        if self.active.is_some() {
            tracing::warn!(target: "quill.session", "constructing over a live session; releasing it");
            self.invalidate_active().await;
        }

        let pending = self.pending.clone();
        let provider = pending
            .provider
            .clone()
            .or_else(|| self.settings.default_provider.clone());
        let model = pending
            .model
            .clone()
            .or_else(|| self.settings.default_model.clone());

        match provider {
            Some(provider) => {
                let credential = self.resolve_credential(&provider, &pending);
                let session = self
                    .factory
                    .create_for_provider(
                        &provider,
                        model.as_deref(),
                        credential.as_deref(),
                        &self.progress,
                        cancel,
                    )
                    .await?;
                self.install(session, credential);
            }
            None => {
                let outcome = self
                    .factory
                    .create_with_auto_select(model.as_deref(), None, &self.progress, cancel)
                    .await?;
                for attempt in &outcome.attempts {
                    tracing::warn!(
                        target: "quill.session",
                        provider = %attempt.provider,
                        reason = %attempt.reason,
                        "auto-select skipped provider"
                    );
                }
                self.install(outcome.session, None);
            }
        }

        Ok(())
    }

    fn resolve_credential(&self, provider: &str, pending: &PendingConfig) -> Option<String> {
        if let Some(key) = &pending.credential {
            return Some(key.clone());
        }
        self.factory
            .catalog()
            .descriptor(provider)
            .and_then(|d| self.settings.credential_for(d))
            .map(str::to_string)
    }

    fn install(&mut self, session: SessionHandle, credential: Option<String>) {
        self.active = Some(ActiveSession {
            config: ActiveConfig {
                provider: session.provider.clone(),
                model: session.model.clone(),
                credential,
            },
            session,
        });
    }

    async fn invalidate_active(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(key) = &active.session.pool_key {
                self.factory.pool().release(key).await;
            }
            tracing::debug!(
                target: "quill.session",
                provider = %active.config.provider,
                model = %active.config.model,
                "active session invalidated"
            );
        }
    }
}
