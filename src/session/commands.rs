// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Human-readable command surface
//!
//! The host's magic-command parser routes here; every operation returns a
//! plain string suitable for cell output, or a typed error carrying
//! remediation text.

use crate::engine::ModelFilter;
use crate::error::{QuillError, Result};

use super::{ChatSessionManager, SessionState};

impl ChatSessionManager {
    /// One-paragraph summary of the session's current state
    pub async fn status(&self) -> String {
        let mut out = String::new();

        let state = match self.state() {
            SessionState::NoSession => "no session",
            SessionState::PendingOnly => "configured, not yet built",
            SessionState::Active => "active",
        };
        out.push_str(&format!("Session: {}\n", state));

        if let Some(provider) = &self.pending().provider {
            out.push_str(&format!("Requested provider: {}\n", provider));
        } else {
            out.push_str("Requested provider: (auto-select)\n");
        }
        if let Some(model) = &self.pending().model {
            out.push_str(&format!("Requested model: {}\n", model));
        }

        if let Some(active) = self.active() {
            out.push_str(&format!(
                "Active: {} / {}\n",
                active.provider, active.model
            ));
        }

        let enabled = self.enabled_tool_packs();
        if enabled.is_empty() {
            out.push_str("Tool packs: none enabled\n");
        } else {
            out.push_str(&format!("Tool packs: {}\n", enabled.join(", ")));
        }

        let pooled = self.factory().pool().status().await;
        if !pooled.is_empty() {
            out.push_str("Shared instances:\n");
            for entry in pooled {
                out.push_str(&format!(
                    "  {} (refs: {})\n",
                    entry.model_id, entry.ref_count
                ));
            }
        }

        out
    }

    /// List every registered provider with its requirements
    pub fn list_providers(&self) -> String {
        let mut descriptors = self.factory().catalog().registry().list();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));

        let active_provider = self.active().map(|a| a.provider.clone());
        let mut out = String::from("Providers:\n");
        for descriptor in descriptors {
            let marker = if Some(&descriptor.name) == active_provider.as_ref() {
                "*"
            } else {
                " "
            };
            let kind = if descriptor.local {
                "local, feature-detected".to_string()
            } else {
                format!(
                    "requires {}",
                    descriptor.credential_source.as_deref().unwrap_or("a key")
                )
            };
            out.push_str(&format!(
                "{} {} - {} ({}): {}\n",
                marker, descriptor.name, descriptor.display_name, kind, descriptor.description
            ));
        }
        out
    }

    /// List the selectable models of one provider
    pub fn list_models(&self, provider: &str, filter: Option<&ModelFilter>) -> Result<String> {
        let engine = self
            .factory()
            .catalog()
            .engine(provider)
            .ok_or_else(|| QuillError::UnknownProvider(provider.to_string()))?;

        let cards = engine.list_models(filter);
        if cards.is_empty() {
            return Ok(format!("No models listed for '{}'.", provider));
        }

        let default_model = engine.default_model();
        let mut out = format!("Models for {}:\n", provider);
        for card in cards {
            let marker = if card.id == default_model { "*" } else { " " };
            let mut line = format!("{} {} - {}", marker, card.id, card.name);
            if let Some(memory) = card.memory_gb {
                line.push_str(&format!(" ({:.1} GB)", memory));
            }
            if card.low_resource {
                line.push_str(" [low-resource]");
            }
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}
