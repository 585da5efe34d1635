// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Host settings snapshot
//!
//! The host environment owns persistence (credentials, last-selected
//! provider/model). This crate never reads ambient global state; the host
//! hands over an explicit snapshot at construction and replaces it through
//! an explicit update call when its settings change.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registry::ProviderDescriptor;

/// Immutable view of the host's chat settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SettingsSnapshot {
    /// Provider to use when none is set explicitly (None = auto-select)
    #[serde(default)]
    pub default_provider: Option<String>,

    /// Model to use when none is set explicitly
    #[serde(default)]
    pub default_model: Option<String>,

    /// Credentials keyed by source name (e.g., "OPENAI_API_KEY")
    #[serde(default)]
    pub credentials: HashMap<String, String>,

    /// Per-provider base URL overrides
    #[serde(default)]
    pub base_urls: HashMap<String, String>,
}

impl SettingsSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a snapshot from TOML text handed over by the host
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Credential by source name
    pub fn credential(&self, source: &str) -> Option<&str> {
        self.credentials.get(source).map(String::as_str)
    }

    /// Credential for a provider descriptor, via its declared source
    pub fn credential_for(&self, descriptor: &ProviderDescriptor) -> Option<&str> {
        descriptor
            .credential_source
            .as_deref()
            .and_then(|source| self.credential(source))
    }

    /// Store a credential under a source name
    pub fn set_credential(&mut self, source: impl Into<String>, key: impl Into<String>) {
        self.credentials.insert(source.into(), key.into());
    }

    /// Base URL override for a provider
    pub fn base_url(&self, provider: &str) -> Option<&str> {
        self.base_urls.get(provider).map(String::as_str)
    }
}

/// Result of a lightweight credential format check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCheck {
    /// Key looks plausible for the provider
    Plausible,
    /// Key is usable but does not match the expected shape
    Suspicious(String),
    /// Key is empty
    Empty,
}

impl KeyCheck {
    pub fn is_usable(&self) -> bool {
        !matches!(self, KeyCheck::Empty)
    }
}

/// Sanity-check a credential's shape without validating it remotely
pub fn looks_like_key(provider: &str, key: &str) -> KeyCheck {
    if key.trim().is_empty() {
        return KeyCheck::Empty;
    }

    match provider {
        "openai" => {
            if key.starts_with("sk-") {
                KeyCheck::Plausible
            } else {
                KeyCheck::Suspicious("key does not start with expected prefix 'sk-'".to_string())
            }
        }
        "anthropic" => {
            if key.starts_with("sk-ant-") || key.starts_with("sk-") {
                KeyCheck::Plausible
            } else {
                KeyCheck::Suspicious("key does not start with expected prefix 'sk-'".to_string())
            }
        }
        _ => {
            if key.len() > 10 {
                KeyCheck::Plausible
            } else {
                KeyCheck::Suspicious("key appears short".to_string())
            }
        }
    }
}
