// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider capability registry
//!
//! Catalog of known provider families and their configuration requirements.
//! Descriptors are immutable once registered; duplicate registration
//! overwrites silently (last write wins) so embedders can customize late.

use std::collections::HashMap;

/// Describes one provider capability family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    /// Unique provider name (e.g., "openai", "webllm")
    pub name: String,

    /// Human-readable display name
    pub display_name: String,

    /// Whether the provider needs a credential to construct a session
    pub requires_credential: bool,

    /// Name of the credential entry in the host settings (e.g., "OPENAI_API_KEY")
    pub credential_source: Option<String>,

    /// Whether this is a local/built-in family (feature-detected, no credential)
    pub local: bool,

    /// Free-text description shown in provider listings
    pub description: String,
}

impl ProviderDescriptor {
    /// Create a credentialed remote provider descriptor
    pub fn remote(
        name: impl Into<String>,
        display_name: impl Into<String>,
        credential_source: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            requires_credential: true,
            credential_source: Some(credential_source.into()),
            local: false,
            description: description.into(),
        }
    }

    /// Create a local, feature-detected provider descriptor
    pub fn local(
        name: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            requires_credential: false,
            credential_source: None,
            local: true,
            description: description.into(),
        }
    }
}

/// Registry of provider descriptors keyed by name
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    by_name: HashMap<String, ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with the built-in provider families
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ProviderDescriptor::remote(
            "openai",
            "OpenAI",
            "OPENAI_API_KEY",
            "Hosted OpenAI chat models",
        ));
        registry.register(ProviderDescriptor::remote(
            "anthropic",
            "Anthropic",
            "ANTHROPIC_API_KEY",
            "Hosted Claude models via an OpenAI-compatible gateway",
        ));
        registry.register(ProviderDescriptor::local(
            "webllm",
            "WebLLM",
            "In-browser GPU inference (requires WebGPU)",
        ));
        registry.register(ProviderDescriptor::local(
            "wllama",
            "wllama",
            "In-browser CPU inference (wasm llama.cpp)",
        ));
        registry
    }

    /// Add or overwrite a descriptor by name
    pub fn register(&mut self, descriptor: ProviderDescriptor) {
        tracing::debug!(
            target: "quill.registry",
            provider = %descriptor.name,
            local = descriptor.local,
            "registering provider descriptor"
        );
        self.by_name.insert(descriptor.name.clone(), descriptor);
    }

    /// Look up a descriptor by name
    pub fn get(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.by_name.get(name)
    }

    /// All registered descriptors, order not significant
    pub fn list(&self) -> Vec<&ProviderDescriptor> {
        self.by_name.values().collect()
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
