// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for Quill
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Main error type for Quill operations
#[derive(Error, Debug)]
pub enum QuillError {
    /// A provider's feature probe failed in this environment
    #[error("Provider '{provider}' is not supported here: {reason}")]
    UnsupportedEnvironment { provider: String, reason: String },

    /// A credentialed provider has no key configured
    #[error("Credential required for '{provider}'. {guidance}")]
    CredentialMissing { provider: String, guidance: String },

    /// The probe passed but handle construction failed
    #[error("Failed to construct a session for '{provider}': {message}")]
    Construction { provider: String, message: String },

    /// Every auto-select candidate was attempted and failed
    #[error("No usable provider found. {}", format_attempts(.attempts))]
    AllProvidersFailed { attempts: Vec<ProviderAttempt> },

    /// Operation aborted cooperatively by the user
    #[error("Operation cancelled")]
    Cancelled,

    /// The model handle raised during streaming after successful construction
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Provider name not present in the registry
    #[error("Unknown provider: '{0}'. Use the providers command to list known providers.")]
    UnknownProvider(String),

    /// Tool pack name not recognized
    #[error("Unknown tool pack: '{0}'. Use the tools command to list available packs.")]
    UnknownToolPack(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// One failed candidate inside an aggregate auto-select failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    /// Provider that was tried
    pub provider: String,
    /// Why it was skipped or failed
    pub reason: String,
}

impl ProviderAttempt {
    pub fn new(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

fn format_attempts(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "No local providers are available in this environment; \
                configure a credentialed provider instead."
            .to_string();
    }

    let tried = attempts
        .iter()
        .map(|a| format!("{} ({})", a.provider, a.reason))
        .collect::<Vec<_>>()
        .join("; ");

    format!(
        "Tried: {}. Configure a credentialed provider with the provider and key commands.",
        tried
    )
}

/// Result type alias for Quill operations
pub type Result<T> = std::result::Result<T, QuillError>;

impl QuillError {
    /// Whether this error is the distinguished cancellation outcome
    pub fn is_cancelled(&self) -> bool {
        matches!(self, QuillError::Cancelled)
    }
}

impl From<toml::de::Error> for QuillError {
    fn from(err: toml::de::Error) -> Self {
        QuillError::Toml(err.to_string())
    }
}
