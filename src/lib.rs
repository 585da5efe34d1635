// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Quill - provider lifecycle and streaming chat core for notebook AI cells.
//!
//! This crate is the orchestration layer between a notebook-style execution
//! cell and an LLM backend, remote or running entirely client-side:
//! - `registry`: catalog of provider families and their requirements
//! - `probe`: memoized feature detection and the auto-select/fallback order
//! - `pool`: reference-counted cache of expensive local model instances
//! - `engine`: backend interfaces plus the remote (OpenAI-compatible) engine
//! - `session`: pending/active configuration, construction, and the
//!   streaming `send` dispatch with tool packs
//! - `progress`: progress reporting and cooperative cancellation
//!
//! The host environment owns persistence, the command-line parsing of
//! `%chat` cells, and the concrete in-browser inference engines; those
//! arrive through [`config::SettingsSnapshot`], plain method calls, and
//! [`engine::CapabilityProvider`] implementations respectively.

pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod probe;
pub mod progress;
pub mod registry;
pub mod session;

pub use error::{QuillError, Result};
