// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Tool pack registry
//!
//! A tool pack is a named bundle of callable functions exposable to the
//! model during generation. Packs load lazily on first enable; re-enabling
//! an already-enabled pack reports success without reloading.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::engine::ToolImpl;
use crate::error::{QuillError, Result};

/// Deferred pack constructor, invoked on first enable
pub type PackLoader = Arc<dyn Fn() -> ToolPack + Send + Sync>;

/// A named bundle of tools
#[derive(Debug, Clone)]
pub struct ToolPack {
    pub name: String,
    tools: BTreeMap<String, Arc<ToolImpl>>,
}

impl ToolPack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: BTreeMap::new(),
        }
    }

    /// Builder: add a tool to the pack
    pub fn with_tool(mut self, tool: ToolImpl) -> Self {
        self.tools.insert(tool.name.clone(), Arc::new(tool));
        self
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<ToolImpl>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Registry of available and enabled tool packs
pub struct ToolPackRegistry {
    loaders: BTreeMap<String, PackLoader>,
    enabled: BTreeMap<String, ToolPack>,
}

impl Default for ToolPackRegistry {
    fn default() -> Self {
        Self::with_builtin_packs()
    }
}

impl ToolPackRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            loaders: BTreeMap::new(),
            enabled: BTreeMap::new(),
        }
    }

    /// Create a registry seeded with the built-in packs
    pub fn with_builtin_packs() -> Self {
        let mut registry = Self::new();
        registry.register_pack("clock", Arc::new(clock_pack));
        registry
    }

    /// Make a pack available under a name (does not enable it)
    pub fn register_pack(&mut self, name: impl Into<String>, loader: PackLoader) {
        self.loaders.insert(name.into(), loader);
    }

    /// Enable a pack, loading it on first use
    ///
    /// Idempotent: enabling an already-enabled pack reports success without
    /// reloading and never duplicates tools.
    pub fn enable(&mut self, name: &str) -> Result<String> {
        if self.enabled.contains_key(name) {
            return Ok(format!("Tool pack '{}' is already enabled.", name));
        }

        let loader = self
            .loaders
            .get(name)
            .ok_or_else(|| QuillError::UnknownToolPack(name.to_string()))?;

        let pack = loader();
        let count = pack.len();
        self.enabled.insert(name.to_string(), pack);
        tracing::info!(target: "quill.session.tools", pack = name, tools = count, "tool pack enabled");
        Ok(format!("Enabled tool pack '{}' ({} tools).", name, count))
    }

    /// Disable a pack; a known-but-disabled pack is not an error
    pub fn disable(&mut self, name: &str) -> Result<String> {
        if !self.loaders.contains_key(name) {
            return Err(QuillError::UnknownToolPack(name.to_string()));
        }

        if self.enabled.remove(name).is_some() {
            tracing::info!(target: "quill.session.tools", pack = name, "tool pack disabled");
            Ok(format!("Disabled tool pack '{}'.", name))
        } else {
            Ok(format!("Tool pack '{}' was not enabled.", name))
        }
    }

    /// Names of currently enabled packs
    pub fn enabled_packs(&self) -> Vec<String> {
        self.enabled.keys().cloned().collect()
    }

    /// Names of every registered pack
    pub fn available_packs(&self) -> Vec<String> {
        self.loaders.keys().cloned().collect()
    }

    /// All tools across enabled packs, one entry per tool name
    ///
    /// When two packs expose the same tool name, the pack enabled under the
    /// lexicographically later name wins.
    pub fn enabled_tools(&self) -> Vec<Arc<ToolImpl>> {
        let mut merged: BTreeMap<String, Arc<ToolImpl>> = BTreeMap::new();
        for pack in self.enabled.values() {
            for tool in pack.tools() {
                merged.insert(tool.name.clone(), tool.clone());
            }
        }
        merged.into_values().collect()
    }
}

/// Built-in pack exposing the host's wall clock
fn clock_pack() -> ToolPack {
    ToolPack::new("clock").with_tool(ToolImpl::new(
        "current_time",
        "Returns the current UTC date and time in RFC 3339 format",
        serde_json::json!({ "type": "object", "properties": {} }),
        Arc::new(|_args: serde_json::Value| {
            Box::pin(async {
                Ok(serde_json::json!({ "now": chrono::Utc::now().to_rfc3339() }))
            }) as BoxFuture<'static, Result<serde_json::Value>>
        }),
    ))
}
