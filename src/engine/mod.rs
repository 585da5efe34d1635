// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Engine abstraction layer
//!
//! Defines the interfaces an inference backend must expose to the session
//! core: feature detection, model listing, handle construction, and the
//! streaming generation call. Concrete local engines (WebLLM, wllama) are
//! injected by the embedding host; this crate ships the credentialed remote
//! engine and a scriptable mock.

pub mod mock;
pub mod remote;

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::Stream;

use crate::error::Result;
use crate::progress::CancelToken;
use crate::registry::{ProviderDescriptor, ProviderRegistry};

/// Outcome of a feature-detection probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportResult {
    pub supported: bool,
    pub reason: Option<String>,
}

impl SupportResult {
    pub fn supported() -> Self {
        Self {
            supported: true,
            reason: None,
        }
    }

    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            supported: false,
            reason: Some(reason.into()),
        }
    }

    /// Reason text, or a generic fallback for display
    pub fn reason_text(&self) -> &str {
        self.reason.as_deref().unwrap_or("not supported")
    }
}

/// Readiness of a model handle's underlying resources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Cannot be made ready in this environment
    Unavailable,
    /// Needs a download before first use
    Downloadable,
    /// A download is already in flight
    Downloading,
    /// Ready to generate
    Available,
}

/// A selectable model within a provider
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCard {
    /// Model identifier (e.g., "Llama-3.2-1B-Instruct-q4f16_1-MLC")
    pub id: String,

    /// Human-readable display name
    pub name: String,

    /// Estimated memory footprint in GB, if known
    pub memory_gb: Option<f32>,

    /// Suitable for low-resource environments
    pub low_resource: bool,

    /// Owning provider name
    pub provider: String,
}

impl ModelCard {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            memory_gb: None,
            low_resource: false,
            provider: provider.into(),
        }
    }

    /// Builder: set display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: set memory footprint estimate
    pub fn with_memory(mut self, gb: f32) -> Self {
        self.memory_gb = Some(gb);
        self
    }

    /// Builder: mark as low-resource
    pub fn low_resource(mut self) -> Self {
        self.low_resource = true;
        self
    }
}

/// Filter applied to model listings
#[derive(Debug, Clone, Default)]
pub struct ModelFilter {
    /// Keep only low-resource models
    pub low_resource_only: bool,
    /// Keep only models at or below this footprint
    pub max_memory_gb: Option<f32>,
}

impl ModelFilter {
    pub fn matches(&self, card: &ModelCard) -> bool {
        if self.low_resource_only && !card.low_resource {
            return false;
        }
        if let Some(max) = self.max_memory_gb {
            if card.memory_gb.map(|m| m > max).unwrap_or(false) {
                return false;
            }
        }
        true
    }
}

/// Async tool executor function
pub type ToolFn =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// A callable tool exposed to the model during generation
#[derive(Clone)]
pub struct ToolImpl {
    /// Tool name the model calls it by
    pub name: String,

    /// Tool description shown to the model
    pub description: String,

    /// Input schema (JSON Schema)
    pub parameters: serde_json::Value,

    /// Implementation invoked when the model requests the tool
    pub run: ToolFn,
}

impl ToolImpl {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        run: ToolFn,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            run,
        }
    }
}

impl fmt::Debug for ToolImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolImpl")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Request for one streaming generation call
#[derive(Debug, Clone, Default)]
pub struct GenRequest {
    /// User prompt text
    pub prompt: String,

    /// Tools the model may invoke
    pub tools: Vec<Arc<ToolImpl>>,
}

impl GenRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tools: vec![],
        }
    }

    /// Builder: set tools
    pub fn with_tools(mut self, tools: Vec<Arc<ToolImpl>>) -> Self {
        self.tools = tools;
        self
    }
}

/// Events yielded by a streaming generation call
#[derive(Debug, Clone)]
pub enum GenEvent {
    /// Incremental text output
    TextDelta(String),

    /// The model requested a tool invocation
    ToolCall {
        name: String,
        args: serde_json::Value,
    },

    /// A tool invocation completed
    ToolResult {
        name: String,
        args: serde_json::Value,
        result: serde_json::Value,
    },
}

/// Streaming sequence of generation events; ends on completion
pub type GenStream = Pin<Box<dyn Stream<Item = Result<GenEvent>> + Send>>;

/// Progress callback for a download phase: (fraction complete, status text)
pub type DownloadProgress<'a> = &'a mut (dyn FnMut(Option<f32>, &str) + Send);

/// A ready-or-readying model instance
#[async_trait]
pub trait ModelHandle: Send + Sync {
    /// Model identifier this handle was created for
    fn model_id(&self) -> &str;

    /// Current readiness of the underlying resources
    fn availability(&self) -> Availability;

    /// Fetch/initialize the underlying resources, reporting progress
    ///
    /// Implementations poll `cancel` between progress reports and surface
    /// the cancellation outcome instead of a generic failure.
    async fn begin_download(
        &self,
        on_progress: DownloadProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<()>;

    /// Dispatch one prompt and stream the typed result events
    async fn generate(&self, request: GenRequest, cancel: &CancelToken) -> Result<GenStream>;

    /// Tear down the underlying resources
    ///
    /// Called by the instance pool when the last reference is released;
    /// callers must never invoke this directly on pooled handles.
    async fn close(&self) {}
}

impl std::fmt::Debug for dyn ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id())
            .field("availability", &self.availability())
            .finish()
    }
}

/// An inference capability family (local engine or remote API)
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Provider name matching its registry descriptor
    fn name(&self) -> &str;

    /// Feature-detect whether this provider is usable here
    async fn check_support(&self) -> SupportResult;

    /// List selectable models, optionally filtered
    fn list_models(&self, filter: Option<&ModelFilter>) -> Vec<ModelCard>;

    /// Identifier of the model used when none is requested
    fn default_model(&self) -> String;

    /// Produce an availability-aware handle for one model
    async fn create_handle(
        &self,
        model_id: &str,
        credential: Option<&str>,
    ) -> Result<Arc<dyn ModelHandle>>;
}

/// Catalog of provider descriptors plus their engine implementations
///
/// The order in which local engines are registered is the fixed auto-select
/// priority order (most capable first).
#[derive(Clone)]
pub struct EngineCatalog {
    registry: ProviderRegistry,
    engines: HashMap<String, Arc<dyn CapabilityProvider>>,
    local_order: Vec<String>,
}

impl EngineCatalog {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            engines: HashMap::new(),
            local_order: Vec::new(),
        }
    }

    /// Register an engine implementation for a descriptor already in the registry
    ///
    /// Registering a name twice replaces the engine but keeps its original
    /// position in the local priority order.
    pub fn register_engine(&mut self, engine: Arc<dyn CapabilityProvider>) {
        let name = engine.name().to_string();
        let is_local = self
            .registry
            .get(&name)
            .map(|d| d.local)
            .unwrap_or(false);

        if is_local && !self.local_order.iter().any(|n| n == &name) {
            self.local_order.push(name.clone());
        }
        tracing::debug!(target: "quill.engine", provider = %name, local = is_local, "engine registered");
        self.engines.insert(name, engine);
    }

    /// Engine implementation for a provider name
    pub fn engine(&self, name: &str) -> Option<Arc<dyn CapabilityProvider>> {
        self.engines.get(name).cloned()
    }

    /// Descriptor for a provider name
    pub fn descriptor(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.registry.get(name)
    }

    /// The descriptor registry
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Fixed local auto-select priority order
    pub fn local_order(&self) -> &[String] {
        &self.local_order
    }
}
