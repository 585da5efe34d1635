// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Mock engine for testing
//!
//! A configurable implementation of the capability-provider and model-handle
//! traits that can script support probes, construction failures, download
//! phases, and generation streams without touching a real backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{QuillError, Result};
use crate::progress::CancelToken;

use super::{
    Availability, CapabilityProvider, DownloadProgress, GenEvent, GenRequest, GenStream,
    ModelCard, ModelFilter, ModelHandle, SupportResult,
};

/// One scripted step of a mock generation stream
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Emit a text delta
    Text(String),
    /// Emit a tool call, run the registered implementation, emit its result
    CallTool { name: String, args: serde_json::Value },
    /// Yield a stream error
    Error(String),
}

/// Invocation counters shared between an engine and its handles
#[derive(Debug, Clone, Default)]
pub struct MockCounters {
    constructions: Arc<AtomicUsize>,
    downloads: Arc<AtomicUsize>,
    generations: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl MockCounters {
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// A scriptable capability provider for tests
pub struct MockEngine {
    name: String,
    support: Mutex<SupportResult>,
    models: Mutex<Vec<ModelCard>>,
    default_model: Mutex<String>,
    construction_error: Mutex<Option<String>>,
    download_steps: Mutex<Vec<(Option<f32>, String)>>,
    script: Mutex<Vec<MockStep>>,
    counters: MockCounters,
}

impl MockEngine {
    fn new(name: &str) -> Self {
        let default_id = format!("{}-default", name);
        Self {
            name: name.to_string(),
            support: Mutex::new(SupportResult::supported()),
            models: Mutex::new(vec![ModelCard::new(&default_id, name)]),
            default_model: Mutex::new(default_id),
            construction_error: Mutex::new(None),
            download_steps: Mutex::new(vec![]),
            script: Mutex::new(vec![MockStep::Text("mock response".to_string())]),
            counters: MockCounters::default(),
        }
    }

    /// Create a mock standing in for a local engine
    pub fn local(name: &str) -> Self {
        Self::new(name)
    }

    /// Create a mock standing in for a credentialed remote engine
    pub fn remote(name: &str) -> Self {
        Self::new(name)
    }

    /// Builder: report this probe result
    pub fn with_support(self, support: SupportResult) -> Self {
        *self.support.lock().unwrap() = support;
        self
    }

    /// Builder: fail the feature probe with a reason
    pub fn unsupported(self, reason: &str) -> Self {
        self.with_support(SupportResult::unsupported(reason))
    }

    /// Builder: replace the model list (first entry becomes the default)
    pub fn with_models(self, models: Vec<ModelCard>) -> Self {
        if let Some(first) = models.first() {
            *self.default_model.lock().unwrap() = first.id.clone();
        }
        *self.models.lock().unwrap() = models;
        self
    }

    /// Builder: every handle construction fails with this message
    pub fn fail_construction(self, message: &str) -> Self {
        *self.construction_error.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Builder: handles start downloadable and emit these progress steps
    pub fn with_download_steps(self, steps: Vec<(Option<f32>, &str)>) -> Self {
        *self.download_steps.lock().unwrap() = steps
            .into_iter()
            .map(|(pct, text)| (pct, text.to_string()))
            .collect();
        self
    }

    /// Builder: script the generation stream
    pub fn with_script(self, script: Vec<MockStep>) -> Self {
        *self.script.lock().unwrap() = script;
        self
    }

    /// Builder: respond with a single text delta
    pub fn with_response(self, text: &str) -> Self {
        self.with_script(vec![MockStep::Text(text.to_string())])
    }

    /// Clear or set the construction failure after the fact
    pub fn set_construction_error(&self, message: Option<&str>) {
        *self.construction_error.lock().unwrap() = message.map(str::to_string);
    }

    /// Change the probe answer after the fact
    pub fn set_support(&self, support: SupportResult) {
        *self.support.lock().unwrap() = support;
    }

    /// Invocation counters for assertions
    pub fn counters(&self) -> MockCounters {
        self.counters.clone()
    }
}

#[async_trait]
impl CapabilityProvider for MockEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_support(&self) -> SupportResult {
        self.support.lock().unwrap().clone()
    }

    fn list_models(&self, filter: Option<&ModelFilter>) -> Vec<ModelCard> {
        let models = self.models.lock().unwrap();
        match filter {
            Some(f) => models.iter().filter(|m| f.matches(m)).cloned().collect(),
            None => models.clone(),
        }
    }

    fn default_model(&self) -> String {
        self.default_model.lock().unwrap().clone()
    }

    async fn create_handle(
        &self,
        model_id: &str,
        _credential: Option<&str>,
    ) -> Result<Arc<dyn ModelHandle>> {
        self.counters.constructions.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = self.construction_error.lock().unwrap().clone() {
            return Err(QuillError::Construction {
                provider: self.name.clone(),
                message,
            });
        }

        let steps = self.download_steps.lock().unwrap().clone();
        let availability = if steps.is_empty() {
            Availability::Available
        } else {
            Availability::Downloadable
        };

        Ok(Arc::new(MockHandle {
            model_id: model_id.to_string(),
            availability: Mutex::new(availability),
            download_steps: steps,
            script: self.script.lock().unwrap().clone(),
            counters: self.counters.clone(),
        }))
    }
}

/// Handle produced by [`MockEngine`]
pub struct MockHandle {
    model_id: String,
    availability: Mutex<Availability>,
    download_steps: Vec<(Option<f32>, String)>,
    script: Vec<MockStep>,
    counters: MockCounters,
}

#[async_trait]
impl ModelHandle for MockHandle {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn availability(&self) -> Availability {
        *self.availability.lock().unwrap()
    }

    async fn begin_download(
        &self,
        on_progress: DownloadProgress<'_>,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.counters.downloads.fetch_add(1, Ordering::SeqCst);
        *self.availability.lock().unwrap() = Availability::Downloading;

        for (pct, text) in &self.download_steps {
            if cancel.is_cancelled() {
                *self.availability.lock().unwrap() = Availability::Downloadable;
                return Err(QuillError::Cancelled);
            }
            on_progress(*pct, text);
            // Let a cancel requested from inside the progress sink land
            tokio::task::yield_now().await;
        }

        if cancel.is_cancelled() {
            *self.availability.lock().unwrap() = Availability::Downloadable;
            return Err(QuillError::Cancelled);
        }

        *self.availability.lock().unwrap() = Availability::Available;
        Ok(())
    }

    async fn generate(&self, request: GenRequest, cancel: &CancelToken) -> Result<GenStream> {
        self.counters.generations.fetch_add(1, Ordering::SeqCst);
        cancel.check()?;

        let tools: HashMap<String, Arc<super::ToolImpl>> = request
            .tools
            .iter()
            .map(|t| (t.name.clone(), t.clone()))
            .collect();
        let script = self.script.clone();

        let stream = async_stream::stream! {
            for step in script {
                match step {
                    MockStep::Text(text) => yield Ok(GenEvent::TextDelta(text)),
                    MockStep::CallTool { name, args } => {
                        yield Ok(GenEvent::ToolCall {
                            name: name.clone(),
                            args: args.clone(),
                        });

                        let result = match tools.get(&name) {
                            Some(tool) => match (tool.run)(args.clone()).await {
                                Ok(value) => value,
                                Err(e) => serde_json::json!({ "error": e.to_string() }),
                            },
                            None => serde_json::json!({ "error": "tool not registered" }),
                        };

                        yield Ok(GenEvent::ToolResult { name, args, result });
                    }
                    MockStep::Error(message) => {
                        yield Err(QuillError::Generation(message));
                        return;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn close(&self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}
