// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Credentialed remote engine
//!
//! Streams chat completions from an OpenAI-compatible endpoint and maps the
//! wire chunks onto the typed generation events. Tool calls requested by the
//! model are executed against the registered implementations and their
//! results re-emitted into the same stream.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{QuillError, Result};
use crate::progress::CancelToken;

use super::{
    Availability, CapabilityProvider, DownloadProgress, GenEvent, GenRequest, GenStream,
    ModelCard, ModelFilter, ModelHandle, SupportResult, ToolImpl,
};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_COMPAT_URL: &str = "https://api.anthropic.com/v1";

/// Remote provider speaking the OpenAI-compatible chat completions protocol
pub struct RemoteEngine {
    name: String,
    base_url: String,
    models: Vec<ModelCard>,
    default_model: String,
    client: Client,
}

impl RemoteEngine {
    /// Create a remote engine for an arbitrary OpenAI-compatible endpoint
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let name = name.into();
        let default_id = format!("{}-default", name);
        Self {
            name,
            base_url: base_url.into(),
            models: vec![],
            default_model: default_id,
            client: Client::new(),
        }
    }

    /// Hosted OpenAI chat models
    pub fn openai() -> Self {
        Self::new("openai", OPENAI_API_URL).with_models(vec![
            ModelCard::new("gpt-4o-mini", "openai").with_name("GPT-4o Mini"),
            ModelCard::new("gpt-4o", "openai").with_name("GPT-4o"),
        ])
    }

    /// Hosted Claude models via Anthropic's OpenAI-compatible surface
    pub fn anthropic() -> Self {
        Self::new("anthropic", ANTHROPIC_COMPAT_URL).with_models(vec![
            ModelCard::new("claude-haiku-4-5", "anthropic").with_name("Claude Haiku 4.5"),
            ModelCard::new("claude-sonnet-4-5", "anthropic").with_name("Claude Sonnet 4.5"),
        ])
    }

    /// Builder: override the endpoint base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Builder: replace the model cards (first entry becomes the default)
    pub fn with_models(mut self, models: Vec<ModelCard>) -> Self {
        if let Some(first) = models.first() {
            self.default_model = first.id.clone();
        }
        self.models = models;
        self
    }

    /// Endpoint the streaming request is posted to
    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CapabilityProvider for RemoteEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_support(&self) -> SupportResult {
        // Remote usability is gated by credential presence, not by probing
        SupportResult::supported()
    }

    fn list_models(&self, filter: Option<&ModelFilter>) -> Vec<ModelCard> {
        match filter {
            Some(f) => self
                .models
                .iter()
                .filter(|m| f.matches(m))
                .cloned()
                .collect(),
            None => self.models.clone(),
        }
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    async fn create_handle(
        &self,
        model_id: &str,
        credential: Option<&str>,
    ) -> Result<Arc<dyn ModelHandle>> {
        let api_key = credential.ok_or_else(|| QuillError::CredentialMissing {
            provider: self.name.clone(),
            guidance: "Set one with the key command before sending.".to_string(),
        })?;

        Ok(Arc::new(RemoteHandle {
            provider: self.name.clone(),
            model_id: model_id.to_string(),
            url: self.completions_url(),
            api_key: api_key.to_string(),
            client: self.client.clone(),
        }))
    }
}

/// Handle for one (endpoint, model, key) triple
pub struct RemoteHandle {
    provider: String,
    model_id: String,
    url: String,
    api_key: String,
    client: Client,
}

impl RemoteHandle {
    fn build_body(&self, request: &GenRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model_id,
            "stream": true,
            "messages": [{ "role": "user", "content": request.prompt }],
        });

        if !request.tools.is_empty() {
            let tools: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|tool| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        },
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }

        body
    }
}

#[async_trait]
impl ModelHandle for RemoteHandle {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn availability(&self) -> Availability {
        // Remote models hold no local resources
        Availability::Available
    }

    async fn begin_download(
        &self,
        _on_progress: DownloadProgress<'_>,
        _cancel: &CancelToken,
    ) -> Result<()> {
        Ok(())
    }

    async fn generate(&self, request: GenRequest, cancel: &CancelToken) -> Result<GenStream> {
        cancel.check()?;

        let body = self.build_body(&request);
        let tools: BTreeMap<String, Arc<ToolImpl>> = request
            .tools
            .iter()
            .map(|t| (t.name.clone(), t.clone()))
            .collect();

        tracing::debug!(
            target: "quill.engine.remote",
            provider = %self.provider,
            model = %self.model_id,
            tools = tools.len(),
            "dispatching streaming completion"
        );

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QuillError::Generation(format!(
                "upstream returned {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let cancel = cancel.clone();
        let mut byte_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            // index -> (id, name, accumulated argument text)
            let mut pending_calls: BTreeMap<usize, (String, String, String)> = BTreeMap::new();
            let mut finished = false;

            'outer: while let Some(chunk) = byte_stream.next().await {
                if cancel.is_cancelled() {
                    yield Err(QuillError::Cancelled);
                    return;
                }

                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(QuillError::Generation(e.to_string()));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim().to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        finished = true;
                        break 'outer;
                    }

                    let Ok(chunk) = serde_json::from_str::<ChatChunk>(data) else {
                        continue;
                    };
                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield Ok(GenEvent::TextDelta(text));
                        }
                    }

                    for tc in choice.delta.tool_calls.unwrap_or_default() {
                        let index = tc.index.unwrap_or(0);
                        let entry = pending_calls.entry(index).or_insert_with(|| {
                            let id = tc.id.clone().unwrap_or_else(|| {
                                format!("call_{}", uuid::Uuid::new_v4().simple())
                            });
                            (id, String::new(), String::new())
                        });
                        if let Some(function) = tc.function {
                            if let Some(name) = function.name {
                                entry.1 = name;
                            }
                            if let Some(arguments) = function.arguments {
                                entry.2.push_str(&arguments);
                            }
                        }
                    }
                }
            }

            if !finished && cancel.is_cancelled() {
                yield Err(QuillError::Cancelled);
                return;
            }

            // Execute accumulated tool calls once the model is done talking
            for (_, (_, name, raw_args)) in pending_calls {
                if cancel.is_cancelled() {
                    yield Err(QuillError::Cancelled);
                    return;
                }

                let args: serde_json::Value =
                    serde_json::from_str(&raw_args).unwrap_or(serde_json::Value::Null);
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
        };

        Ok(Box::pin(stream))
    }
}

// Wire types for the OpenAI-compatible streaming format

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
