use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::ModelDescriptor;

use super::runner::{
    EngineEvent, EngineHandle, GenerationRequest, LoadProgress, ModelRunner, TokenStream,
    WireMessage,
};
use super::sse::{SseBuffer, parse_data_lines_without_done};

/// Runner backed by any OpenAI-compatible chat-completions endpoint.
///
/// "Loading" a model here means verifying the endpoint is reachable; the
/// server keeps its own weights resident, so load is cheap and re-load after
/// a model switch costs one round trip.
pub struct OpenAiCompatRunner {
    client: reqwest::Client,
    cached_chat_url: String,
    cached_models_url: String,
    cached_auth_header: Option<String>,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    temperature: f64,
    max_tokens: u32,
    stream: bool,
    stream_options: StreamOptions,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

impl OpenAiCompatRunner {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Self {
        let base = base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            cached_chat_url: format!("{base}/v1/chat/completions"),
            cached_models_url: format!("{base}/v1/models"),
            cached_auth_header: api_key.map(|key| format!("Bearer {key}")),
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cached_auth_header {
            Some(header) => builder.header("Authorization", header),
            None => builder,
        }
    }
}

#[async_trait]
impl ModelRunner for OpenAiCompatRunner {
    fn name(&self) -> &str {
        "openai_compat"
    }

    async fn load(
        &self,
        model: &ModelDescriptor,
        config: &EngineConfig,
        progress: mpsc::Sender<LoadProgress>,
    ) -> Result<EngineHandle, EngineError> {
        // The server keeps its own weights resident; the cache mode and
        // context window are recorded for the trace but not negotiable here.
        debug!(
            context_window = config.context_window,
            cache_mode = ?config.cache_mode,
            "load options"
        );
        let _ = progress
            .send(LoadProgress::new(
                0.0,
                format!("Loading model {}", model.name),
            ))
            .await;

        let response = self
            .authorized(self.client.get(&self.cached_models_url))
            .send()
            .await
            .map_err(|e| EngineError::Load(format!("endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Load(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        debug!(model = %model.name, "model endpoint verified");

        let _ = progress
            .send(LoadProgress::new(
                1.0,
                format!("Finish loading model {}", model.name),
            ))
            .await;

        Ok(EngineHandle::new(model.clone()))
    }

    async fn stream_chat(
        &self,
        handle: &EngineHandle,
        request: GenerationRequest,
    ) -> Result<TokenStream, EngineError> {
        let body = ChatCompletionRequest {
            model: &handle.model.name,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: StreamOptions {
                include_usage: true,
            },
        };

        let response = self
            .authorized(self.client.post(&self.cached_chat_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Generation(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::Generation(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let mut byte_stream = response.bytes_stream();

        let stream = async_stream::try_stream! {
            let mut sse_buffer = SseBuffer::new();
            let mut sent_start = false;

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result
                    .map_err(|e| EngineError::Generation(format!("stream read failed: {e}")))?;
                sse_buffer.push_chunk(&chunk);

                while let Some(event_block) = sse_buffer.next_event_block() {
                    for data in parse_data_lines_without_done(&event_block) {
                        let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(data) else {
                            continue;
                        };

                        if !sent_start {
                            yield EngineEvent::ResponseStart {
                                model: chunk.model.clone(),
                            };
                            sent_start = true;
                        }

                        for choice in &chunk.choices {
                            if let Some(content) = &choice.delta.content
                                && !content.is_empty()
                            {
                                yield EngineEvent::TextDelta {
                                    text: content.clone(),
                                };
                            }

                            if let Some(finish) = choice.finish_reason.clone() {
                                yield EngineEvent::Done {
                                    finish_reason: Some(finish),
                                };
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
