use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use std::pin::Pin;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::ModelDescriptor;

/// Proof that a model instance is loaded and ready to generate.
///
/// Handles are minted by [`ModelRunner::load`] and become stale once the
/// adapter loads a different model; a stale handle is simply dropped.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    pub instance_id: Uuid,
    pub model: ModelDescriptor,
}

impl EngineHandle {
    pub fn new(model: ModelDescriptor) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            model,
        }
    }
}

/// Progress report emitted while a model is loading.
#[derive(Debug, Clone)]
pub struct LoadProgress {
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    /// Human-readable status line, shown verbatim to the user.
    pub text: String,
}

impl LoadProgress {
    pub fn new(progress: f64, text: impl Into<String>) -> Self {
        Self {
            progress,
            text: text.into(),
        }
    }

    /// The runner signals completion with a "Finish loading" report; the
    /// chat loop clears the status text when it sees one.
    pub fn is_finished(&self) -> bool {
        self.text.contains("Finish loading")
    }
}

/// One message on the wire to the model, OpenAI chat-completions shape.
/// Request-side only, so serialize-only.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: &'static str,
    pub content: WireContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<WirePart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WirePart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlContent },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrlContent {
    pub url: String,
}

impl WireMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: WireContent::Text(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: WireContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: WireContent::Text(content.into()),
        }
    }

    pub fn user_with_images(text: String, image_urls: Vec<String>) -> Self {
        let mut parts = vec![WirePart::Text { text }];
        parts.extend(image_urls.into_iter().map(|url| WirePart::ImageUrl {
            image_url: ImageUrlContent { url },
        }));
        Self {
            role: "user",
            content: WireContent::Parts(parts),
        }
    }
}

/// A fully assembled generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub messages: Vec<WireMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Events yielded by a generation stream, in order: one `ResponseStart`,
/// zero or more `TextDelta`, then `Done`.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    ResponseStart { model: Option<String> },
    TextDelta { text: String },
    Done { finish_reason: Option<String> },
}

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<EngineEvent, EngineError>> + Send>>;

/// A backend that can load models and stream chat completions.
///
/// Implementations report load progress through the channel as often as they
/// like; the final report should contain "Finish loading". The config bag
/// carries load-time options (context window, weight cache mode); runners
/// that manage their own weights honor them, remote ones may not need to.
#[async_trait]
pub trait ModelRunner: Send + Sync {
    fn name(&self) -> &str;

    async fn load(
        &self,
        model: &ModelDescriptor,
        config: &EngineConfig,
        progress: mpsc::Sender<LoadProgress>,
    ) -> Result<EngineHandle, EngineError>;

    async fn stream_chat(
        &self,
        handle: &EngineHandle,
        request: GenerationRequest,
    ) -> Result<TokenStream, EngineError>;
}
