use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::{EngineAdapter, EngineEvent, GenerationRequest, WireMessage};
use crate::error::{ChatError, EngineError};
use crate::models::{ModelDescriptor, default_model, find_model};
use crate::retrieval::RetrievalWorker;
use crate::store::{FileInfo, Message, MessageContent, SessionStore};

use super::prompt::{qa_prompt, system_prompt, wire_history};

/// Drives one session's conversation loop: message append, optional
/// retrieval, engine acquisition, token streaming and persistence.
///
/// One turn at a time; a second submit while one is in flight is rejected
/// rather than queued. Live message state is published through a watch
/// channel so a frontend can render deltas as they land, while the store is
/// only written at turn boundaries.
pub struct ChatController {
    store: Arc<dyn SessionStore>,
    engine: EngineAdapter,
    retrieval: RetrievalWorker,
    config: EngineConfig,
    session_id: String,
    messages_tx: watch::Sender<Vec<Message>>,
    staged_file: std::sync::Mutex<Option<FileInfo>>,
    document_indexed: AtomicBool,
    in_flight: AtomicBool,
    stop_requested: AtomicBool,
}

impl ChatController {
    /// Open a controller for `session_id`, restoring its messages and
    /// re-indexing its attached document if one is persisted.
    pub async fn open(
        store: Arc<dyn SessionStore>,
        engine: EngineAdapter,
        retrieval: RetrievalWorker,
        config: EngineConfig,
        session_id: impl Into<String>,
    ) -> Result<Self, ChatError> {
        let session_id = session_id.into();
        let session = store.get_session(&session_id).await?;

        let mut document_indexed = false;
        let messages = match session {
            Some(session) => {
                if let Some(file_info) = &session.file_info {
                    match retrieval.index_document(file_info.file_text.clone()).await {
                        Ok(chunks) => {
                            debug!(chunks, file = %file_info.file_name, "restored document index");
                            document_indexed = true;
                        }
                        Err(e) => {
                            warn!(error = %e, "could not restore document index");
                        }
                    }
                }
                session.messages
            }
            None => Vec::new(),
        };

        let (messages_tx, _) = watch::channel(messages);

        Ok(Self {
            store,
            engine,
            retrieval,
            config,
            session_id,
            messages_tx,
            staged_file: std::sync::Mutex::new(None),
            document_indexed: AtomicBool::new(document_indexed),
            in_flight: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Snapshot of the live message list.
    pub fn messages(&self) -> Vec<Message> {
        self.messages_tx.borrow().clone()
    }

    /// Watch the live message list; fires on every delta.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Message>> {
        self.messages_tx.subscribe()
    }

    /// The live message list as a stream of snapshots, for frontends that
    /// consume updates with `Stream` combinators.
    pub fn updates(&self) -> WatchStream<Vec<Message>> {
        WatchStream::new(self.messages_tx.subscribe())
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stage a parsed document for the next submission. Replaces any
    /// previously staged file.
    pub fn stage_file(&self, file_info: FileInfo) {
        let mut staged = self.staged_file.lock().unwrap_or_else(|e| e.into_inner());
        *staged = Some(file_info);
    }

    /// Detach the session's document: forget the index and the persisted
    /// file info. Subsequent turns go back to plain chat.
    pub async fn clear_file(&self) -> Result<(), ChatError> {
        {
            let mut staged = self.staged_file.lock().unwrap_or_else(|e| e.into_inner());
            *staged = None;
        }
        self.document_indexed.store(false, Ordering::SeqCst);
        self.retrieval.clear().await?;
        self.store.clear_file_info(&self.session_id).await?;
        Ok(())
    }

    /// Run one full turn: append the user message and an assistant
    /// placeholder, acquire the engine, stream the reply into the
    /// placeholder and persist the result.
    pub async fn submit(&self, input: &str, images: Vec<String>) -> Result<(), ChatError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(ChatError::Other(anyhow::anyhow!(
                "a submission is already in progress"
            )));
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let result = self.run_submit(input, images).await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    /// Interrupt the current turn. Partial assistant text is kept; deltas
    /// that would arrive after this call are discarded. A no-op when
    /// nothing is in flight.
    pub fn stop(&self) {
        if !self.in_flight.load(Ordering::SeqCst) {
            return;
        }
        info!("stop requested");
        self.stop_requested.store(true, Ordering::SeqCst);
        self.engine.interrupt();
    }

    /// Regenerate the last assistant reply from the preceding user message.
    /// Requires a loaded engine and at least one completed exchange;
    /// otherwise a no-op.
    pub async fn regenerate(&self) -> Result<(), ChatError> {
        if self.engine.loaded_model().is_none() {
            return Ok(());
        }
        {
            let messages = self.messages_tx.borrow();
            let n = messages.len();
            if n < 2 || !messages[n - 1].is_assistant() || messages[n - 2].is_assistant() {
                return Ok(());
            }
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(ChatError::Other(anyhow::anyhow!(
                "a submission is already in progress"
            )));
        }
        self.stop_requested.store(false, Ordering::SeqCst);

        let result = self.run_regenerate().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_submit(&self, input: &str, images: Vec<String>) -> Result<(), ChatError> {
        let staged = {
            let mut staged = self.staged_file.lock().unwrap_or_else(|e| e.into_inner());
            staged.take()
        };
        let file_name = staged.as_ref().map(|f| f.file_name.clone());

        // The user message and the placeholder land together, before any
        // slow work, so the frontend shows the turn immediately.
        self.messages_tx.send_modify(|messages| {
            messages.push(Message::user(
                MessageContent::with_images(input, &images),
                file_name,
            ));
            messages.push(Message::placeholder());
        });

        if let Some(file_info) = staged
            && let Err(e) = self.attach_file(file_info).await
        {
            return self.fail_turn(e).await;
        }

        let model = match self.resolve_model().await {
            Ok(model) => model,
            Err(e) => return self.fail_turn(e).await,
        };

        if let Err(e) = self.acquire_engine(&model).await {
            return self.fail_turn(ChatError::Engine(e)).await;
        }

        // Stop during load finishes the load but skips generation.
        if self.stop_requested.load(Ordering::SeqCst) {
            self.persist().await?;
            return Ok(());
        }

        let prompt_text = match self.resolve_prompt(input).await {
            Ok(text) => text,
            Err(e) => return self.fail_turn(e).await,
        };

        // Stop during retrieval skips generation as well.
        if self.stop_requested.load(Ordering::SeqCst) {
            self.persist().await?;
            return Ok(());
        }

        let request = match self.build_request(&model, &prompt_text, &images, 2).await {
            Ok(request) => request,
            Err(e) => return self.fail_turn(e).await,
        };
        self.stream_reply(request).await
    }

    async fn run_regenerate(&self) -> Result<(), ChatError> {
        let input = {
            let messages = self.messages_tx.borrow();
            messages[messages.len() - 2].text()
        };

        // Blank the old reply so deltas rebuild it from scratch.
        self.set_placeholder_text(String::new());

        let model = match self.resolve_model().await {
            Ok(model) => model,
            Err(e) => return self.fail_turn(e).await,
        };
        let prompt_text = match self.resolve_prompt(&input).await {
            Ok(text) => text,
            Err(e) => return self.fail_turn(e).await,
        };

        if self.stop_requested.load(Ordering::SeqCst) {
            self.persist().await?;
            return Ok(());
        }

        let request = match self.build_request(&model, &prompt_text, &[], 2).await {
            Ok(request) => request,
            Err(e) => return self.fail_turn(e).await,
        };
        self.stream_reply(request).await
    }

    /// Persist the staged document and hand it to the retrieval worker.
    async fn attach_file(&self, file_info: FileInfo) -> Result<(), ChatError> {
        self.store
            .save_file_info(&self.session_id, &file_info)
            .await?;
        let chunks = self
            .retrieval
            .index_document(file_info.file_text.clone())
            .await?;
        info!(chunks, file = %file_info.file_name, "document attached");
        self.document_indexed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resolve_model(&self) -> Result<ModelDescriptor, ChatError> {
        let selected = self.store.selected_model().await?;
        Ok(selected
            .as_deref()
            .and_then(find_model)
            .unwrap_or_else(default_model))
    }

    /// Load (or reuse) the model, streaming progress text into the
    /// placeholder. The final "Finish loading" report clears it.
    async fn acquire_engine(&self, model: &ModelDescriptor) -> Result<(), EngineError> {
        let (tx, mut rx) = mpsc::channel(16);

        let load = self.engine.ensure_loaded(model, &self.config, tx);
        let progress = async {
            while let Some(report) = rx.recv().await {
                if report.is_finished() {
                    self.set_placeholder_text(String::new());
                } else {
                    self.set_placeholder_text(report.text);
                }
            }
        };

        let (result, ()) = tokio::join!(load, progress);
        result
    }

    /// Plain turns use the input verbatim; turns with an indexed document
    /// substitute a grounded question built from the top-ranked chunks.
    async fn resolve_prompt(&self, input: &str) -> Result<String, ChatError> {
        if !self.document_indexed.load(Ordering::SeqCst) {
            return Ok(input.to_string());
        }
        let chunks = self.retrieval.retrieve(input).await?;
        debug!(hits = chunks.len(), "retrieval hits for turn");
        Ok(qa_prompt(&chunks, input))
    }

    /// Assemble the wire request: system prompt, history minus the
    /// `trailing` freshly appended messages, then the effective prompt.
    /// Image input requires a vision-capable model.
    async fn build_request(
        &self,
        model: &ModelDescriptor,
        prompt_text: &str,
        images: &[String],
        trailing: usize,
    ) -> Result<GenerationRequest, ChatError> {
        let instructions = self.store.custom_instructions().await?;
        let enabled = self.store.custom_instructions_enabled().await?;

        let mut wire = vec![WireMessage::system(system_prompt(
            instructions.as_deref(),
            enabled,
        ))];

        {
            let messages = self.messages_tx.borrow();
            let history_end = messages.len().saturating_sub(trailing);
            wire.extend(wire_history(&messages[..history_end]));
        }

        if !images.is_empty() {
            if !model.vision {
                return Err(ChatError::Engine(EngineError::Capability(format!(
                    "model {} does not accept image input",
                    model.name
                ))));
            }
            wire.push(WireMessage::user_with_images(
                prompt_text.to_string(),
                images.to_vec(),
            ));
        } else {
            wire.push(WireMessage::user(prompt_text));
        }

        Ok(GenerationRequest {
            messages: wire,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        })
    }

    /// Stream tokens into the placeholder, then persist the turn.
    async fn stream_reply(&self, request: GenerationRequest) -> Result<(), ChatError> {
        let mut stream = match self.engine.generate(request).await {
            Ok(stream) => stream,
            Err(e) => return self.fail_turn(ChatError::Engine(e)).await,
        };

        let mut reply = String::new();
        while let Some(event) = stream.next().await {
            match event {
                Ok(EngineEvent::ResponseStart { model }) => {
                    debug!(model = ?model, "generation started");
                }
                Ok(EngineEvent::TextDelta { text }) => {
                    reply.push_str(&text);
                    self.set_placeholder_text(reply.clone());
                }
                Ok(EngineEvent::Done { finish_reason }) => {
                    debug!(finish_reason = ?finish_reason, "generation finished");
                    break;
                }
                Err(EngineError::Interrupted) => {
                    info!("generation interrupted, keeping partial reply");
                    break;
                }
                Err(e) => {
                    drop(stream);
                    return self.fail_turn(ChatError::Engine(e)).await;
                }
            }
        }
        drop(stream);

        self.persist().await
    }

    /// Surface a turn failure in the placeholder and persist it; the error
    /// still propagates to the caller.
    async fn fail_turn(&self, error: ChatError) -> Result<(), ChatError> {
        warn!(error = %error, "turn failed");
        self.set_placeholder_text(format!("Error: {error}"));
        if let Err(persist_err) = self.persist().await {
            warn!(error = %persist_err, "could not persist failed turn");
        }
        Err(error)
    }

    fn set_placeholder_text(&self, text: String) {
        self.messages_tx.send_modify(|messages| {
            if let Some(Message::Assistant { content, .. }) = messages.last_mut() {
                *content = text;
            }
        });
    }

    async fn persist(&self) -> Result<(), ChatError> {
        let snapshot = self.messages_tx.borrow().clone();
        self.store
            .save_messages(&self.session_id, &snapshot)
            .await?;
        Ok(())
    }
}
