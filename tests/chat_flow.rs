//! End-to-end turns through the chat controller with a scripted runner,
//! a hash-based embedder and a real on-disk session store.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use quillchat::chat::ChatController;
use quillchat::config::EngineConfig;
use quillchat::engine::{
    EngineAdapter, EngineEvent, EngineHandle, GenerationRequest, LoadProgress, ModelRunner,
    TokenStream, WireContent,
};
use quillchat::error::{ChatError, EngineError};
use quillchat::models::{ModelDescriptor, builtin_models};
use quillchat::retrieval::{EmbeddingProvider, RetrievalWorker};
use quillchat::store::{FileInfo, FileText, PageDocument, SessionStore, SqliteSessionStore};

/// Embeds by hashing words into a fixed number of buckets, so overlapping
/// wording produces similar vectors without any model.
struct BagOfWordsEmbedding;

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedding {
    fn name(&self) -> &str {
        "bag_of_words"
    }

    fn dimensions(&self) -> usize {
        64
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; 64];
                for word in text.split_whitespace() {
                    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
                    for b in word.to_lowercase().bytes() {
                        hash ^= u64::from(b);
                        hash = hash.wrapping_mul(0x0100_0000_01b3);
                    }
                    v[(hash % 64) as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Same hashing embedder, but single-text (query) embeds stall long enough
/// for a stop call to land mid-retrieval.
struct SlowQueryEmbedding;

#[async_trait]
impl EmbeddingProvider for SlowQueryEmbedding {
    fn name(&self) -> &str {
        "slow_query"
    }

    fn dimensions(&self) -> usize {
        64
    }

    async fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.len() == 1 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        BagOfWordsEmbedding.embed(texts).await
    }
}

/// Scripted runner: each generation pops the next delta script; records
/// every request and counts loads. An empty queue hangs after one delta so
/// tests can interrupt mid-stream.
struct ScriptedRunner {
    scripts: std::sync::Mutex<VecDeque<Vec<&'static str>>>,
    requests: std::sync::Mutex<Vec<GenerationRequest>>,
    loads: AtomicUsize,
}

impl ScriptedRunner {
    fn new(scripts: Vec<Vec<&'static str>>) -> Self {
        Self {
            scripts: std::sync::Mutex::new(scripts.into_iter().collect()),
            requests: std::sync::Mutex::new(Vec::new()),
            loads: AtomicUsize::new(0),
        }
    }

    fn last_request(&self) -> GenerationRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ModelRunner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn load(
        &self,
        model: &ModelDescriptor,
        _config: &EngineConfig,
        progress: mpsc::Sender<LoadProgress>,
    ) -> Result<EngineHandle, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let _ = progress
            .send(LoadProgress::new(0.5, "Fetching params"))
            .await;
        let _ = progress
            .send(LoadProgress::new(1.0, "Finish loading"))
            .await;
        Ok(EngineHandle::new(model.clone()))
    }

    async fn stream_chat(
        &self,
        _handle: &EngineHandle,
        request: GenerationRequest,
    ) -> Result<TokenStream, EngineError> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();

        let stream = async_stream::stream! {
            yield Ok(EngineEvent::ResponseStart { model: None });
            match script {
                Some(deltas) => {
                    for d in deltas {
                        yield Ok(EngineEvent::TextDelta { text: d.to_string() });
                    }
                    yield Ok(EngineEvent::Done { finish_reason: Some("stop".into()) });
                }
                None => {
                    yield Ok(EngineEvent::TextDelta { text: "partial".into() });
                    std::future::pending::<()>().await;
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

struct Harness {
    store: Arc<SqliteSessionStore>,
    runner: Arc<ScriptedRunner>,
    controller: Arc<ChatController>,
    _dir: tempfile::TempDir,
}

async fn harness(scripts: Vec<Vec<&'static str>>) -> Harness {
    harness_with_embedder(scripts, Arc::new(BagOfWordsEmbedding)).await
}

async fn harness_with_embedder(
    scripts: Vec<Vec<&'static str>>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteSessionStore::open(&dir.path().join("sessions.db"))
            .await
            .unwrap(),
    );
    let runner = Arc::new(ScriptedRunner::new(scripts));
    let engine = EngineAdapter::new(runner.clone());
    let retrieval = RetrievalWorker::spawn(embedder);

    let controller = ChatController::open(
        store.clone() as Arc<dyn SessionStore>,
        engine,
        retrieval,
        EngineConfig::default(),
        "session-1",
    )
    .await
    .unwrap();

    Harness {
        store,
        runner,
        controller: Arc::new(controller),
        _dir: dir,
    }
}

fn wire_text(content: &WireContent) -> String {
    match content {
        WireContent::Text(text) => text.clone(),
        WireContent::Parts(_) => String::new(),
    }
}

#[tokio::test]
async fn plain_turn_streams_and_persists() {
    let h = harness(vec![vec!["Hi", " there"]]).await;

    h.controller.submit("Hello!", Vec::new()).await.unwrap();

    let messages = h.controller.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text(), "Hello!");
    assert_eq!(messages[1].text(), "Hi there");

    let session = h.store.get_session("session-1").await.unwrap().unwrap();
    assert_eq!(session.messages, messages);

    // request carried the system prompt plus the user turn
    let request = h.runner.last_request();
    assert_eq!(request.messages[0].role, "system");
    assert!(wire_text(&request.messages[0].content).starts_with("You are a helpful assistant."));
    assert_eq!(wire_text(&request.messages.last().unwrap().content), "Hello!");
    assert!((request.temperature - 0.6).abs() < f64::EPSILON);
    assert_eq!(request.max_tokens, 1024);
}

#[tokio::test]
async fn attached_document_substitutes_a_grounded_prompt() {
    let h = harness(vec![vec!["Paris."]]).await;

    h.controller.stage_file(FileInfo {
        file_name: "france.txt".into(),
        file_type: "text/plain".into(),
        file_text: FileText::Pages(vec![
            PageDocument::new("Paris is the capital of France."),
            PageDocument::new("The Loire is the longest river."),
        ]),
    });

    h.controller
        .submit("What is the capital of France?", Vec::new())
        .await
        .unwrap();

    let request = h.runner.last_request();
    let prompt = wire_text(&request.messages.last().unwrap().content);
    assert!(prompt.starts_with("Answer the question based on the context"));
    assert!(prompt.contains("Paris is the capital of France."));
    assert!(prompt.contains("\"What is the capital of France?\""));

    // the file sticks to the session
    let session = h.store.get_session("session-1").await.unwrap().unwrap();
    assert_eq!(session.file_info.unwrap().file_name, "france.txt");
}

#[tokio::test]
async fn switching_the_selected_model_reloads_the_engine() {
    let h = harness(vec![vec!["one"], vec!["two"]]).await;
    let models = builtin_models();

    h.store.set_selected_model(&models[0].name).await.unwrap();
    h.controller.submit("first", Vec::new()).await.unwrap();

    h.store.set_selected_model(&models[1].name).await.unwrap();
    h.controller.submit("second", Vec::new()).await.unwrap();

    assert_eq!(h.runner.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn same_model_loads_once_across_turns() {
    let h = harness(vec![vec!["one"], vec!["two"]]).await;

    h.controller.submit("first", Vec::new()).await.unwrap();
    h.controller.submit("second", Vec::new()).await.unwrap();

    assert_eq!(h.runner.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_keeps_partial_text_and_ends_the_turn() {
    let h = harness(vec![]).await; // empty script queue: the stream hangs

    let controller = h.controller.clone();
    let turn = tokio::spawn(async move { controller.submit("go", Vec::new()).await });

    // wait until the partial delta is visible
    let mut rx = h.controller.subscribe();
    loop {
        if rx
            .borrow()
            .last()
            .is_some_and(|m| m.text() == "partial")
        {
            break;
        }
        rx.changed().await.unwrap();
    }

    h.controller.stop();
    turn.await.unwrap().unwrap();

    let messages = h.controller.messages();
    assert_eq!(messages.last().unwrap().text(), "partial");
    assert!(!h.controller.is_generating());

    let session = h.store.get_session("session-1").await.unwrap().unwrap();
    assert_eq!(session.messages.last().unwrap().text(), "partial");
}

#[tokio::test]
async fn concurrent_submit_is_rejected() {
    let h = harness(vec![]).await; // hangs

    let controller = h.controller.clone();
    let turn = tokio::spawn(async move { controller.submit("first", Vec::new()).await });

    // give the first turn time to take the slot
    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = h.controller.submit("second", Vec::new()).await;
    assert!(matches!(err, Err(ChatError::Other(_))));

    h.controller.stop();
    turn.await.unwrap().unwrap();
}

#[tokio::test]
async fn regenerate_replaces_the_last_reply() {
    let h = harness(vec![vec!["first answer"], vec!["second answer"]]).await;

    h.controller.submit("question", Vec::new()).await.unwrap();
    assert_eq!(h.controller.messages()[1].text(), "first answer");

    h.controller.regenerate().await.unwrap();

    let messages = h.controller.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text(), "second answer");

    // the regenerated request reused the original question
    let request = h.runner.last_request();
    assert_eq!(wire_text(&request.messages.last().unwrap().content), "question");
}

#[tokio::test]
async fn regenerate_before_any_turn_is_a_no_op() {
    let h = harness(vec![]).await;

    h.controller.regenerate().await.unwrap();
    assert!(h.controller.messages().is_empty());
    assert_eq!(h.runner.loads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reopening_a_session_restores_messages_and_document() {
    let h = harness(vec![vec!["indexed answer"], vec!["later answer"]]).await;

    h.controller.stage_file(FileInfo {
        file_name: "notes.txt".into(),
        file_type: "text/plain".into(),
        file_text: FileText::Raw("The meeting is on Tuesday.".into()),
    });
    h.controller
        .submit("When is the meeting?", Vec::new())
        .await
        .unwrap();

    // reopen against the same database
    let runner = Arc::new(ScriptedRunner::new(vec![vec!["restored"]]));
    let reopened = ChatController::open(
        h.store.clone() as Arc<dyn SessionStore>,
        EngineAdapter::new(runner.clone()),
        RetrievalWorker::spawn(Arc::new(BagOfWordsEmbedding)),
        EngineConfig::default(),
        "session-1",
    )
    .await
    .unwrap();

    assert_eq!(reopened.messages().len(), 2);

    // the restored index still grounds new turns
    reopened
        .submit("When is the meeting?", Vec::new())
        .await
        .unwrap();
    let prompt = wire_text(&runner.last_request().messages.last().unwrap().content);
    assert!(prompt.contains("The meeting is on Tuesday."));
}

#[tokio::test]
async fn stop_during_retrieval_skips_generation() {
    let h = harness_with_embedder(vec![vec!["full reply"]], Arc::new(SlowQueryEmbedding)).await;

    h.controller.stage_file(FileInfo {
        file_name: "notes.txt".into(),
        file_type: "text/plain".into(),
        file_text: FileText::Pages(vec![
            PageDocument::new("The meeting is on Tuesday."),
            PageDocument::new("The agenda is attached."),
        ]),
    });

    let controller = h.controller.clone();
    let turn = tokio::spawn(async move {
        controller.submit("When is the meeting?", Vec::new()).await
    });

    // land the stop while the query embed is still running
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.controller.stop();
    turn.await.unwrap().unwrap();

    // no generation was started and the placeholder stayed empty
    assert!(h.runner.requests.lock().unwrap().is_empty());
    let messages = h.controller.messages();
    assert_eq!(messages.last().unwrap().text(), "");

    let session = h.store.get_session("session-1").await.unwrap().unwrap();
    assert_eq!(session.messages, messages);
}

#[tokio::test]
async fn image_input_on_a_text_model_fails_the_turn() {
    let h = harness(vec![vec!["unused"]]).await;

    let result = h
        .controller
        .submit("look at this", vec!["data:image/png;base64,AA".into()])
        .await;
    assert!(matches!(
        result,
        Err(ChatError::Engine(EngineError::Capability(_)))
    ));

    // the failure is surfaced in the placeholder and persisted
    let messages = h.controller.messages();
    assert!(messages.last().unwrap().text().contains("does not accept image input"));
    let session = h.store.get_session("session-1").await.unwrap().unwrap();
    assert_eq!(session.messages, messages);
}

#[tokio::test]
async fn clearing_the_file_returns_to_plain_turns() {
    let h = harness(vec![vec!["a"], vec!["b"]]).await;

    h.controller.stage_file(FileInfo {
        file_name: "doc.txt".into(),
        file_type: "text/plain".into(),
        file_text: FileText::Raw("Some indexed content.".into()),
    });
    h.controller.submit("about the doc", Vec::new()).await.unwrap();

    h.controller.clear_file().await.unwrap();

    h.controller.submit("plain question", Vec::new()).await.unwrap();
    let prompt = wire_text(&h.runner.last_request().messages.last().unwrap().content);
    assert_eq!(prompt, "plain question");

    let session = h.store.get_session("session-1").await.unwrap().unwrap();
    assert!(session.file_info.is_none());
}
