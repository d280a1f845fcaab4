use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::RetrievalError;
use crate::store::FileText;

use super::embeddings::EmbeddingProvider;
use super::index::{MemoryVectorIndex, ScoredChunk};
use super::splitter::RecursiveCharacterSplitter;

/// How many chunks a search returns at most.
pub const TOP_K: usize = 5;

enum Job {
    Index {
        file_text: FileText,
        reply: oneshot::Sender<Result<usize, RetrievalError>>,
    },
    Search {
        question: String,
        reply: oneshot::Sender<Result<Vec<ScoredChunk>, RetrievalError>>,
    },
    Clear {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the background retrieval task.
///
/// The task owns the splitter, the embedding provider and the vector index;
/// callers talk to it over a channel so a slow embedding never blocks the
/// chat loop. Every failure comes back as a terminal reply — the task itself
/// does not panic and keeps serving later jobs.
#[derive(Clone)]
pub struct RetrievalWorker {
    tx: mpsc::Sender<Job>,
}

impl RetrievalWorker {
    pub fn spawn(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(run_worker(provider, rx));
        Self { tx }
    }

    /// Split, embed and index a document, replacing whatever was indexed
    /// before. Returns the number of chunks indexed.
    pub async fn index_document(&self, file_text: FileText) -> Result<usize, RetrievalError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Index { file_text, reply })
            .await
            .map_err(|_| RetrievalError::WorkerGone)?;
        rx.await.map_err(|_| RetrievalError::WorkerGone)?
    }

    /// Embed the question and return the `TOP_K` most similar chunks.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Search {
                question: question.to_string(),
                reply,
            })
            .await
            .map_err(|_| RetrievalError::WorkerGone)?;
        rx.await.map_err(|_| RetrievalError::WorkerGone)?
    }

    /// Drop the current index. Used when the attached file is removed.
    pub async fn clear(&self) -> Result<(), RetrievalError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Job::Clear { reply })
            .await
            .map_err(|_| RetrievalError::WorkerGone)?;
        rx.await.map_err(|_| RetrievalError::WorkerGone)
    }
}

async fn run_worker(provider: Arc<dyn EmbeddingProvider>, mut rx: mpsc::Receiver<Job>) {
    let splitter = RecursiveCharacterSplitter::default();
    let mut index = MemoryVectorIndex::new();

    while let Some(job) = rx.recv().await {
        match job {
            Job::Index { file_text, reply } => {
                let result = build_index(&splitter, provider.as_ref(), &file_text).await;
                match result {
                    Ok(new_index) => {
                        debug!(chunks = new_index.len(), "document indexed");
                        let count = new_index.len();
                        index = new_index;
                        let _ = reply.send(Ok(count));
                    }
                    Err(e) => {
                        warn!(error = %e, "document indexing failed");
                        index = MemoryVectorIndex::new();
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Job::Search { question, reply } => {
                let result = search(&index, provider.as_ref(), &question).await;
                if let Err(e) = &result {
                    warn!(error = %e, "similarity search failed");
                }
                let _ = reply.send(result);
            }
            Job::Clear { reply } => {
                index = MemoryVectorIndex::new();
                let _ = reply.send(());
            }
        }
    }
}

async fn build_index(
    splitter: &RecursiveCharacterSplitter,
    provider: &dyn EmbeddingProvider,
    file_text: &FileText,
) -> Result<MemoryVectorIndex, RetrievalError> {
    let chunks = splitter.split_file_text(file_text);
    if chunks.is_empty() {
        return Err(RetrievalError::EmptyDocument);
    }

    let texts: Vec<&str> = chunks.iter().map(|c| c.page_content.as_str()).collect();
    let vectors = provider
        .embed(&texts)
        .await
        .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

    if vectors.len() != chunks.len() {
        return Err(RetrievalError::Embedding(format!(
            "provider returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        )));
    }

    let mut index = MemoryVectorIndex::new();
    for (doc, vector) in chunks.into_iter().zip(vectors) {
        index.add(doc, vector);
    }
    Ok(index)
}

async fn search(
    index: &MemoryVectorIndex,
    provider: &dyn EmbeddingProvider,
    question: &str,
) -> Result<Vec<ScoredChunk>, RetrievalError> {
    if index.is_empty() {
        return Err(RetrievalError::EmptyDocument);
    }

    let query = provider
        .embed_one(question)
        .await
        .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

    Ok(index.search(&query, TOP_K))
}

#[cfg(test)]
mod tests {
    use super::{RetrievalWorker, TOP_K};
    use crate::error::RetrievalError;
    use crate::retrieval::embeddings::{DeterministicEmbedding, EmbeddingProvider};
    use crate::store::{FileText, PageDocument};
    use async_trait::async_trait;
    use std::sync::Arc;

    fn worker() -> RetrievalWorker {
        RetrievalWorker::spawn(Arc::new(DeterministicEmbedding::new(16)))
    }

    #[tokio::test]
    async fn indexes_raw_text_and_finds_its_chunks() {
        let w = worker();
        let count = w
            .index_document(FileText::Raw(
                "Paris is the capital of France.\n\nBerlin is the capital of Germany.".into(),
            ))
            .await
            .unwrap();
        assert!(count >= 1);

        let hits = w.retrieve("capital of France").await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.len() <= TOP_K);
    }

    #[tokio::test]
    async fn identical_chunk_ranks_first() {
        let w = worker();
        let pages = vec![
            PageDocument {
                page_content: "unrelated text about gardening".into(),
                metadata: serde_json::json!({"page": 1}),
            },
            PageDocument {
                page_content: "the exact question text".into(),
                metadata: serde_json::json!({"page": 2}),
            },
        ];
        w.index_document(FileText::Pages(pages)).await.unwrap();

        let hits = w.retrieve("the exact question text").await.unwrap();
        assert_eq!(hits[0].page_content, "the exact question text");
        assert_eq!(hits[0].metadata["page"], 2);
    }

    #[tokio::test]
    async fn empty_document_is_rejected() {
        let w = worker();
        let err = w.index_document(FileText::Raw(String::new())).await;
        assert!(matches!(err, Err(RetrievalError::EmptyDocument)));
    }

    #[tokio::test]
    async fn search_without_index_reports_empty() {
        let w = worker();
        let err = w.retrieve("anything").await;
        assert!(matches!(err, Err(RetrievalError::EmptyDocument)));
    }

    #[tokio::test]
    async fn reindex_replaces_previous_document() {
        let w = worker();
        w.index_document(FileText::Raw("alpha document".into()))
            .await
            .unwrap();
        w.index_document(FileText::Raw("beta document".into()))
            .await
            .unwrap();

        let hits = w.retrieve("beta document").await.unwrap();
        assert!(hits.iter().all(|h| !h.page_content.contains("alpha")));
    }

    #[tokio::test]
    async fn clear_drops_the_index() {
        let w = worker();
        w.index_document(FileText::Raw("some content".into()))
            .await
            .unwrap();
        w.clear().await.unwrap();
        assert!(matches!(
            w.retrieve("some content").await,
            Err(RetrievalError::EmptyDocument)
        ));
    }

    #[tokio::test]
    async fn worker_survives_a_failing_provider() {
        struct FailingProvider;

        #[async_trait]
        impl EmbeddingProvider for FailingProvider {
            fn name(&self) -> &str {
                "failing"
            }
            fn dimensions(&self) -> usize {
                4
            }
            async fn embed(&self, _texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
                anyhow::bail!("model unavailable")
            }
        }

        let w = RetrievalWorker::spawn(Arc::new(FailingProvider));
        let err = w.index_document(FileText::Raw("text".into())).await;
        assert!(matches!(err, Err(RetrievalError::Embedding(_))));

        // later jobs still get answered
        let err = w.retrieve("text").await;
        assert!(matches!(err, Err(RetrievalError::EmptyDocument)));
    }
}
