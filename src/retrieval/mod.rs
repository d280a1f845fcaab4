//! Document retrieval: splitting, embedding and in-memory similarity search.

pub mod embeddings;
pub mod index;
pub mod splitter;
pub mod worker;

pub use embeddings::{EmbeddingProvider, OpenAiEmbedding};
pub use index::{MemoryVectorIndex, ScoredChunk, cosine_similarity};
pub use splitter::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, RecursiveCharacterSplitter};
pub use worker::{RetrievalWorker, TOP_K};

#[cfg(feature = "fastembed")]
pub use embeddings::LocalEmbedding;
