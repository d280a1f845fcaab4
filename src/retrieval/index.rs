use crate::store::PageDocument;

/// A chunk returned from a similarity search, with its score in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub page_content: String,
    pub metadata: serde_json::Value,
    pub score: f32,
}

struct IndexedChunk {
    doc: PageDocument,
    vector: Vec<f32>,
}

/// In-memory vector index over the chunks of a single document.
///
/// Rebuilt from scratch whenever the indexed document changes; never
/// persisted. Search is a linear scan, which is fine at the scale of one
/// attached file.
#[derive(Default)]
pub struct MemoryVectorIndex {
    chunks: Vec<IndexedChunk>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Add a chunk with its embedding. Insertion order is the tie-break
    /// order for equal-score search results.
    pub fn add(&mut self, doc: PageDocument, vector: Vec<f32>) {
        self.chunks.push(IndexedChunk { doc, vector });
    }

    /// Return the `top_k` most similar chunks, highest score first.
    /// Ties keep insertion order (stable sort on score only).
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(query, &c.vector)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                page_content: self.chunks[i].doc.page_content.clone(),
                metadata: self.chunks[i].doc.metadata.clone(),
                score,
            })
            .collect()
    }
}

/// Cosine similarity clamped to `[0, 1]`.
///
/// Accumulates in f64 to avoid drift on long vectors. Mismatched lengths
/// and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let xf = f64::from(*x);
        let yf = f64::from(*y);
        dot += xf * yf;
        norm_a += xf * xf;
        norm_b += yf * yf;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    #[allow(clippy::cast_possible_truncation)]
    let sim = (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32;
    sim.clamp(0.0, 1.0)
}
