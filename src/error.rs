use thiserror::Error;

/// Structured error hierarchy for the chat core.
///
/// Each subsystem defines its own error enum. Callers can match on these to
/// decide recovery strategy; internal code continues to use `anyhow::Result`
/// for ad-hoc context chains.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("retrieval: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open session database: {0}")]
    Open(String),

    #[error("db: {0}")]
    Db(#[from] sqlx::Error),

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// The request needs something the selected model or environment cannot
    /// provide, such as image input on a text-only model.
    #[error("engine capability missing: {0}")]
    Capability(String),

    /// Fetching model weights or reaching the endpoint failed; the adapter
    /// is back in the unloaded state and the user may retry.
    #[error("model load failed: {0}")]
    Load(String),

    /// The runner faulted mid-stream.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("generation interrupted")]
    Interrupted,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("document splitting produced no chunks")]
    EmptyDocument,

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("retrieval worker unavailable")]
    WorkerGone,
}
