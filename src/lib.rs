#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

//! Local-first chat core: session persistence, document retrieval, model
//! lifecycle and the streaming turn loop, behind a frontend-agnostic API.

pub mod chat;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod logging;
pub mod models;
pub mod retrieval;
pub mod store;

pub use chat::ChatController;
pub use config::EngineConfig;
pub use engine::{EngineAdapter, EngineState, ModelRunner, OpenAiCompatRunner};
pub use error::{ChatError, EngineError, RetrievalError, StoreError};
pub use export::{ExportFormat, export_chat};
pub use models::{ModelDescriptor, builtin_models, default_model, find_model};
pub use retrieval::{EmbeddingProvider, RetrievalWorker};
pub use store::{ChatSession, FileInfo, FileText, Message, SessionStore, SqliteSessionStore};
