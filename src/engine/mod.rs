//! Inference engine: the runner abstraction, the OpenAI-compatible remote
//! runner, and the adapter that owns the single loaded model.

pub mod adapter;
pub mod remote;
pub mod runner;
pub mod sse;

pub use adapter::{EngineAdapter, EngineState};
pub use remote::OpenAiCompatRunner;
pub use runner::{
    EngineEvent, EngineHandle, GenerationRequest, LoadProgress, ModelRunner, TokenStream,
    WireContent, WireMessage, WirePart,
};
