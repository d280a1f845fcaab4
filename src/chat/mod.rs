//! Chat orchestration: prompt assembly and the per-session turn loop.

pub mod orchestrator;
pub mod prompt;

pub use orchestrator::ChatController;
pub use prompt::{BASE_SYSTEM_PROMPT, qa_prompt, system_prompt};
