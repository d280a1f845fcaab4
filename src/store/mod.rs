pub mod events;
pub mod sqlite;
pub mod types;

pub use events::{StoreEvent, StoreEvents};
pub use sqlite::{SessionStore, SqliteSessionStore};
pub use types::{
    ChatSession, ContentPart, FileInfo, FileText, Message, MessageContent, PageDocument,
    SessionSummary,
};
