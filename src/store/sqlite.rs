use super::events::{StoreEvent, StoreEvents};
use super::types::{ChatSession, FileInfo, Message, SessionSummary};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::path::Path;
use std::str::FromStr;
use tokio::sync::broadcast;

/// Preference namespace holding chat state (selected model, user name).
pub const PREF_NS_CHAT: &str = "chat";
/// Preference namespace holding custom-instruction memory.
pub const PREF_NS_MEMORY: &str = "memory";

pub const PREF_SELECTED_MODEL: &str = "selected_model";
pub const PREF_USER_NAME: &str = "user_name";
pub const PREF_CUSTOM_INSTRUCTIONS: &str = "custom_instructions";
pub const PREF_CUSTOM_INSTRUCTIONS_ENABLED: &str = "custom_instructions_enabled";

/// Async session persistence contract. The store is the single source of
/// truth for sessions; every mutation broadcasts a [`StoreEvent`].
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StoreError>;

    /// Newest-first summaries for the sidebar chat list.
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError>;

    /// Replaces the message sequence for a session. Preserves existing
    /// `created_at` / `file_info` / `title`; initializes `created_at` to
    /// now for a previously unknown session. Idempotent.
    async fn save_messages(&self, id: &str, messages: &[Message]) -> Result<(), StoreError>;

    /// No-op if the session is absent.
    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;

    /// Removes a single message by id, leaving other fields intact.
    async fn delete_message(&self, id: &str, message_id: &str) -> Result<(), StoreError>;

    async fn save_file_info(&self, id: &str, file_info: &FileInfo) -> Result<(), StoreError>;

    async fn clear_file_info(&self, id: &str) -> Result<(), StoreError>;

    async fn set_title(&self, id: &str, title: &str) -> Result<(), StoreError>;

    async fn get_preference(&self, namespace: &str, key: &str)
    -> Result<Option<String>, StoreError>;

    async fn set_preference(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    async fn selected_model(&self) -> Result<Option<String>, StoreError> {
        self.get_preference(PREF_NS_CHAT, PREF_SELECTED_MODEL).await
    }

    async fn set_selected_model(&self, model: &str) -> Result<(), StoreError> {
        self.set_preference(PREF_NS_CHAT, PREF_SELECTED_MODEL, model)
            .await
    }

    async fn user_name(&self) -> Result<Option<String>, StoreError> {
        self.get_preference(PREF_NS_CHAT, PREF_USER_NAME).await
    }

    async fn set_user_name(&self, name: &str) -> Result<(), StoreError> {
        self.set_preference(PREF_NS_CHAT, PREF_USER_NAME, name).await
    }

    async fn custom_instructions(&self) -> Result<Option<String>, StoreError> {
        self.get_preference(PREF_NS_MEMORY, PREF_CUSTOM_INSTRUCTIONS)
            .await
    }

    async fn set_custom_instructions(&self, text: &str) -> Result<(), StoreError> {
        self.set_preference(PREF_NS_MEMORY, PREF_CUSTOM_INSTRUCTIONS, text)
            .await
    }

    async fn custom_instructions_enabled(&self) -> Result<bool, StoreError> {
        Ok(self
            .get_preference(PREF_NS_MEMORY, PREF_CUSTOM_INSTRUCTIONS_ENABLED)
            .await?
            .as_deref()
            == Some("true"))
    }

    async fn set_custom_instructions_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.set_preference(
            PREF_NS_MEMORY,
            PREF_CUSTOM_INSTRUCTIONS_ENABLED,
            if enabled { "true" } else { "false" },
        )
        .await
    }
}

/// SQLite-backed session store using an sqlx async pool.
pub struct SqliteSessionStore {
    pool: SqlitePool,
    events: StoreEvents,
}

const STORE_SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS store_schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
const STORE_SCHEMA_VERSION_KEY: &str = "store_schema_version";
const STORE_SCHEMA_VERSION: u32 = 1;

async fn ensure_store_schema_version(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(STORE_SCHEMA_META_TABLE).execute(pool).await?;

    let stored_version: Option<(String,)> =
        sqlx::query_as("SELECT value FROM store_schema_meta WHERE key = $1")
            .bind(STORE_SCHEMA_VERSION_KEY)
            .fetch_optional(pool)
            .await?;

    if let Some((value,)) = stored_version {
        let parsed = value
            .parse::<u32>()
            .map_err(|_| StoreError::Open(format!("invalid schema version value: {value}")))?;
        if parsed != STORE_SCHEMA_VERSION {
            return Err(StoreError::Open(format!(
                "incompatible schema version: stored={parsed}, expected={STORE_SCHEMA_VERSION}; \
remove the session DB and restart"
            )));
        }
        return Ok(());
    }

    sqlx::query("INSERT INTO store_schema_meta (key, value) VALUES ($1, $2)")
        .bind(STORE_SCHEMA_VERSION_KEY)
        .bind(STORE_SCHEMA_VERSION.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

impl SqliteSessionStore {
    /// Create a store over an existing pool and run migrations.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        ensure_store_schema_version(&pool).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                 id TEXT PRIMARY KEY,
                 messages TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 title TEXT,
                 file_info TEXT
             )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS preferences (
                 namespace TEXT NOT NULL,
                 key TEXT NOT NULL,
                 value TEXT NOT NULL,
                 PRIMARY KEY (namespace, key)
             )",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            events: StoreEvents::default(),
        })
    }

    /// Open (or create) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| StoreError::Open(error.to_string()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
            .map_err(|error| StoreError::Open(error.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::new(pool).await
    }

    /// Access the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_session_row(&self, id: &str) -> Result<Option<SqliteRow>, StoreError> {
        let row = sqlx::query(
            "SELECT id, messages, created_at, title, file_info
             FROM sessions
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Insert an empty session row if `id` is unknown, so metadata writes
    /// (title, attachment) can land before the first message save.
    async fn ensure_session_row(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, messages, created_at, title, file_info)
             VALUES ($1, '[]', $2, NULL, NULL)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn map_session_row(row: &SqliteRow) -> Result<ChatSession, StoreError> {
    let messages_raw: String = row.try_get("messages")?;
    let file_info_raw: Option<String> = row.try_get("file_info")?;

    let messages: Vec<Message> = serde_json::from_str(&messages_raw)?;
    let file_info = file_info_raw
        .map(|value| serde_json::from_str::<FileInfo>(&value))
        .transpose()?;

    Ok(ChatSession {
        id: row.try_get("id")?,
        messages,
        created_at: row.try_get("created_at")?,
        title: row.try_get("title")?,
        file_info,
    })
}

/// Derive a listing title: explicit title if set, else the leading text of
/// the first user message.
fn summary_title(title: Option<&str>, messages: &[Message]) -> String {
    if let Some(title) = title
        && !title.is_empty()
    {
        return title.to_string();
    }

    let first_user_text = messages
        .iter()
        .find(|message| !message.is_assistant())
        .map(Message::text)
        .unwrap_or_default();

    let mut head: String = first_user_text.chars().take(64).collect();
    if head.len() < first_user_text.len() {
        head.push('…');
    }
    if head.is_empty() { "New chat".to_string() } else { head }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get_session(&self, id: &str) -> Result<Option<ChatSession>, StoreError> {
        let row = self.fetch_session_row(id).await?;
        row.map(|r| map_session_row(&r)).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, messages, created_at, title, file_info
             FROM sessions
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let session = map_session_row(row)?;
                Ok(SessionSummary {
                    title: summary_title(session.title.as_deref(), &session.messages),
                    id: session.id,
                    created_at: session.created_at,
                    message_count: session.messages.len(),
                })
            })
            .collect()
    }

    async fn save_messages(&self, id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let messages_json = serde_json::to_string(messages)?;

        sqlx::query(
            "INSERT INTO sessions (id, messages, created_at, title, file_info)
             VALUES ($1, $2, $3, NULL, NULL)
             ON CONFLICT(id) DO UPDATE SET messages = excluded.messages",
        )
        .bind(id)
        .bind(&messages_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.events
            .emit(StoreEvent::SessionsChanged { id: id.to_string() });
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            self.events
                .emit(StoreEvent::SessionDeleted { id: id.to_string() });
        }
        Ok(())
    }

    async fn delete_message(&self, id: &str, message_id: &str) -> Result<(), StoreError> {
        let Some(session) = self.get_session(id).await? else {
            return Ok(());
        };

        let remaining: Vec<Message> = session
            .messages
            .into_iter()
            .filter(|message| message.id() != message_id)
            .collect();
        let messages_json = serde_json::to_string(&remaining)?;

        sqlx::query("UPDATE sessions SET messages = $1 WHERE id = $2")
            .bind(&messages_json)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.events
            .emit(StoreEvent::SessionsChanged { id: id.to_string() });
        Ok(())
    }

    async fn save_file_info(&self, id: &str, file_info: &FileInfo) -> Result<(), StoreError> {
        self.ensure_session_row(id).await?;
        let file_info_json = serde_json::to_string(file_info)?;

        sqlx::query("UPDATE sessions SET file_info = $1 WHERE id = $2")
            .bind(&file_info_json)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.events
            .emit(StoreEvent::SessionsChanged { id: id.to_string() });
        Ok(())
    }

    async fn clear_file_info(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE sessions SET file_info = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.events
            .emit(StoreEvent::SessionsChanged { id: id.to_string() });
        Ok(())
    }

    async fn set_title(&self, id: &str, title: &str) -> Result<(), StoreError> {
        self.ensure_session_row(id).await?;

        sqlx::query("UPDATE sessions SET title = $1 WHERE id = $2")
            .bind(title)
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.events
            .emit(StoreEvent::SessionsChanged { id: id.to_string() });
        Ok(())
    }

    async fn get_preference(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM preferences WHERE namespace = $1 AND key = $2")
                .bind(namespace)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_preference(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO preferences (namespace, key, value)
             VALUES ($1, $2, $3)
             ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
        )
        .bind(namespace)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        self.events.emit(StoreEvent::PreferenceChanged {
            key: format!("{namespace}.{key}"),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}
