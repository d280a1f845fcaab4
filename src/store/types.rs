use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One persisted conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub messages: Vec<Message>,
    /// Set once at first save, immutable thereafter.
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
}

/// Sidebar-facing projection of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub created_at: String,
    pub message_count: usize,
}

/// A chat message, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        id: String,
        content: MessageContent,
        #[serde(rename = "fileName", skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
    },
    Assistant {
        id: String,
        content: String,
    },
}

impl Message {
    pub fn user(content: MessageContent, file_name: Option<String>) -> Self {
        Self::User {
            id: generate_message_id(),
            content,
            file_name,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            id: generate_message_id(),
            content: content.into(),
        }
    }

    /// Empty assistant placeholder appended at submission time and filled
    /// incrementally as deltas arrive.
    pub fn placeholder() -> Self {
        Self::assistant("")
    }

    pub fn id(&self) -> &str {
        match self {
            Self::User { id, .. } | Self::Assistant { id, .. } => id,
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
        }
    }

    /// Text view of the message content, ignoring image parts.
    pub fn text(&self) -> String {
        match self {
            Self::User { content, .. } => content.text(),
            Self::Assistant { content, .. } => content.clone(),
        }
    }
}

/// User message content: a plain string, or structured parts when images
/// are attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Plain(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(&self) -> String {
        match self {
            Self::Plain(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageRef { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Image data URLs carried by this content, in part order.
    pub fn image_urls(&self) -> Vec<String> {
        match self {
            Self::Plain(_) => Vec::new(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ImageRef { url } => Some(url.clone()),
                    ContentPart::Text { .. } => None,
                })
                .collect(),
        }
    }

    /// Build content from input text plus zero or more image data URLs.
    pub fn with_images(text: &str, images: &[String]) -> Self {
        if images.is_empty() {
            return Self::Plain(text.to_string());
        }
        let mut parts = vec![ContentPart::Text {
            text: text.to_string(),
        }];
        parts.extend(images.iter().map(|url| ContentPart::ImageRef {
            url: url.clone(),
        }));
        Self::Parts(parts)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Plain(text.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageRef { url: String },
}

/// Metadata for a document attached to a session. At most one per session;
/// persists until explicitly cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub file_name: String,
    pub file_type: String,
    pub file_text: FileText,
}

/// Extracted document content: page documents for paginated formats, a raw
/// blob for flat text or tabular formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileText {
    Pages(Vec<PageDocument>),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDocument {
    pub page_content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PageDocument {
    pub fn new(page_content: impl Into<String>) -> Self {
        Self {
            page_content: page_content.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}
