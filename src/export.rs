use serde::Serialize;

use crate::error::ChatError;
use crate::store::Message;

/// Supported export formats for a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Md,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Md => "md",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Md => "text/markdown",
        }
    }
}

/// A rendered export, ready to hand to the frontend as a download.
#[derive(Debug, Clone)]
pub struct ExportedChat {
    pub filename: String,
    pub mime_type: &'static str,
    pub content: String,
}

/// Render a session's messages for download.
///
/// JSON is the pretty-printed message array and round-trips losslessly.
/// Markdown renders one `## **role**:` block per message and is for humans.
pub fn export_chat(
    session_id: &str,
    messages: &[Message],
    format: ExportFormat,
) -> Result<ExportedChat, ChatError> {
    let content = match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(messages).map_err(anyhow::Error::from)?
        }
        ExportFormat::Md => render_markdown(messages),
    };

    Ok(ExportedChat {
        filename: format!("chat_{session_id}.{}", format.extension()),
        mime_type: format.mime_type(),
        content,
    })
}

fn render_markdown(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| format!("## **{}**:\n{}\n", message.role(), message.text()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::{ExportFormat, export_chat};
    use crate::store::{Message, MessageContent};

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::user("What is Rust?".into(), None),
            Message::assistant("A systems programming language."),
            Message::user(
                MessageContent::with_images("and this?", &["data:image/png;base64,AA".into()]),
                Some("shot.png".into()),
            ),
        ]
    }

    #[test]
    fn json_export_roundtrips_losslessly() {
        let messages = sample_messages();
        let export = export_chat("abc", &messages, ExportFormat::Json).unwrap();

        assert_eq!(export.filename, "chat_abc.json");
        assert_eq!(export.mime_type, "application/json");

        let back: Vec<Message> = serde_json::from_str(&export.content).unwrap();
        assert_eq!(back, messages);
    }

    #[test]
    fn markdown_export_renders_role_blocks() {
        let export = export_chat("abc", &sample_messages(), ExportFormat::Md).unwrap();

        assert_eq!(export.filename, "chat_abc.md");
        assert_eq!(export.mime_type, "text/markdown");
        assert!(export.content.starts_with("## **user**:\nWhat is Rust?\n"));
        assert!(
            export
                .content
                .contains("## **assistant**:\nA systems programming language.")
        );
        // image parts render as their caption text
        assert!(export.content.contains("and this?"));
    }

    #[test]
    fn empty_session_exports_cleanly() {
        let export = export_chat("empty", &[], ExportFormat::Md).unwrap();
        assert!(export.content.is_empty());

        let export = export_chat("empty", &[], ExportFormat::Json).unwrap();
        let back: Vec<Message> = serde_json::from_str(&export.content).unwrap();
        assert!(back.is_empty());
    }
}
