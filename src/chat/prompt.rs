use crate::engine::WireMessage;
use crate::retrieval::ScoredChunk;
use crate::store::{Message, MessageContent};

pub const BASE_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Assist the user with their questions.";

const CUSTOM_INSTRUCTIONS_LEAD: &str = "You are also provided with the following information \
     from the user, keep them in mind for your responses: ";

/// Compose the system prompt, appending the user's custom instructions when
/// they are present and enabled.
pub fn system_prompt(custom_instructions: Option<&str>, enabled: bool) -> String {
    match custom_instructions {
        Some(instructions) if enabled && !instructions.trim().is_empty() => {
            format!("{BASE_SYSTEM_PROMPT} {CUSTOM_INSTRUCTIONS_LEAD}{instructions}")
        }
        _ => BASE_SYSTEM_PROMPT.to_string(),
    }
}

/// Substitute the user's question with a grounded prompt built from the
/// retrieved chunks. Chunk contents are concatenated in rank order.
pub fn qa_prompt(chunks: &[ScoredChunk], question: &str) -> String {
    let context: String = chunks.iter().map(|c| c.page_content.as_str()).collect();
    format!(
        "Answer the question based on the context provided below. Also, always keep old \
         messages in mind when answering questions.\n\
         If the question cannot be answered using the information provided, answer with \
         \"I don't know\" and never make up your own information.\n\
         \n\
         Context:\n\
         \"{context}\"\n\
         \n\
         Question:\n\
         \"{question}\"\n\
         \n\
         Answer:\n\
         \"\"\n"
    )
}

/// Map stored history onto the wire, dropping assistant placeholders that
/// have no content yet.
pub fn wire_history(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .filter_map(|message| match message {
            Message::User { content, .. } => Some(match content {
                MessageContent::Plain(text) => WireMessage::user(text.clone()),
                MessageContent::Parts(_) => {
                    let images = content.image_urls();
                    if images.is_empty() {
                        WireMessage::user(content.text())
                    } else {
                        WireMessage::user_with_images(content.text(), images)
                    }
                }
            }),
            Message::Assistant { content, .. } => {
                if content.is_empty() {
                    None
                } else {
                    Some(WireMessage::assistant(content.clone()))
                }
            }
        })
        .collect()
}
