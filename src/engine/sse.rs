/// Reassembles server-sent-event frames from arbitrarily split byte chunks.
///
/// Network chunks rarely align with SSE frame boundaries, so bytes are
/// buffered until a full `\n\n`-terminated block is available.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buffer: String,
}

impl SseBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        self.buffer.push_str(&text);
    }

    pub fn next_event_block(&mut self) -> Option<String> {
        let boundary = self.buffer.find("\n\n")?;
        let remaining = self.buffer.split_off(boundary + 2);
        let event_block = std::mem::take(&mut self.buffer);
        self.buffer = remaining;
        Some(event_block)
    }
}

pub fn parse_data_lines(event_block: &str) -> Vec<&str> {
    event_block
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .collect()
}

pub fn parse_data_lines_without_done(event_block: &str) -> Vec<&str> {
    parse_data_lines(event_block)
        .into_iter()
        .filter(|data| *data != "[DONE]")
        .collect()
}
