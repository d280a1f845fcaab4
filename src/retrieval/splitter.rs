use crate::store::types::{FileText, PageDocument};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Recursive boundary-aware text splitter.
///
/// Tries each separator in order, preferring paragraph breaks over line
/// breaks over word breaks, and only falls back to a hard character split
/// when nothing else fits. Adjacent chunks overlap so context is not lost
/// at chunk boundaries.
#[derive(Debug, Clone)]
pub struct RecursiveCharacterSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl Default for RecursiveCharacterSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl RecursiveCharacterSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: vec!["\n\n", "\n", " ", ""],
        }
    }

    /// Split attached-document content into chunk documents, preserving
    /// per-page metadata for paginated formats.
    pub fn split_file_text(&self, file_text: &FileText) -> Vec<PageDocument> {
        match file_text {
            FileText::Raw(text) => self
                .split_text(text)
                .into_iter()
                .map(PageDocument::new)
                .collect(),
            FileText::Pages(pages) => pages
                .iter()
                .flat_map(|page| {
                    self.split_text(&page.page_content)
                        .into_iter()
                        .map(|chunk| PageDocument {
                            page_content: chunk,
                            metadata: page.metadata.clone(),
                        })
                        .collect::<Vec<_>>()
                })
                .collect(),
        }
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_with(text, &self.separators)
    }

    fn split_with(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        let (separator, rest) = pick_separator(text, separators);

        let splits: Vec<&str> = if separator.is_empty() {
            char_windows(text, self.chunk_size)
        } else {
            text.split(separator).filter(|s| !s.is_empty()).collect()
        };

        let mut good_splits: Vec<String> = Vec::new();
        let mut chunks: Vec<String> = Vec::new();

        for split in splits {
            if char_len(split) <= self.chunk_size {
                good_splits.push(split.to_string());
                continue;
            }

            // Oversized split: flush what we have, then recurse with the
            // remaining separators.
            self.merge_splits(&mut chunks, &mut good_splits, separator);
            if rest.is_empty() {
                chunks.push(split.to_string());
            } else {
                chunks.extend(self.split_with(split, rest));
            }
        }

        self.merge_splits(&mut chunks, &mut good_splits, separator);
        chunks
    }

    /// Greedily join accumulated splits into chunks no larger than
    /// `chunk_size`, carrying `chunk_overlap` characters of trailing
    /// context into the next chunk.
    fn merge_splits(&self, chunks: &mut Vec<String>, splits: &mut Vec<String>, separator: &str) {
        if splits.is_empty() {
            return;
        }

        let sep_len = char_len(separator);
        let mut window: Vec<String> = Vec::new();
        let mut window_len = 0usize;

        for split in splits.drain(..) {
            let split_len = char_len(&split);
            let joined_len = window_len + split_len + if window.is_empty() { 0 } else { sep_len };

            if joined_len > self.chunk_size && !window.is_empty() {
                chunks.push(window.join(separator));

                while window_len > self.chunk_overlap
                    || (window_len + split_len + sep_len > self.chunk_size && window_len > 0)
                {
                    let removed = window.remove(0);
                    window_len -= char_len(&removed);
                    if !window.is_empty() {
                        window_len = window_len.saturating_sub(sep_len);
                    }
                }
            }

            if !window.is_empty() {
                window_len += sep_len;
            }
            window_len += split_len;
            window.push(split);
        }

        if !window.is_empty() {
            chunks.push(window.join(separator));
        }
    }
}

/// First separator that occurs in the text; "" always matches last.
fn pick_separator<'a>(
    text: &str,
    separators: &'a [&'static str],
) -> (&'static str, &'a [&'static str]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Hard split into windows of at most `size` characters.
fn char_windows(text: &str, size: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (offset, _) in text.char_indices() {
        if count == size {
            out.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        out.push(&text[start..]);
    }
    out
}
