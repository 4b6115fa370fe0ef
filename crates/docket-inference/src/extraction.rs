//! Text extraction from uploaded documents.

use async_trait::async_trait;
use docket_models::{Extraction, TextChunk};
use serde_json::json;

use crate::error::{InferenceError, InferenceResult};

/// Turns raw document bytes into text plus positional chunks.
#[async_trait]
pub trait ExtractionService: Send + Sync {
    async fn extract_text(
        &self,
        bytes: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> InferenceResult<Extraction>;
}

pub const DEFAULT_MAX_CHUNK_CHARS: usize = 2000;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "log", "eml"];

/// Extractor for plain text files. Paragraphs are packed into chunks of
/// at most `max_chunk_bytes`; a longer paragraph is split on its own.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    max_chunk_bytes: usize,
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHUNK_CHARS)
    }
}

impl PlainTextExtractor {
    pub fn new(max_chunk_bytes: usize) -> Self {
        Self {
            max_chunk_bytes: max_chunk_bytes.max(1),
        }
    }

    pub fn supports(mime_type: &str, filename: &str) -> bool {
        if mime_type.starts_with("text/") {
            return true;
        }
        filename
            .rsplit_once('.')
            .map(|(_, ext)| TEXT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    }

    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        let mut spans = Vec::new();
        let mut current: Option<(usize, usize)> = None;

        for (start, end) in paragraph_spans(text) {
            match current {
                Some((chunk_start, _)) if end - chunk_start <= self.max_chunk_bytes => {
                    current = Some((chunk_start, end));
                }
                Some(span) => {
                    spans.push(span);
                    current = Some((start, end));
                }
                None => current = Some((start, end)),
            }
        }
        spans.extend(current);

        spans
            .into_iter()
            .flat_map(|(start, end)| split_span(text, start, end, self.max_chunk_bytes))
            .enumerate()
            .map(|(index, (start, end))| TextChunk {
                index: index as u32,
                text: text[start..end].to_string(),
                start,
                end,
                page: None,
            })
            .collect()
    }
}

#[async_trait]
impl ExtractionService for PlainTextExtractor {
    async fn extract_text(
        &self,
        bytes: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> InferenceResult<Extraction> {
        if !Self::supports(mime_type, filename) {
            return Err(InferenceError::unsupported_format(mime_type));
        }

        let decoded = String::from_utf8_lossy(bytes);
        let text = decoded.strip_prefix('\u{feff}').unwrap_or(&decoded).to_string();
        let chunks = self.chunk(&text);

        Ok(Extraction {
            metadata: json!({
                "extractor": "plain_text",
                "characters": text.chars().count(),
                "chunks": chunks.len(),
            }),
            text,
            chunks,
        })
    }
}

/// Byte spans of blank-line separated paragraphs, trimmed of surrounding
/// whitespace.
fn paragraph_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let trimmed_start = line.trim_start();
        if trimmed_start.is_empty() {
            spans.extend(current.take());
            continue;
        }
        let start = line_start + (line.len() - trimmed_start.len());
        let end = line_start + line.trim_end().len();
        current = Some(match current {
            Some((s, _)) => (s, end),
            None => (start, end),
        });
    }
    spans.extend(current);
    spans
}

/// Split a span into pieces no longer than `max` bytes, preferring to cut
/// at whitespace and never inside a character.
fn split_span(text: &str, start: usize, end: usize, max: usize) -> Vec<(usize, usize)> {
    let mut pieces = Vec::new();
    let mut cursor = start;

    while end - cursor > max {
        let mut cut = cursor + max;
        while cut > cursor && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == cursor {
            // A single character wider than max.
            cut = cursor + 1;
            while !text.is_char_boundary(cut) {
                cut += 1;
            }
        } else if let Some(ws) = text[cursor..cut].rfind(char::is_whitespace) {
            if ws > 0 {
                cut = cursor + ws;
            }
        }

        let piece = text[cursor..cut].trim_end();
        pieces.push((cursor, cursor + piece.len()));

        cursor = cut;
        while cursor < end {
            match text[cursor..].chars().next() {
                Some(c) if c.is_whitespace() => cursor += c.len_utf8(),
                _ => break,
            }
        }
    }
    if cursor < end {
        pieces.push((cursor, end));
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports() {
        assert!(PlainTextExtractor::supports("text/plain", "a.bin"));
        assert!(PlainTextExtractor::supports("application/octet-stream", "notes.TXT"));
        assert!(!PlainTextExtractor::supports("application/pdf", "brief.pdf"));
    }

    #[test]
    fn test_paragraphs_are_packed() {
        let text = "First para.\n\nSecond para.\n\n\nThird one here.";
        let extractor = PlainTextExtractor::new(30);
        let chunks = extractor.chunk(text);

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "First para.\n\nSecond para.");
        assert_eq!(chunks[1].text, "Third one here.");
        for chunk in &chunks {
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn test_long_paragraph_is_split_on_whitespace() {
        let text = "alpha beta gamma delta";
        let chunks = PlainTextExtractor::new(11).chunk(text);

        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["alpha beta", "gamma delta"]);
        assert!(chunks.iter().all(|c| c.text.len() <= 11));
    }

    #[test]
    fn test_split_respects_char_boundaries() {
        let text = "ééééé";
        let chunks = PlainTextExtractor::new(3).chunk(text);
        assert!(chunks.iter().all(|c| &text[c.start..c.end] == c.text));
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[tokio::test]
    async fn test_extract_text() {
        let extractor = PlainTextExtractor::default();
        let extraction = extractor
            .extract_text("\u{feff}Hello\r\n\r\nWorld".as_bytes(), "text/plain", "a.txt")
            .await
            .unwrap();

        assert_eq!(extraction.text, "Hello\r\n\r\nWorld");
        assert_eq!(extraction.chunks.len(), 1);
        assert_eq!(extraction.metadata["extractor"], "plain_text");
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let err = PlainTextExtractor::default()
            .extract_text(b"%PDF", "application/pdf", "brief.pdf")
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_empty_text() {
        let extraction = PlainTextExtractor::default()
            .extract_text(b"", "text/plain", "empty.txt")
            .await
            .unwrap();
        assert!(extraction.text.is_empty());
        assert!(extraction.chunks.is_empty());
    }
}
