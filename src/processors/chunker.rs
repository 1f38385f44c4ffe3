//! Paragraph-aware chunking of long documents

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::core::budget::SizeEstimator;

/// Blank line, possibly containing stray spaces
static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").expect("valid paragraph regex"));

/// Sentence terminator, optional closing quote/bracket, then whitespace
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[.!?…。！？]+["'”’»)\]]*\s+"#).expect("valid sentence regex")
});

/// Immutable unit of source text with its position in the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the document
    pub index: usize,
    /// Source text
    pub text: String,
}

/// Splits text into chunks whose estimated size fits a token budget
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    max_unit_size: usize,
    estimator: SizeEstimator,
}

impl Chunker {
    /// Chunker for a budget of at least one token
    pub fn new(max_unit_size: usize, estimator: SizeEstimator) -> Self {
        Self {
            max_unit_size: max_unit_size.max(1),
            estimator,
        }
    }

    fn fits(&self, text: &str) -> bool {
        self.estimator.estimate(text) <= self.max_unit_size
    }

    /// Split `text` into ordered, non-empty chunks
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let mut pieces: Vec<String> = Vec::new();
        let mut buffer = String::new();

        for paragraph in split_paragraphs(text) {
            if !self.fits(paragraph) {
                flush(&mut buffer, &mut pieces);
                pieces.extend(self.split_paragraph(paragraph));
                continue;
            }

            if buffer.is_empty() {
                buffer.push_str(paragraph);
                continue;
            }

            let candidate = format!("{}\n\n{}", buffer, paragraph);
            if self.fits(&candidate) {
                buffer = candidate;
            } else {
                flush(&mut buffer, &mut pieces);
                buffer.push_str(paragraph);
            }
        }
        flush(&mut buffer, &mut pieces);

        // Final pass: anything still over budget falls back to word groups.
        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .flat_map(|piece| {
                if self.fits(&piece) {
                    vec![piece]
                } else {
                    self.group(piece.split_whitespace(), " ")
                }
            })
            .enumerate()
            .map(|(index, text)| Chunk { index, text })
            .collect();

        debug!(
            "Chunked {} chars into {} chunks (budget {} tokens)",
            text.len(),
            chunks.len(),
            self.max_unit_size
        );

        chunks
    }

    /// Sentence-level split of an oversized paragraph, word groups below that
    fn split_paragraph(&self, paragraph: &str) -> Vec<String> {
        let mut units: Vec<String> = Vec::new();
        for sentence in split_sentences(paragraph) {
            if self.fits(sentence) {
                units.push(sentence.to_string());
            } else {
                units.extend(self.group(sentence.split_whitespace(), " "));
            }
        }
        self.group(units.iter().map(String::as_str), " ")
    }

    /// Greedily join units with `separator` while the result fits the budget
    ///
    /// A unit that alone exceeds the budget is emitted on its own.
    fn group<'a>(&self, units: impl Iterator<Item = &'a str>, separator: &str) -> Vec<String> {
        let mut groups = Vec::new();
        let mut buffer = String::new();

        for unit in units {
            if buffer.is_empty() {
                buffer.push_str(unit);
                continue;
            }
            let candidate = format!("{}{}{}", buffer, separator, unit);
            if self.fits(&candidate) {
                buffer = candidate;
            } else {
                groups.push(std::mem::take(&mut buffer));
                buffer.push_str(unit);
            }
        }
        if !buffer.is_empty() {
            groups.push(buffer);
        }

        groups
    }
}

fn flush(buffer: &mut String, pieces: &mut Vec<String>) {
    if !buffer.is_empty() {
        pieces.push(std::mem::take(buffer));
    }
}

/// Trimmed, non-empty paragraphs
fn split_paragraphs(text: &str) -> impl Iterator<Item = &str> {
    PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Trimmed, non-empty sentences
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for m in SENTENCE_END.find_iter(paragraph) {
        let sentence = paragraph[start..m.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = m.end();
    }

    let rest = paragraph[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }

    sentences
}

/// Join chunk texts the way the chunker separates paragraphs
pub fn join_chunks<'a>(chunks: impl IntoIterator<Item = &'a str>) -> String {
    chunks
        .into_iter()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n\n")
}
