use serde::Serialize;

use crate::utils::keywords::{has_chinese, KeywordExtractor};

/// Recursive separator-driven text splitter (§4.5 C5). Configuration is
/// the `ChunkingConfig` loaded from settings; the default separator list
/// there matches the order specified in the spec.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
}

/// One emitted chunk plus its derived metadata and its back-mapped
/// position in the preprocessed source text.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkOutput {
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub chunk_length: usize,
    pub has_chinese: bool,
    pub keywords: Vec<String>,
    pub start_char: usize,
    pub end_char: usize,
}

pub struct Chunker<'a> {
    config: &'a ChunkerConfig,
    keyword_extractor: &'a dyn KeywordExtractor,
}

impl<'a> Chunker<'a> {
    pub fn new(config: &'a ChunkerConfig, keyword_extractor: &'a dyn KeywordExtractor) -> Self {
        Self {
            config,
            keyword_extractor,
        }
    }

    pub fn chunk(&self, raw_text: &str) -> Vec<ChunkOutput> {
        let preprocessed = preprocess(raw_text);
        if preprocessed.is_empty() {
            return Vec::new();
        }

        let raw_chunks = split_recursive(
            &preprocessed,
            &self.config.separators,
            self.config.chunk_size,
            self.config.chunk_overlap,
        );

        let trimmed: Vec<String> = raw_chunks
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let positions = back_map_positions(&preprocessed, &trimmed, self.config.chunk_overlap);

        let total = trimmed.len();
        trimmed
            .into_iter()
            .zip(positions)
            .enumerate()
            .map(|(i, (content, (start, end)))| {
                let keywords = self.keyword_extractor.extract(&content, 5);
                ChunkOutput {
                    chunk_length: content.chars().count(),
                    has_chinese: has_chinese(&content),
                    keywords,
                    content,
                    chunk_index: i,
                    total_chunks: total,
                    start_char: start,
                    end_char: end,
                }
            })
            .collect()
    }
}

/// Collapse whitespace runs to a single space, normalize CRLF/CR to LF,
/// then trim (§4.5 "Preprocess").
fn preprocess(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(normalized.len());
    let mut last_was_space = false;
    for c in normalized.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }

    out.trim().to_string()
}

/// The recursive split of §4.5 step "Recursive split". `separators` is the
/// *remaining* separator list to try at this recursion depth — callers at
/// depth 0 pass the full configured list; a sub-split that falls inside
/// one part recurses with `separators[1:]` (the *tail*), exactly as the
/// source does, so progressively finer separators are tried without
/// retrying ones already exhausted.
fn split_recursive(
    text: &str,
    separators: &[String],
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.chars().count() <= chunk_size {
        return vec![text.to_string()];
    }

    for (idx, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            continue;
        }
        if !text.contains(separator.as_str()) {
            continue;
        }

        let parts: Vec<&str> = text.split(separator.as_str()).collect();
        if parts.len() <= 1 {
            continue;
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for part in parts {
            if part.is_empty() {
                continue;
            }

            let projected_len =
                current.chars().count() + separator.chars().count() + part.chars().count();

            if projected_len > chunk_size {
                if !current.is_empty() {
                    chunks.push(current.trim().to_string());
                    if chunk_overlap > 0 && current.chars().count() > chunk_overlap {
                        let tail = last_n_chars(&current, chunk_overlap);
                        current = format!("{tail}{separator}{part}");
                    } else {
                        current = part.to_string();
                    }
                } else {
                    let remaining_separators = &separators[idx + 1..];
                    let sub_chunks =
                        split_recursive(part, remaining_separators, chunk_size, chunk_overlap);
                    chunks.extend(sub_chunks);
                }
            } else if current.is_empty() {
                current = part.to_string();
            } else {
                current.push_str(separator);
                current.push_str(part);
            }
        }

        if !current.is_empty() {
            chunks.push(current.trim().to_string());
        }

        return chunks.into_iter().filter(|c| !c.trim().is_empty()).collect();
    }

    // No configured separator occurs in `text` at all: hard character split.
    hard_split(text, chunk_size, chunk_overlap)
}

fn hard_split(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = chunk_size.saturating_sub(chunk_overlap).max(1);

    let mut chunks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let end = (i + chunk_size).min(chars.len());
        let piece: String = chars[i..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        i += step;
    }
    chunks
}

fn last_n_chars(s: &str, n: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= n {
        s.to_string()
    } else {
        chars[chars.len() - n..].iter().collect()
    }
}

/// Position back-mapping (§4.5 "Position back-mapping"): for each chunk,
/// find its 0-based character offset in `source`, searching monotonically
/// from `max(prev_start + 1, prev_end - chunk_overlap)`. Falls back to
/// matching the first 50 characters, then to the running cursor.
fn back_map_positions(
    source: &str,
    chunks: &[String],
    chunk_overlap: usize,
) -> Vec<(usize, usize)> {
    let source_chars: Vec<char> = source.chars().collect();
    let mut positions = Vec::with_capacity(chunks.len());
    let mut search_start: usize = 0;

    for chunk in chunks {
        let chunk_chars: Vec<char> = chunk.chars().collect();
        if chunk_chars.is_empty() {
            positions.push((0, 0));
            continue;
        }

        let found = find_char_subsequence(&source_chars, &chunk_chars, search_start);

        let (start, end) = if let Some(start) = found {
            (start, start + chunk_chars.len())
        } else {
            let prefix_len = chunk_chars.len().min(50);
            let prefix = &chunk_chars[..prefix_len];
            if let Some(start) = find_char_subsequence(&source_chars, prefix, search_start) {
                (start, start + chunk_chars.len())
            } else {
                (search_start, search_start + chunk_chars.len())
            }
        };

        positions.push((start, end));
        search_start = (start + 1).max(end.saturating_sub(chunk_overlap));
    }

    positions
}

fn find_char_subsequence(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    if needle.len() > haystack.len() {
        return None;
    }
    for start in from..=haystack.len().saturating_sub(needle.len()) {
        if &haystack[start..start + needle.len()] == needle {
            return Some(start);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::keywords::DefaultKeywordExtractor;

    fn config() -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: vec![
                "\n\n".into(),
                "\n".into(),
                "。".into(),
                "；".into(),
                "，".into(),
                ".".into(),
                ";".into(),
                ",".into(),
                " ".into(),
                "".into(),
            ],
        }
    }

    #[test]
    fn splits_repeated_sentences_into_two_chunks() {
        let extractor = DefaultKeywordExtractor;
        let cfg = config();
        let chunker = Chunker::new(&cfg, &extractor);

        let text = "A。".repeat(600);
        let chunks = chunker.chunk(&text);

        assert_eq!(chunks.len(), 2);
        // Parts are single "A"s joined by "。", so the buffer always flushes
        // mid-separator, ending on the part ("A"), never on the separator.
        assert!(chunks[0].content.ends_with('A'));
        let overlap_tail = last_n_chars(&chunks[0].content, 200);
        assert!(chunks[1].content.starts_with(&overlap_tail[..overlap_tail.len().min(20)]));
    }

    #[test]
    fn chunk_index_is_dense() {
        let extractor = DefaultKeywordExtractor;
        let cfg = config();
        let chunker = Chunker::new(&cfg, &extractor);
        let text = "段落一。\n\n段落二。\n\n".repeat(100);
        let chunks = chunker.chunk(&text);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn chunk_length_never_exceeds_size_plus_overlap() {
        let extractor = DefaultKeywordExtractor;
        let cfg = config();
        let chunker = Chunker::new(&cfg, &extractor);
        let text = "word ".repeat(2000);
        let chunks = chunker.chunk(&text);
        for c in &chunks {
            assert!(c.chunk_length <= cfg.chunk_size + cfg.chunk_overlap);
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let extractor = DefaultKeywordExtractor;
        let cfg = config();
        let chunker = Chunker::new(&cfg, &extractor);
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\n  ").is_empty());
    }

    #[test]
    fn hard_splits_when_no_separator_present() {
        let extractor = DefaultKeywordExtractor;
        let cfg = ChunkerConfig {
            chunk_size: 10,
            chunk_overlap: 2,
            separators: vec!["\n\n".into()],
        };
        let chunker = Chunker::new(&cfg, &extractor);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunker.chunk(text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chunk_length <= 10);
        }
    }
}
