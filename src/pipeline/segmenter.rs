use regex::Regex;

use super::types::Segment;

/// Splits oversized text into ordered, boundary-respecting windows for
/// independent processing. Splitting is recursive through a priority of
/// semantic boundaries: heading lines, blank-line paragraphs, single lines,
/// and finally fixed-size character slices with overlap.
///
/// Pure and deterministic: no I/O, identical input yields identical output.
pub struct Segmenter {
    chunk_size: usize,
    overlap: usize,
    heading: Regex,
}

impl Segmenter {
    /// `chunk_size` and `overlap` are in characters. Overlap only applies to
    /// the hard-slice fallback; it must stay below `chunk_size` so every
    /// slice makes forward progress.
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            heading: Regex::new(r"(?m)^#{1,3}\s.*$").expect("heading pattern is valid"),
        }
    }

    /// Split `text` into ordered segments. Input at or below `chunk_size`
    /// comes back as a single unchanged segment.
    pub fn split(&self, text: &str) -> Vec<Segment> {
        self.recursive_split(text)
            .into_iter()
            .enumerate()
            .map(|(sequence_index, text)| Segment {
                text,
                sequence_index,
            })
            .collect()
    }

    fn recursive_split(&self, text: &str) -> Vec<String> {
        if char_len(text) <= self.chunk_size {
            return vec![text.to_string()];
        }

        // Level 1: heading boundaries (#, ##, ### at line start).
        let parts = self.split_keep_headings(text);
        if parts.len() < 2 {
            return self.split_by_separator(text, "\n\n");
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for part in parts {
            if part.is_empty() {
                continue;
            }

            if char_len(&current) + char_len(part) > self.chunk_size {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }

                // A single heading section larger than the budget descends
                // to paragraph boundaries.
                if char_len(part) > self.chunk_size {
                    chunks.extend(self.split_by_separator(part, "\n\n"));
                } else {
                    current = part.to_string();
                }
            } else {
                current.push_str(part);
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// Partition `text` so heading lines become standalone parts while every
    /// character of the input is preserved in order.
    fn split_keep_headings<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut parts = Vec::new();
        let mut cursor = 0;

        for m in self.heading.find_iter(text) {
            if m.start() > cursor {
                parts.push(&text[cursor..m.start()]);
            }
            parts.push(m.as_str());
            cursor = m.end();
        }
        if cursor < text.len() {
            parts.push(&text[cursor..]);
        }

        parts
    }

    /// Level 2/3: greedy accumulation over separator-delimited parts.
    /// Separators are re-appended between parts so concatenating the chunks
    /// reconstructs the input exactly.
    fn split_by_separator(&self, text: &str, separator: &str) -> Vec<String> {
        let parts: Vec<&str> = text.split(separator).collect();
        let mut chunks = Vec::new();
        let mut current = String::new();

        for (i, part) in parts.iter().enumerate() {
            let is_last = i + 1 == parts.len();
            let mut part_with_sep = part.to_string();
            if !is_last {
                part_with_sep.push_str(separator);
            }

            if char_len(&current) + char_len(&part_with_sep) > self.chunk_size {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }

                if char_len(&part_with_sep) > self.chunk_size {
                    if separator == "\n\n" {
                        // Paragraph too big — descend to line boundaries.
                        chunks.extend(self.split_by_separator(&part_with_sep, "\n"));
                    } else {
                        chunks.extend(self.hard_slice(&part_with_sep));
                    }
                } else {
                    current = part_with_sep;
                }
            } else {
                current.push_str(&part_with_sep);
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }

    /// Last resort: fixed-size character slices advancing by
    /// `chunk_size − overlap`, so adjacent windows share an overlap span for
    /// referential continuity.
    fn hard_slice(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = if self.chunk_size > self.overlap {
            self.chunk_size - self.overlap
        } else {
            self.chunk_size
        };

        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < chars.len() {
            let end = (offset + self.chunk_size).min(chars.len());
            chunks.push(chars[offset..end].iter().collect());
            offset += step;
        }

        chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
