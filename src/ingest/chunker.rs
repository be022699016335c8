//! Overlapping text chunking.
//!
//! Splits extracted text into size-bounded segments using a prioritized
//! separator list: paragraph break, line break, sentence end, word
//! boundary, and finally a raw character split. The coarsest boundary is
//! tried first; finer ones are used only where a piece still exceeds the
//! size budget. Adjacent chunks share `overlap` characters.

/// Separator priority, coarsest first. The character split is implicit.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap: overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// Split text into ordered chunks. Empty or whitespace-only input
    /// yields an empty sequence, not an error.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut fragments = Vec::new();
        self.split_fragments(text, 0, &mut fragments);

        self.merge_fragments(fragments)
    }

    /// Recursively break `text` into fragments no larger than the budget,
    /// descending the separator list only for oversized pieces.
    fn split_fragments(&self, text: &str, level: usize, out: &mut Vec<String>) {
        if char_len(text) <= self.chunk_size {
            if !text.trim().is_empty() {
                out.push(text.to_string());
            }
            return;
        }

        if level >= SEPARATORS.len() {
            // Last resort: fixed-width character windows sized so the
            // merge step can still prepend the overlap tail.
            let step = (self.chunk_size - self.overlap).max(1);
            let chars: Vec<char> = text.chars().collect();
            let mut start = 0;
            while start < chars.len() {
                let end = (start + step).min(chars.len());
                let piece: String = chars[start..end].iter().collect();
                if !piece.trim().is_empty() {
                    out.push(piece);
                }
                start = end;
            }
            return;
        }

        let separator = SEPARATORS[level];
        if !text.contains(separator) {
            self.split_fragments(text, level + 1, out);
            return;
        }

        for part in text.split_inclusive(separator) {
            if char_len(part) <= self.chunk_size {
                if !part.trim().is_empty() {
                    out.push(part.to_string());
                }
            } else {
                self.split_fragments(part, level + 1, out);
            }
        }
    }

    /// Greedily pack fragments up to the size budget, carrying the overlap
    /// tail of each finished chunk into the next.
    fn merge_fragments(&self, fragments: Vec<String>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for fragment in fragments {
            if current.is_empty() || char_len(&current) + char_len(&fragment) <= self.chunk_size {
                current.push_str(&fragment);
                continue;
            }

            let finished = current.trim().to_string();
            let tail = overlap_tail(&finished, self.overlap);
            if !finished.is_empty() {
                chunks.push(finished);
            }
            current = tail;
            current.push_str(&fragment);
        }

        let finished = current.trim().to_string();
        if !finished.is_empty() {
            chunks.push(finished);
        }

        chunks
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(overlap);
    chars[start..].iter().collect()
}
