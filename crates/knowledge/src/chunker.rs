//! Overlapping character windows.
//!
//! A window is at most `size` characters. Inside a window the split point is
//! moved back to the strongest separator found in its second half (paragraph,
//! line, sentence, then word), so chunks rarely cut a sentence in two. The
//! next window starts `overlap` characters before the previous one ended.

/// Separators in order of preference.
const SEPARATORS: &[&str] = &["\n\n", "\n", "。", "！", "？", ". ", "! ", "? ", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// `size` is clamped to at least 1 and `overlap` to below `size`.
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            overlap: overlap.min(size - 1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into trimmed, non-empty chunks in reading order.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < len {
            let hard_end = (start + self.size).min(len);
            let end = if hard_end == len {
                len
            } else {
                self.break_point(&chars, start, hard_end)
            };

            let piece: String = chars[start..end].iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                chunks.push(piece.to_string());
            }

            if end >= len {
                break;
            }
            let next = end.saturating_sub(self.overlap);
            start = if next > start { next } else { end };
        }
        chunks
    }

    fn break_point(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let min_end = start + self.size / 2;
        for sep in SEPARATORS {
            let sep: Vec<char> = sep.chars().collect();
            if hard_end < sep.len() {
                continue;
            }
            let mut pos = hard_end - sep.len();
            while pos >= min_end {
                if chars[pos..pos + sep.len()] == sep[..] {
                    return pos + sep.len();
                }
                if pos == 0 {
                    break;
                }
                pos -= 1;
            }
        }
        hard_end
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(500, 50)
    }
}
