/// One window over the source text, with `[start, end)` character offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkWindow {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// Splits text into overlapping character windows in document order.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
        }
    }

    /// Produce windows covering `[0, len)`. Empty input yields no windows.
    /// An overlap at or above the chunk size still makes forward progress,
    /// stepping by `max(1, chunk_size - overlap)`.
    pub fn chunk(&self, text: &str) -> Vec<ChunkWindow> {
        let chars: Vec<char> = text.chars().collect();
        if chars.is_empty() {
            return Vec::new();
        }

        let mut windows = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            windows.push(ChunkWindow {
                text: chars[start..end].iter().collect(),
                start,
                end,
            });

            if end >= chars.len() {
                break;
            }

            let next_start = end.saturating_sub(self.overlap);
            if next_start <= start {
                start += (self.chunk_size.saturating_sub(self.overlap)).max(1);
            } else {
                start = next_start;
            }
        }

        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        let chunker = Chunker::new(512, 100);
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn short_input_is_one_chunk() {
        let chunker = Chunker::new(512, 100);
        let windows = chunker.chunk("tiny");
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].text, "tiny");
        assert_eq!((windows[0].start, windows[0].end), (0, 4));
    }

    #[test]
    fn windows_overlap_and_cover_the_input() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunker = Chunker::new(10, 3);
        let windows = chunker.chunk(text);

        // Offsets are weakly increasing and the union covers [0, len).
        assert_eq!(windows[0].start, 0);
        assert_eq!(windows.last().unwrap().end, text.len());
        for pair in windows.windows(2) {
            assert!(pair[1].start <= pair[0].end, "no gaps between windows");
            assert!(pair[1].start > pair[0].start, "strict forward progress");
        }

        // Overlap is honored between consecutive windows.
        assert_eq!(windows[1].start, windows[0].end - 3);
    }

    #[test]
    fn oversized_overlap_still_terminates() {
        let text = "abcdefghij";
        for overlap in [5usize, 10, 50] {
            let chunker = Chunker::new(5, overlap);
            let windows = chunker.chunk(text);
            assert!(!windows.is_empty());
            assert_eq!(windows.last().unwrap().end, text.len());
            for pair in windows.windows(2) {
                assert!(pair[1].start > pair[0].start);
            }
        }
    }

    #[test]
    fn zero_overlap_tiles_exactly() {
        let text = "aaaaabbbbbccccc";
        let chunker = Chunker::new(5, 0);
        let windows = chunker.chunk(text);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].text, "aaaaa");
        assert_eq!(windows[1].text, "bbbbb");
        assert_eq!(windows[2].text, "ccccc");
        for (i, w) in windows.iter().enumerate() {
            assert_eq!(w.start, i * 5);
            assert_eq!(w.end, i * 5 + 5);
        }
    }

    #[test]
    fn multibyte_text_chunks_on_character_boundaries() {
        let text = "åäö".repeat(4);
        let chunker = Chunker::new(5, 1);
        let windows = chunker.chunk(&text);
        assert!(!windows.is_empty());
        // Every produced window is valid UTF-8 by construction; the
        // concatenated distinct spans rebuild the original characters.
        let rebuilt: String = windows
            .iter()
            .scan(0usize, |covered, w| {
                let fresh: String = w.text.chars().skip(covered.saturating_sub(w.start)).collect();
                *covered = (*covered).max(w.end);
                Some(fresh)
            })
            .collect();
        assert_eq!(rebuilt, text);
    }
}
