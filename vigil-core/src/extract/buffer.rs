//! Growing text accumulator with a lossy truncation policy.

/// Maximum accumulated characters before truncation kicks in.
pub const MAX_BUFFER_CHARS: usize = 5_000;

/// Characters retained (from the tail) after a truncation.
pub const RETAIN_TAIL_CHARS: usize = 2_000;

/// Single growing text accumulator owned by the stream extractor.
///
/// Mutated only by `append` and by consume-on-extraction; the extractor is
/// the sole owner so reads never interleave with a pending append.
#[derive(Debug, Default)]
pub struct EventBuffer {
    text: String,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment, applying the truncation policy when the
    /// accumulated length exceeds [`MAX_BUFFER_CHARS`].
    ///
    /// Returns `true` when a truncation occurred. Truncation keeps the last
    /// [`RETAIN_TAIL_CHARS`] characters; an object whose opening brace fell
    /// before the retained window is lost, by policy, not by accident.
    pub fn append(&mut self, fragment: &str) -> bool {
        self.text.push_str(fragment);

        let char_count = self.text.chars().count();
        if char_count <= MAX_BUFFER_CHARS {
            return false;
        }

        // Cut on a char boundary so multi-byte text never splits mid-char.
        let keep_from = self
            .text
            .char_indices()
            .rev()
            .nth(RETAIN_TAIL_CHARS - 1)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        self.text.drain(..keep_from);
        true
    }

    /// Remove everything up to and including `end` (a byte index just past
    /// an extracted span). The remainder stays for the next scan pass.
    pub fn consume_through(&mut self, end: usize) {
        self.text.drain(..end);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len_chars(&self) -> usize {
        self.text.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_below_cap_keeps_everything() {
        let mut buf = EventBuffer::new();
        assert!(!buf.append("hello"));
        assert!(!buf.append(" world"));
        assert_eq!(buf.as_str(), "hello world");
    }

    #[test]
    fn append_over_cap_retains_tail() {
        let mut buf = EventBuffer::new();
        let big = "x".repeat(MAX_BUFFER_CHARS + 500);
        assert!(buf.append(&big));
        assert_eq!(buf.len_chars(), RETAIN_TAIL_CHARS);
    }

    #[test]
    fn truncation_is_char_boundary_safe() {
        let mut buf = EventBuffer::new();
        // Multi-byte chars throughout; drain must land on a boundary.
        let big = "é".repeat(MAX_BUFFER_CHARS + 10);
        assert!(buf.append(&big));
        assert_eq!(buf.len_chars(), RETAIN_TAIL_CHARS);
        assert!(buf.as_str().chars().all(|c| c == 'é'));
    }

    #[test]
    fn consume_through_drops_prefix() {
        let mut buf = EventBuffer::new();
        buf.append("abc{\"k\":1}rest");
        let end = buf.as_str().find('}').unwrap() + 1;
        buf.consume_through(end);
        assert_eq!(buf.as_str(), "rest");
    }
}
