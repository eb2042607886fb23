//! Incremental extraction of complete JSON-like objects from a fragmented
//! text stream.
//!
//! The remote model streams free text in arbitrary chunks: an object may be
//! split mid-field or mid-string, several objects may arrive concatenated
//! in one chunk, and prose or markdown fences may surround them. The
//! extractor is resumable across any number of `append` calls, never emits
//! the same object twice and never emits a truncated object.
//!
//! ## Scanner state
//!
//! Three pieces of state per span: brace `depth`, `in_string`, and a
//! one-shot `escaped` flag. Inside a string a backslash suppresses the
//! special meaning of exactly the next character, so `\\` does not escape
//! whatever follows it and `\"` does not terminate the string. Braces only
//! count outside strings; when `depth` returns to zero the span is complete.

pub mod buffer;

pub use buffer::EventBuffer;

/// Pulls complete candidate spans out of the [`EventBuffer`].
#[derive(Debug, Default)]
pub struct StreamExtractor {
    buffer: EventBuffer,
    truncations: u64,
}

impl StreamExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one inbound text fragment and return every complete candidate
    /// span it unlocked, in stream order.
    ///
    /// Candidates are fence-stripped but not parsed; parsing and validation
    /// belong to the alert normalizer. A partial span (no balancing brace
    /// yet) stays in the buffer verbatim for the next call.
    pub fn append(&mut self, fragment: &str) -> Vec<String> {
        if self.buffer.append(fragment) {
            self.truncations += 1;
            tracing::warn!(
                truncations = self.truncations,
                "event buffer over cap — truncated to tail"
            );
        }

        let mut candidates = Vec::new();
        loop {
            let text = self.buffer.as_str();
            let Some(start) = text.find('{') else {
                break;
            };
            match scan_balanced(&text[start..]) {
                Some(span_len) => {
                    let span = strip_code_fences(&text[start..start + span_len]).to_string();
                    self.buffer.consume_through(start + span_len);
                    candidates.push(span);
                }
                // Unbalanced — keep accumulating until the closing brace
                // arrives in a later fragment.
                None => break,
            }
        }
        candidates
    }

    /// How many lossy truncations the buffer has performed so far.
    pub fn truncations(&self) -> u64 {
        self.truncations
    }
}

/// Scan a slice that starts at `{` and return the byte length of the first
/// brace-balanced span, or `None` if the span is still incomplete.
fn scan_balanced(text: &str) -> Option<usize> {
    debug_assert!(text.starts_with('{'));

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                // This char was escaped; it has no special meaning, and the
                // escape is spent (a backslash here does not escape again).
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else {
            match ch {
                '"' => in_string = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx + ch.len_utf8());
                    }
                }
                _ => {}
            }
        }
    }
    None
}

/// Strip surrounding markdown code-fence markers (case-insensitive
/// language tag) from a candidate span. A span without fences passes
/// through untouched.
fn strip_code_fences(span: &str) -> &str {
    let mut s = span.trim();
    if let Some(rest) = s.strip_prefix("```") {
        // Drop the language tag (```json, ```JSON, ...) whatever its case.
        s = rest
            .trim_start_matches(|c: char| c.is_ascii_alphabetic())
            .trim_start();
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest.trim_end();
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    const STROKE: &str =
        r#"{"status":"CRITICAL","diagnosis":"Stroke","confidence":0.9,"symptoms":["droop"]}"#;
    const NORMAL: &str =
        r#"{"status":"NORMAL","diagnosis":"Normal","confidence":0.99,"symptoms":[]}"#;

    #[test]
    fn extracts_single_object_in_one_call() {
        let mut ex = StreamExtractor::new();
        let out = ex.append(STROKE);
        assert_eq!(out, vec![STROKE.to_string()]);
    }

    #[test]
    fn extracts_object_regardless_of_split_point() {
        // Every possible split of the payload across two calls must yield
        // exactly the same single candidate.
        for split in 1..STROKE.len() {
            if !STROKE.is_char_boundary(split) {
                continue;
            }
            let mut ex = StreamExtractor::new();
            let mut out = ex.append(&STROKE[..split]);
            out.extend(ex.append(&STROKE[split..]));
            assert_eq!(out, vec![STROKE.to_string()], "split at byte {split}");
        }
    }

    #[test]
    fn extracts_two_objects_in_stream_order_across_calls() {
        // First object split at an arbitrary offset, second in its own call.
        for split in [1, 10, STROKE.len() / 2, STROKE.len() - 1] {
            let mut ex = StreamExtractor::new();
            let mut out = ex.append(&STROKE[..split]);
            out.extend(ex.append(&STROKE[split..]));
            out.extend(ex.append(NORMAL));
            assert_eq!(out, vec![STROKE.to_string(), NORMAL.to_string()]);
        }
    }

    #[test]
    fn extracts_concatenated_objects_in_one_pass() {
        let mut ex = StreamExtractor::new();
        let out = ex.append(&format!("{STROKE}{NORMAL}"));
        assert_eq!(out, vec![STROKE.to_string(), NORMAL.to_string()]);
    }

    #[test]
    fn literal_braces_inside_strings_do_not_break_boundaries() {
        let span = r#"{"diagnosis":"pupil {left} dilated","status":"WARNING"}"#;
        let mut ex = StreamExtractor::new();
        assert_eq!(ex.append(span), vec![span.to_string()]);
    }

    #[test]
    fn escaped_quotes_and_backslashes_stay_inside_strings() {
        // "a\"b" holds an escaped quote; "c\\" ends with a literal backslash
        // whose escape must not leak onto the closing quote.
        let span = r#"{"a":"quote \" here","b":"trailing backslash \\","status":"NORMAL"}"#;
        let mut ex = StreamExtractor::new();
        assert_eq!(ex.append(span), vec![span.to_string()]);
    }

    #[test]
    fn braces_in_strings_survive_every_split_point() {
        let span = r#"{"note":"open { literal } brace","status":"NORMAL"}"#;
        for split in 1..span.len() {
            if !span.is_char_boundary(split) {
                continue;
            }
            let mut ex = StreamExtractor::new();
            let mut out = ex.append(&span[..split]);
            out.extend(ex.append(&span[split..]));
            assert_eq!(out, vec![span.to_string()], "split at byte {split}");
        }
    }

    #[test]
    fn prose_around_objects_is_skipped() {
        let mut ex = StreamExtractor::new();
        let out = ex.append(&format!("Assessment follows: {STROKE} end of report."));
        assert_eq!(out, vec![STROKE.to_string()]);
        // Trailing prose with no brace stays harmlessly in the buffer.
        assert!(ex.append("").is_empty());
    }

    #[test]
    fn fenced_object_is_extracted_exactly_once() {
        let mut ex = StreamExtractor::new();
        let fenced = format!("```json\n{STROKE}\n```");
        let out = ex.append(&fenced);
        assert_eq!(out, vec![STROKE.to_string()]);
        assert!(ex.append("").is_empty());
    }

    #[test]
    fn empty_input_after_exhaustion_emits_nothing() {
        let mut ex = StreamExtractor::new();
        assert_eq!(ex.append(STROKE).len(), 1);
        for _ in 0..5 {
            assert!(ex.append("").is_empty());
        }
    }

    #[test]
    fn object_lost_to_truncation_is_never_emitted() {
        let mut ex = StreamExtractor::new();
        // Opening brace, then enough string content to push it out of the
        // retained window before the object ever closes.
        let filler = "a".repeat(buffer::MAX_BUFFER_CHARS + 100);
        let out = ex.append(&format!("{{\"diagnosis\":\"{filler}"));
        assert!(out.is_empty());
        assert_eq!(ex.truncations(), 1);
        // The closing arrives, but the opening brace is long gone.
        assert!(ex.append("\"}").is_empty());
    }

    #[test]
    fn truncation_then_fresh_object_still_extracts() {
        let mut ex = StreamExtractor::new();
        let junk = "x".repeat(buffer::MAX_BUFFER_CHARS + 1_000);
        assert!(ex.append(&junk).is_empty());
        assert_eq!(ex.append(STROKE), vec![STROKE.to_string()]);
    }

    #[test]
    fn strip_code_fences_variants() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```JSON\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```Json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("{}"), "{}");
    }
}
