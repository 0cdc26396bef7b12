//! Incremental parsing of the chat response stream.
//!
//! The chat endpoint streams plain UTF-8 text in chunks cut at arbitrary
//! byte boundaries. Somewhere in the stream an evaluation payload may be
//! embedded between literal sentinel markers:
//!
//! ```text
//! ...answer text...__EVAL_START__{"score":8,"feedback":"good"}__EVAL_END__
//! ```
//!
//! Nothing aligns to chunk boundaries: a multi-byte character, a sentinel,
//! or the JSON payload can each be split across any number of chunks, so
//! both stages here carry state between `feed`/`push` calls and only emit
//! what is unambiguous so far.

use tracing::warn;

use crate::chatlog::EvalResult;

pub const EVAL_START: &str = "__EVAL_START__";
pub const EVAL_END: &str = "__EVAL_END__";

/// One decoded unit of the stream, ready to apply to a message.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Text(String),
    Eval(EvalResult),
}

/// Streaming UTF-8 decoder. An incomplete multi-byte sequence at the end of
/// a chunk is held until the next chunk completes it; truly invalid bytes
/// decode to U+FFFD instead of aborting the stream.
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    out.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(
                        &self.pending[consumed..consumed + valid_up_to],
                    ));
                    match err.error_len() {
                        // Garbage in the middle: substitute and keep going.
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            consumed += valid_up_to + bad;
                        }
                        // Truncated sequence at the end: wait for more bytes.
                        None => {
                            consumed += valid_up_to;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);
        out
    }

    /// Flush at end of stream. A dangling partial sequence decodes to U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            '\u{FFFD}'.to_string()
        }
    }
}

enum ExtractorMode {
    /// Scanning conversational text for `__EVAL_START__`.
    Text,
    /// Inside a payload, accumulating until `__EVAL_END__`.
    Payload,
}

/// State machine that splits the text stream into conversational fragments
/// and embedded evaluation payloads.
///
/// `carry` holds whatever cannot be classified yet: in text mode, a trailing
/// substring that might be the start of a sentinel; in payload mode, the
/// entire unterminated payload. Both survive across chunk boundaries.
pub struct EvalExtractor {
    mode: ExtractorMode,
    carry: String,
}

impl EvalExtractor {
    pub fn new() -> Self {
        Self {
            mode: ExtractorMode::Text,
            carry: String::new(),
        }
    }

    /// Consume one decoded chunk and return every item it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<StreamItem> {
        let mut items = Vec::new();
        self.carry.push_str(chunk);

        loop {
            match self.mode {
                ExtractorMode::Text => {
                    if let Some(at) = self.carry.find(EVAL_START) {
                        if at > 0 {
                            items.push(StreamItem::Text(self.carry[..at].to_string()));
                        }
                        self.carry.drain(..at + EVAL_START.len());
                        self.mode = ExtractorMode::Payload;
                    } else {
                        // Emit all text except a tail that could still grow
                        // into the start sentinel.
                        let held = trailing_prefix_len(&self.carry, EVAL_START);
                        let emit = self.carry.len() - held;
                        if emit > 0 {
                            let text: String = self.carry.drain(..emit).collect();
                            items.push(StreamItem::Text(text));
                        }
                        break;
                    }
                }
                ExtractorMode::Payload => {
                    if let Some(at) = self.carry.find(EVAL_END) {
                        let payload: String = self.carry.drain(..at).collect();
                        self.carry.drain(..EVAL_END.len());
                        self.mode = ExtractorMode::Text;
                        match serde_json::from_str::<EvalResult>(payload.trim()) {
                            Ok(eval) => items.push(StreamItem::Eval(eval)),
                            Err(err) => {
                                warn!(%err, payload_len = payload.len(),
                                    "discarding malformed evaluation payload");
                            }
                        }
                    } else {
                        // Unterminated payload: keep buffering.
                        break;
                    }
                }
            }
        }
        items
    }

    /// Flush at end of stream. Held-back text turns out to be literal; an
    /// unterminated payload is dropped like any other malformed one.
    pub fn finish(&mut self) -> Vec<StreamItem> {
        let mut items = Vec::new();
        match self.mode {
            ExtractorMode::Text => {
                if !self.carry.is_empty() {
                    items.push(StreamItem::Text(std::mem::take(&mut self.carry)));
                }
            }
            ExtractorMode::Payload => {
                warn!(payload_len = self.carry.len(),
                    "stream ended inside an evaluation payload, discarding");
                self.carry.clear();
                self.mode = ExtractorMode::Text;
            }
        }
        items
    }
}

/// Length of the longest proper suffix of `text` that is a prefix of
/// `marker`. The sentinels are ASCII, so any match lands on a char boundary.
fn trailing_prefix_len(text: &str, marker: &str) -> usize {
    let longest = marker.len().saturating_sub(1).min(text.len());
    for len in (1..=longest).rev() {
        let start = text.len() - len;
        if !text.is_char_boundary(start) {
            continue;
        }
        if marker.as_bytes().starts_with(&text.as_bytes()[start..]) {
            return len;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_text(items: &[StreamItem]) -> String {
        items
            .iter()
            .filter_map(|item| match item {
                StreamItem::Text(t) => Some(t.as_str()),
                StreamItem::Eval(_) => None,
            })
            .collect()
    }

    fn find_eval(items: &[StreamItem]) -> Option<&EvalResult> {
        items.iter().find_map(|item| match item {
            StreamItem::Eval(e) => Some(e),
            StreamItem::Text(_) => None,
        })
    }

    #[test]
    fn plain_chunks_accumulate() {
        let mut ex = EvalExtractor::new();
        let mut items = ex.push("Hello ");
        items.extend(ex.push("world"));
        items.extend(ex.finish());
        assert_eq!(collect_text(&items), "Hello world");
        assert!(find_eval(&items).is_none());
    }

    #[test]
    fn eval_in_single_chunk() {
        let mut ex = EvalExtractor::new();
        let mut items =
            ex.push("answer__EVAL_START__{\"score\":8,\"feedback\":\"good\"}__EVAL_END__");
        items.extend(ex.finish());

        assert_eq!(collect_text(&items), "answer");
        let eval = find_eval(&items).expect("evaluation should parse");
        assert_eq!(eval.score, 8.0);
        assert_eq!(eval.feedback, "good");
    }

    #[test]
    fn eval_split_across_many_chunks() {
        let chunks = [
            "ans",
            "wer__EVAL_ST",
            "ART__{\"score\":9,",
            "\"feedback\":\"ok\"}__EVAL_",
            "END__",
        ];
        let mut ex = EvalExtractor::new();
        let mut items = Vec::new();
        for chunk in chunks {
            items.extend(ex.push(chunk));
        }
        items.extend(ex.finish());

        assert_eq!(collect_text(&items), "answer");
        let eval = find_eval(&items).expect("payload buffered across chunks");
        assert_eq!(eval.score, 9.0);
        assert_eq!(eval.feedback, "ok");
    }

    #[test]
    fn sentinel_lookalike_is_plain_text() {
        let mut ex = EvalExtractor::new();
        let mut items = ex.push("a__EVAL_");
        // Looked like a sentinel prefix, turned out not to be.
        items.extend(ex.push("Xb"));
        items.extend(ex.finish());
        assert_eq!(collect_text(&items), "a__EVAL_Xb");
        assert!(find_eval(&items).is_none());
    }

    #[test]
    fn held_back_prefix_flushes_at_end_of_stream() {
        let mut ex = EvalExtractor::new();
        let mut items = ex.push("tail__EVAL_STAR");
        items.extend(ex.finish());
        assert_eq!(collect_text(&items), "tail__EVAL_STAR");
    }

    #[test]
    fn malformed_payload_is_dropped_but_text_survives() {
        let mut ex = EvalExtractor::new();
        let mut items = ex.push("answer__EVAL_START__{not json}__EVAL_END__");
        items.extend(ex.finish());
        assert_eq!(collect_text(&items), "answer");
        assert!(find_eval(&items).is_none());
    }

    #[test]
    fn unterminated_payload_is_dropped_at_end_of_stream() {
        let mut ex = EvalExtractor::new();
        let mut items = ex.push("answer__EVAL_START__{\"score\":8,");
        items.extend(ex.finish());
        assert_eq!(collect_text(&items), "answer");
        assert!(find_eval(&items).is_none());
    }

    #[test]
    fn text_after_end_sentinel_is_emitted() {
        let mut ex = EvalExtractor::new();
        let mut items = ex
            .push("x__EVAL_START__{\"score\":1,\"feedback\":\"f\"}__EVAL_END__\ntrailing");
        items.extend(ex.finish());
        assert_eq!(collect_text(&items), "x\ntrailing");
        assert!(find_eval(&items).is_some());
    }

    #[test]
    fn decoder_reassembles_split_multibyte_char() {
        let mut dec = Utf8Decoder::new();
        let bytes = "héllo".as_bytes();
        // Split in the middle of the two-byte 'é'.
        let first = dec.feed(&bytes[..2]);
        let second = dec.feed(&bytes[2..]);
        assert_eq!(first, "h");
        assert_eq!(second, "éllo");
        assert_eq!(dec.finish(), "");
    }

    #[test]
    fn decoder_substitutes_invalid_bytes() {
        let mut dec = Utf8Decoder::new();
        let out = dec.feed(&[b'a', 0xFF, b'b']);
        assert_eq!(out, "a\u{FFFD}b");
    }

    #[test]
    fn decoder_flushes_truncated_tail_as_replacement() {
        let mut dec = Utf8Decoder::new();
        assert_eq!(dec.feed(&[0xC3]), "");
        assert_eq!(dec.finish(), "\u{FFFD}");
    }
}
