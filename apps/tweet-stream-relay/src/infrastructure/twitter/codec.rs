//! Stream Codec Module
//!
//! Decodes the filtered stream's response body into records.
//!
//! The provider writes one JSON object per line, separated by `\r\n`, and
//! sends a bare `\r\n` as keep-alive roughly every 20 seconds. Transport
//! chunks do not have to line up with those boundaries, so the decoder
//! buffers partial input:
//!
//! - every complete line is parsed as one JSON value;
//! - a trailing fragment that is already a complete object or array is
//!   emitted immediately instead of waiting for its newline;
//! - a trailing fragment that can still become valid JSON is kept;
//! - anything else is discarded as a [`ParseError`].
//!
//! A fragment carried over from an earlier chunk is only re-parsed once it
//! ends in `}` or `]`, so a large record arriving in small pieces is parsed
//! a bounded number of times rather than once per chunk.

use crate::domain::streaming::StreamRecord;

/// Record decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Input is not valid JSON.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Buffered input grew past the record size limit.
    #[error("record exceeds {limit} bytes ({len} buffered)")]
    Oversized {
        /// Bytes buffered when the limit was hit.
        len: usize,
        /// Configured limit.
        limit: usize,
    },
}

/// Incremental decoder for the newline-delimited record stream.
#[derive(Debug)]
pub struct RecordDecoder {
    buffer: Vec<u8>,
    max_record_bytes: usize,
}

impl RecordDecoder {
    /// Create a decoder that buffers at most `max_record_bytes` per record.
    #[must_use]
    pub fn new(max_record_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_record_bytes: max_record_bytes.max(1),
        }
    }

    /// Feed one transport chunk and collect every outcome it completes.
    ///
    /// Keep-alive newlines produce no outcome at all.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamRecord, ParseError>> {
        let mut fresh = self.buffer.is_empty();
        let mut scan_from = self.buffer.len();
        self.buffer.extend_from_slice(chunk);
        let mut outcomes = Vec::new();

        while let Some(offset) = self.buffer[scan_from..].iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=scan_from + offset).collect();
            scan_from = 0;
            fresh = true;
            if let Some(outcome) = self.decode_line(&line) {
                outcomes.push(outcome);
            }
        }

        if let Some(outcome) = self.decode_fragment(fresh) {
            outcomes.push(outcome);
        }

        outcomes
    }

    /// Number of bytes waiting for more input.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial input, e.g. after the connection was lost.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    fn decode_line(&self, line: &[u8]) -> Option<Result<StreamRecord, ParseError>> {
        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.len() > self.max_record_bytes {
            return Some(Err(ParseError::Oversized {
                len: trimmed.len(),
                limit: self.max_record_bytes,
            }));
        }
        Some(decode_record(trimmed))
    }

    /// `fresh` is true when the fragment began inside the latest chunk.
    fn decode_fragment(&mut self, fresh: bool) -> Option<Result<StreamRecord, ParseError>> {
        let trimmed = self.buffer.trim_ascii();
        let Some(&last) = trimmed.last() else {
            self.buffer.clear();
            return None;
        };
        if !fresh && last != b'}' && last != b']' {
            return self.check_limit();
        }

        match serde_json::from_slice::<serde_json::Value>(trimmed) {
            // A bare number may still be missing digits.
            Ok(value) if value.is_number() => self.check_limit(),
            Ok(value) => {
                self.buffer.clear();
                Some(Ok(StreamRecord::new(value)))
            }
            Err(e) if e.is_eof() => self.check_limit(),
            Err(e) => {
                self.buffer.clear();
                Some(Err(ParseError::Json(e)))
            }
        }
    }

    fn check_limit(&mut self) -> Option<Result<StreamRecord, ParseError>> {
        if self.buffer.len() > self.max_record_bytes {
            let len = self.buffer.len();
            self.buffer.clear();
            return Some(Err(ParseError::Oversized {
                len,
                limit: self.max_record_bytes,
            }));
        }
        None
    }
}

/// Parse one complete record.
///
/// # Errors
///
/// Returns [`ParseError::Json`] if the bytes are not a single JSON value.
pub fn decode_record(bytes: &[u8]) -> Result<StreamRecord, ParseError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    Ok(StreamRecord::new(value))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn records(outcomes: Vec<Result<StreamRecord, ParseError>>) -> Vec<serde_json::Value> {
        outcomes
            .into_iter()
            .filter_map(Result::ok)
            .map(StreamRecord::into_payload)
            .collect()
    }

    #[test]
    fn whole_record_chunk_emits_once() {
        let mut decoder = RecordDecoder::new(1024);
        let outcomes = decoder.push(br#"{"data":{"id":"1","text":"hi"}}"#);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(
            records(outcomes),
            vec![json!({"data": {"id": "1", "text": "hi"}})]
        );
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn keep_alive_emits_nothing() {
        let mut decoder = RecordDecoder::new(1024);
        assert!(decoder.push(b"\r\n").is_empty());
        assert!(decoder.push(b"\r\n\r\n").is_empty());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn malformed_chunk_is_dropped_and_decoding_continues() {
        let mut decoder = RecordDecoder::new(1024);

        let outcomes = decoder.push(b"not json at all");
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Err(ParseError::Json(_))));
        assert_eq!(decoder.buffered(), 0);

        let outcomes = decoder.push(b"{\"a\":1}\r\n");
        assert_eq!(records(outcomes), vec![json!({"a": 1})]);
    }

    #[test]
    fn malformed_line_between_records() {
        let mut decoder = RecordDecoder::new(1024);
        let outcomes = decoder.push(b"{\"a\":1}\r\n{oops}\r\n{\"b\":2}\r\n");
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[1].is_err());
        assert_eq!(records(outcomes), vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn record_split_across_chunks() {
        let mut decoder = RecordDecoder::new(1024);
        assert!(decoder.push(b"{\"data\":{\"te").is_empty());
        assert!(decoder.buffered() > 0);
        let outcomes = decoder.push(b"xt\":\"split\"}}\r\n");
        assert_eq!(records(outcomes), vec![json!({"data": {"text": "split"}})]);
    }

    #[test]
    fn several_records_in_one_chunk() {
        let mut decoder = RecordDecoder::new(1024);
        let outcomes = decoder.push(b"{\"n\":1}\r\n{\"n\":2}\r\n{\"n\":3}");
        assert_eq!(
            records(outcomes),
            vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]
        );
    }

    #[test]
    fn carried_fragment_waits_for_a_closing_bracket() {
        let mut decoder = RecordDecoder::new(1024);
        assert!(decoder.push(b"{\"a\":1").is_empty());
        // Unparseable, but not re-parsed until it could be complete.
        assert!(decoder.push(b"x").is_empty());
        assert_eq!(decoder.buffered(), 7);

        let outcomes = decoder.push(b"}\r\n{\"b\":2}");
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], Err(ParseError::Json(_))));
        assert_eq!(records(outcomes), vec![json!({"b": 2})]);
    }

    #[test]
    fn large_record_in_small_chunks_emits_once() {
        let text = "x".repeat(256 * 1024);
        let body = serde_json::to_vec(&json!({"data": {"id": "1", "text": text}})).unwrap();
        let mut decoder = RecordDecoder::new(1024 * 1024);

        let mut seen = Vec::new();
        for chunk in body.chunks(16) {
            seen.extend(records(decoder.push(chunk)));
        }

        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["data"]["text"].as_str().map(str::len), Some(256 * 1024));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn trailing_number_waits_for_newline() {
        let mut decoder = RecordDecoder::new(1024);
        assert!(decoder.push(b"12").is_empty());
        let outcomes = decoder.push(b"3\n");
        assert_eq!(records(outcomes), vec![json!(123)]);
    }

    #[test]
    fn oversized_fragment_is_dropped() {
        let mut decoder = RecordDecoder::new(8);
        let outcomes = decoder.push(b"{\"text\":\"a very long record");
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Err(ParseError::Oversized { limit: 8, .. })));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn oversized_line_is_dropped() {
        let mut decoder = RecordDecoder::new(4);
        let outcomes = decoder.push(b"{\"a\":12345}\n{}\n");
        assert!(matches!(outcomes[0], Err(ParseError::Oversized { .. })));
        assert_eq!(records(outcomes), vec![json!({})]);
    }

    #[test]
    fn reset_discards_partial_input() {
        let mut decoder = RecordDecoder::new(1024);
        let _ = decoder.push(b"{\"partial\":");
        decoder.reset();
        assert_eq!(decoder.buffered(), 0);
        assert_eq!(records(decoder.push(b"{}\n")), vec![json!({})]);
    }

    #[test]
    fn decode_record_passes_payload_unmodified() {
        let payload = json!({
            "data": {"id": "7", "text": "vroom", "public_metrics": {"retweet_count": 3}, "author_id": "9"},
            "matching_rules": [{"id": "1", "tag": null}]
        });
        let bytes = serde_json::to_vec(&payload).unwrap();
        assert_eq!(decode_record(&bytes).unwrap().into_payload(), payload);
    }

    proptest! {
        #[test]
        fn garbage_never_blocks_the_next_record(garbage in "[^\n{}\\[\\]\"]{1,64}") {
            let mut decoder = RecordDecoder::new(4096);
            let _ = decoder.push(garbage.as_bytes());
            let _ = decoder.push(b"\r\n");
            let outcomes = decoder.push(b"{\"ok\":true}\r\n");
            prop_assert_eq!(records(outcomes), vec![json!({"ok": true})]);
        }

        #[test]
        fn any_chunking_yields_the_same_records(split in 1usize..40) {
            let body = b"{\"n\":1}\r\n\r\n{\"n\":2}\r\n{\"n\":3}\r\n";
            let mut decoder = RecordDecoder::new(4096);
            let mut seen = Vec::new();
            for chunk in body.chunks(split) {
                seen.extend(records(decoder.push(chunk)));
            }
            prop_assert_eq!(seen, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
        }
    }
}
