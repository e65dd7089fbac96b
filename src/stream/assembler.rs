//! Incremental decoding of a chunked chat-completion response body.
//!
//! Chunks arrive split at arbitrary byte boundaries. The assembler buffers
//! bytes until a full line is available, strips SSE framing, extracts
//! assistant text across the response shapes the common APIs emit, and
//! recovers JSON objects whose text was split across network reads.

use super::SharedReply;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

const SSE_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Matches a complete JSON object with up to two levels of nested braces,
/// enough for `choices[0].delta.content` payloads.
const OBJECT_PATTERN: &str = r"\{(?:[^{}]|\{(?:[^{}]|\{[^{}]*\})*\})*\}";

pub struct StreamAssembler {
    reply: SharedReply,
    /// Raw bytes of the trailing incomplete line.
    parse_buf: Vec<u8>,
    /// Text that failed to parse as a complete JSON object, retried on each
    /// new arrival.
    partial: String,
    object_re: Regex,
}

impl StreamAssembler {
    pub fn new(reply: SharedReply) -> Self {
        Self {
            reply,
            parse_buf: Vec::new(),
            partial: String::new(),
            object_re: Regex::new(OBJECT_PATTERN).expect("object pattern is valid"),
        }
    }

    /// Feeds one chunk from the response body.
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.reply.touch();
        self.parse_buf.extend_from_slice(chunk);
        while let Some(pos) = self.parse_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.parse_buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            self.process_line(&line);
        }
    }

    /// Flushes any buffered partial line and residual partial JSON, then
    /// finalizes the reply. Returns true if this call won the finalization.
    pub fn finish(&mut self) -> bool {
        if !self.parse_buf.is_empty() {
            let rest = String::from_utf8_lossy(&self.parse_buf).into_owned();
            self.parse_buf.clear();
            self.process_line(&rest);
        }
        self.scan_partial();
        self.reply.try_finalize()
    }

    fn process_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let payload = line.strip_prefix(SSE_PREFIX).unwrap_or(line);
        if payload == DONE_SENTINEL {
            return;
        }
        match serde_json::from_str::<Value>(payload) {
            Ok(value) => self.route(&value),
            Err(_) => {
                // Likely an object split across reads. Keep the fragment and
                // retry once more text arrives.
                self.partial.push_str(payload);
                self.scan_partial();
            }
        }
    }

    /// Pulls complete JSON objects out of the rolling partial buffer. Each
    /// recovered object goes through extraction exactly once.
    fn scan_partial(&mut self) {
        if self.partial.is_empty() {
            return;
        }
        let mut remaining = String::with_capacity(self.partial.len());
        let mut last_end = 0;
        let mut recovered = Vec::new();
        let partial = std::mem::take(&mut self.partial);
        for m in self.object_re.find_iter(&partial) {
            match serde_json::from_str::<Value>(m.as_str()) {
                Ok(value) => {
                    remaining.push_str(&partial[last_end..m.start()]);
                    last_end = m.end();
                    recovered.push(value);
                }
                Err(_) => {
                    // Balanced but still not valid JSON; leave it in place.
                }
            }
        }
        remaining.push_str(&partial[last_end..]);
        self.partial = remaining;
        for value in &recovered {
            debug!(len = value.to_string().len(), "recovered partial JSON object");
            self.route(value);
        }
    }

    fn route(&self, value: &Value) {
        if let Some(content) = extract_content(value) {
            self.reply.append(&content);
        }
    }
}

/// Extracts assistant text from a response document, trying the known shapes
/// in fixed priority order. The first non-null string field wins; documents
/// matching none of the shapes are skipped without error.
pub fn extract_content(value: &Value) -> Option<String> {
    let choice = value.get("choices").and_then(|c| c.get(0));
    if let Some(choice) = choice {
        if let Some(s) = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
        {
            return Some(s.to_string());
        }
        if let Some(s) = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
        {
            return Some(s.to_string());
        }
        if let Some(s) = choice.get("text").and_then(Value::as_str) {
            return Some(s.to_string());
        }
    }
    for key in ["text", "content", "completion", "response"] {
        if let Some(s) = value.get(key).and_then(Value::as_str) {
            return Some(s.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(chunks: &[&[u8]]) -> String {
        let reply = SharedReply::new();
        let mut assembler = StreamAssembler::new(reply.clone());
        for chunk in chunks {
            assembler.push_chunk(chunk);
        }
        assembler.finish();
        reply.snapshot()
    }

    #[tokio::test]
    async fn done_sentinel_is_inert() {
        let text = assemble(&[b"data: [DONE]\n\n"]);
        assert_eq!(text, "");
    }

    #[tokio::test]
    async fn extracts_delta_content() {
        let text = assemble(&[
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n",
            b"data: [DONE]\n",
        ]);
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn split_mid_prefix_and_mid_object() {
        let payload = b"data: {\"choices\":[{\"delta\":{\"content\":\"xy\"}}]}\ndata: [DONE]\n";
        // Split inside "data: " and inside the JSON object.
        let text = assemble(&[&payload[..3], &payload[3..20], &payload[20..]]);
        assert_eq!(text, "xy");
    }

    #[tokio::test]
    async fn raw_json_lines_without_sse_prefix() {
        let text = assemble(&[b"{\"response\":\"plain\"}\n"]);
        assert_eq!(text, "plain");
    }

    #[tokio::test]
    async fn extraction_priority_order() {
        let delta_and_text: Value = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"delta"},"text":"text"}],"content":"top"}"#,
        )
        .unwrap();
        assert_eq!(extract_content(&delta_and_text).unwrap(), "delta");

        let message: Value =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"X"}}]}"#).unwrap();
        assert_eq!(extract_content(&message).unwrap(), "X");

        let completion_style: Value =
            serde_json::from_str(r#"{"choices":[{"text":"legacy"}]}"#).unwrap();
        assert_eq!(extract_content(&completion_style).unwrap(), "legacy");

        let top_level: Value = serde_json::from_str(r#"{"completion":"claude"}"#).unwrap();
        assert_eq!(extract_content(&top_level).unwrap(), "claude");

        let null_delta: Value =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":null}}],"text":"fall"}"#)
                .unwrap();
        assert_eq!(extract_content(&null_delta).unwrap(), "fall");

        let nothing: Value = serde_json::from_str(r#"{"usage":{"tokens":3}}"#).unwrap();
        assert!(extract_content(&nothing).is_none());
    }

    #[tokio::test]
    async fn recovers_object_split_across_lines() {
        // The object arrives as two lines, neither of which parses alone.
        let text = assemble(&[b"{\"text\":\"hi\",\n", b"\"extra\":1}\n"]);
        assert_eq!(text, "hi");
    }

    #[tokio::test]
    async fn recovers_nested_object_from_line_fragments() {
        let text = assemble(&[
            b"data: {\"choices\":[{\"delta\"\n",
            b":{\"content\":\"deep\"}}]}\n",
        ]);
        assert_eq!(text, "deep");
    }

    #[tokio::test]
    async fn final_partial_line_flushed_on_finish() {
        // No trailing newline: the last frame only surfaces via finish().
        let text = assemble(&[b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}"]);
        assert_eq!(text, "end");
    }

    #[tokio::test]
    async fn garbage_lines_never_error() {
        let text = assemble(&[
            b"not json at all\n",
            b"data: also } broken {\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n",
        ]);
        assert!(text.contains("ok"));
    }
}
