use serde::Deserialize;

/// One decoded unit from the wire: either an incremental piece of assistant
/// text or the end-of-stream sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Delta(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

enum LineAction {
    Skip,
    Done,
    Delta(String),
    /// A `data: ` line whose JSON payload did not parse. Mid-stream this
    /// means the transport split the frame before the full payload arrived.
    Incomplete,
}

fn classify_line(line: &str) -> LineAction {
    let line = line.strip_suffix('\r').unwrap_or(line);

    if line.is_empty() || line.starts_with(':') {
        return LineAction::Skip;
    }

    let payload = match line.strip_prefix("data: ") {
        Some(payload) => payload.trim(),
        None => return LineAction::Skip,
    };

    if payload == "[DONE]" {
        return LineAction::Done;
    }

    match serde_json::from_str::<ChunkPayload>(payload) {
        Ok(parsed) => {
            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content);
            match content {
                Some(text) if !text.is_empty() => LineAction::Delta(text),
                _ => LineAction::Skip,
            }
        }
        Err(_) => LineAction::Incomplete,
    }
}

/// Incremental decoder for SSE-style chat completion streams.
///
/// Bytes are buffered across chunk boundaries, so a frame, a line terminator
/// or a multi-byte character split by the transport never loses tokens. Only
/// complete `\n`-terminated lines are decoded as text; a `data: ` line whose
/// payload fails to parse is held back until more bytes arrive, and discarded
/// only once the stream is over.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been observed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one transport chunk and collect the frames it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        if self.done {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    /// Flush after the byte stream ends: a best-effort pass over whatever is
    /// still buffered, including a final unterminated line. Frames that still
    /// fail to parse are dropped; there are no more bytes coming.
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        if self.done {
            return Vec::new();
        }

        let mut frames = self.drain_lines(true);

        if !self.done && !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            let line = String::from_utf8_lossy(&rest);
            match classify_line(&line) {
                LineAction::Delta(text) => frames.push(StreamFrame::Delta(text)),
                LineAction::Done => {
                    self.done = true;
                    frames.push(StreamFrame::Done);
                }
                LineAction::Incomplete => {
                    tracing::debug!(len = rest.len(), "discarding unparseable residual frame");
                }
                LineAction::Skip => {}
            }
        }

        frames
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<StreamFrame> {
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line_bytes[..pos]).into_owned();

            match classify_line(&line) {
                LineAction::Skip => {}
                LineAction::Done => {
                    self.done = true;
                    self.buf.clear();
                    frames.push(StreamFrame::Done);
                    return frames;
                }
                LineAction::Delta(text) => frames.push(StreamFrame::Delta(text)),
                LineAction::Incomplete if !flush => {
                    // Put the raw line (newline included) back in front of the
                    // buffer and wait for the next chunk.
                    let mut rest = std::mem::take(&mut self.buf);
                    self.buf = line_bytes;
                    self.buf.append(&mut rest);
                    return frames;
                }
                LineAction::Incomplete => {
                    tracing::debug!(len = line_bytes.len(), "discarding unparseable residual frame");
                }
            }
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_frame(text: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":{}}}}}]}}\n",
            serde_json::to_string(text).unwrap()
        )
    }

    /// Run a full stream through the decoder with the given chunking and
    /// return the concatenated text plus whether the sentinel was seen.
    fn decode_chunked(chunks: &[&[u8]]) -> (String, bool) {
        let mut decoder = SseDecoder::new();
        let mut text = String::new();
        let mut done = false;
        for chunk in chunks {
            for frame in decoder.feed(chunk) {
                match frame {
                    StreamFrame::Delta(t) => text.push_str(&t),
                    StreamFrame::Done => done = true,
                }
            }
        }
        for frame in decoder.finish() {
            match frame {
                StreamFrame::Delta(t) => text.push_str(&t),
                StreamFrame::Done => done = true,
            }
        }
        (text, done)
    }

    #[test]
    fn single_frame_decodes() {
        let stream = format!("{}data: [DONE]\n", delta_frame("Hi"));
        let (text, done) = decode_chunked(&[stream.as_bytes()]);
        assert_eq!(text, "Hi");
        assert!(done);
    }

    #[test]
    fn chunking_never_changes_output() {
        let stream = format!(
            "{}{}{}data: [DONE]\n",
            delta_frame("Hello"),
            delta_frame(", "),
            delta_frame("wörld!")
        );
        let bytes = stream.as_bytes();
        let (expected, _) = decode_chunked(&[bytes]);
        assert_eq!(expected, "Hello, wörld!");

        // Every two-chunk split must produce identical output, including
        // splits inside the multi-byte character.
        for cut in 1..bytes.len() {
            let (text, done) = decode_chunked(&[&bytes[..cut], &bytes[cut..]]);
            assert_eq!(text, expected, "split at byte {}", cut);
            assert!(done, "split at byte {}", cut);
        }

        // One byte at a time.
        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        let (text, done) = decode_chunked(&singles);
        assert_eq!(text, expected);
        assert!(done);
    }

    #[test]
    fn split_frame_emits_exactly_one_fragment() {
        let frame = delta_frame("héllo there");
        let bytes = frame.as_bytes();
        for cut in 1..bytes.len() {
            let mut decoder = SseDecoder::new();
            let mut frames = decoder.feed(&bytes[..cut]);
            frames.extend(decoder.feed(&bytes[cut..]));
            frames.extend(decoder.finish());
            assert_eq!(
                frames,
                vec![StreamFrame::Delta("héllo there".to_string())],
                "split at byte {}",
                cut
            );
        }
    }

    #[test]
    fn sentinel_stops_decoding() {
        let stream = format!(
            "{}data: [DONE]\n{}garbage\n",
            delta_frame("before"),
            delta_frame("after")
        );
        let (text, done) = decode_chunked(&[stream.as_bytes()]);
        assert_eq!(text, "before");
        assert!(done);

        // Chunks fed after the sentinel are ignored too.
        let mut decoder = SseDecoder::new();
        decoder.feed(b"data: [DONE]\n");
        assert!(decoder.is_done());
        assert!(decoder.feed(delta_frame("late").as_bytes()).is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let plain = format!("{}{}data: [DONE]\n", delta_frame("a"), delta_frame("b"));
        let noisy = format!(
            ": keep-alive\n\n{}\r\n: another comment\n\n{}\ndata: [DONE]\n",
            delta_frame("a").trim_end(),
            delta_frame("b").trim_end()
        );
        assert_eq!(decode_chunked(&[plain.as_bytes()]), decode_chunked(&[noisy.as_bytes()]));
    }

    #[test]
    fn crlf_lines_decode() {
        let stream = "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\r\ndata: [DONE]\r\n";
        let (text, done) = decode_chunked(&[stream.as_bytes()]);
        assert_eq!(text, "ok");
        assert!(done);
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let stream = format!(
            "event: message\nid: 42\n{}data: [DONE]\n",
            delta_frame("x")
        );
        let (text, done) = decode_chunked(&[stream.as_bytes()]);
        assert_eq!(text, "x");
        assert!(done);
    }

    #[test]
    fn empty_delta_emits_nothing() {
        let stream = "data: {\"choices\":[{\"delta\":{}}]}\ndata: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\ndata: [DONE]\n";
        let (text, done) = decode_chunked(&[stream.as_bytes()]);
        assert_eq!(text, "");
        assert!(done);
    }

    #[test]
    fn finish_flushes_unterminated_final_frame() {
        // Stream ends without [DONE] and without a trailing newline.
        let frame = delta_frame("tail");
        let stream = frame.trim_end();
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(stream.as_bytes()).is_empty());
        assert_eq!(
            decoder.finish(),
            vec![StreamFrame::Delta("tail".to_string())]
        );
    }

    #[test]
    fn malformed_residual_is_discarded() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"choices\":[{\"del").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn held_back_line_is_retried_on_next_chunk() {
        // A payload torn right after the newline of the previous frame: the
        // partial line sits in the buffer until the rest arrives.
        let frame = delta_frame("whole");
        let bytes = frame.as_bytes();
        let mut decoder = SseDecoder::new();
        let mut frames = decoder.feed(&bytes[..10]);
        assert!(frames.is_empty());
        frames.extend(decoder.feed(&bytes[10..]));
        assert_eq!(frames, vec![StreamFrame::Delta("whole".to_string())]);
    }
}
