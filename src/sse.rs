//! Bounded server-sent-event parsing for the streaming relay path.
//!
//! Upstream providers emit `event:`/`data:` framed streams. The parser is
//! byte-bounded on both the line and the assembled event so a misbehaving
//! upstream cannot grow buffers without limit.

use futures_util::TryStreamExt;
use futures_util::stream::{self, BoxStream};
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;

use crate::error::{RelayError, Result};

#[derive(Clone, Copy, Debug)]
pub struct SseLimits {
    pub max_line_bytes: usize,
    pub max_event_bytes: usize,
}

impl Default for SseLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 256 * 1024,
            max_event_bytes: 4 * 1024 * 1024,
        }
    }
}

/// One parsed SSE frame. `event` is empty when the upstream sent bare
/// `data:` lines without an `event:` field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

async fn read_next_line_bytes_limited<R>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    if max_bytes == 0 {
        return Err(RelayError::InvalidResponse(
            "max_bytes must be > 0".to_string(),
        ));
    }

    out.clear();

    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(!out.is_empty());
        }

        let newline_pos = buf.iter().position(|b| *b == b'\n');
        let take_len = newline_pos.map(|pos| pos + 1).unwrap_or(buf.len());

        if out.len().saturating_add(take_len) > max_bytes {
            return Err(RelayError::InvalidResponse(format!(
                "SSE line exceeds max_line_bytes={max_bytes}"
            )));
        }

        out.extend_from_slice(&buf[..take_len]);
        reader.consume(take_len);

        if newline_pos.is_some() {
            return Ok(true);
        }
    }
}

struct FrameState {
    line_bytes: Vec<u8>,
    event: String,
    data: String,
}

impl FrameState {
    fn new() -> Self {
        Self {
            line_bytes: Vec::new(),
            event: String::new(),
            data: String::new(),
        }
    }

    fn take_frame(&mut self) -> SseFrame {
        SseFrame {
            event: std::mem::take(&mut self.event),
            data: std::mem::take(&mut self.data),
        }
    }
}

async fn read_next_frame<R>(
    reader: &mut R,
    state: &mut FrameState,
    limits: SseLimits,
) -> Result<Option<SseFrame>>
where
    R: AsyncBufRead + Unpin,
{
    if limits.max_event_bytes == 0 {
        return Err(RelayError::InvalidResponse(
            "max_event_bytes must be > 0".to_string(),
        ));
    }

    state.event.clear();
    state.data.clear();

    loop {
        let has_line =
            read_next_line_bytes_limited(reader, &mut state.line_bytes, limits.max_line_bytes)
                .await?;
        if !has_line {
            if state.data.is_empty() {
                return Ok(None);
            }
            return Ok(Some(state.take_frame()));
        }

        let line = std::str::from_utf8(&state.line_bytes)
            .map_err(|err| RelayError::InvalidResponse(format!("invalid SSE UTF-8: {err}")))?;
        let line = line.trim_end_matches(['\r', '\n']);

        if line.is_empty() {
            if state.data.is_empty() {
                state.event.clear();
                continue;
            }
            if state.data == "[DONE]" {
                return Ok(None);
            }
            return Ok(Some(state.take_frame()));
        }

        if let Some(rest) = line.strip_prefix("event:") {
            state.event = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.trim_start();
            let separator_bytes = usize::from(!state.data.is_empty());
            if state
                .data
                .len()
                .saturating_add(separator_bytes)
                .saturating_add(rest.len())
                > limits.max_event_bytes
            {
                return Err(RelayError::InvalidResponse(format!(
                    "SSE event exceeds max_event_bytes={}",
                    limits.max_event_bytes
                )));
            }
            if separator_bytes == 1 {
                state.data.push('\n');
            }
            state.data.push_str(rest);
        }
        // Comment lines (":keepalive") and unknown fields are ignored.
    }
}

pub fn sse_frame_stream_from_reader_with_limits<R>(
    reader: R,
    limits: SseLimits,
) -> BoxStream<'static, Result<SseFrame>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    Box::pin(stream::try_unfold(
        (reader, FrameState::new(), limits),
        |(mut reader, mut state, limits)| async move {
            match read_next_frame(&mut reader, &mut state, limits).await? {
                Some(frame) => Ok(Some((frame, (reader, state, limits)))),
                None => Ok(None),
            }
        },
    ))
}

pub fn sse_frame_stream_from_reader<R>(reader: R) -> BoxStream<'static, Result<SseFrame>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    sse_frame_stream_from_reader_with_limits(reader, SseLimits::default())
}

pub fn sse_frame_stream_from_response(
    response: reqwest::Response,
) -> BoxStream<'static, Result<SseFrame>> {
    let byte_stream = response.bytes_stream().map_err(std::io::Error::other);
    let reader = StreamReader::new(byte_stream);
    sse_frame_stream_from_reader(tokio::io::BufReader::new(reader))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use futures_util::stream;

    fn reader_for(sse: String) -> impl AsyncBufRead + Unpin + Send + 'static {
        let stream = stream::iter([Ok::<_, std::io::Error>(Bytes::from(sse))]);
        tokio::io::BufReader::new(StreamReader::new(stream))
    }

    #[tokio::test]
    async fn parses_named_events_and_bare_data() -> Result<()> {
        let sse = concat!(
            "event: message_start\n",
            "data: {\"hello\":1}\n\n",
            "data: line1\n",
            "data: line2\n\n",
            "data: [DONE]\n\n",
        );

        let mut frames = Vec::new();
        let mut stream = sse_frame_stream_from_reader(reader_for(sse.to_owned()));
        while let Some(item) = stream.next().await {
            frames.push(item?);
        }

        assert_eq!(
            frames,
            vec![
                SseFrame {
                    event: "message_start".to_string(),
                    data: "{\"hello\":1}".to_string(),
                },
                SseFrame {
                    event: String::new(),
                    data: "line1\nline2".to_string(),
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn event_name_does_not_leak_across_frames() -> Result<()> {
        let sse = concat!(
            "event: message_delta\n",
            "data: {\"a\":1}\n\n",
            "data: {\"b\":2}\n\n",
        );

        let mut stream = sse_frame_stream_from_reader(reader_for(sse.to_owned()));
        let first = stream.next().await.unwrap()?;
        let second = stream.next().await.unwrap()?;
        assert_eq!(first.event, "message_delta");
        assert_eq!(second.event, "");
        Ok(())
    }

    #[tokio::test]
    async fn rejects_lines_over_max_line_bytes() {
        let sse = format!("data: {}\n\n", "x".repeat(1024));
        let mut stream = sse_frame_stream_from_reader_with_limits(
            reader_for(sse),
            SseLimits {
                max_line_bytes: 64,
                max_event_bytes: 4096,
            },
        );

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("max_line_bytes"));
    }

    #[tokio::test]
    async fn rejects_events_over_max_event_bytes() {
        let sse = format!("data: {}\ndata: {}\n\n", "a".repeat(96), "b".repeat(96));
        let mut stream = sse_frame_stream_from_reader_with_limits(
            reader_for(sse),
            SseLimits {
                max_line_bytes: 4096,
                max_event_bytes: 128,
            },
        );

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("max_event_bytes"));
    }

    #[tokio::test]
    async fn ignores_comment_lines() -> Result<()> {
        let sse = concat!(": keepalive\n", "data: {\"x\":1}\n\n");
        let mut stream = sse_frame_stream_from_reader(reader_for(sse.to_owned()));
        let frame = stream.next().await.unwrap()?;
        assert_eq!(frame.data, "{\"x\":1}");
        assert!(stream.next().await.is_none());
        Ok(())
    }
}
