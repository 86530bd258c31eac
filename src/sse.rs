//! SSE (Server-Sent Events) parsing for streaming chat completions.
//!
//! Handles byte buffering, UTF-8 conversion, line splitting (`\n` and
//! `\r\n`), and event assembly (multi-line `data:` until a blank line).
//! The provider decodes the JSON payloads and the `[DONE]` marker itself.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

/// A single parsed SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    /// A `data:` line with the prefix stripped.
    Data(String),
    /// An `event:` line with the event type.
    Event(String),
    /// An empty line (event boundary).
    Empty,
    /// A comment or unrecognized field, ignored during assembly.
    Comment(String),
}

/// An assembled SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub data: String,
    pub event: Option<String>,
}

fn parse_line(line: &str) -> SseLine {
    if line.is_empty() {
        return SseLine::Empty;
    }

    if let Some(data) = line.strip_prefix("data:") {
        let data = data.strip_prefix(' ').unwrap_or(data);
        return SseLine::Data(data.to_string());
    }

    if let Some(event) = line.strip_prefix("event:") {
        let event = event.strip_prefix(' ').unwrap_or(event);
        return SseLine::Event(event.to_string());
    }

    if let Some(comment) = line.strip_prefix(':') {
        let comment = comment.strip_prefix(' ').unwrap_or(comment);
        return SseLine::Comment(comment.to_string());
    }

    // Unknown field (id:, retry:, ...), treat as comment
    SseLine::Comment(line.to_string())
}

/// Stream adapter that splits a byte stream into SSE lines.
pub struct SseLineStream<S> {
    inner: S,
    buffer: String,
    done: bool,
}

impl<S> SseLineStream<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: String::new(),
            done: false,
        }
    }
}

impl<S, E> Stream for SseLineStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseLine, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(line_end) = self.buffer.find('\n') {
                let mut line = self.buffer[..line_end].to_string();
                self.buffer = self.buffer[line_end + 1..].to_string();

                if line.ends_with('\r') {
                    line.pop();
                }

                return Poll::Ready(Some(Ok(parse_line(&line))));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    if let Ok(text) = std::str::from_utf8(&bytes) {
                        self.buffer.push_str(text);
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.done = true;
                    if !self.buffer.is_empty() {
                        let line = std::mem::take(&mut self.buffer);
                        return Poll::Ready(Some(Ok(parse_line(&line))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[derive(Default)]
struct EventBuilder {
    data_lines: Vec<String>,
    event: Option<String>,
}

impl EventBuilder {
    fn push_line(&mut self, line: SseLine) {
        match line {
            SseLine::Data(data) => self.data_lines.push(data),
            SseLine::Event(event) => self.event = Some(event),
            SseLine::Empty | SseLine::Comment(_) => {}
        }
    }

    fn has_content(&self) -> bool {
        !self.data_lines.is_empty() || self.event.is_some()
    }

    fn build(&mut self) -> SseEvent {
        let data = self.data_lines.join("\n");
        let event = self.event.take();
        self.data_lines.clear();
        SseEvent { data, event }
    }
}

/// Stream adapter that emits assembled SSE events.
pub struct SseEventStream<S> {
    inner: SseLineStream<S>,
    builder: EventBuilder,
    done: bool,
}

impl<S> SseEventStream<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner: SseLineStream::new(inner),
            builder: EventBuilder::default(),
            done: false,
        }
    }
}

impl<S, E> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => match line {
                    SseLine::Empty => {
                        if self.builder.has_content() {
                            return Poll::Ready(Some(Ok(self.builder.build())));
                        }
                    }
                    SseLine::Comment(_) => {}
                    other => self.builder.push_line(other),
                },
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    self.done = true;
                    if self.builder.has_content() {
                        return Poll::Ready(Some(Ok(self.builder.build())));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
