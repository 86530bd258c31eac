//! Scripted backend for tests. No I/O.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::event::Event;

use super::{EventStream, TurnRequest};

/// Emits a fixed script of text fragments, then `done`.
///
/// Optionally yields a resumption handle first, fails mid-stream, or sleeps
/// between fragments (useful for cancellation tests).
#[derive(Debug, Clone)]
pub struct MockProvider {
    fragments: Vec<String>,
    handle: Option<String>,
    fail_after: Option<(usize, String)>,
    chunk_delay: Option<Duration>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::scripted(["ok"])
    }
}

impl MockProvider {
    /// Provider that emits the given fragments as text chunks.
    pub fn scripted<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            handle: None,
            fail_after: None,
            chunk_delay: None,
        }
    }

    /// Yield a resumption handle carrier before any text.
    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    /// Emit `error` after `count` fragments instead of finishing.
    pub fn failing_after(mut self, count: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some((count, message.into()));
        self
    }

    /// Sleep between fragments.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    pub(super) fn execute_turn(&self, _request: TurnRequest) -> EventStream {
        let script = self.clone();
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            if let Some(handle) = script.handle {
                if tx.send(Event::SessionId { id: handle }).await.is_err() {
                    return;
                }
            }

            let total = script.fragments.len();
            for (i, fragment) in script.fragments.into_iter().enumerate() {
                if let Some((count, message)) = &script.fail_after {
                    if i == *count {
                        let _ = tx.send(Event::error(message.clone())).await;
                        return;
                    }
                }
                if let Some(delay) = script.chunk_delay {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Event::text(fragment)).await.is_err() {
                    return;
                }
            }

            if let Some((count, message)) = script.fail_after {
                if count >= total {
                    let _ = tx.send(Event::error(message)).await;
                    return;
                }
            }

            let _ = tx.send(Event::Done).await;
        });

        Box::pin(ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn request() -> TurnRequest {
        TurnRequest {
            system_prompt: String::new(),
            history: Vec::new(),
            message: "hi".to_string(),
            resume_handle: None,
        }
    }

    #[tokio::test]
    async fn emits_fragments_then_done() {
        let provider = MockProvider::scripted(["a", "b"]);
        let events: Vec<_> = provider.execute_turn(request()).collect().await;
        assert_eq!(
            events,
            vec![Event::text("a"), Event::text("b"), Event::Done]
        );
    }

    #[tokio::test]
    async fn handle_carrier_comes_first() {
        let provider = MockProvider::scripted(["x"]).with_handle("h-1");
        let events: Vec<_> = provider.execute_turn(request()).collect().await;
        assert_eq!(
            events[0],
            Event::SessionId {
                id: "h-1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn failure_replaces_remaining_script() {
        let provider = MockProvider::scripted(["a", "b", "c"]).failing_after(1, "boom");
        let events: Vec<_> = provider.execute_turn(request()).collect().await;
        assert_eq!(events, vec![Event::text("a"), Event::error("boom")]);
    }

    #[tokio::test]
    async fn exactly_one_terminal_event() {
        let provider = MockProvider::scripted(["a"]);
        let events: Vec<_> = provider.execute_turn(request()).collect().await;
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1);
        assert!(events.last().unwrap().is_terminal());
    }
}
