//! Terminal echo of a streaming answer.

use parley_chat::ChatEvent;
use tokio::sync::broadcast::error::RecvError;

/// Tracks how much of a streamed response has reached the terminal.
///
/// Deltas are echoed while they arrive contiguously. After a gap or a
/// lagged receiver the echo goes quiet, and the settled exchange supplies
/// the rest through [`remainder`](Self::remainder).
#[derive(Debug)]
pub struct StreamEcho {
    printed: usize,
    live: bool,
}

impl StreamEcho {
    /// Create a new echo with nothing printed.
    pub fn new() -> Self {
        Self {
            printed: 0,
            live: true,
        }
    }

    /// Whether received deltas are still being echoed.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Handle one received event, returning the text to print now.
    pub fn observe(&mut self, event: Result<ChatEvent, RecvError>) -> Option<String> {
        if !self.live {
            return None;
        }
        match event {
            Ok(ChatEvent::ResponseDelta { delta, offset, .. }) => {
                if offset != self.printed {
                    tracing::debug!(offset, printed = self.printed, "Stream echo out of step");
                    self.live = false;
                    return None;
                }
                self.printed += delta.len();
                Some(delta)
            }
            Ok(_) => None,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Stream echo lagged, printing on settle");
                self.live = false;
                None
            }
            Err(RecvError::Closed) => {
                self.live = false;
                None
            }
        }
    }

    /// The part of the settled response that has not been printed.
    pub fn remainder<'a>(&self, response_text: &'a str) -> &'a str {
        response_text.get(self.printed..).unwrap_or(response_text)
    }
}

impl Default for StreamEcho {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    fn delta(id: Uuid, text: &str, offset: usize) -> ChatEvent {
        ChatEvent::ResponseDelta {
            id,
            delta: text.to_string(),
            offset,
            html: String::new(),
        }
    }

    /// Send `words` as deltas, returning the full text.
    fn send_words(tx: &broadcast::Sender<ChatEvent>, id: Uuid, words: &[String], start: usize) -> String {
        let mut text = String::new();
        for word in words {
            let _ = tx.send(delta(id, word, start + text.len()));
            text.push_str(word);
        }
        text
    }

    #[test]
    fn test_contiguous_deltas_are_echoed() {
        let id = Uuid::new_v4();
        let mut echo = StreamEcho::new();
        assert_eq!(echo.observe(Ok(delta(id, "Hel", 0))).as_deref(), Some("Hel"));
        assert_eq!(echo.observe(Ok(delta(id, "lo", 3))).as_deref(), Some("lo"));
        assert!(echo.is_live());
        assert_eq!(echo.remainder("Hello"), "");
    }

    #[test]
    fn test_single_shot_answer_printed_on_settle() {
        let mut echo = StreamEcho::new();
        assert!(echo.observe(Ok(ChatEvent::ImageAttached)).is_none());
        assert_eq!(echo.remainder("A receipt"), "A receipt");
    }

    #[test]
    fn test_error_text_follows_partial_stream() {
        let id = Uuid::new_v4();
        let mut echo = StreamEcho::new();
        echo.observe(Ok(delta(id, "Partial", 0)));
        assert_eq!(
            echo.remainder("Partial\n\nConnection lost."),
            "\n\nConnection lost."
        );
    }

    #[test]
    fn test_gap_stops_echo() {
        let id = Uuid::new_v4();
        let mut echo = StreamEcho::new();
        echo.observe(Ok(delta(id, "ab", 0)));
        assert!(echo.observe(Ok(delta(id, "ef", 4))).is_none());
        assert!(!echo.is_live());
        assert!(echo.observe(Ok(delta(id, "gh", 6))).is_none());
        assert_eq!(echo.remainder("abcdefgh"), "cdefgh");
    }

    #[tokio::test]
    async fn test_lagged_receiver_prints_each_byte_once() {
        let id = Uuid::new_v4();
        let (tx, mut rx) = broadcast::channel(8);
        let mut echo = StreamEcho::new();
        let mut terminal = String::new();

        let head: Vec<String> = (0..3).map(|i| format!("w{} ", i)).collect();
        let mut full = send_words(&tx, id, &head, 0);
        for _ in 0..head.len() {
            if let Some(text) = echo.observe(rx.recv().await) {
                terminal.push_str(&text);
            }
        }

        // A burst larger than the channel
        let tail: Vec<String> = (3..40).map(|i| format!("w{} ", i)).collect();
        full.push_str(&send_words(&tx, id, &tail, full.len()));
        drop(tx);
        loop {
            match rx.recv().await {
                Err(RecvError::Closed) => break,
                event => {
                    if let Some(text) = echo.observe(event) {
                        terminal.push_str(&text);
                    }
                }
            }
        }

        assert!(!echo.is_live());
        terminal.push_str(echo.remainder(&full));
        assert_eq!(terminal, full);
    }
}
