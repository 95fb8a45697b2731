//! Conversation log and per-submission state machine.
//!
//! Submission lifecycle:
//! Idle -> Submitting -> Streaming -> Settled/Errored
//! Submitting -> Settled (single-shot backends)
//!
//! Every mutation of the pending exchange carries the generation of the
//! submission that created it; deliveries from older generations are dropped.

use chrono::{DateTime, Utc};
use parley_core::QueryType;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChatError;
use crate::markdown;

/// State of the current submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionState {
    Idle,
    Submitting,
    Streaming,
    Settled,
    Errored,
}

/// Validate that a submission state transition is allowed.
///
/// Valid transitions:
/// - Idle/Settled/Errored -> Submitting
/// - Submitting -> Streaming
/// - Submitting -> Settled (single-shot)
/// - Submitting/Streaming -> Errored
/// - Streaming -> Settled
/// - Settled/Errored -> Idle (new chat)
pub fn validate_transition(from: SubmissionState, to: SubmissionState) -> Result<(), ChatError> {
    use SubmissionState::*;

    let valid = matches!(
        (from, to),
        (Idle, Submitting)
            | (Settled, Submitting)
            | (Errored, Submitting)
            | (Submitting, Streaming)
            | (Submitting, Settled)
            | (Submitting, Errored)
            | (Streaming, Settled)
            | (Streaming, Errored)
            | (Settled, Idle)
            | (Errored, Idle)
    );

    if valid {
        Ok(())
    } else {
        Err(ChatError::InvalidTransition(from, to))
    }
}

/// One user turn and its (possibly still arriving) response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: Uuid,
    pub input_text: String,
    pub response_html: String,
    pub response_text: String,
    pub pending: bool,
    pub query_type: Option<QueryType>,
    pub error_flag: bool,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

impl Exchange {
    fn new(input_text: String, generation: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            input_text,
            response_html: String::new(),
            response_text: String::new(),
            pending: true,
            query_type: None,
            error_flag: false,
            generation,
            created_at: Utc::now(),
        }
    }

    fn owned_by(&self, generation: u64) -> bool {
        self.pending && self.generation == generation
    }
}

/// Ordered list of exchanges; at most the last one is pending.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    exchanges: Vec<Exchange>,
}

impl ConversationLog {
    /// Create a new, empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending exchange for `input_text` owned by `generation`.
    pub fn begin(&mut self, input_text: impl Into<String>, generation: u64) -> Result<Uuid, ChatError> {
        if self.pending().is_some() {
            return Err(ChatError::SubmissionInFlight);
        }
        let exchange = Exchange::new(input_text.into(), generation);
        let id = exchange.id;
        self.exchanges.push(exchange);
        Ok(id)
    }

    /// Append streamed text to the pending exchange.
    ///
    /// Returns `false` when the delivery is stale.
    pub fn apply_delta(&mut self, generation: u64, delta: &str, html: &str) -> bool {
        match self.owned_last(generation) {
            Some(exchange) => {
                exchange.response_text.push_str(delta);
                exchange.response_html = html.to_string();
                true
            }
            None => false,
        }
    }

    /// Finalize the pending exchange with the complete response.
    pub fn settle(
        &mut self,
        generation: u64,
        text: &str,
        html: &str,
        query_type: QueryType,
    ) -> bool {
        match self.owned_last(generation) {
            Some(exchange) => {
                exchange.response_text = text.to_string();
                exchange.response_html = html.to_string();
                exchange.query_type = Some(query_type);
                exchange.pending = false;
                true
            }
            None => false,
        }
    }

    /// Mark the pending exchange as failed, keeping any partial response and
    /// appending `message`.
    pub fn fail(&mut self, generation: u64, message: &str) -> bool {
        match self.owned_last(generation) {
            Some(exchange) => {
                if exchange.response_text.is_empty() {
                    exchange.response_text = message.to_string();
                } else {
                    exchange.response_text.push_str("\n\n");
                    exchange.response_text.push_str(message);
                }
                exchange.response_html = markdown::render(Some(exchange.response_text.as_str()));
                exchange.query_type = Some(QueryType::Error);
                exchange.error_flag = true;
                exchange.pending = false;
                true
            }
            None => false,
        }
    }

    /// Fail whatever exchange is pending, regardless of generation.
    ///
    /// Returns the generation that owned it.
    pub fn abort_pending(&mut self, message: &str) -> Option<u64> {
        let generation = self.pending()?.generation;
        self.fail(generation, message);
        Some(generation)
    }

    pub fn clear(&mut self) {
        self.exchanges.clear();
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    /// The last exchange, while it is still waiting for its response.
    pub fn pending(&self) -> Option<&Exchange> {
        self.exchanges.last().filter(|e| e.pending)
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    fn owned_last(&mut self, generation: u64) -> Option<&mut Exchange> {
        self.exchanges
            .last_mut()
            .filter(|e| e.owned_by(generation))
    }
}
