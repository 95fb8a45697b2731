//! Chat orchestrator: owns the conversation and drives submissions through
//! routing, the backend, the stream decoder and telemetry.
//!
//! One submission is in flight at a time. Submitting again cancels the
//! previous one; its exchange is marked errored and any late deliveries are
//! discarded by generation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::Utc;
use parley_core::config::ChatConfig;
use parley_core::{InteractionRecord, InteractionType, QueryType, SessionRecord};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    BackendReply, ChatBackend, DocumentQuery, GeneralQuery, ImageQuery, QueryResponse,
};
use crate::conversation::{validate_transition, ConversationLog, Exchange, SubmissionState};
use crate::error::ChatError;
use crate::markdown;
use crate::router::{image_data_url, select_route, Attachments, DocumentContext, Route};
use crate::stream::{decode_stream, StreamEvent};
use crate::telemetry::{log_best_effort, InteractionSink};
use crate::upload::{DocumentStore, DocumentUpload};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications for whatever presents the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    ExchangeStarted { id: Uuid, input: String },
    /// `offset` is the byte position of `delta` within the response text, so
    /// a subscriber that lagged can tell which part it missed.
    ResponseDelta {
        id: Uuid,
        delta: String,
        offset: usize,
        html: String,
    },
    ExchangeSettled { id: Uuid, query_type: QueryType, html: String },
    ExchangeFailed { id: Uuid, message: String },
    ImageAttached,
    DocumentAccepted(DocumentContext),
    ConversationCleared,
}

/// Running totals for the current process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageCounters {
    pub queries: u64,
    pub errors: u64,
    pub tokens_used: u64,
    /// Seconds.
    pub total_response_time: f64,
    pub by_type: HashMap<QueryType, u64>,
}

impl UsageCounters {
    fn record(&mut self, completion: &Completion) {
        self.queries += 1;
        self.tokens_used += completion.tokens_used.unwrap_or(0);
        self.total_response_time += completion.response_time;
        *self.by_type.entry(completion.query_type).or_insert(0) += 1;
    }
}

/// Fully received answer, whichever route produced it.
#[derive(Debug, Clone)]
struct Completion {
    text: String,
    html: String,
    query_type: QueryType,
    context_summary: Option<String>,
    response_time: f64,
    tokens_used: Option<u64>,
    interaction_id: Option<String>,
    language: Option<String>,
}

impl Completion {
    fn from_reply(reply: BackendReply, route: Route, started: Instant) -> Self {
        Self {
            html: markdown::render(reply.response.as_deref()),
            text: reply.response.unwrap_or_default(),
            query_type: reply.query_type.unwrap_or_else(|| route.query_type()),
            context_summary: reply.context_summary,
            response_time: reply
                .response_time
                .unwrap_or_else(|| started.elapsed().as_secs_f64()),
            tokens_used: reply.tokens_used,
            interaction_id: reply.interaction_id,
            language: reply.language,
        }
    }
}

struct ChatState {
    log: ConversationLog,
    attachments: Attachments,
    submission: SubmissionState,
    generation: u64,
    in_flight: Option<CancellationToken>,
    context_summary: Option<String>,
    counters: UsageCounters,
    session_id: Option<String>,
}

/// Central coordinator for one conversation.
pub struct ChatOrchestrator {
    backend: Arc<dyn ChatBackend>,
    documents: Option<Arc<dyn DocumentStore>>,
    sink: Arc<dyn InteractionSink>,
    config: ChatConfig,
    user_id: String,
    state: Mutex<ChatState>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ChatOrchestrator {
    /// Create a new orchestrator with an empty conversation and no document
    /// store.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        sink: Arc<dyn InteractionSink>,
        config: ChatConfig,
        user_id: impl Into<String>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            documents: None,
            sink,
            config,
            user_id: user_id.into(),
            state: Mutex::new(ChatState {
                log: ConversationLog::new(),
                attachments: Attachments::default(),
                submission: SubmissionState::Idle,
                generation: 0,
                in_flight: None,
                context_summary: None,
                counters: UsageCounters::default(),
                session_id: None,
            }),
            event_tx,
        }
    }

    /// Enable document uploads through `store`.
    pub fn with_documents(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(store);
        self
    }

    /// Subscribe to conversation events from now on.
    ///
    /// A receiver that falls more than the channel capacity behind gets
    /// `Lagged`; delta offsets let it resynchronise from the settled exchange.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    /// Submit a message and wait for its exchange to settle.
    ///
    /// Backend failures do not surface as `Err`: they are attached to the
    /// returned exchange. `Err` means the message was rejected up front.
    pub async fn submit(&self, input: &str) -> Result<Exchange, ChatError> {
        let trimmed = input.trim();
        let question = if trimmed.is_empty() && self.lock_state()?.attachments.image.is_some() {
            self.config.image_prompt.as_str()
        } else {
            trimmed
        };
        if question.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if question.chars().count() > self.config.max_message_length {
            return Err(ChatError::MessageTooLong(self.config.max_message_length));
        }

        let (generation, id, route, image, document, cancel) = {
            let mut state = self.lock_state()?;
            self.abort_in_flight(&mut state);
            validate_transition(state.submission, SubmissionState::Submitting)?;

            state.generation += 1;
            let generation = state.generation;
            let id = state.log.begin(question, generation)?;
            let route = select_route(&state.attachments);
            let image = state.attachments.image.take();
            let document = state.attachments.document.clone();
            let cancel = CancellationToken::new();
            state.in_flight = Some(cancel.clone());
            state.submission = SubmissionState::Submitting;
            (generation, id, route, image, document, cancel)
        };

        info!(generation, route = ?route, "Submitting message");
        self.emit(ChatEvent::ExchangeStarted {
            id,
            input: question.to_string(),
        });

        let started = Instant::now();
        let result = match (route, image, document) {
            (Route::Image, Some(image), _) => {
                let request = ImageQuery {
                    prompt: question.to_string(),
                    user_id: self.user_id.clone(),
                    image,
                };
                let reply = self
                    .cancellable(&cancel, self.backend.query_image(&request))
                    .await;
                reply.map(|r| Completion::from_reply(r, route, started))
            }
            (Route::Document, _, Some(document)) => {
                let request = DocumentQuery {
                    question: question.to_string(),
                    user_id: self.user_id.clone(),
                    document_id: document.document_id,
                    document_name: document.name,
                };
                let reply = self
                    .cancellable(&cancel, self.backend.query_document(&request))
                    .await;
                reply.map(|r| Completion::from_reply(r, route, started))
            }
            _ => {
                let request = GeneralQuery {
                    question: question.to_string(),
                    user_id: self.user_id.clone(),
                    system_prompt: self.config.custom_prompt.clone(),
                };
                self.run_general(generation, id, &request, &cancel, started)
                    .await
            }
        };

        match result {
            Ok(completion) => self.settle(generation, id, question, completion).await,
            Err(e) => self.fail(generation, id, question, e).await,
        }
        self.snapshot(id)
    }

    /// Cancel the in-flight submission, if any.
    pub fn cancel(&self) -> Result<bool, ChatError> {
        let mut state = self.lock_state()?;
        Ok(self.abort_in_flight(&mut state))
    }

    /// Cancel anything in flight and clear the conversation, attachments and
    /// document context.
    pub async fn start_new_chat(&self) -> Result<(), ChatError> {
        {
            let mut state = self.lock_state()?;
            self.abort_in_flight(&mut state);
            if state.submission != SubmissionState::Idle {
                validate_transition(state.submission, SubmissionState::Idle)?;
            }
            // Anything still running belongs to an older generation now
            state.generation += 1;
            state.log.clear();
            state.attachments.clear();
            state.context_summary = None;
            state.submission = SubmissionState::Idle;
        }
        info!("Started new chat");
        self.emit(ChatEvent::ConversationCleared);

        let record = InteractionRecord::new(InteractionType::NewChat, self.user_id.clone());
        log_best_effort(self.sink.as_ref(), &record).await;
        Ok(())
    }

    /// Attach an image to the next submission.
    pub fn attach_image(&self, bytes: &[u8], mime: &str) -> Result<(), ChatError> {
        if bytes.is_empty() {
            return Err(ChatError::MissingAttachment("an image".to_string()));
        }
        let data_url = image_data_url(bytes, mime);
        self.lock_state()?.attachments.image = Some(data_url);
        debug!(bytes = bytes.len(), mime, "Image attached");
        self.emit(ChatEvent::ImageAttached);
        Ok(())
    }

    /// Upload a document and make it the context for later submissions.
    pub async fn upload_document(
        &self,
        upload: &DocumentUpload,
        department: &str,
    ) -> Result<DocumentContext, ChatError> {
        let store = self
            .documents
            .as_ref()
            .ok_or_else(|| ChatError::Config("document storage is not configured".to_string()))?;
        let document = store.upload(upload, department).await?;
        self.lock_state()?.attachments.document = Some(document.clone());
        self.emit(ChatEvent::DocumentAccepted(document.clone()));
        Ok(document)
    }

    /// Open a telemetry session. Returns its identifier.
    pub async fn begin_session(&self) -> Result<String, ChatError> {
        let session = SessionRecord {
            session_id: Uuid::new_v4().to_string(),
            user_id: Some(self.user_id.clone()),
            start_time: Utc::now(),
            end_time: None,
            user_agent: Some(parley_core::client_user_agent()),
        };
        self.lock_state()?.session_id = Some(session.session_id.clone());
        if let Err(e) = self.sink.start_session(&session).await {
            warn!(session_id = %session.session_id, error = %e, "Failed to record session start");
        }
        Ok(session.session_id)
    }

    /// Close the session opened by [`begin_session`](Self::begin_session).
    pub async fn end_session(&self) -> Result<(), ChatError> {
        let Some(session_id) = self.lock_state()?.session_id.take() else {
            return Ok(());
        };
        if let Err(e) = self.sink.end_session(&session_id, Utc::now()).await {
            warn!(session_id = %session_id, error = %e, "Failed to record session end");
        }
        Ok(())
    }

    /// Copy of the conversation so far, oldest first.
    pub fn exchanges(&self) -> Result<Vec<Exchange>, ChatError> {
        Ok(self.lock_state()?.log.exchanges().to_vec())
    }

    /// Whether a submission is in flight.
    pub fn is_loading(&self) -> bool {
        self.lock_state()
            .map(|state| state.in_flight.is_some())
            .unwrap_or(false)
    }

    pub fn submission_state(&self) -> Result<SubmissionState, ChatError> {
        Ok(self.lock_state()?.submission)
    }

    pub fn attachments(&self) -> Result<Attachments, ChatError> {
        Ok(self.lock_state()?.attachments.clone())
    }

    pub fn context_summary(&self) -> Result<Option<String>, ChatError> {
        Ok(self.lock_state()?.context_summary.clone())
    }

    /// Totals since the process started. A new chat does not reset them.
    pub fn usage(&self) -> Result<UsageCounters, ChatError> {
        Ok(self.lock_state()?.counters.clone())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn lock_state(&self) -> Result<MutexGuard<'_, ChatState>, ChatError> {
        self.state
            .lock()
            .map_err(|e| ChatError::Internal(format!("chat state lock poisoned: {}", e)))
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Cancel the in-flight submission and error its exchange.
    fn abort_in_flight(&self, state: &mut ChatState) -> bool {
        let Some(token) = state.in_flight.take() else {
            return false;
        };
        token.cancel();

        let message = ChatError::Cancelled.user_message();
        let aborted = state.log.pending().map(|e| e.id);
        if state.log.abort_pending(&message).is_some() {
            state.submission = SubmissionState::Errored;
            if let Some(id) = aborted {
                debug!(%id, "Aborted in-flight exchange");
                self.emit(ChatEvent::ExchangeFailed { id, message });
            }
        }
        true
    }

    async fn cancellable<F>(&self, cancel: &CancellationToken, request: F) -> Result<BackendReply, ChatError>
    where
        F: std::future::Future<Output = Result<BackendReply, ChatError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ChatError::Cancelled),
            reply = request => reply,
        }
    }

    async fn run_general(
        &self,
        generation: u64,
        id: Uuid,
        request: &GeneralQuery,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<Completion, ChatError> {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ChatError::Cancelled),
            response = self.backend.query(request) => response?,
        };

        let stream = match response {
            QueryResponse::Complete(reply) => {
                return Ok(Completion::from_reply(reply, Route::General, started))
            }
            QueryResponse::Stream(stream) => stream,
        };

        self.enter_streaming(generation)?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let apply = async {
            while let Some(event) = rx.recv().await {
                self.apply_stream_event(generation, id, event);
            }
        };
        let (decoded, ()) = tokio::join!(decode_stream(stream, tx, cancel), apply);
        let outcome = decoded?;

        Ok(Completion {
            response_time: outcome.response_time_secs(),
            text: outcome.text,
            html: outcome.html,
            query_type: QueryType::General,
            context_summary: None,
            tokens_used: outcome.metadata.tokens_used,
            interaction_id: outcome.metadata.interaction_id,
            language: outcome.metadata.language,
        })
    }

    fn enter_streaming(&self, generation: u64) -> Result<(), ChatError> {
        let mut state = self.lock_state()?;
        if state.generation != generation {
            return Err(ChatError::Cancelled);
        }
        validate_transition(state.submission, SubmissionState::Streaming)?;
        state.submission = SubmissionState::Streaming;
        Ok(())
    }

    fn apply_stream_event(&self, generation: u64, id: Uuid, event: StreamEvent) {
        let StreamEvent::Chunk { delta, html } = event else {
            return;
        };
        let applied = match self.lock_state() {
            Ok(mut state) => {
                let offset = state.log.pending().map_or(0, |e| e.response_text.len());
                state
                    .log
                    .apply_delta(generation, &delta, &html)
                    .then_some(offset)
            }
            Err(e) => {
                warn!(error = %e, "Dropping stream delta");
                None
            }
        };
        if let Some(offset) = applied {
            self.emit(ChatEvent::ResponseDelta {
                id,
                delta,
                offset,
                html,
            });
        }
    }

    async fn settle(&self, generation: u64, id: Uuid, question: &str, completion: Completion) {
        let settled = match self.lock_state() {
            Ok(mut state) => {
                let settled = state.log.settle(
                    generation,
                    &completion.text,
                    &completion.html,
                    completion.query_type,
                );
                if settled {
                    state.submission = SubmissionState::Settled;
                    state.in_flight = None;
                    if let Some(summary) = &completion.context_summary {
                        state.context_summary = Some(summary.clone());
                    }
                    state.counters.record(&completion);
                }
                settled
            }
            Err(e) => {
                warn!(error = %e, "Could not settle exchange");
                false
            }
        };
        if !settled {
            debug!(generation, "Discarding completion of superseded submission");
            return;
        }

        info!(
            generation,
            query_type = %completion.query_type,
            response_time = completion.response_time,
            "Exchange settled"
        );
        self.emit(ChatEvent::ExchangeSettled {
            id,
            query_type: completion.query_type,
            html: completion.html.clone(),
        });

        let mut record =
            InteractionRecord::new(completion.query_type.interaction_type(), self.user_id.clone());
        record.query = Some(question.to_string());
        record.response = Some(completion.text);
        record.response_time = Some(completion.response_time);
        record.tokens_used = completion.tokens_used;
        record.interaction_id = completion.interaction_id;
        record.language = completion.language;
        log_best_effort(self.sink.as_ref(), &record).await;
    }

    async fn fail(&self, generation: u64, id: Uuid, question: &str, error: ChatError) {
        let message = error.user_message();
        let failed = match self.lock_state() {
            Ok(mut state) => {
                let failed = state.log.fail(generation, &message);
                if failed {
                    state.submission = SubmissionState::Errored;
                    state.in_flight = None;
                    state.counters.errors += 1;
                }
                failed
            }
            Err(e) => {
                warn!(error = %e, "Could not fail exchange");
                false
            }
        };
        if !failed {
            return;
        }

        warn!(generation, error = %error, "Submission failed");
        self.emit(ChatEvent::ExchangeFailed {
            id,
            message: message.clone(),
        });

        if !matches!(error, ChatError::Cancelled) {
            let mut record = InteractionRecord::new(InteractionType::Error, self.user_id.clone());
            record.query = Some(question.to_string());
            record.response = Some(error.to_string());
            log_best_effort(self.sink.as_ref(), &record).await;
        }
    }

    fn snapshot(&self, id: Uuid) -> Result<Exchange, ChatError> {
        self.lock_state()?
            .log
            .exchanges()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            // Cleared by a new chat while in flight
            .ok_or(ChatError::Cancelled)
    }
}
