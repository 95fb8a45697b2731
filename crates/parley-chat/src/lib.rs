//! Chat engine for the Parley assistant client.
//!
//! Renders markdown-subset responses, decodes streamed answers, tracks the
//! conversation and routes each submission to the right backend.

pub mod backend;
pub mod conversation;
pub mod error;
pub mod markdown;
pub mod orchestrator;
pub mod router;
pub mod stream;
pub mod telemetry;
pub mod upload;

pub use backend::{BackendReply, ChatBackend, HttpBackend, QueryResponse};
pub use conversation::{ConversationLog, Exchange, SubmissionState};
pub use error::ChatError;
pub use orchestrator::{ChatEvent, ChatOrchestrator, UsageCounters};
pub use router::{Attachments, DocumentContext, Route};
pub use stream::{decode_stream, StreamDecoder, StreamEvent, StreamOutcome};
pub use telemetry::{InteractionSink, NullSink, RestTelemetry};
pub use upload::{DocumentStore, DocumentSummary, DocumentUpload};
