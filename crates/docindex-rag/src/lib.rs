//! Retrieval-augmented answering over indexed documents.

pub mod factory;
pub mod orchestrator;
pub mod prompt;

pub use factory::{chunker_from_settings, orchestrator_from_settings};
pub use orchestrator::{
    Answer, AnswerMode, AnswerStream, IngestOptions, IngestOutcome, QueryOptions, QueryResponse,
    RagOrchestrator, StreamEvent, NO_MATCH_RESPONSE,
};
