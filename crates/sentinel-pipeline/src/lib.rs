//! The retrieval-augmentation loop and the model-driven steps around it.
//!
//! Everything here talks to the outside world through the `sentinel-core` traits only, so the
//! whole loop runs against scripted collaborators in tests.

use sentinel_core::{Error, Result};
use std::future::Future;
use std::time::Duration;

pub mod assess;
pub mod chat;
pub mod gather;
pub mod orchestrator;
pub mod rephrase;
pub mod semantic;
pub mod synthesize;

pub use assess::RelevanceAssessor;
pub use chat::{ChatHandler, ChatOptions, ChatOutcome, ChatReply, Route};
pub use gather::{CandidateSource, SearchGatherer};
pub use orchestrator::{LoopProgress, LoopState, RetrievalOrchestrator};
pub use rephrase::QueryRephraser;
pub use semantic::SemanticRanker;
pub use synthesize::AnswerSynthesizer;

pub const NO_RESULTS_MESSAGE: &str = "No relevant content could be found for your query.";

/// Text shown in place of an answer when synthesis fails.
pub fn synthesis_failure_message(err: &Error) -> String {
    let reason = match err {
        Error::Synthesis(r) => r.clone(),
        other => other.to_string(),
    };
    format!("An error occurred while processing your request: {reason}")
}

/// Run `fut` under a deadline; elapsing maps to `Error::Timeout`.
pub(crate) async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(r) => r,
        Err(_) => Err(Error::Timeout(
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}
