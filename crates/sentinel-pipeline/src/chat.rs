//! Turn handling: decide between a direct answer and web retrieval, then produce the reply.

use crate::orchestrator::RetrievalOrchestrator;
use crate::synthesize::AnswerSynthesizer;
use crate::{bounded, synthesis_failure_message, NO_RESULTS_MESSAGE};
use sentinel_core::{
    render_chat_history, ChatMessage, LanguageModel, Query, RankedResult, Result, RunOutcome,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const ROUTE_MAX_TOKENS: u32 = 10;
pub const KNOWLEDGE_MAX_TOKENS: u32 = 500;
pub const KNOWLEDGE_FAILURE_MESSAGE: &str =
    "I apologize, but I'm having trouble generating a response.";

const GREETINGS: [&str; 3] = ["hi", "hello", "hey"];
const ROUTE_PROMPT: &str = "Decide whether the query needs current information from the web or \
can be answered from general knowledge. Reply with exactly one word: web_search or knowledge_base.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    WebSearch,
    KnowledgeBase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatOutcome {
    Answered,
    NoResults,
    SynthesisFailed,
    Knowledge,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub route: Route,
    pub outcome: ChatOutcome,
    pub text: String,
    /// Ranked sources the answer was built from (web route only).
    pub documents: Vec<RankedResult>,
}

#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub only_web_search: bool,
    pub temperature: f32,
    pub target_count: usize,
    pub max_attempts: usize,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            only_web_search: false,
            temperature: 0.2,
            target_count: 3,
            max_attempts: 3,
        }
    }
}

pub struct ChatHandler {
    model: Arc<dyn LanguageModel>,
    orchestrator: Arc<RetrievalOrchestrator>,
    synthesizer: AnswerSynthesizer,
    timeout: Duration,
}

impl ChatHandler {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        orchestrator: Arc<RetrievalOrchestrator>,
        synthesizer: AnswerSynthesizer,
        timeout: Duration,
    ) -> Self {
        Self {
            model,
            orchestrator,
            synthesizer,
            timeout,
        }
    }

    pub async fn route(&self, message: &str, chat_context: &str) -> Route {
        if GREETINGS.contains(&message.trim().to_lowercase().as_str()) {
            return Route::KnowledgeBase;
        }
        let messages = vec![
            ChatMessage::system(ROUTE_PROMPT),
            ChatMessage::user(format!("Query: {message}\nChat history: {chat_context}")),
        ];
        match bounded(
            self.timeout,
            self.model.generate(&messages, ROUTE_MAX_TOKENS, 0.2),
        )
        .await
        {
            Ok(reply) if reply.to_lowercase().contains("web_search") => Route::WebSearch,
            Ok(_) => Route::KnowledgeBase,
            Err(e) => {
                tracing::warn!(error = %e, "routing failed; defaulting to web search");
                Route::WebSearch
            }
        }
    }

    async fn answer_directly(&self, message: &str, chat_context: &str, temperature: f32) -> String {
        let messages = vec![
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user(format!("{chat_context}\nUser: {message}")),
        ];
        match bounded(
            self.timeout,
            self.model
                .generate(&messages, KNOWLEDGE_MAX_TOKENS, temperature),
        )
        .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "direct answer failed");
                KNOWLEDGE_FAILURE_MESSAGE.to_string()
            }
        }
    }

    /// Produce the reply for one user turn. Only cancellation is returned as an error.
    pub async fn respond(
        &self,
        message: &str,
        history: &[ChatMessage],
        options: &ChatOptions,
        cancel: &CancellationToken,
    ) -> Result<ChatReply> {
        let chat_context = render_chat_history(history);
        let route = if options.only_web_search {
            Route::WebSearch
        } else {
            self.route(message, &chat_context).await
        };
        tracing::info!(?route, "message routed");

        if route == Route::KnowledgeBase {
            return Ok(ChatReply {
                route,
                outcome: ChatOutcome::Knowledge,
                text: self
                    .answer_directly(message, &chat_context, options.temperature)
                    .await,
                documents: Vec::new(),
            });
        }

        let outcome = self
            .orchestrator
            .run(
                &Query::new(message),
                &chat_context,
                options.target_count,
                options.max_attempts,
                cancel,
            )
            .await?;
        let input = match outcome {
            RunOutcome::Empty => {
                return Ok(ChatReply {
                    route,
                    outcome: ChatOutcome::NoResults,
                    text: NO_RESULTS_MESSAGE.to_string(),
                    documents: Vec::new(),
                })
            }
            RunOutcome::Ready(input) => input,
        };
        let documents = input.documents().to_vec();
        Ok(match self.synthesizer.synthesize(&input).await {
            Ok(text) => ChatReply {
                route,
                outcome: ChatOutcome::Answered,
                text,
                documents,
            },
            Err(e) => {
                tracing::error!(error = %e, "synthesis failed");
                ChatReply {
                    route,
                    outcome: ChatOutcome::SynthesisFailed,
                    text: synthesis_failure_message(&e),
                    documents,
                }
            }
        })
    }
}
