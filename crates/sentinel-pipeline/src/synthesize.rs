use crate::bounded;
use sentinel_core::{
    ChatMessage, Error, LanguageModel, Result, SourceKind, SynthesisInput,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub const SYNTHESIS_MAX_TOKENS: u32 = 1000;

const SYSTEM_PROMPT: &str = "You are a helpful assistant. Write a comprehensive answer to the \
query from the search results below. For every document you use, cite its source, URL and title.";

#[derive(Debug, Serialize)]
struct Payload<'a> {
    query: &'a str,
    documents: Vec<PayloadDocument<'a>>,
}

#[derive(Debug, Serialize)]
struct PayloadDocument<'a> {
    title: &'a str,
    url: &'a str,
    source_kind: SourceKind,
    summary: Option<&'a str>,
    content: &'a str,
    similarity: f32,
}

/// Serialize the final query and ranked documents as the JSON payload sent to the model.
pub fn payload_json(input: &SynthesisInput) -> Result<String> {
    let payload = Payload {
        query: input.final_query().as_str(),
        documents: input
            .documents()
            .iter()
            .map(|d| {
                let c = &d.assessed.candidate;
                PayloadDocument {
                    title: &c.title,
                    url: &c.url,
                    source_kind: c.source_kind,
                    summary: d.assessed.summary.as_deref(),
                    content: &c.extracted_text,
                    similarity: d.similarity,
                }
            })
            .collect(),
    };
    serde_json::to_string_pretty(&payload).map_err(|e| Error::Synthesis(e.to_string()))
}

/// One model call, no retry.
#[derive(Clone)]
pub struct AnswerSynthesizer {
    model: Arc<dyn LanguageModel>,
    temperature: f32,
    timeout: Duration,
}

impl AnswerSynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, temperature: f32, timeout: Duration) -> Self {
        Self {
            model,
            temperature,
            timeout,
        }
    }

    pub async fn synthesize(&self, input: &SynthesisInput) -> Result<String> {
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(payload_json(input)?),
        ];
        let reply = bounded(
            self.timeout,
            self.model
                .generate(&messages, SYNTHESIS_MAX_TOKENS, self.temperature),
        )
        .await
        .map_err(|e| match e {
            Error::Synthesis(_) => e,
            other => Error::Synthesis(other.to_string()),
        })?;
        tracing::info!(
            documents = input.documents().len(),
            chars = reply.chars().count(),
            "answer synthesized"
        );
        Ok(reply)
    }
}
