use crate::bounded;
use sentinel_core::{ChatMessage, LanguageModel, Query};
use std::sync::Arc;
use std::time::Duration;

pub const REPHRASE_MAX_TOKENS: u32 = 100;
const LABEL: &str = "rephrased query:";

const SYSTEM_PROMPT: &str = "You optimize search queries. Rewrite the user's query so it \
retrieves better web results while keeping its original intent.";

#[derive(Clone)]
pub struct QueryRephraser {
    model: Arc<dyn LanguageModel>,
    temperature: f32,
    timeout: Duration,
}

impl QueryRephraser {
    pub fn new(model: Arc<dyn LanguageModel>, temperature: f32, timeout: Duration) -> Self {
        Self {
            model,
            temperature,
            timeout,
        }
    }

    pub fn messages(query: &Query, chat_context: &str) -> Vec<ChatMessage> {
        let user = format!(
            "Original Query: {query}\n\n\
             Chat History:\n{chat_context}\n\n\
             Instructions:\n\
             1. Rephrase the query for clarity and search effectiveness.\n\
             2. Keep the original intent and the context of the conversation.\n\
             3. Be concise.\n\n\
             Answer in exactly this format:\n\
             Rephrased Query: [rephrased query]"
        );
        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
    }

    /// A fresh rewrite of `query`; the original is returned whenever no usable rewrite comes back.
    pub async fn rephrase(&self, query: &Query, chat_context: &str) -> Query {
        let messages = Self::messages(query, chat_context);
        match bounded(
            self.timeout,
            self.model
                .generate(&messages, REPHRASE_MAX_TOKENS, self.temperature),
        )
        .await
        {
            Ok(reply) => match parse_rephrased(&reply) {
                Some(q) => {
                    tracing::info!(from = %query, to = %q, "query rephrased");
                    Query::new(q)
                }
                None => {
                    tracing::debug!(reply = %reply, "no rephrased query in reply; keeping original");
                    query.clone()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "rephrase failed; keeping original query");
                query.clone()
            }
        }
    }
}

/// First line after the `Rephrased Query:` label, without surrounding quotes.
pub fn parse_rephrased(reply: &str) -> Option<String> {
    let at = reply.char_indices().map(|(i, _)| i).find(|&i| {
        reply
            .get(i..i + LABEL.len())
            .is_some_and(|w| w.eq_ignore_ascii_case(LABEL))
    })?;
    let rest = &reply[at + LABEL.len()..];
    let line = rest.trim_start().lines().next().unwrap_or("");
    let q = line
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '[' || c == ']' || c == '*')
        .trim();
    (!q.is_empty()).then(|| q.to_string())
}
