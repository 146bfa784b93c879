use crate::bounded;
use sentinel_core::{AssessedResult, CandidateResult, ChatMessage, LanguageModel, Query};
use std::sync::Arc;
use std::time::Duration;

pub const ASSESS_MAX_TOKENS: u32 = 300;
/// Characters of page text shown to the model.
pub const ASSESS_EXCERPT_CHARS: usize = 1000;

const SYSTEM_PROMPT: &str = "You are a news analysis assistant. Decide whether a document is \
relevant to the user's query and, when it is, write a detailed summary of it.";

/// Binary relevance judgement plus summary, one model call per candidate.
///
/// Fails closed: a model error, a timeout, or a reply without a recognisable
/// `Relevant: Yes` line all yield `relevant = false`. Nothing propagates.
#[derive(Clone)]
pub struct RelevanceAssessor {
    model: Arc<dyn LanguageModel>,
    temperature: f32,
    timeout: Duration,
}

impl RelevanceAssessor {
    pub fn new(model: Arc<dyn LanguageModel>, temperature: f32, timeout: Duration) -> Self {
        Self {
            model,
            temperature,
            timeout,
        }
    }

    pub fn messages(query: &Query, candidate: &CandidateResult) -> Vec<ChatMessage> {
        let excerpt: String = candidate
            .extracted_text
            .chars()
            .take(ASSESS_EXCERPT_CHARS)
            .collect();
        let user = format!(
            "Query: {query}\n\n\
             Document Title: {title}\n\
             Document Content:\n{excerpt}\n\n\
             Instructions:\n\
             1. Decide whether the document is relevant to the query.\n\
             2. If it is, summarize what is specific to this item: key facts and figures, dates, \
             named entities, reported metrics or changes, and the likely impact.\n\
             3. If it is not, say \"Not relevant\".\n\n\
             Answer in exactly this format:\n\
             Relevant: [Yes/No]\n\
             Summary: [detailed summary, or \"Not relevant\"]",
            title = candidate.title,
        );
        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
    }

    pub async fn assess(&self, query: &Query, candidate: CandidateResult) -> AssessedResult {
        let messages = Self::messages(query, &candidate);
        let reply = bounded(
            self.timeout,
            self.model
                .generate(&messages, ASSESS_MAX_TOKENS, self.temperature),
        )
        .await;
        let (relevant, summary) = match reply {
            Ok(text) => parse_verdict(&text),
            Err(e) => {
                tracing::warn!(url = %candidate.url, error = %e, "assessment failed; treating as not relevant");
                (false, None)
            }
        };
        tracing::debug!(url = %candidate.url, relevant, "assessed");
        AssessedResult {
            candidate,
            relevant,
            summary,
        }
    }
}

/// Parse `Relevant:` / `Summary:` lines.
///
/// Only a line whose label is `Relevant:` and whose value begins with `yes` counts as a
/// positive verdict (case-insensitive); an echoed `[Yes/No]` template does not. The summary
/// runs from the `Summary:` label to the end of the reply and is dropped unless the verdict
/// is positive.
pub fn parse_verdict(reply: &str) -> (bool, Option<String>) {
    let mut relevant = false;
    let mut summary: Option<String> = None;
    let mut lines = reply.lines();
    while let Some(line) = lines.next() {
        let line = line.trim().trim_start_matches(['*', '-', '#', ' ']);
        if let Some(v) = strip_label(line, "relevant:") {
            if !relevant {
                let v = v
                    .trim_matches(|c: char| c == '*' || c == '[' || c.is_whitespace())
                    .to_ascii_lowercase();
                relevant = v.starts_with("yes") && !v.starts_with("yes/no");
            }
        } else if let Some(v) = strip_label(line, "summary:") {
            let mut s = v.trim().to_string();
            for rest in lines.by_ref() {
                s.push('\n');
                s.push_str(rest);
            }
            summary = Some(s.trim().to_string());
            break;
        }
    }
    let summary = summary
        .filter(|_| relevant)
        .filter(|s| !s.is_empty() && !s.trim_matches('"').eq_ignore_ascii_case("not relevant"));
    (relevant, summary)
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    head.eq_ignore_ascii_case(label).then(|| &line[label.len()..])
}
