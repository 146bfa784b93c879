use serde::{Deserialize, Serialize};
use sentinel_core::{ChatMessage, Error, LanguageModel, Result};
use std::time::Duration;

/// Chat client for any endpoint speaking the OpenAI `chat/completions` shape
/// (Groq, Mistral, Hugging Face inference, self-hosted servers).
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
}

impl OpenAiCompatClient {
    pub fn new(
        client: reqwest::Client,
        id: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            id: id.into(),
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint_chat_completions(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiCompatClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let req = ChatCompletionsRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| Message {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens,
            temperature,
            stream: false,
        };

        let mut rb = self
            .client
            .post(self.endpoint_chat_completions())
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(k) = &self.api_key {
            rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
        }

        let resp = rb
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("{}: {e}", self.id)))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::ModelUnavailable(format!(
                "{}: chat.completions HTTP {status}",
                self.id
            )));
        }

        let parsed: ChatCompletionsResponse = resp
            .json()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("{}: {e}", self.id)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default().trim().to_string())
            .ok_or_else(|| Error::ModelUnavailable(format!("{}: no choices returned", self.id)))
    }
}

/// Model ids served by an OpenAI-compatible endpoint (`GET /v1/models`).
pub async fn list_models(
    client: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
) -> Result<Vec<String>> {
    let mut rb = client
        .get(format!("{}/v1/models", base_url.trim_end_matches('/')))
        .timeout(Duration::from_secs(15));
    if let Some(k) = api_key.filter(|k| !k.trim().is_empty()) {
        rb = rb.header(reqwest::header::AUTHORIZATION, format!("Bearer {k}"));
    }
    let resp = rb
        .send()
        .await
        .map_err(|e| Error::ModelUnavailable(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::ModelUnavailable(format!("models list HTTP {status}")));
    }
    let parsed: ModelsResponse = resp
        .json()
        .await
        .map_err(|e| Error::ModelUnavailable(e.to_string()))?;
    Ok(parsed.data.into_iter().map(|m| m.id).collect())
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}
