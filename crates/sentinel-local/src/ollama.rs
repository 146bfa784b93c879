use serde::{Deserialize, Serialize};
use sentinel_core::{ChatMessage, Error, LanguageModel, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    id: String,
}

impl OllamaClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            client,
            base_url: base_url.into(),
            id: format!("ollama:{model}"),
            model,
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        // Opt-in: don't start calling localhost unless asked to.
        if !crate::env_bool("SENTINEL_OLLAMA_ENABLE") {
            return Err(Error::NotConfigured(
                "SENTINEL_OLLAMA_ENABLE is not set (or false)".to_string(),
            ));
        }
        let base_url =
            crate::env("SENTINEL_OLLAMA_BASE_URL").unwrap_or_else(|| "http://127.0.0.1:11434".to_string());
        let model = crate::env("SENTINEL_OLLAMA_MODEL").unwrap_or_else(|| "qwen2.5:3b-instruct".to_string());
        Ok(Self::new(client, base_url, model))
    }

    fn endpoint_chat(&self) -> String {
        format!("{}/api/chat", self.base_url.trim_end_matches('/'))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl LanguageModel for OllamaClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String> {
        let req = ChatRequest {
            model: self.model.clone(),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            stream: false,
            options: ChatOptions {
                num_predict: max_tokens,
                temperature,
            },
        };

        let resp = self
            .client
            .post(self.endpoint_chat())
            .timeout(Duration::from_secs(120))
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("ollama: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::ModelUnavailable(format!("ollama chat HTTP {status}")));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| Error::ModelUnavailable(format!("ollama: {e}")))?;
        Ok(parsed.message.content.trim().to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Clone, Serialize)]
struct ChatOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    message: WireMessage,
}
