//! Language-model selection.
//!
//! Provider identity is resolved once, at configuration time, into a single
//! `Arc<dyn LanguageModel>`. Unknown identifiers and missing credentials fail here, before any
//! network activity. The list of models served by a custom endpoint is an explicit
//! [`ModelCatalog`] value that callers refresh on purpose.

use crate::ollama::OllamaClient;
use crate::openai_compat::{self, OpenAiCompatClient};
use sentinel_core::{Error, LanguageModel, Result};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

pub const BUILTIN_MODELS: [&str; 3] = ["huggingface", "groq", "mistral"];
pub const FALLBACK_DEFAULT_MODEL: &str = "groq";

const HF_MODEL: &str = "mistralai/Mistral-Small-Instruct-2409";
const GROQ_BASE_URL: &str = "https://api.groq.com/openai";
const GROQ_MODEL: &str = "llama-3.1-70b-versatile";
const MISTRAL_BASE_URL: &str = "https://api.mistral.ai";
const MISTRAL_MODEL: &str = "open-mistral-nemo";

/// Credentials and endpoints for every provider. Values are never logged.
#[derive(Clone, Default)]
pub struct ProviderSettings {
    pub hf_token: Option<String>,
    pub groq_api_key: Option<String>,
    pub mistral_api_key: Option<String>,
    pub custom_llm_base_url: Option<String>,
    pub custom_llm_key: Option<String>,
    pub custom_llm_default_model: Option<String>,
    /// Set only when Ollama is explicitly enabled.
    pub ollama_base_url: Option<String>,
    pub ollama_model: Option<String>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("configured", &self.configured())
            .finish()
    }
}

/// Presence flags only; safe to print.
#[derive(Debug, Clone, Serialize)]
pub struct ConfiguredProviders {
    pub huggingface: bool,
    pub groq: bool,
    pub mistral: bool,
    pub custom_llm: bool,
    pub ollama: bool,
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        let ollama_base_url = crate::env_bool("SENTINEL_OLLAMA_ENABLE").then(|| {
            crate::env("SENTINEL_OLLAMA_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string())
        });
        Self {
            hf_token: crate::env_any(&["SENTINEL_HF_TOKEN", "HF_TOKEN"]),
            groq_api_key: crate::env_any(&["SENTINEL_GROQ_API_KEY", "GROQ_API_KEY"]),
            mistral_api_key: crate::env_any(&["SENTINEL_MISTRAL_API_KEY", "MISTRAL_API_KEY"]),
            custom_llm_base_url: crate::env_any(&["SENTINEL_CUSTOM_LLM", "CUSTOM_LLM"]),
            custom_llm_key: crate::env_any(&["SENTINEL_CUSTOM_LLM_KEY", "CUSTOM_LLM_KEY"]),
            custom_llm_default_model: crate::env_any(&[
                "SENTINEL_CUSTOM_LLM_DEFAULT_MODEL",
                "CUSTOM_LLM_DEFAULT_MODEL",
            ]),
            ollama_base_url,
            ollama_model: crate::env("SENTINEL_OLLAMA_MODEL"),
        }
    }

    pub fn configured(&self) -> ConfiguredProviders {
        ConfiguredProviders {
            huggingface: self.hf_token.is_some(),
            groq: self.groq_api_key.is_some(),
            mistral: self.mistral_api_key.is_some(),
            custom_llm: self.custom_llm_base_url.is_some(),
            ollama: self.ollama_base_url.is_some(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelCatalog {
    custom_models: Vec<String>,
}

impl ModelCatalog {
    pub fn with_custom_models(custom_models: Vec<String>) -> Self {
        Self { custom_models }
    }

    pub fn custom_models(&self) -> &[String] {
        &self.custom_models
    }

    /// Re-read the model list from the custom endpoint. No-op when none is configured.
    ///
    /// On failure the previous list is kept and the error returned to the caller.
    pub async fn refresh_custom_models(
        &mut self,
        client: &reqwest::Client,
        settings: &ProviderSettings,
    ) -> Result<()> {
        let Some(base) = settings.custom_llm_base_url.as_deref() else {
            self.custom_models.clear();
            return Ok(());
        };
        let ids = openai_compat::list_models(client, base, settings.custom_llm_key.as_deref()).await?;
        tracing::info!(count = ids.len(), "custom models refreshed");
        self.custom_models = ids;
        Ok(())
    }

    pub fn available(&self, settings: &ProviderSettings) -> Vec<String> {
        let mut out: Vec<String> = BUILTIN_MODELS.iter().map(|s| s.to_string()).collect();
        if settings.ollama_base_url.is_some() {
            out.push("ollama".to_string());
        }
        for m in &self.custom_models {
            if !out.contains(m) {
                out.push(m.clone());
            }
        }
        out
    }

    /// The custom default when it is actually served, otherwise `groq`.
    pub fn default_model(&self, settings: &ProviderSettings) -> String {
        settings
            .custom_llm_default_model
            .as_ref()
            .filter(|m| self.available(settings).contains(m))
            .cloned()
            .unwrap_or_else(|| FALLBACK_DEFAULT_MODEL.to_string())
    }
}

fn require(value: &Option<String>, what: &str) -> Result<String> {
    value
        .clone()
        .ok_or_else(|| Error::NotConfigured(format!("missing {what}")))
}

/// Resolve a model identifier into a ready client. Performs no network IO.
pub fn select_model(
    name: &str,
    settings: &ProviderSettings,
    catalog: &ModelCatalog,
    client: reqwest::Client,
) -> Result<Arc<dyn LanguageModel>> {
    let name = name.trim();
    let model: Arc<dyn LanguageModel> = match name {
        "huggingface" => {
            let token = require(&settings.hf_token, "HF_TOKEN")?;
            Arc::new(OpenAiCompatClient::new(
                client,
                name,
                format!("https://api-inference.huggingface.co/models/{HF_MODEL}"),
                Some(token),
                HF_MODEL,
            ))
        }
        "groq" => {
            let key = require(&settings.groq_api_key, "GROQ_API_KEY")?;
            Arc::new(OpenAiCompatClient::new(
                client,
                name,
                GROQ_BASE_URL,
                Some(key),
                GROQ_MODEL,
            ))
        }
        "mistral" => {
            let key = require(&settings.mistral_api_key, "MISTRAL_API_KEY")?;
            Arc::new(OpenAiCompatClient::new(
                client,
                name,
                MISTRAL_BASE_URL,
                Some(key),
                MISTRAL_MODEL,
            ))
        }
        "ollama" => {
            let base = require(&settings.ollama_base_url, "SENTINEL_OLLAMA_ENABLE")?;
            let model = settings
                .ollama_model
                .clone()
                .unwrap_or_else(|| "qwen2.5:3b-instruct".to_string());
            Arc::new(OllamaClient::new(client, base, model))
        }
        other => {
            let known = catalog.custom_models.iter().any(|m| m == other)
                || settings.custom_llm_default_model.as_deref() == Some(other);
            match settings.custom_llm_base_url.as_deref() {
                Some(base) if known && !other.is_empty() => Arc::new(OpenAiCompatClient::new(
                    client,
                    other,
                    base,
                    settings.custom_llm_key.clone(),
                    other,
                )),
                _ => return Err(Error::UnsupportedModel(other.to_string())),
            }
        }
    };
    tracing::debug!(model = model.id(), "model selected");
    Ok(model)
}
