//! Environment + flags to ready services. Every configuration error surfaces here, before
//! any request is made.

use anyhow::Context;
use sentinel_core::{ChatMessage, Embedder, Error, LanguageModel, RetrievalConfig, SearchOptions};
use sentinel_local::embed::{HashingEmbedder, OpenAiCompatEmbedder};
use sentinel_local::models::{self, ModelCatalog, ProviderSettings};
use sentinel_local::search::SearxngSearchProvider;
use sentinel_local::{FetchSettings, LocalDocumentFetcher};
use sentinel_pipeline::{
    AnswerSynthesizer, ChatHandler, QueryRephraser, RelevanceAssessor, RetrievalOrchestrator,
    SearchGatherer, SemanticRanker,
};
use std::path::Path;
use std::sync::Arc;

/// `.env` loading is on unless `SENTINEL_DOTENV` is `0`/`false`/`no`/`off`.
pub fn dotenv_enabled() -> bool {
    !matches!(
        std::env::var("SENTINEL_DOTENV")
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Log filter directive: `SENTINEL_LOG`, then `RUST_LOG`, then `info`.
pub fn log_filter() -> String {
    ["SENTINEL_LOG", "RUST_LOG"]
        .iter()
        .find_map(|k| {
            std::env::var(k)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
        .unwrap_or_else(|| "info".to_string())
}

/// Prior turns from a JSON file: `[{"role": "user", "content": "..."}, ...]`.
pub fn load_history(path: Option<&Path>) -> anyhow::Result<Vec<ChatMessage>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read history file {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw).with_context(|| format!("parse history file {}", path.display()))
}

/// Remote embeddings when `SENTINEL_EMBEDDINGS_BASE_URL` is set, the local hashing embedder
/// otherwise.
pub fn select_embedder(client: reqwest::Client) -> Arc<dyn Embedder> {
    match OpenAiCompatEmbedder::from_env(client) {
        Ok(e) => Arc::new(e),
        Err(_) => Arc::new(HashingEmbedder::default()),
    }
}

/// Resolve the model: the explicit choice, else the catalog default.
///
/// The custom-model list is refreshed first when a custom endpoint is configured; a failed
/// refresh only narrows what is available.
pub async fn resolve_model(
    requested: Option<&str>,
    settings: &ProviderSettings,
    catalog: &mut ModelCatalog,
    client: &reqwest::Client,
) -> Result<Arc<dyn LanguageModel>, Error> {
    if settings.custom_llm_base_url.is_some() {
        if let Err(e) = catalog.refresh_custom_models(client, settings).await {
            tracing::warn!(error = %e, "could not list custom models");
        }
    }
    let name = requested
        .map(str::to_string)
        .unwrap_or_else(|| catalog.default_model(settings));
    models::select_model(&name, settings, catalog, client.clone())
}

/// Everything needed to answer a question, resolved once per invocation.
pub struct Services {
    pub handler: ChatHandler,
    pub gatherer: SearchGatherer,
    pub embedder: &'static str,
}

/// Search + fetch half of the pipeline. Fails fast when no SearXNG endpoint is configured.
pub fn build_gatherer(
    config: &RetrievalConfig,
    options: SearchOptions,
    client: reqwest::Client,
) -> Result<SearchGatherer, Error> {
    let search = SearxngSearchProvider::from_env(client.clone())?;
    let timeout = config.call_timeout();
    let fetcher = LocalDocumentFetcher::with_client(
        client,
        FetchSettings {
            timeout,
            max_chars: config.max_chars,
            use_pdf: config.use_pdf,
            ..FetchSettings::default()
        },
    );
    Ok(SearchGatherer::new(Arc::new(search), Arc::new(fetcher), options)
        .with_max_pages(config.max_pages)
        .with_concurrency(config.concurrency)
        .with_timeout(timeout))
}

impl Services {
    pub fn build(
        model: Arc<dyn LanguageModel>,
        config: &RetrievalConfig,
        options: SearchOptions,
        client: reqwest::Client,
    ) -> Result<Self, Error> {
        let gatherer = build_gatherer(config, options, client.clone())?;
        let timeout = config.call_timeout();
        let embedder = select_embedder(client);
        let embedder_name = embedder.name();

        let orchestrator = RetrievalOrchestrator::new(
            Arc::new(gatherer.clone()),
            RelevanceAssessor::new(model.clone(), config.temperature, timeout),
            QueryRephraser::new(model.clone(), config.temperature, timeout),
            SemanticRanker::new(embedder, timeout),
            config.clone(),
        );
        let handler = ChatHandler::new(
            model.clone(),
            Arc::new(orchestrator),
            AnswerSynthesizer::new(model, config.temperature, timeout),
            timeout,
        );
        tracing::debug!(embedder = embedder_name, "services ready");
        Ok(Self {
            handler,
            gatherer,
            embedder: embedder_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn env_lock() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    struct EnvGuard {
        k: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn set(k: &'static str, v: &str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::set_var(k, v);
            Self { k, prev }
        }

        fn unset(k: &'static str) -> Self {
            let prev = std::env::var(k).ok();
            std::env::remove_var(k);
            Self { k, prev }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match self.prev.take() {
                Some(v) => std::env::set_var(self.k, v),
                None => std::env::remove_var(self.k),
            }
        }
    }

    #[test]
    fn dotenv_can_be_disabled() {
        let _l = env_lock();
        let _g = EnvGuard::set("SENTINEL_DOTENV", "0");
        assert!(!dotenv_enabled());
        let _g = EnvGuard::unset("SENTINEL_DOTENV");
        assert!(dotenv_enabled());
    }

    #[test]
    fn log_filter_prefers_sentinel_log() {
        let _l = env_lock();
        let _a = EnvGuard::set("SENTINEL_LOG", "debug");
        let _b = EnvGuard::set("RUST_LOG", "warn");
        assert_eq!(log_filter(), "debug");
        let _a = EnvGuard::unset("SENTINEL_LOG");
        assert_eq!(log_filter(), "warn");
        let _b = EnvGuard::unset("RUST_LOG");
        assert_eq!(log_filter(), "info");
    }

    #[test]
    fn history_file_is_optional_and_role_tagged() {
        assert!(load_history(None).unwrap().is_empty());
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("history.json");
        std::fs::write(
            &p,
            r#"[{"role":"user","content":"rates?"},{"role":"assistant","content":"which country?"}]"#,
        )
        .unwrap();
        let h = load_history(Some(&p)).unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(
            sentinel_core::render_chat_history(&h),
            "user: rates?\nassistant: which country?"
        );

        std::fs::write(&p, "{not json").unwrap();
        assert!(load_history(Some(&p)).is_err());
    }

    #[tokio::test]
    async fn unknown_model_fails_before_any_request() {
        let settings = ProviderSettings::default();
        let mut catalog = ModelCatalog::default();
        let client = sentinel_local::http_client().unwrap();
        let err = resolve_model(Some("gpt-9"), &settings, &mut catalog, &client)
            .await
            .err()
            .expect("error");
        assert!(err.is_configuration());
    }

    #[test]
    fn services_need_a_search_endpoint() {
        let _l = env_lock();
        let _a = EnvGuard::unset("SENTINEL_SEARXNG_ENDPOINTS");
        let _b = EnvGuard::unset("SENTINEL_SEARXNG_ENDPOINT");
        let _c = EnvGuard::unset("SEARXNG_URL");
        let settings = ProviderSettings {
            groq_api_key: Some("k".to_string()),
            ..ProviderSettings::default()
        };
        let client = sentinel_local::http_client().unwrap();
        let model =
            models::select_model("groq", &settings, &ModelCatalog::default(), client.clone()).unwrap();
        let err = Services::build(
            model,
            &RetrievalConfig::default(),
            SearchOptions::default(),
            client,
        )
        .err()
        .expect("error");
        assert!(matches!(err, Error::NotConfigured(_)));
    }
}
