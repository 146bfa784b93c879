use futures_util::StreamExt;
use sentinel_core::{DocumentFetcher, Error, FetchedDocument, Result, SourceKind};
use std::time::Duration;

pub mod embed;
pub mod extract;
pub mod models;
pub mod ollama;
pub mod openai_compat;
pub mod search;
pub mod textprep;

/// Trimmed, non-empty environment value.
pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// First non-empty value among `keys`, in order.
pub(crate) fn env_any(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env(k))
}

pub(crate) fn env_bool(key: &str) -> bool {
    matches!(
        env(key).unwrap_or_default().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Shared HTTP client with bounded connect/overall timeouts.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("sentinel/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(10))
        // Avoid "hang forever" on DNS/TLS/body stalls; per-request timeouts still apply.
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| Error::Fetch(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    /// Hard cap on bytes read from a response body.
    pub max_bytes: usize,
    /// Character budget for the extracted text.
    pub max_chars: usize,
    /// When false, PDF URLs are skipped without a request.
    pub use_pdf: bool,
    /// Wrap width for HTML rendering.
    pub text_width: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_bytes: 5 * 1024 * 1024,
            max_chars: 3000,
            use_pdf: true,
            text_width: 120,
        }
    }
}

/// Fetches a page and extracts its text, dispatching on the URL suffix.
#[derive(Debug, Clone)]
pub struct LocalDocumentFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl LocalDocumentFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            settings,
        })
    }

    pub fn with_client(client: reqwest::Client, settings: FetchSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .timeout(self.settings.timeout)
            .send()
            .await
            .map_err(|e| Error::Fetch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Fetch(format!("HTTP {status} for {url}")));
        }

        let max_bytes = self.settings.max_bytes;
        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Fetch(e.to_string()))?;
            if bytes.len().saturating_add(chunk.len()) > max_bytes {
                let can_take = max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                tracing::debug!(url, max_bytes, "response body truncated");
                break;
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    async fn pdf_text(&self, url: &str) -> Result<String> {
        let bytes = self.fetch_bytes(url).await?;
        if !extract::bytes_look_like_pdf(&bytes) {
            return Err(Error::Fetch(format!("not a pdf body: {url}")));
        }
        // pdf-extract is CPU-bound and can panic on malformed input; isolate it.
        tokio::task::spawn_blocking(move || extract::pdf_to_text(&bytes))
            .await
            .map_err(|e| Error::Fetch(format!("pdf extraction aborted: {e}")))?
            .map_err(Error::Fetch)
    }

    async fn article_text(&self, url: &str) -> Result<String> {
        let bytes = self.fetch_bytes(url).await?;
        let width = self.settings.text_width;
        tokio::task::spawn_blocking(move || {
            let html = String::from_utf8_lossy(&bytes);
            extract::extract_article(&html, width).render()
        })
        .await
        .map_err(|e| Error::Fetch(format!("article extraction aborted: {e}")))
    }
}

#[async_trait::async_trait]
impl DocumentFetcher for LocalDocumentFetcher {
    async fn fetch(&self, url: &str) -> Result<Option<FetchedDocument>> {
        if !sentinel_core::is_valid_url(url) {
            return Err(Error::InvalidUrl(url.to_string()));
        }
        let source_kind = SourceKind::for_url(url);
        let text = match source_kind {
            SourceKind::Pdf if !self.settings.use_pdf => {
                tracing::info!(url, "skipping pdf document");
                return Ok(None);
            }
            SourceKind::Pdf => self.pdf_text(url).await?,
            SourceKind::Article => self.article_text(url).await?,
        };

        let (text, clipped) = extract::truncate_chars(text.trim(), self.settings.max_chars);
        if text.trim().is_empty() {
            tracing::debug!(url, "no extractable text");
            return Ok(None);
        }
        tracing::debug!(
            url,
            kind = source_kind.as_str(),
            chars = text.chars().count(),
            clipped,
            "document extracted"
        );
        Ok(Some(FetchedDocument { text, source_kind }))
    }
}
