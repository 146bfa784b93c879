use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("synthesis failed: {0}")]
    Synthesis(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Configuration errors cannot be repaired by retrying; everything else is per-call.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::UnsupportedModel(_) | Error::NotConfigured(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The current information need. Rephrasing produces a new `Query`; values are never edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(String);

impl Query {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Query text as sent to the search engine (`site:` prefix applied when a filter is set).
    pub fn with_site_filter(&self, site_filter: Option<&str>) -> String {
        match site_filter.map(str::trim).filter(|s| !s.is_empty()) {
            Some(site) => format!("site:{site} {}", self.0),
            None => self.0.clone(),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Article,
    Pdf,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Article => "article",
            SourceKind::Pdf => "pdf",
        }
    }

    /// Fetchers dispatch on the URL suffix, not on the response content type.
    pub fn for_url(url: &str) -> Self {
        let path = url::Url::parse(url)
            .map(|u| u.path().to_ascii_lowercase())
            .unwrap_or_else(|_| url.to_ascii_lowercase());
        if path.ends_with(".pdf") {
            SourceKind::Pdf
        } else {
            SourceKind::Article
        }
    }
}

/// True when `url` parses and carries both a scheme and a host.
pub fn is_valid_url(url: &str) -> bool {
    match url::Url::parse(url.trim()) {
        Ok(u) => !u.scheme().is_empty() && u.host_str().is_some_and(|h| !h.is_empty()),
        Err(_) => false,
    }
}

/// Case-insensitive host match; `example.com` also matches its subdomains.
pub fn host_matches(host: &str, pat: &str) -> bool {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let pat = pat.trim().trim_start_matches("*.").to_ascii_lowercase();
    if pat.is_empty() {
        return false;
    }
    host == pat || host.ends_with(&format!(".{pat}"))
}

pub fn is_preferred_domain(url: &str, preferred: &[String]) -> bool {
    let Ok(u) = url::Url::parse(url.trim()) else {
        return false;
    };
    let Some(host) = u.host_str() else {
        return false;
    };
    preferred.iter().any(|p| host_matches(host, p))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub title: String,
    pub url: String,
    pub extracted_text: String,
    pub source_kind: SourceKind,
}

impl CandidateResult {
    pub fn is_valid(&self) -> bool {
        is_valid_url(&self.url) && self.extracted_text.chars().any(|c| !c.is_whitespace())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessedResult {
    #[serde(flatten)]
    pub candidate: CandidateResult,
    pub relevant: bool,
    pub summary: Option<String>,
}

impl AssessedResult {
    /// Text used for ranking: the assessor's summary when present, otherwise the page text.
    pub fn ranking_text(&self) -> &str {
        match self.summary.as_deref() {
            Some(s) if !s.trim().is_empty() => s,
            _ => &self.candidate.extracted_text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    #[serde(flatten)]
    pub assessed: AssessedResult,
    /// Cosine similarity to the final query, in `[-1, 1]`.
    pub similarity: f32,
    pub preferred_domain: bool,
}

/// Frozen payload handed to answer synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisInput {
    final_query: Query,
    documents: Vec<RankedResult>,
}

impl SynthesisInput {
    pub fn new(final_query: Query, documents: Vec<RankedResult>) -> Self {
        Self {
            final_query,
            documents,
        }
    }

    pub fn final_query(&self) -> &Query {
        &self.final_query
    }

    pub fn documents(&self) -> &[RankedResult] {
        &self.documents
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    Ready(SynthesisInput),
    /// No relevant document survived any attempt.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Renders prior turns as `role: content` lines, the shape the prompts expect.
pub fn render_chat_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl std::str::FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(Error::NotConfigured(format!(
                "unknown http method {other:?} (allowed: GET, POST)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::Day => "day",
            TimeRange::Week => "week",
            TimeRange::Month => "month",
            TimeRange::Year => "year",
        }
    }
}

impl std::str::FromStr for TimeRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(TimeRange::Day),
            "week" => Ok(TimeRange::Week),
            "month" => Ok(TimeRange::Month),
            "year" => Ok(TimeRange::Year),
            other => Err(Error::NotConfigured(format!(
                "unknown time range {other:?} (allowed: day, week, month, year)"
            ))),
        }
    }
}

/// Search-engine knobs surfaced to the core; the provider decides how to encode them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub language: Option<String>,
    pub category: Option<String>,
    pub engines: Vec<String>,
    /// 0 (off) ..= 2 (strict).
    pub safesearch: u8,
    pub time_range: Option<TimeRange>,
    pub method: HttpMethod,
    pub site_filter: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            language: Some("en".to_string()),
            category: Some("general".to_string()),
            engines: ["google", "duckduckgo", "bing", "qwant"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            safesearch: 2,
            time_range: None,
            method: HttpMethod::Get,
            site_filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    /// 1-based page number.
    pub page: u32,
    pub options: SearchOptions,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: Option<String>,
}

/// One page of hits. An empty page means the provider is exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    pub provider: String,
    pub page: u32,
}

impl SearchPage {
    pub fn is_exhausted(&self) -> bool {
        self.results.is_empty()
    }
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<SearchPage>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub text: String,
    pub source_kind: SourceKind,
}

#[async_trait::async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// `Ok(None)` means the page yielded no usable text (or its kind is disabled).
    async fn fetch(&self, url: &str) -> Result<Option<FetchedDocument>>;
}

/// The single capability every chat provider is reduced to.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    fn id(&self) -> &str;
    async fn generate(
        &self,
        messages: &[ChatMessage],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String>;
}

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &'static str;
    /// Must be deterministic for identical input within a process lifetime.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await);
        }
        out
    }
}

/// Request-level knobs for one retrieval run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Desired number of relevant documents.
    pub target_count: usize,
    pub max_attempts: usize,
    /// Character budget per extracted document.
    pub max_chars: usize,
    pub temperature: f32,
    pub similarity_threshold: f32,
    pub max_results: usize,
    pub preferred_domains: Vec<String>,
    /// Near-duplicate cutoff; `None` disables content dedup.
    pub dedup_threshold: Option<f32>,
    pub use_pdf: bool,
    /// Pages requested from the provider per attempt before giving up.
    pub max_pages: u32,
    pub concurrency: usize,
    pub call_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            target_count: 3,
            max_attempts: 3,
            max_chars: 3000,
            temperature: 0.2,
            similarity_threshold: 0.95,
            max_results: 3,
            preferred_domains: Vec::new(),
            dedup_threshold: Some(0.8),
            use_pdf: true,
            max_pages: 5,
            concurrency: 4,
            call_timeout_ms: 20_000,
        }
    }
}

impl RetrievalConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn is_valid_url_requires_scheme_and_host() {
        assert!(is_valid_url("https://example.com/a"));
        assert!(is_valid_url("http://localhost:8080/"));
        assert!(!is_valid_url("example.com/a"));
        assert!(!is_valid_url("/relative/path"));
        assert!(!is_valid_url("mailto:someone@example.com"));
        assert!(!is_valid_url("file:///etc/passwd"));
        assert!(!is_valid_url(""));
    }

    #[test]
    fn candidate_with_blank_text_is_invalid() {
        let mut c = CandidateResult {
            title: "t".to_string(),
            url: "https://example.com".to_string(),
            extracted_text: "  \n ".to_string(),
            source_kind: SourceKind::Article,
        };
        assert!(!c.is_valid());
        c.extracted_text = "body".to_string();
        assert!(c.is_valid());
        c.url = "nohost".to_string();
        assert!(!c.is_valid());
    }

    #[test]
    fn source_kind_dispatches_on_path_suffix() {
        assert_eq!(
            SourceKind::for_url("https://x.org/paper.PDF?dl=1"),
            SourceKind::Pdf
        );
        assert_eq!(
            SourceKind::for_url("https://x.org/pdf-guide"),
            SourceKind::Article
        );
    }

    #[test]
    fn site_filter_prefixes_query() {
        let q = Query::new("rust async");
        assert_eq!(
            q.with_site_filter(Some("wikipedia.org")),
            "site:wikipedia.org rust async"
        );
        assert_eq!(q.with_site_filter(Some("  ")), "rust async");
        assert_eq!(q.with_site_filter(None), "rust async");
    }

    #[test]
    fn preferred_domain_matches_subdomains_only_on_label_boundary() {
        let pref = vec!["reuters.com".to_string()];
        assert!(is_preferred_domain("https://www.reuters.com/x", &pref));
        assert!(is_preferred_domain("https://reuters.com", &pref));
        assert!(!is_preferred_domain("https://notreuters.com", &pref));
        assert!(!is_preferred_domain("not a url", &pref));
    }

    #[test]
    fn chat_history_renders_role_prefixed_lines() {
        let h = vec![
            ChatMessage::user("hi"),
            ChatMessage {
                role: Role::Assistant,
                content: "hello".to_string(),
            },
        ];
        assert_eq!(render_chat_history(&h), "user: hi\nassistant: hello");
    }

    #[test]
    fn ranking_text_prefers_summary() {
        let a = AssessedResult {
            candidate: CandidateResult {
                title: "t".to_string(),
                url: "https://e.com".to_string(),
                extracted_text: "page".to_string(),
                source_kind: SourceKind::Article,
            },
            relevant: true,
            summary: Some("short".to_string()),
        };
        assert_eq!(a.ranking_text(), "short");
        let b = AssessedResult {
            summary: Some("   ".to_string()),
            ..a
        };
        assert_eq!(b.ranking_text(), "page");
    }

    #[test]
    fn parses_method_and_time_range() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!("PUT".parse::<HttpMethod>().is_err());
        assert_eq!("Week".parse::<TimeRange>().unwrap(), TimeRange::Week);
        assert!("decade".parse::<TimeRange>().is_err());
    }

    proptest! {
        #[test]
        fn urls_without_scheme_separator_are_rejected(s in "[a-z0-9./_-]{0,40}") {
            prop_assume!(!s.contains(':'));
            prop_assert!(!is_valid_url(&s));
        }
    }
}
