use clap::Args;
use sentinel_core::{HttpMethod, RetrievalConfig, SearchOptions, TimeRange};

/// Search-engine knobs.
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long, default_value = "en")]
    pub language: String,
    #[arg(long, default_value = "general")]
    pub category: String,
    /// Comma-separated engine list.
    #[arg(long, default_value = "google,duckduckgo,bing,qwant")]
    pub engines: String,
    /// 0 (off), 1 (moderate), 2 (strict).
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub safesearch: u8,
    /// day|week|month|year (default: any time)
    #[arg(long)]
    pub time_range: Option<TimeRange>,
    /// GET|POST
    #[arg(long, default_value = "GET")]
    pub method: HttpMethod,
    /// Restrict results to one site (sent as a `site:` prefix).
    #[arg(long)]
    pub site_filter: Option<String>,
}

impl SearchArgs {
    pub fn to_options(&self) -> SearchOptions {
        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        SearchOptions {
            language: non_empty(&self.language),
            category: non_empty(&self.category),
            engines: self
                .engines
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            safesearch: self.safesearch,
            time_range: self.time_range,
            method: self.method,
            site_filter: self.site_filter.as_deref().and_then(non_empty),
        }
    }
}

/// Retrieval-loop knobs.
#[derive(Args, Debug, Clone)]
pub struct RetrievalArgs {
    /// Relevant documents to collect before answering.
    #[arg(
        long = "num-results",
        default_value_t = 3,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub target_count: usize,
    #[arg(long, default_value_t = 3)]
    pub max_attempts: usize,
    /// Character budget per extracted document.
    #[arg(long, default_value_t = 3000)]
    pub max_chars: usize,
    #[arg(long, default_value_t = 0.2)]
    pub temperature: f32,
    #[arg(long, default_value_t = 0.95)]
    pub similarity_threshold: f32,
    /// Upper bound on documents passed to the answer.
    #[arg(
        long,
        default_value_t = 3,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub max_results: usize,
    /// Preferred domain for tie-breaking (repeatable).
    #[arg(long = "preferred-domain")]
    pub preferred_domains: Vec<String>,
    /// Near-duplicate cutoff; a negative value disables content dedup.
    #[arg(long, default_value_t = 0.8, allow_negative_numbers = true)]
    pub dedup_threshold: f32,
    /// Extract text from PDF results.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub use_pdf: bool,
    /// Search pages requested per attempt.
    #[arg(long, default_value_t = 5)]
    pub max_pages: u32,
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,
    /// Timeout for every external call (ms).
    #[arg(long, default_value_t = 20_000)]
    pub call_timeout_ms: u64,
}

impl RetrievalArgs {
    pub fn to_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            target_count: self.target_count,
            max_attempts: self.max_attempts,
            max_chars: self.max_chars,
            temperature: self.temperature,
            similarity_threshold: self.similarity_threshold,
            max_results: self.max_results,
            preferred_domains: self
                .preferred_domains
                .iter()
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
            dedup_threshold: (self.dedup_threshold >= 0.0).then_some(self.dedup_threshold),
            use_pdf: self.use_pdf,
            max_pages: self.max_pages.max(1),
            concurrency: self.concurrency.max(1),
            call_timeout_ms: self.call_timeout_ms.max(1),
        }
    }
}
