use serde::Deserialize;
use sentinel_core::{
    Error, HttpMethod, Result, SearchPage, SearchProvider, SearchQuery, SearchResult,
};
use std::time::Instant;

fn timeout_ms_from_query(q: &SearchQuery) -> u64 {
    // Provider requests can hang indefinitely without an explicit timeout.
    q.timeout_ms.unwrap_or(10_000).clamp(1_000, 60_000)
}

pub fn searxng_endpoints_from_env() -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    // Comma/whitespace-separated list for simple load spreading.
    if let Some(v) = crate::env("SENTINEL_SEARXNG_ENDPOINTS") {
        for raw in v.split(|c: char| c == ',' || c.is_whitespace()) {
            let s = raw.trim();
            if !s.is_empty() && !out.iter().any(|e| e == s) {
                out.push(s.to_string());
            }
        }
    }

    for key in ["SENTINEL_SEARXNG_ENDPOINT", "SEARXNG_URL"] {
        if let Some(s) = crate::env(key) {
            if !out.contains(&s) {
                out.push(s);
            }
        }
    }

    out
}

#[derive(Debug, Clone)]
pub struct SearxngSearchProvider {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl SearxngSearchProvider {
    pub fn new(client: reqwest::Client, endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(Error::NotConfigured(
                "no searxng endpoint given".to_string(),
            ));
        }
        Ok(Self { client, endpoints })
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let endpoints = searxng_endpoints_from_env();
        if endpoints.is_empty() {
            return Err(Error::NotConfigured(
                "missing SENTINEL_SEARXNG_ENDPOINT (or SENTINEL_SEARXNG_ENDPOINTS / SEARXNG_URL)"
                    .to_string(),
            ));
        }
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn endpoint_search_for(base_endpoint: &str) -> String {
        // Accept either a base URL or a full /search endpoint.
        let mut base = base_endpoint.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }

    fn stable_hash64(query: &SearchQuery) -> u64 {
        // FNV-1a; stable across runs unlike RandomState. The page number is left out so
        // every page of one query goes to the same instance.
        let mut h: u64 = 1469598103934665603;
        let lang = query.options.language.as_deref().unwrap_or("");
        for b in query.query.as_bytes().iter().chain(lang.as_bytes()) {
            h ^= *b as u64;
            h = h.wrapping_mul(1099511628211);
        }
        h
    }

    fn pick_endpoint_index(&self, q: &SearchQuery) -> usize {
        if self.endpoints.is_empty() {
            return 0;
        }
        (Self::stable_hash64(q) as usize) % self.endpoints.len()
    }
}

/// Form/query parameters for one SearXNG page request. Empty values are omitted.
pub fn searxng_params(q: &SearchQuery) -> Vec<(&'static str, String)> {
    let o = &q.options;
    let mut params: Vec<(&'static str, String)> = vec![
        ("q", q.query.clone()),
        ("format", "json".to_string()),
        ("pageno", q.page.max(1).to_string()),
        ("safesearch", o.safesearch.min(2).to_string()),
    ];
    if let Some(tr) = o.time_range {
        params.push(("time_range", tr.as_str().to_string()));
    }
    if let Some(lang) = o.language.as_deref().filter(|s| !s.trim().is_empty()) {
        params.push(("language", lang.to_string()));
    }
    if let Some(cat) = o.category.as_deref().filter(|s| !s.trim().is_empty()) {
        params.push(("categories", cat.to_string()));
    }
    let engines = o
        .engines
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    if !engines.is_empty() {
        params.push(("engines", engines));
    }
    params
}

pub async fn searxng_search_at_endpoint(
    client: &reqwest::Client,
    base_endpoint: &str,
    q: &SearchQuery,
) -> Result<SearchPage> {
    let t0 = Instant::now();
    let timeout_ms = timeout_ms_from_query(q);
    let endpoint_search = SearxngSearchProvider::endpoint_search_for(base_endpoint);
    let params = searxng_params(q);

    let req = match q.options.method {
        HttpMethod::Get => client.get(endpoint_search).query(&params),
        HttpMethod::Post => client.post(endpoint_search).form(&params),
    };
    let resp = req
        .header(reqwest::header::ACCEPT, "application/json")
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .send()
        .await
        .map_err(|e| Error::Search(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Search(format!("searxng search HTTP {status}")));
    }

    let parsed: SearxngSearchResponse = resp
        .json()
        .await
        .map_err(|e| Error::Search(e.to_string()))?;

    let mut out = Vec::new();
    for r in parsed.results.unwrap_or_default() {
        let Some(url) = r.url else { continue };
        out.push(SearchResult {
            title: r
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "No title".to_string()),
            url,
            snippet: r.content,
        });
    }

    tracing::debug!(
        page = q.page,
        results = out.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "searxng page"
    );

    Ok(SearchPage {
        results: out,
        provider: "searxng".to_string(),
        page: q.page,
    })
}

#[derive(Debug, Deserialize)]
struct SearxngSearchResponse {
    results: Option<Vec<SearxngResult>>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    url: Option<String>,
    title: Option<String>,
    // SearXNG uses `content` for snippets in JSON format.
    content: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for SearxngSearchProvider {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchPage> {
        // Deterministic sharding when multiple endpoints are configured.
        let idx = self.pick_endpoint_index(q);
        let base_endpoint = self.endpoints.get(idx).map(|s| s.as_str()).unwrap_or("");
        searxng_search_at_endpoint(&self.client, base_endpoint, q).await
    }
}
