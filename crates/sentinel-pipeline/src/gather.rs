use crate::bounded;
use async_trait::async_trait;
use futures_util::StreamExt;
use sentinel_core::{
    is_valid_url, CandidateResult, DocumentFetcher, Query, SearchOptions, SearchProvider,
    SearchQuery,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Produces up to `limit` valid candidates for one attempt.
///
/// URLs in `exclude` were already handed out earlier in the run. They are skipped before
/// fetching and never count against `limit`, so a repeated query pages on to new hits.
///
/// Failures are absorbed: a source that cannot reach its backend returns an empty list,
/// which the loop treats as "no candidates this attempt".
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn gather(
        &self,
        query: &Query,
        limit: usize,
        exclude: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> Vec<CandidateResult>;
}

/// Search, then fetch and extract each hit.
#[derive(Clone)]
pub struct SearchGatherer {
    search: Arc<dyn SearchProvider>,
    fetcher: Arc<dyn DocumentFetcher>,
    options: SearchOptions,
    max_pages: u32,
    concurrency: usize,
    timeout: Duration,
}

impl SearchGatherer {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        fetcher: Arc<dyn DocumentFetcher>,
        options: SearchOptions,
    ) -> Self {
        Self {
            search,
            fetcher,
            options,
            max_pages: 5,
            concurrency: 4,
            timeout: Duration::from_secs(20),
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn options(&self) -> &SearchOptions {
        &self.options
    }
}

#[async_trait]
impl CandidateSource for SearchGatherer {
    async fn gather(
        &self,
        query: &Query,
        limit: usize,
        exclude: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> Vec<CandidateResult> {
        let query_text = query.with_site_filter(self.options.site_filter.as_deref());
        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let mut out: Vec<CandidateResult> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for page in 1..=self.max_pages {
            if out.len() >= limit || cancel.is_cancelled() {
                break;
            }
            let sq = SearchQuery {
                query: query_text.clone(),
                page,
                options: self.options.clone(),
                timeout_ms: Some(timeout_ms),
            };
            let hits = match bounded(self.timeout, self.search.search(&sq)).await {
                Ok(p) if p.is_exhausted() => {
                    tracing::debug!(page, provider = %p.provider, "search exhausted");
                    break;
                }
                Ok(p) => p.results,
                Err(e) => {
                    tracing::warn!(page, provider = self.search.name(), error = %e, "search failed");
                    break;
                }
            };

            let hits: Vec<_> = hits
                .into_iter()
                .filter(|h| {
                    if !is_valid_url(&h.url) {
                        tracing::debug!(url = %h.url, "skipping invalid url");
                        return false;
                    }
                    if exclude.contains(&h.url) {
                        tracing::debug!(url = %h.url, "already seen this run");
                        return false;
                    }
                    seen.insert(h.url.clone())
                })
                .collect();

            let fetcher = &self.fetcher;
            let timeout = self.timeout;
            let mut fetched = futures_util::stream::iter(hits.into_iter().map(|hit| async move {
                let res = bounded(timeout, fetcher.fetch(&hit.url)).await;
                (hit, res)
            }))
            .buffered(self.concurrency);

            while let Some((hit, res)) = fetched.next().await {
                match res {
                    Ok(Some(doc)) => {
                        let c = CandidateResult {
                            title: hit.title,
                            url: hit.url,
                            extracted_text: doc.text,
                            source_kind: doc.source_kind,
                        };
                        if c.is_valid() {
                            out.push(c);
                            if out.len() >= limit {
                                break;
                            }
                        }
                    }
                    Ok(None) => tracing::debug!(url = %hit.url, "no usable text"),
                    Err(e) => tracing::warn!(url = %hit.url, error = %e, "fetch failed; skipping"),
                }
            }
        }

        tracing::info!(query = %query_text, gathered = out.len(), limit, "gathered candidates");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::{Error, FetchedDocument, Result, SearchPage, SearchResult, SourceKind};
    use std::sync::Mutex;

    /// Serves `pages[page - 1]`; pages beyond the list are empty.
    struct PagedSearch {
        pages: Vec<Vec<&'static str>>,
        seen: Mutex<Vec<SearchQuery>>,
        fail: bool,
    }

    impl PagedSearch {
        fn new(pages: Vec<Vec<&'static str>>) -> Self {
            Self {
                pages,
                seen: Mutex::new(Vec::new()),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl SearchProvider for PagedSearch {
        fn name(&self) -> &'static str {
            "paged"
        }

        async fn search(&self, q: &SearchQuery) -> Result<SearchPage> {
            self.seen.lock().unwrap().push(q.clone());
            if self.fail {
                return Err(Error::Search("connection refused".to_string()));
            }
            let results = self
                .pages
                .get(q.page as usize - 1)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|u| SearchResult {
                    title: format!("T {u}"),
                    url: u.to_string(),
                    snippet: None,
                })
                .collect();
            Ok(SearchPage {
                results,
                provider: "paged".to_string(),
                page: q.page,
            })
        }
    }

    /// URLs containing "empty" yield no text, "broken" fail, everything else succeeds.
    struct StubFetcher {
        fetched: Mutex<Vec<String>>,
    }

    impl StubFetcher {
        fn new() -> Self {
            Self {
                fetched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DocumentFetcher for StubFetcher {
        async fn fetch(&self, url: &str) -> Result<Option<FetchedDocument>> {
            self.fetched.lock().unwrap().push(url.to_string());
            if url.contains("broken") {
                return Err(Error::Fetch("HTTP 500".to_string()));
            }
            if url.contains("empty") {
                return Ok(None);
            }
            Ok(Some(FetchedDocument {
                text: format!("text of {url}"),
                source_kind: SourceKind::for_url(url),
            }))
        }
    }

    fn gatherer(search: Arc<PagedSearch>, fetcher: Arc<StubFetcher>) -> SearchGatherer {
        SearchGatherer::new(search, fetcher, SearchOptions::default()).with_max_pages(3)
    }

    fn urls(cs: &[CandidateResult]) -> Vec<&str> {
        cs.iter().map(|c| c.url.as_str()).collect()
    }

    #[tokio::test]
    async fn pages_until_limit_and_keeps_provider_order() {
        let search = Arc::new(PagedSearch::new(vec![
            vec!["https://a.com/1", "https://a.com/broken", "https://a.com/empty"],
            vec!["https://b.com/1", "https://b.com/2", "https://b.com/3"],
        ]));
        let fetcher = Arc::new(StubFetcher::new());
        let g = gatherer(search.clone(), fetcher);
        let out = g.gather(&Query::new("q"), 3, &HashSet::new(), &CancellationToken::new()).await;
        assert_eq!(urls(&out), vec!["https://a.com/1", "https://b.com/1", "https://b.com/2"]);
        assert_eq!(out[0].title, "T https://a.com/1");
        assert_eq!(search.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn excluded_urls_are_skipped_and_do_not_use_the_limit() {
        let search = Arc::new(PagedSearch::new(vec![
            vec!["https://a.com/1", "https://a.com/2", "https://a.com/3"],
            vec!["https://b.com/1", "https://b.com/2", "https://b.com/3"],
        ]));
        let fetcher = Arc::new(StubFetcher::new());
        let exclude: HashSet<String> = ["https://a.com/1", "https://a.com/2", "https://a.com/3"]
            .into_iter()
            .map(String::from)
            .collect();
        let out = gatherer(search.clone(), fetcher.clone())
            .gather(&Query::new("q"), 3, &exclude, &CancellationToken::new())
            .await;
        assert_eq!(
            urls(&out),
            vec!["https://b.com/1", "https://b.com/2", "https://b.com/3"]
        );
        assert!(fetcher.fetched.lock().unwrap().iter().all(|u| u.starts_with("https://b.com")));
        assert_eq!(search.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_urls_are_never_fetched() {
        let search = Arc::new(PagedSearch::new(vec![vec!["not a url", "https://ok.com/x"]]));
        let fetcher = Arc::new(StubFetcher::new());
        let out = gatherer(search, fetcher.clone())
            .gather(&Query::new("q"), 5, &HashSet::new(), &CancellationToken::new())
            .await;
        assert_eq!(urls(&out), vec!["https://ok.com/x"]);
        assert_eq!(*fetcher.fetched.lock().unwrap(), vec!["https://ok.com/x".to_string()]);
    }

    #[tokio::test]
    async fn empty_page_ends_gathering() {
        let search = Arc::new(PagedSearch::new(vec![vec!["https://a.com/1"]]));
        let out = gatherer(search.clone(), Arc::new(StubFetcher::new()))
            .gather(&Query::new("q"), 5, &HashSet::new(), &CancellationToken::new())
            .await;
        assert_eq!(out.len(), 1);
        // Page 2 came back empty; page 3 was never requested.
        assert_eq!(search.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_yields_no_candidates() {
        let mut s = PagedSearch::new(vec![vec!["https://a.com/1"]]);
        s.fail = true;
        let out = gatherer(Arc::new(s), Arc::new(StubFetcher::new()))
            .gather(&Query::new("q"), 3, &HashSet::new(), &CancellationToken::new())
            .await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn site_filter_prefixes_the_query() {
        let search = Arc::new(PagedSearch::new(vec![]));
        let opts = SearchOptions {
            site_filter: Some("reuters.com".to_string()),
            ..SearchOptions::default()
        };
        SearchGatherer::new(search.clone(), Arc::new(StubFetcher::new()), opts)
            .gather(&Query::new("oil prices"), 3, &HashSet::new(), &CancellationToken::new())
            .await;
        assert_eq!(search.seen.lock().unwrap()[0].query, "site:reuters.com oil prices");
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_searching() {
        let search = Arc::new(PagedSearch::new(vec![vec!["https://a.com/1"]]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = gatherer(search.clone(), Arc::new(StubFetcher::new()))
            .gather(&Query::new("q"), 3, &HashSet::new(), &cancel)
            .await;
        assert!(out.is_empty());
        assert!(search.seen.lock().unwrap().is_empty());
    }
}
