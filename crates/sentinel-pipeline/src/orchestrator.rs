//! The bounded search / assess / rephrase loop.
//!
//! Loop policy lives in [`LoopState::next`], a pure function of [`LoopProgress`]. The driver in
//! [`RetrievalOrchestrator::run`] performs the effects for each state and feeds the counters
//! back, so the policy can be exercised without any network.

use crate::assess::RelevanceAssessor;
use crate::gather::CandidateSource;
use crate::rephrase::QueryRephraser;
use crate::semantic::{is_unique_vector, SemanticRanker};
use futures_util::StreamExt;
use sentinel_core::{
    AssessedResult, CandidateResult, Error, Query, Result, RetrievalConfig, RunOutcome,
    SynthesisInput,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Searching,
    Assessing,
    Rephrasing,
    Ranking,
    Done,
    Empty,
}

/// Counters the transition function reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LoopProgress {
    /// Search attempts started so far.
    pub attempts: usize,
    /// Relevant documents accumulated so far.
    pub accumulated: usize,
    /// Candidates produced by the latest attempt.
    pub last_gathered: usize,
    pub target_count: usize,
    pub max_attempts: usize,
}

impl LoopProgress {
    pub fn new(target_count: usize, max_attempts: usize) -> Self {
        Self {
            target_count,
            max_attempts,
            ..Self::default()
        }
    }

    fn short(&self) -> bool {
        self.accumulated < self.target_count
    }

    fn attempts_remain(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

impl LoopState {
    /// Every run starts by rephrasing the raw query.
    pub const START: LoopState = LoopState::Rephrasing;

    pub fn next(self, p: &LoopProgress) -> LoopState {
        match self {
            LoopState::Rephrasing if p.short() && p.attempts_remain() => LoopState::Searching,
            LoopState::Rephrasing => LoopState::Ranking,
            // Zero raw candidates means the provider is exhausted: stop retrying.
            LoopState::Searching if p.last_gathered == 0 => LoopState::Ranking,
            LoopState::Searching => LoopState::Assessing,
            LoopState::Assessing if p.short() && p.attempts_remain() => LoopState::Rephrasing,
            LoopState::Assessing => LoopState::Ranking,
            LoopState::Ranking if p.accumulated == 0 => LoopState::Empty,
            LoopState::Ranking => LoopState::Done,
            LoopState::Done => LoopState::Done,
            LoopState::Empty => LoopState::Empty,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Done | LoopState::Empty)
    }
}

pub struct RetrievalOrchestrator {
    source: Arc<dyn CandidateSource>,
    assessor: RelevanceAssessor,
    rephraser: QueryRephraser,
    ranker: SemanticRanker,
    config: RetrievalConfig,
}

/// Mutable state of one run. Dropped when the run returns.
struct RunState {
    query: Query,
    progress: LoopProgress,
    accumulated: Vec<AssessedResult>,
    batch: Vec<CandidateResult>,
    seen_urls: HashSet<String>,
    kept_vectors: Vec<Vec<f32>>,
}

impl RetrievalOrchestrator {
    pub fn new(
        source: Arc<dyn CandidateSource>,
        assessor: RelevanceAssessor,
        rephraser: QueryRephraser,
        ranker: SemanticRanker,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            source,
            assessor,
            rephraser,
            ranker,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve up to `target_count` relevant documents in at most `max_attempts` attempts.
    ///
    /// Per-call failures never surface here. The only error is `Error::Cancelled`, checked
    /// before every attempt and every rephrase.
    pub async fn run(
        &self,
        query: &Query,
        chat_context: &str,
        target_count: usize,
        max_attempts: usize,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let mut run = RunState {
            query: query.clone(),
            progress: LoopProgress::new(target_count, max_attempts),
            accumulated: Vec::new(),
            batch: Vec::new(),
            seen_urls: HashSet::new(),
            kept_vectors: Vec::new(),
        };
        let mut state = LoopState::START;
        let mut ranked: Option<SynthesisInput> = None;

        loop {
            tracing::debug!(?state, attempts = run.progress.attempts, accumulated = run.progress.accumulated, "loop step");
            match state {
                LoopState::Rephrasing => {
                    check(cancel)?;
                    run.query = self.rephraser.rephrase(&run.query, chat_context).await;
                }
                LoopState::Searching => {
                    check(cancel)?;
                    let need = target_count.saturating_sub(run.accumulated.len());
                    run.batch = self
                        .source
                        .gather(&run.query, need, &run.seen_urls, cancel)
                        .await;
                    check(cancel)?;
                    run.progress.attempts += 1;
                    run.progress.last_gathered = run.batch.len();
                    tracing::info!(
                        attempt = run.progress.attempts,
                        query = %run.query,
                        candidates = run.batch.len(),
                        "search attempt"
                    );
                }
                LoopState::Assessing => {
                    let batch = std::mem::take(&mut run.batch);
                    let (fresh, vectors) = self.suppress_duplicates(batch, &mut run).await;
                    let assessed = self.assess_all(&run.query, fresh).await;
                    for (a, v) in assessed.into_iter().zip(vectors) {
                        if a.relevant {
                            run.kept_vectors.extend(v);
                            run.accumulated.push(a);
                        }
                    }
                    run.progress.accumulated = run.accumulated.len();
                    tracing::info!(
                        attempt = run.progress.attempts,
                        accumulated = run.progress.accumulated,
                        target = target_count,
                        "attempt assessed"
                    );
                }
                LoopState::Ranking => {
                    if !run.accumulated.is_empty() {
                        let documents = self
                            .ranker
                            .rerank(
                                &run.query,
                                std::mem::take(&mut run.accumulated),
                                self.config.similarity_threshold,
                                self.config.max_results,
                                &self.config.preferred_domains,
                            )
                            .await;
                        ranked = Some(SynthesisInput::new(run.query.clone(), documents));
                    }
                }
                LoopState::Done | LoopState::Empty => {
                    return Ok(match ranked.take() {
                        Some(input) => {
                            tracing::info!(
                                attempts = run.progress.attempts,
                                documents = input.documents().len(),
                                "retrieval done"
                            );
                            RunOutcome::Ready(input)
                        }
                        None => {
                            tracing::info!(attempts = run.progress.attempts, "no relevant content found");
                            RunOutcome::Empty
                        }
                    });
                }
            }
            state = state.next(&run.progress);
        }
    }

    /// Drop candidates whose URL was already seen or whose text nearly repeats an accumulated
    /// document or an earlier candidate of the same batch.
    ///
    /// Returns the survivors with their content vectors (absent when dedup is off or the
    /// embedding failed).
    async fn suppress_duplicates(
        &self,
        batch: Vec<CandidateResult>,
        run: &mut RunState,
    ) -> (Vec<CandidateResult>, Vec<Option<Vec<f32>>>) {
        let mut out = Vec::with_capacity(batch.len());
        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(batch.len());
        for c in batch {
            if !run.seen_urls.insert(c.url.clone()) {
                tracing::debug!(url = %c.url, "duplicate url dropped");
                continue;
            }
            let mut vector = None;
            if let Some(threshold) = self.config.dedup_threshold {
                match self.ranker.embed(&c.extracted_text).await {
                    Ok(v) => {
                        let earlier = vectors.iter().flatten().cloned();
                        let known: Vec<Vec<f32>> =
                            run.kept_vectors.iter().cloned().chain(earlier).collect();
                        if !is_unique_vector(&v, &known, threshold) {
                            tracing::debug!(url = %c.url, "near-duplicate content dropped");
                            continue;
                        }
                        vector = Some(v);
                    }
                    Err(e) => {
                        tracing::debug!(url = %c.url, error = %e, "dedup embedding failed; keeping candidate")
                    }
                }
            }
            vectors.push(vector);
            out.push(c);
        }
        (out, vectors)
    }

    /// Assess concurrently; results come back in input order.
    async fn assess_all(&self, query: &Query, batch: Vec<CandidateResult>) -> Vec<AssessedResult> {
        futures_util::stream::iter(
            batch
                .into_iter()
                .map(|c| self.assessor.assess(query, c)),
        )
        .buffered(self.config.concurrency.max(1))
        .collect()
        .await
    }
}

fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Drive the pure state machine with scripted per-attempt `(gathered, relevant)` counts.
    /// Returns every visited state with the progress it was left with.
    fn simulate(
        target: usize,
        max_attempts: usize,
        script: &[(usize, usize)],
    ) -> Vec<(LoopState, LoopProgress)> {
        let mut p = LoopProgress::new(target, max_attempts);
        let mut s = LoopState::START;
        let mut trace = Vec::new();
        for _ in 0..1000 {
            match s {
                LoopState::Searching => {
                    let (g, _) = script.get(p.attempts).copied().unwrap_or((0, 0));
                    p.attempts += 1;
                    p.last_gathered = g;
                }
                LoopState::Assessing => {
                    let (g, r) = script.get(p.attempts - 1).copied().unwrap_or((0, 0));
                    p.accumulated += r.min(g);
                }
                _ => {}
            }
            trace.push((s, p));
            if s.is_terminal() {
                break;
            }
            s = s.next(&p);
        }
        trace
    }

    fn states(trace: &[(LoopState, LoopProgress)]) -> Vec<LoopState> {
        trace.iter().map(|(s, _)| *s).collect()
    }

    fn end(trace: &[(LoopState, LoopProgress)]) -> (LoopState, LoopProgress) {
        *trace.last().unwrap()
    }

    #[test]
    fn stops_once_target_is_met() {
        let (s, p) = end(&simulate(3, 3, &[(5, 2), (4, 2), (9, 9)]));
        assert_eq!(s, LoopState::Done);
        assert_eq!(p.attempts, 2);
        assert_eq!(p.accumulated, 4);
    }

    #[test]
    fn empty_first_attempt_short_circuits_to_empty() {
        let trace = simulate(3, 3, &[(0, 0), (5, 5)]);
        assert_eq!(
            states(&trace),
            vec![
                LoopState::Rephrasing,
                LoopState::Searching,
                LoopState::Ranking,
                LoopState::Empty
            ]
        );
        assert_eq!(end(&trace).1.attempts, 1);
    }

    #[test]
    fn short_but_nonempty_proceeds_to_ranking() {
        let (s, p) = end(&simulate(3, 2, &[(3, 1), (3, 0)]));
        assert_eq!(s, LoopState::Done);
        assert_eq!(p.attempts, 2);
    }

    #[test]
    fn zero_attempts_still_rephrases_then_ends_empty() {
        let trace = simulate(3, 0, &[(5, 5)]);
        assert_eq!(
            states(&trace),
            vec![LoopState::Rephrasing, LoopState::Ranking, LoopState::Empty]
        );
    }

    proptest! {
        #[test]
        fn loop_policy_invariants(
            target in 0usize..6,
            max_attempts in 0usize..5,
            script in prop::collection::vec((0usize..6, 0usize..6), 0..6),
        ) {
            let trace = simulate(target, max_attempts, &script);
            let (last, p) = end(&trace);
            prop_assert!(last.is_terminal());
            prop_assert!(p.attempts <= max_attempts);
            prop_assert_eq!(last == LoopState::Empty, p.accumulated == 0);

            let visited = states(&trace);
            let searches = visited.iter().filter(|s| **s == LoopState::Searching).count();
            prop_assert_eq!(searches, p.attempts);
            prop_assert_eq!(visited[0], LoopState::Rephrasing);

            for (i, (s, progress)) in trace.iter().enumerate() {
                // A retry is only scheduled while short of target with attempts left.
                if *s == LoopState::Rephrasing && i > 0 {
                    prop_assert!(progress.accumulated < target);
                    prop_assert!(progress.attempts < max_attempts);
                }
                // Nothing is searched after an attempt that gathered no candidates.
                if *s == LoopState::Searching && progress.last_gathered == 0 {
                    prop_assert!(!visited[i + 1..].contains(&LoopState::Searching));
                }
            }
        }
    }
}
