//! Concurrent sub-query execution under one request deadline

use crate::retrieval::{Backend, Query, RetrievalHit, Retriever, RetrieverError, SubQueryStats};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Hits and sub-query outcomes from one fan-out
#[derive(Debug, Default)]
pub struct FanoutOutcome {
    pub dense: Vec<RetrievalHit>,
    pub sparse: Vec<RetrievalHit>,
    pub dense_stats: SubQueryStats,
    pub sparse_stats: SubQueryStats,
    pub latency: Duration,
}

impl FanoutOutcome {
    fn stats_mut(&mut self, backend: Backend) -> &mut SubQueryStats {
        match backend {
            Backend::Dense => &mut self.dense_stats,
            Backend::Sparse => &mut self.sparse_stats,
        }
    }
}

/// Runs every sub-query of a request concurrently against its backend
///
/// At most `min(query_count, max_workers)` sub-queries run at once. When the
/// deadline passes, unfinished sub-queries are aborted and counted as timed
/// out. Failures of individual sub-queries are logged and excluded.
pub struct QueryFanoutExecutor {
    dense: Arc<dyn Retriever>,
    sparse: Arc<dyn Retriever>,
    timeout: Duration,
    max_workers: usize,
}

impl QueryFanoutExecutor {
    pub fn new(
        dense: Arc<dyn Retriever>,
        sparse: Arc<dyn Retriever>,
        timeout: Duration,
        max_workers: usize,
    ) -> Self {
        Self {
            dense,
            sparse,
            timeout,
            max_workers: max_workers.max(1),
        }
    }

    fn retriever(&self, backend: Backend) -> Arc<dyn Retriever> {
        match backend {
            Backend::Dense => self.dense.clone(),
            Backend::Sparse => self.sparse.clone(),
        }
    }

    /// Execute `queries` in `domain`, `k` hits each
    ///
    /// Returns once every sub-query finished or the deadline passed. Dropping
    /// the returned future aborts all of this call's sub-queries.
    pub async fn run(&self, domain: &str, queries: Vec<Query>, k: usize) -> FanoutOutcome {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut outcome = FanoutOutcome::default();

        if queries.is_empty() {
            return outcome;
        }

        let semaphore = Arc::new(Semaphore::new(queries.len().min(self.max_workers)));
        let mut tasks = JoinSet::new();
        let mut pending: BTreeMap<usize, Query> = BTreeMap::new();

        for (index, query) in queries.into_iter().enumerate() {
            outcome.stats_mut(query.kind).issued += 1;

            let retriever = self.retriever(query.kind);
            let semaphore = semaphore.clone();
            let text = query.text.clone();
            let domain = domain.to_string();

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(permit) => {
                        let result = retriever.search(&text, &domain, k).await;
                        drop(permit);
                        result
                    }
                    Err(e) => Err(RetrieverError::Task(e.to_string())),
                };
                (index, result)
            });
            pending.insert(index, query);
        }

        // Results land in per-query slots so merge order never depends on timing
        let mut completed = BTreeMap::new();
        let mut deadline_hit = false;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, result)))) => {
                    let Some(query) = pending.remove(&index) else {
                        continue;
                    };
                    match result {
                        Ok(chunks) => {
                            tracing::debug!(
                                "{} sub-query {:?} returned {} hits",
                                query.kind,
                                query.text,
                                chunks.len()
                            );
                            outcome.stats_mut(query.kind).succeeded += 1;
                            completed.insert(index, (query.kind, chunks));
                        }
                        Err(e) => {
                            tracing::warn!("{} sub-query {:?} failed: {}", query.kind, query.text, e);
                            outcome.stats_mut(query.kind).failed += 1;
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    // The panicked sub-query stays pending and is counted below
                    tracing::warn!("Sub-query task failed: {}", e);
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Fan-out deadline of {:?} reached with {} sub-queries outstanding",
                        self.timeout,
                        pending.len()
                    );
                    deadline_hit = true;
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        for query in pending.into_values() {
            let stats = outcome.stats_mut(query.kind);
            if deadline_hit {
                stats.timed_out += 1;
            } else {
                stats.failed += 1;
            }
        }

        for (kind, chunks) in completed.into_values() {
            let hits = chunks
                .into_iter()
                .map(|chunk| RetrievalHit::from_chunk(kind, chunk));
            match kind {
                Backend::Dense => outcome.dense.extend(hits),
                Backend::Sparse => outcome.sparse.extend(hits),
            }
        }

        outcome.latency = started.elapsed();
        outcome
    }
}
