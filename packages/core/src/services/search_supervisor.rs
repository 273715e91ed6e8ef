//! Debounced Search Supervisor
//!
//! User-driven search input is bursty: every keystroke changes the
//! query. The supervisor coalesces rapid successive submissions
//! (debounce) and guarantees that only the latest submission's result is
//! ever surfaced (cancellation), regardless of the order in which
//! in-flight searches complete.
//!
//! ## Generation discipline
//!
//! Every submission is tagged with a monotonically increasing generation
//! number. A pending task re-checks the latest generation after its
//! debounce sleep and again after the search executes; a task whose
//! generation is no longer the latest discards its result silently. A
//! superseded search is not an error - it is simply dropped. On top of
//! the generation checks, each new submission aborts the previously
//! pending task so suppressed queries normally never execute at all.

use crate::models::{Entity, EntityFilter};
use crate::services::error::ServiceError;
use crate::services::search_service::SearchService;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Supervisor tuning knobs.
#[derive(Debug, Clone)]
pub struct SearchSupervisorConfig {
    /// Quiet period a query must survive before it executes
    pub debounce: Duration,
    /// Result limit passed to every executed search
    pub limit: usize,
    /// Buffered outcomes before the supervisor applies backpressure
    pub channel_capacity: usize,
}

impl Default for SearchSupervisorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            limit: 20,
            channel_capacity: 16,
        }
    }
}

/// An accepted search result, tagged with the generation that produced
/// it. Generations arrive strictly increasing on the outcome channel.
#[derive(Debug)]
pub struct SearchOutcome {
    pub generation: u64,
    pub query: String,
    pub results: Vec<Entity>,
}

/// Debouncing, cancelling front door for [`SearchService`].
pub struct SearchSupervisor {
    service: Arc<SearchService>,
    config: SearchSupervisorConfig,
    generation: Arc<AtomicU64>,
    pending: Mutex<Option<JoinHandle<()>>>,
    outcome_tx: mpsc::Sender<SearchOutcome>,
}

impl SearchSupervisor {
    /// Create a supervisor and the receiving end of its outcome channel.
    pub fn new(
        service: Arc<SearchService>,
        config: SearchSupervisorConfig,
    ) -> (Self, mpsc::Receiver<SearchOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::channel(config.channel_capacity.max(1));
        (
            Self {
                service,
                config,
                generation: Arc::new(AtomicU64::new(0)),
                pending: Mutex::new(None),
                outcome_tx,
            },
            outcome_rx,
        )
    }

    /// Submit a query, superseding any pending one. Returns the
    /// generation assigned to this submission; the matching
    /// [`SearchOutcome`] arrives on the channel only if no newer
    /// submission supersedes it first.
    pub fn submit(&self, query: impl Into<String>, filter: EntityFilter) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query = query.into();

        // Abort the previously pending task; its generation is stale
        // either way, this just stops it from burning an embedding call.
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        let service = Arc::clone(&self.service);
        let latest = Arc::clone(&self.generation);
        let outcome_tx = self.outcome_tx.clone();
        let debounce = self.config.debounce;
        let limit = self.config.limit;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if latest.load(Ordering::SeqCst) != generation {
                // Superseded while waiting out the quiet period.
                return;
            }

            match service.search(&query, &filter, limit).await {
                Ok(results) => {
                    // Completion order is not issuance order; re-check
                    // before publishing so a slow old search can never
                    // overwrite a newer answer.
                    if latest.load(Ordering::SeqCst) != generation {
                        tracing::debug!(generation, "Discarding superseded search result");
                        return;
                    }
                    let _ = outcome_tx
                        .send(SearchOutcome {
                            generation,
                            query,
                            results,
                        })
                        .await;
                }
                Err(e) => {
                    tracing::warn!(generation, "Search failed: {}", e);
                }
            }
        });

        *pending = Some(handle);
        generation
    }

    /// The most recently issued generation.
    pub fn latest_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Run one search immediately, bypassing debounce and generations.
    /// For non-interactive callers that want coordinator semantics
    /// without the supervisor's session behavior.
    pub async fn search_now(
        &self,
        query: &str,
        filter: &EntityFilter,
    ) -> Result<Vec<Entity>, ServiceError> {
        self.service.search(query, filter, self.config.limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseService;
    use crate::index::VectorIndex;
    use crate::models::{EntityKind, EntityPayload};
    use crate::services::entity_service::EntityService;
    use crate::models::Entity as EntityModel;
    use mercato_embed_engine::HashingEmbedder;
    use tempfile::TempDir;

    async fn create_test_supervisor(
        debounce_ms: u64,
    ) -> anyhow::Result<(SearchSupervisor, mpsc::Receiver<SearchOutcome>, TempDir)> {
        let temp_dir = TempDir::new()?;
        let db = Arc::new(DatabaseService::open(temp_dir.path().join("test.db")).await?);
        let embedder = Arc::new(HashingEmbedder::new(64));
        let index = Arc::new(VectorIndex::new(db.clone(), embedder));
        let entities = Arc::new(EntityService::new(db, index));

        let payload = EntityPayload {
            description: Some("Pipe repair and installation".to_string()),
            ..Default::default()
        };
        entities
            .create_entity(EntityModel::new(
                EntityKind::Service,
                "Selvam Plumbing",
                payload,
            ))
            .await?;

        let service = Arc::new(SearchService::new(entities));
        let config = SearchSupervisorConfig {
            debounce: Duration::from_millis(debounce_ms),
            limit: 10,
            channel_capacity: 8,
        };
        let (supervisor, outcome_rx) = SearchSupervisor::new(service, config);
        Ok((supervisor, outcome_rx, temp_dir))
    }

    #[tokio::test]
    async fn test_rapid_submissions_execute_once() -> anyhow::Result<()> {
        let (supervisor, mut outcomes, _tmp) = create_test_supervisor(50).await?;

        supervisor.submit("p", EntityFilter::default());
        supervisor.submit("pi", EntityFilter::default());
        let last = supervisor.submit("pipe repair", EntityFilter::default());

        let outcome = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
            .await?
            .expect("channel open");
        assert_eq!(outcome.generation, last);
        assert_eq!(outcome.query, "pipe repair");
        assert!(!outcome.results.is_empty());

        // The suppressed earlier queries never surface.
        let extra = tokio::time::timeout(Duration::from_millis(200), outcomes.recv()).await;
        assert!(extra.is_err(), "suppressed query leaked an outcome");
        Ok(())
    }

    #[tokio::test]
    async fn test_spaced_submissions_both_surface() -> anyhow::Result<()> {
        let (supervisor, mut outcomes, _tmp) = create_test_supervisor(20).await?;

        let first = supervisor.submit("pipe", EntityFilter::default());
        tokio::time::sleep(Duration::from_millis(400)).await;
        let second = supervisor.submit("repair", EntityFilter::default());

        let a = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
            .await?
            .expect("channel open");
        let b = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
            .await?
            .expect("channel open");

        assert_eq!(a.generation, first);
        assert_eq!(b.generation, second);
        assert!(a.generation < b.generation);
        Ok(())
    }

    #[tokio::test]
    async fn test_generation_counter_is_monotonic() -> anyhow::Result<()> {
        let (supervisor, _outcomes, _tmp) = create_test_supervisor(10).await?;

        let g1 = supervisor.submit("a", EntityFilter::default());
        let g2 = supervisor.submit("b", EntityFilter::default());
        let g3 = supervisor.submit("c", EntityFilter::default());
        assert!(g1 < g2 && g2 < g3);
        assert_eq!(supervisor.latest_generation(), g3);
        Ok(())
    }

    #[tokio::test]
    async fn test_search_now_bypasses_debounce() -> anyhow::Result<()> {
        let (supervisor, _outcomes, _tmp) = create_test_supervisor(10_000).await?;

        let results = supervisor
            .search_now("pipe repair", &EntityFilter::default())
            .await?;
        assert!(!results.is_empty());
        Ok(())
    }
}
