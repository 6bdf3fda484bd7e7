// src/employee_search.rs
//
// Debounced employee lookup for the project-modal flow. Keystrokes
// arrive faster than the backend should be queried: only the input that
// survives the quiet period fetches, and only the newest initiated
// input is allowed to publish, whatever order the fetches finish in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::debug;

use crate::staffing_client::{EmployeeRef, StaffingApiError, StaffingBackend};

/// The latest published search outcome. Carries the query that produced
/// it so a consumer can ignore results for text it no longer shows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResults {
    pub query: String,
    pub employees: Vec<EmployeeRef>,
}

struct PublishState {
    last_published: u64,
    results_tx: watch::Sender<SearchResults>,
}

/// One search box. Each `submit_input` call represents one input
/// revision; revisions are numbered by a generation counter and the
/// channel only ever moves forward through them.
#[derive(Clone)]
pub struct EmployeeSearch {
    backend: Arc<dyn StaffingBackend>,
    quiet_period: Duration,
    generation: Arc<AtomicU64>,
    publish_state: Arc<Mutex<PublishState>>,
    results_rx: watch::Receiver<SearchResults>,
}

impl EmployeeSearch {
    pub fn new(backend: Arc<dyn StaffingBackend>, quiet_period: Duration) -> Self {
        let (results_tx, results_rx) = watch::channel(SearchResults::default());
        Self {
            backend,
            quiet_period,
            generation: Arc::new(AtomicU64::new(0)),
            publish_state: Arc::new(Mutex::new(PublishState {
                last_published: 0,
                results_tx,
            })),
            results_rx,
        }
    }

    /// A receiver over the published results, for consumers that watch
    /// rather than await individual inputs.
    pub fn subscribe(&self) -> watch::Receiver<SearchResults> {
        self.results_rx.clone()
    }

    pub fn latest(&self) -> SearchResults {
        self.results_rx.borrow().clone()
    }

    /// Feeds one input revision. Waits out the quiet period, fetches if
    /// no newer input arrived meanwhile, and publishes if the revision is
    /// still the newest when the fetch completes. `Ok(None)` means the
    /// revision was superseded; fetch errors surface only for a winning
    /// revision.
    pub async fn submit_input(
        &self,
        query: &str,
    ) -> Result<Option<SearchResults>, StaffingApiError> {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let trimmed = query.trim().to_string();

        sleep(self.quiet_period).await;
        if self.generation.load(Ordering::SeqCst) != my_generation {
            debug!("Search input {:?} superseded during the quiet period", trimmed);
            return Ok(None);
        }

        // Clearing the box publishes an empty result set without a fetch.
        let results = if trimmed.is_empty() {
            SearchResults::default()
        } else {
            match self.backend.search_employees(&trimmed).await {
                Ok(employees) => SearchResults {
                    query: trimmed,
                    employees,
                },
                Err(error) => {
                    // The error belongs to text the user no longer
                    // shows; only the newest input reports it.
                    if self.generation.load(Ordering::SeqCst) != my_generation {
                        debug!(
                            "Dropping fetch error for superseded input {:?}: {}",
                            trimmed, error
                        );
                        return Ok(None);
                    }
                    return Err(error);
                }
            }
        };

        if self.publish(my_generation, results.clone()).await {
            Ok(Some(results))
        } else {
            Ok(None)
        }
    }

    // Publishes under the lock so a slow old fetch can never land after
    // a newer one. Checked twice: the revision must still be the newest
    // input, and no later revision may have published already.
    async fn publish(&self, generation: u64, results: SearchResults) -> bool {
        let mut state = self.publish_state.lock().await;
        let current = self.generation.load(Ordering::SeqCst);
        if generation != current || generation <= state.last_published {
            debug!(
                "Dropping stale search results for {:?} (revision {} vs {})",
                results.query, generation, current
            );
            return false;
        }
        state.last_published = generation;
        // Send only fails with no receivers and we always hold one.
        let _ = state.results_tx.send(results);
        true
    }
}
