use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;

use crate::ai::ClassificationOracle;
use crate::config::AiConfig;
use crate::error::{Result, SearchError};
use crate::search::{build_matcher, run_search, SearchEvent, SearchQuery};
use crate::source::MessageSource;

/// Lifecycle of a single search invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchState {
    #[default]
    Idle,
    Running,
    Completed,
    Aborted,
}

impl SearchState {
    /// State after observing `event`.
    pub fn advance(self, event: &SearchEvent) -> SearchState {
        match event {
            SearchEvent::Started { .. }
            | SearchEvent::Scanning { .. }
            | SearchEvent::Match(_) => SearchState::Running,
            SearchEvent::Completed(_) => SearchState::Completed,
            SearchEvent::Aborted(_) => SearchState::Aborted,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, SearchState::Completed | SearchState::Aborted)
    }
}

/// Receiving end of a started search.
pub struct SearchHandle {
    pub events: UnboundedReceiver<SearchEvent>,
    task: JoinHandle<()>,
}

impl SearchHandle {
    /// Wait for the background task to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!("Search task failed: {}", e);
        }
    }
}

/// Clears the in-flight flag when the search task ends, however it ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs searches in the background, one at a time.
pub struct SearchController<S: MessageSource + 'static> {
    source: Arc<S>,
    oracle: Arc<dyn ClassificationOracle>,
    ai: AiConfig,
    running: Arc<AtomicBool>,
}

impl<S: MessageSource + 'static> SearchController<S> {
    pub fn new(source: Arc<S>, oracle: Arc<dyn ClassificationOracle>, ai: AiConfig) -> Self {
        Self {
            source,
            oracle,
            ai,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start `query` on a background task and return its event stream.
    ///
    /// Fails with `AlreadyRunning` if a search is in flight; the request is
    /// dropped, not queued. The final event is always `Completed` or `Aborted`.
    pub fn start(&self, query: SearchQuery) -> Result<SearchHandle> {
        let matcher = build_matcher(&query, Arc::clone(&self.oracle), &self.ai)?;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SearchError::AlreadyRunning);
        }
        let guard = RunningGuard(Arc::clone(&self.running));

        let (tx, rx) = mpsc::unbounded_channel();
        let source = Arc::clone(&self.source);
        let concurrency = self.ai.concurrency;

        let task = tokio::spawn(async move {
            let outcome = run_search(source.as_ref(), &matcher, &query, concurrency, &tx).await;
            // Release before the final event so a listener can start the next search right away.
            drop(guard);
            let last = match outcome {
                Ok(summary) => SearchEvent::Completed(summary),
                Err(e) => {
                    error!("Search aborted: {}", e);
                    SearchEvent::Aborted(e)
                }
            };
            if tx.send(last).is_err() {
                info!("Search finished after its listener went away");
            }
        });

        Ok(SearchHandle { events: rx, task })
    }
}
