use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::SuggestionList,
    services::{locks::UserLocks, similarity::SimilarityEngine, suggestions::SuggestionEngine},
};

/// The similarity → suggestion recompute chain for one user
///
/// `run` holds the user's lock for the whole chain, so two recomputes for the
/// same user never interleave and the suggestion stage always reads the index
/// written by the similarity stage right before it.
#[derive(Clone)]
pub struct RecomputePipeline {
    similars: Arc<SimilarityEngine>,
    suggestions: Arc<SuggestionEngine>,
    locks: UserLocks,
}

impl RecomputePipeline {
    pub fn new(
        similars: Arc<SimilarityEngine>,
        suggestions: Arc<SuggestionEngine>,
        locks: UserLocks,
    ) -> Self {
        Self {
            similars,
            suggestions,
            locks,
        }
    }

    pub async fn run(&self, user_id: Uuid) -> AppResult<SuggestionList> {
        let _guard = self.locks.acquire(user_id).await;
        self.run_locked(user_id).await
    }

    /// Runs the chain; the caller must hold `user_id`'s lock
    ///
    /// A failure in the suggestion stage leaves the freshly persisted similarity
    /// index in place; both stages are safe to re-run.
    pub async fn run_locked(&self, user_id: Uuid) -> AppResult<SuggestionList> {
        self.similars.update(user_id).await?;
        self.suggestions.update(user_id).await
    }
}

/// Sender side of the background recompute queue
#[derive(Clone)]
pub struct RecomputeQueue {
    tx: mpsc::UnboundedSender<Uuid>,
    pending: Arc<DashSet<Uuid>>,
}

impl RecomputeQueue {
    /// Schedules a recompute for `user_id`
    ///
    /// Returns false when the request was coalesced into one that is already
    /// queued but not started, or when the worker has shut down.
    pub fn schedule(&self, user_id: Uuid) -> bool {
        if !self.pending.insert(user_id) {
            tracing::debug!(user_id = %user_id, "Recompute already queued");
            return false;
        }

        if let Err(e) = self.tx.send(user_id) {
            self.pending.remove(&user_id);
            tracing::warn!(error = %e, "Recompute worker is not running");
            return false;
        }
        true
    }
}

/// Handle for gracefully shutting down the recompute worker
pub struct RecomputeWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl RecomputeWorkerHandle {
    /// Stops the worker after every queued and in-flight recompute has finished
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Recompute worker shutdown signal sent");
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Recompute worker terminated abnormally");
        }
    }
}

/// Spawns the background recompute worker
///
/// Scheduled recomputes run concurrently across users; each one takes the
/// user's lock, so they queue up behind any in-flight request for that user.
pub fn spawn_worker(pipeline: RecomputePipeline) -> (RecomputeQueue, RecomputeWorkerHandle) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    let pending = Arc::new(DashSet::new());

    let join = tokio::spawn(worker_task(pipeline, pending.clone(), rx, shutdown_rx));

    (
        RecomputeQueue { tx, pending },
        RecomputeWorkerHandle { shutdown_tx, join },
    )
}

fn start(
    tasks: &mut JoinSet<()>,
    pipeline: &RecomputePipeline,
    pending: &Arc<DashSet<Uuid>>,
    user_id: Uuid,
) {
    let pipeline = pipeline.clone();
    let pending = pending.clone();
    tasks.spawn(async move {
        let _guard = pipeline.locks.acquire(user_id).await;
        // Triggers arriving from here on need a fresh run
        pending.remove(&user_id);

        match pipeline.run_locked(user_id).await {
            Ok(list) => tracing::info!(
                user_id = %user_id,
                generation = list.generation,
                items = list.items.len(),
                "Background recompute finished"
            ),
            Err(e) => tracing::error!(
                user_id = %user_id,
                error = %e,
                "Background recompute failed"
            ),
        }
    });
}

async fn worker_task(
    pipeline: RecomputePipeline,
    pending: Arc<DashSet<Uuid>>,
    mut rx: mpsc::UnboundedReceiver<Uuid>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    tracing::info!("Recompute worker started");
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            Some(user_id) = rx.recv() => {
                start(&mut tasks, &pipeline, &pending, user_id);
            }
            Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Recompute task panicked");
                }
            }
            Some(()) = shutdown_rx.recv() => {
                rx.close();
                while let Some(user_id) = rx.recv().await {
                    start(&mut tasks, &pipeline, &pending, user_id);
                }

                tracing::info!(in_flight = tasks.len(), "Recompute worker draining");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "Recompute task panicked");
                    }
                }

                tracing::info!("Recompute worker stopped");
                break;
            }
            else => {
                tracing::info!("Recompute queue closed, worker exiting");
                break;
            }
        }
    }
}
