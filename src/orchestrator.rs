// src/orchestrator.rs - Orchestrator: owns the worker pool as OS processes,
// dispatches against the Store's queue, and supervises per-job timeouts.

use crate::config::RunConfig;
use crate::core::errors::{FoodSetError, Result};
use crate::store::Store;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Whether the dispatch loop returned because the queue drained or because a
/// `Ctrl-C`/`SIGINT` interrupted it.
enum RunEnd {
    Drained,
    Interrupted,
}

/// How often the dispatch loop polls the Store for queue/timeout state.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long the loop keeps polling after the queue first appears empty,
/// since a worker still running its solve may be about to insert new
/// exclusions via queue expansion.
const GRACE_INTERVAL: Duration = Duration::from_secs(2);

struct TrackedWorker {
    child: Child,
}

/// Drives one end-to-end run: spawns `config.worker_count` worker processes,
/// feeds them from the Store's queue indirectly (workers self-serve via
/// `claim`), and kills+respawns any worker whose job exceeds
/// `config.job_timeout_secs`.
pub struct Orchestrator {
    store: Store,
    config: RunConfig,
    next_worker_seq: u64,
}

impl Orchestrator {
    pub fn new(store: Store, config: RunConfig) -> Self {
        Self {
            store,
            config,
            next_worker_seq: 0,
        }
    }

    fn next_worker_id(&mut self) -> String {
        self.next_worker_seq += 1;
        format!("worker-{}", self.next_worker_seq)
    }

    fn spawn_worker(&self, worker_id: &str) -> Result<Child> {
        let exe = std::env::current_exe()?;
        let child = Command::new(exe)
            .arg("worker")
            .arg("--store")
            .arg(&self.config.store_path)
            .arg("--requirements")
            .arg(&self.config.requirements_path)
            .arg("--foods")
            .arg(&self.config.foods_path)
            .arg("--cardinality")
            .arg(self.config.cardinality.to_string())
            .arg("--worker-id")
            .arg(worker_id)
            .kill_on_drop(true)
            .spawn()
            .map_err(FoodSetError::Io)?;
        info!(worker_id, "spawned worker process");
        Ok(child)
    }

    /// Clears `start_time`/`claimed_by` on every row left `in_progress` by a
    /// prior run that was interrupted or crashed, so `run()` picks them back
    /// up as pending. Spec.md §4.6/§7's "manual resume" path; callers opt in
    /// explicitly (e.g. `foodset solve --resume`) rather than this running
    /// implicitly on every start, since silently re-queuing an actually-live
    /// job from a still-running sibling process would be wrong.
    pub async fn resume(&self) -> Result<u64> {
        self.store.initialize().await?;
        let requeued = self.store.requeue_orphaned().await?;
        if requeued > 0 {
            info!(requeued, "requeued orphaned in-progress exclusions");
        }
        Ok(requeued)
    }

    /// Runs the full solve: initializes the Store, spawns the worker pool,
    /// supervises job timeouts, and returns once the queue is drained and
    /// every in-flight job has finished. A `Ctrl-C`/`SIGINT` during the run
    /// is caught: the dispatch loop stops, worker processes are dropped
    /// (killed via `kill_on_drop`), any exclusion they had claimed is left
    /// `in_progress` in the Store for a later `resume()`, and `Err` is
    /// returned so the CLI exits non-zero.
    pub async fn run(&mut self) -> Result<()> {
        self.store.initialize().await?;

        let mut workers: HashMap<String, TrackedWorker> = HashMap::new();
        for _ in 0..self.config.worker_count {
            let id = self.next_worker_id();
            let child = self.spawn_worker(&id)?;
            workers.insert(id, TrackedWorker { child });
        }

        let end = tokio::select! {
            result = self.dispatch_loop(&mut workers) => result?,
            _ = tokio::signal::ctrl_c() => {
                warn!("received interrupt, aborting run; in-progress exclusions remain claimed for a later resume");
                RunEnd::Interrupted
            }
        };

        match end {
            RunEnd::Drained => {
                info!(
                    solutions = self.store.solution_count().await.unwrap_or(-1),
                    "solve complete, queue drained"
                );
                Ok(())
            }
            RunEnd::Interrupted => {
                // Dropping `workers` here kills every still-running child
                // (`kill_on_drop(true)`); their claimed rows stay in_progress.
                drop(workers);
                Err(FoodSetError::Interrupted)
            }
        }
    }

    /// Polls the Store for queue/timeout state until the queue is drained
    /// and no worker is in progress, or forever if neither ever happens
    /// (the caller races this against a signal future).
    async fn dispatch_loop(&mut self, workers: &mut HashMap<String, TrackedWorker>) -> Result<RunEnd> {
        let mut empty_since: Option<std::time::Instant> = None;

        loop {
            self.reap_finished(workers);
            self.supervise_timeouts(workers).await?;

            let work_remaining = self.store.has_work().await?;
            if !work_remaining && workers.is_empty() {
                match empty_since {
                    None => empty_since = Some(std::time::Instant::now()),
                    Some(since) if since.elapsed() >= GRACE_INTERVAL => return Ok(RunEnd::Drained),
                    Some(_) => {}
                }
            } else {
                empty_since = None;
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    /// Removes workers whose process has exited (normally, or because a
    /// real error surfaced); their claimed job, if any, is picked up by the
    /// timeout supervisor once its deadline passes.
    fn reap_finished(&self, workers: &mut HashMap<String, TrackedWorker>) {
        workers.retain(|id, w| match w.child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    warn!(worker_id = %id, ?status, "worker process exited with failure");
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!(worker_id = %id, error = %e, "failed to poll worker process status");
                true
            }
        });
    }

    /// Finds in-progress jobs past `job_timeout_secs`, kills the owning
    /// worker process, marks the job timed out in the Store, and spawns a
    /// replacement worker in its place.
    async fn supervise_timeouts(&mut self, workers: &mut HashMap<String, TrackedWorker>) -> Result<()> {
        let deadline = Utc::now() - chrono::Duration::seconds(self.config.job_timeout_secs as i64);
        let timed_out = self.store.timed_out_workers(deadline).await?;

        for (exclusion, worker_id) in timed_out {
            warn!(worker_id = %worker_id, exclusion = %exclusion.canonical_key(), "job exceeded timeout, killing worker");

            if let Some(mut tracked) = workers.remove(&worker_id) {
                let _ = tracked.child.kill().await;
            }

            self.store.complete(&exclusion, true, vec![], self.config.cardinality).await?;

            let new_id = self.next_worker_id();
            let child = self.spawn_worker(&new_id)?;
            workers.insert(new_id, TrackedWorker { child });
        }

        Ok(())
    }
}
