// src/worker.rs - Worker: the long-lived process loop run as the `worker`
// subcommand's child process. Claims one exclusion at a time, solves it
// over the reduced catalog, and reports back through the Store.

use crate::catalog::load_catalog;
use crate::collector::SolutionCollector;
use crate::config::RunConfig;
use crate::core::errors::Result;
use crate::model::{solve_all_food_sets, SolveOutcome};
use crate::store::Store;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Backs off briefly when `claim` finds nothing, rather than hot-looping
/// against the Store while waiting for queue expansion from sibling workers.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How many consecutive empty claims this worker tolerates before deciding
/// the run is over and exiting.
const IDLE_EXIT_AFTER: usize = 10;

/// Runs the claim/solve/complete loop until the queue is drained (observed
/// as `IDLE_EXIT_AFTER` consecutive empty claims with no pending work).
pub async fn run_worker(config: &RunConfig, worker_id: &str) -> Result<()> {
    let store = Store::connect(&config.store_path).await?;
    let catalog = load_catalog(&config.requirements_path, &config.foods_path)?;

    info!(worker_id, "worker started");

    let mut idle_rounds = 0usize;
    while idle_rounds < IDLE_EXIT_AFTER {
        let Some(exclusion) = store.claim(worker_id).await? else {
            idle_rounds += 1;
            sleep(IDLE_POLL_INTERVAL).await;
            continue;
        };
        idle_rounds = 0;

        info!(worker_id, exclusion = %exclusion.canonical_key(), "claimed job");

        let foods = catalog.effective_foods(exclusion.ids());
        let mut collector = SolutionCollector::new();
        let outcome = solve_all_food_sets(&foods, catalog.bands(), config.cardinality, &mut collector);

        match outcome {
            Ok(SolveOutcome::Solved { solutions_found }) => {
                info!(worker_id, solutions_found, "job solved");
                store
                    .complete(&exclusion, false, collector.into_solutions(), config.cardinality)
                    .await?;
            }
            Ok(SolveOutcome::Infeasible) => {
                info!(worker_id, "job infeasible, no solutions");
                store.complete(&exclusion, false, vec![], config.cardinality).await?;
            }
            Err(e) => {
                warn!(worker_id, error = %e, "job failed to solve, propagating");
                return Err(e);
            }
        }
    }

    info!(worker_id, "queue appears drained, worker exiting");
    Ok(())
}
