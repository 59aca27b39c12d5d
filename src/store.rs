// src/store.rs - Work Queue (Store): the durable, transactional component
// owning the `exclude`, `solutions` and `foods` tables. The only component
// permitted to mutate the queue or the solutions table.

use crate::collector::{QuantityAssignment, Solution};
use crate::core::errors::{FoodSetError, Result};
use crate::exclusion::{all_subsets, Exclusion, FoodId, FoodSet};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite, SqliteConnection};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

const BUSY_RETRY_ATTEMPTS: usize = 8;
const BUSY_RETRY_BASE_DELAY_MS: u64 = 20;

/// Lifecycle state of an ExclusionRecord, derived from its nullable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionState {
    Pending,
    InProgress,
    Completed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct ExclusionRecord {
    pub exclusion: Exclusion,
    pub claimed_by: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub timeout: bool,
}

impl ExclusionRecord {
    pub fn state(&self) -> ExclusionState {
        match (&self.start_time, &self.end_time, self.timeout) {
            (None, _, _) => ExclusionState::Pending,
            (Some(_), None, _) => ExclusionState::InProgress,
            (Some(_), Some(_), true) => ExclusionState::TimedOut,
            (Some(_), Some(_), false) => ExclusionState::Completed,
        }
    }
}

/// The Store: durable sqlite-backed Work Queue and Solutions table, shared
/// across worker processes via a single sqlite file and `BEGIN IMMEDIATE`
/// transactions standing in for the advisory lock spec.md calls for.
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(1 + num_cpus::get() as u32)
            .connect(&url)
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// A store backed by a single-connection in-memory database, used only
    /// by this module's own tests (a file-backed store is required for the
    /// real multi-process contract).
    #[cfg(test)]
    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Create empty Solutions and Queue; insert the empty exclusion as
    /// pending. Idempotent for resume.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exclude (
                id TEXT PRIMARY KEY,
                start_time TEXT,
                end_time TEXT,
                timeout INTEGER NOT NULL DEFAULT 0,
                claimed_by TEXT UNIQUE,
                duration_secs REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS solutions (
                id TEXT PRIMARY KEY,
                total_error INTEGER NOT NULL,
                assignment_json TEXT NOT NULL,
                nutrient_intake_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE TABLE IF NOT EXISTS foods (id INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        let mut attempt = 0;
        loop {
            let mut conn = self.pool.acquire().await?;
            if let Err(e) = begin_immediate(&mut conn).await {
                if retry_on_busy(&e, &mut attempt).await {
                    continue;
                }
                return Err(e);
            }

            let outcome: Result<()> = async {
                sqlx::query("INSERT OR IGNORE INTO exclude (id, timeout) VALUES (?, 0)")
                    .bind(Exclusion::empty().canonical_key())
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            }
            .await;

            match finish(&mut conn, outcome).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if retry_on_busy(&e, &mut attempt).await {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Atomically selects any pending ExclusionRecord, marks it in_progress
    /// under `worker_id`, and returns its Exclusion. `None` if the queue has
    /// no pending work.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<Exclusion>> {
        let mut attempt = 0;
        loop {
            let mut conn = self.pool.acquire().await?;
            if let Err(e) = begin_immediate(&mut conn).await {
                if retry_on_busy(&e, &mut attempt).await {
                    continue;
                }
                return Err(e);
            }

            let outcome: Result<Option<Exclusion>> = async {
                let row = sqlx::query("SELECT id FROM exclude WHERE start_time IS NULL LIMIT 1")
                    .fetch_optional(&mut *conn)
                    .await?;
                let Some(row) = row else {
                    return Ok(None);
                };
                let id: String = row.get("id");

                let result = sqlx::query(
                    "UPDATE exclude SET start_time = ?, claimed_by = ? WHERE id = ? AND start_time IS NULL",
                )
                .bind(Utc::now().to_rfc3339())
                .bind(worker_id)
                .bind(&id)
                .execute(&mut *conn)
                .await?;

                if result.rows_affected() == 0 {
                    return Ok(None);
                }
                Ok(Some(Exclusion::from_canonical_key(&id)))
            }
            .await;

            match finish(&mut conn, outcome).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if retry_on_busy(&e, &mut attempt).await {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Atomically marks an exclusion complete (or timed-out), clears the
    /// claim, and records any solutions found. A no-op if the exclusion is
    /// unknown or already completed.
    pub async fn complete(
        &self,
        exclusion: &Exclusion,
        timeout: bool,
        solutions: Vec<Solution>,
        cardinality: usize,
    ) -> Result<()> {
        let key = exclusion.canonical_key();
        let mut attempt = 0;
        loop {
            let mut conn = self.pool.acquire().await?;
            if let Err(e) = begin_immediate(&mut conn).await {
                if retry_on_busy(&e, &mut attempt).await {
                    continue;
                }
                return Err(e);
            }

            let outcome: Result<()> = async {
                let row = sqlx::query("SELECT start_time, end_time FROM exclude WHERE id = ?")
                    .bind(&key)
                    .fetch_optional(&mut *conn)
                    .await?;
                let Some(row) = row else {
                    warn!(exclusion = %key, "complete() called for unknown exclusion, ignoring");
                    return Ok(());
                };
                let start_time: Option<String> = row.get("start_time");
                let end_time: Option<String> = row.get("end_time");
                if end_time.is_some() {
                    debug!(exclusion = %key, "complete() on already-completed exclusion is a no-op");
                    return Ok(());
                }

                let now = Utc::now();
                let duration_secs = start_time.as_deref().and_then(|s| {
                    DateTime::parse_from_rfc3339(s)
                        .ok()
                        .map(|start| (now - start.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0)
                });

                sqlx::query(
                    "UPDATE exclude SET end_time = ?, timeout = ?, claimed_by = NULL, duration_secs = ? WHERE id = ?",
                )
                .bind(now.to_rfc3339())
                .bind(timeout as i64)
                .bind(duration_secs)
                .bind(&key)
                .execute(&mut *conn)
                .await?;

                if !solutions.is_empty() {
                    record_solutions_locked(&mut conn, &solutions, cardinality).await?;
                }
                Ok(())
            }
            .await;

            match finish(&mut conn, outcome).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if retry_on_busy(&e, &mut attempt).await {
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Returns the `claimed_by` ids of all in-progress records whose
    /// `start_time` is older than `deadline`.
    pub async fn timed_out_workers(&self, deadline: DateTime<Utc>) -> Result<Vec<(Exclusion, String)>> {
        let rows = sqlx::query(
            "SELECT id, claimed_by FROM exclude WHERE start_time IS NOT NULL AND end_time IS NULL AND start_time < ?",
        )
        .bind(deadline.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id: String = row.get("id");
                let claimed_by: Option<String> = row.get("claimed_by");
                claimed_by.map(|w| (Exclusion::from_canonical_key(&id), w))
            })
            .collect())
    }

    /// True iff there exists a pending or in-progress record.
    pub async fn has_work(&self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exclude WHERE end_time IS NULL")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Observational view: in-progress rows and their running durations.
    pub async fn process_status(&self) -> Result<Vec<(Exclusion, String, f64)>> {
        let now = Utc::now();
        let rows = sqlx::query(
            "SELECT id, claimed_by, start_time FROM exclude WHERE start_time IS NOT NULL AND end_time IS NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id: String = row.get("id");
                let claimed_by: Option<String> = row.get("claimed_by");
                let start_time: String = row.get("start_time");
                let start = DateTime::parse_from_rfc3339(&start_time).ok()?;
                let running = (now - start.with_timezone(&Utc)).num_milliseconds() as f64 / 1000.0;
                claimed_by.map(|w| (Exclusion::from_canonical_key(&id), w, running))
            })
            .collect())
    }

    /// Clears `start_time` on all rows with null `end_time`, re-queueing
    /// them. Used on a manual resume after a crash leaves claimed rows
    /// stranded in_progress.
    pub async fn requeue_orphaned(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE exclude SET start_time = NULL, claimed_by = NULL WHERE end_time IS NULL",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn solution_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM solutions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn foods_seen(&self) -> Result<BTreeSet<FoodId>> {
        let rows = sqlx::query("SELECT id FROM foods").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|r| r.get::<i64, _>("id")).collect())
    }
}

async fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
    Ok(())
}

/// Commits on `Ok`, rolls back on `Err`, returning the original result.
async fn finish<T>(conn: &mut SqliteConnection, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok(value)
        }
        Err(e) => {
            let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
            Err(e)
        }
    }
}

/// On a transient lock-contention error, sleeps with backoff and returns
/// `true` (meaning "retry"). Otherwise returns `false`.
async fn retry_on_busy(err: &FoodSetError, attempt: &mut usize) -> bool {
    let busy = matches!(err, FoodSetError::Store(se) if is_busy(se));
    if busy && *attempt < BUSY_RETRY_ATTEMPTS {
        *attempt += 1;
        let delay = BUSY_RETRY_BASE_DELAY_MS * (1u64 << (*attempt).min(6));
        tokio::time::sleep(StdDuration::from_millis(delay)).await;
        true
    } else {
        false
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.message().contains("locked") || db.message().contains("busy"))
}

/// For each FoodSet: insert into Solutions if absent; add its ids to
/// Foods-seen; compute the new subset universe and insert any newly
/// generated exclusions into the Queue as pending. Called only from within
/// `complete`'s single transactional boundary, so the whole thing is atomic.
async fn record_solutions_locked(
    conn: &mut SqliteConnection,
    solutions: &[Solution],
    cardinality: usize,
) -> Result<()> {
    let _ = cardinality; // exclusion size is not bounded by N (spec.md §4.5)
    let mut newly_seen = false;

    for solution in solutions {
        let key = solution.food_set.canonical_key();
        let existing: Option<i64> = sqlx::query_scalar("SELECT total_error FROM solutions WHERE id = ?")
            .bind(&key)
            .fetch_optional(&mut *conn)
            .await?;

        if existing.is_none() {
            let assignment_json = serde_json::to_string(&solution.assignment.0)?;
            let intake_json = serde_json::to_string(&solution.nutrient_intake)?;
            sqlx::query(
                "INSERT INTO solutions (id, total_error, assignment_json, nutrient_intake_json) VALUES (?, ?, ?, ?)",
            )
            .bind(&key)
            .bind(solution.total_error)
            .bind(assignment_json)
            .bind(intake_json)
            .execute(&mut *conn)
            .await?;
        }

        for &id in solution.food_set.ids() {
            let result = sqlx::query("INSERT OR IGNORE INTO foods (id) VALUES (?)")
                .bind(id)
                .execute(&mut *conn)
                .await?;
            if result.rows_affected() > 0 {
                newly_seen = true;
            }
        }
    }

    if !newly_seen {
        return Ok(());
    }

    // Recompute the full subset universe over every food seen so far and
    // insert whatever exclusions are missing; `INSERT OR IGNORE` makes this
    // idempotent against exclusions already present.
    let rows = sqlx::query("SELECT id FROM foods").fetch_all(&mut *conn).await?;
    let universe: BTreeSet<FoodId> = rows.into_iter().map(|r| r.get::<i64, _>("id")).collect();

    for exclusion in all_subsets(&universe) {
        sqlx::query("INSERT OR IGNORE INTO exclude (id, timeout) VALUES (?, 0)")
            .bind(exclusion.canonical_key())
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

/// Reads back a Solution row, reconstructing the QuantityAssignment.
pub fn assignment_from_json(
    food_set: &FoodSet,
    total_error: i64,
    assignment_json: &str,
    intake_json: &str,
) -> Result<Solution> {
    let map: std::collections::HashMap<FoodId, i64> = serde_json::from_str(assignment_json)?;
    let intake: Vec<i64> = serde_json::from_str(intake_json)?;
    Ok(Solution {
        food_set: food_set.clone(),
        assignment: QuantityAssignment(map),
        nutrient_intake: intake,
        total_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn solution(ids: Vec<FoodId>, error: i64) -> Solution {
        let mut map = StdHashMap::new();
        for id in &ids {
            map.insert(*id, 100);
        }
        Solution {
            food_set: FoodSet::from_ids(ids),
            assignment: QuantityAssignment(map),
            nutrient_intake: vec![1000],
            total_error: error,
        }
    }

    #[tokio::test]
    async fn initialize_seeds_empty_exclusion_idempotently() {
        let store = Store::connect_memory().await.unwrap();
        store.initialize().await.unwrap();
        store.initialize().await.unwrap();
        assert!(store.has_work().await.unwrap());
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_complete_releases_slot() {
        let store = Store::connect_memory().await.unwrap();
        store.initialize().await.unwrap();

        let claimed = store.claim("worker-1").await.unwrap();
        assert_eq!(claimed, Some(Exclusion::empty()));

        // A second claim should not see the same (now in-progress) row.
        let second = store.claim("worker-2").await.unwrap();
        assert!(second.is_none());

        store.complete(&Exclusion::empty(), false, vec![], 3).await.unwrap();
        assert!(!store.has_work().await.unwrap());
    }

    #[tokio::test]
    async fn complete_on_already_completed_is_a_no_op() {
        let store = Store::connect_memory().await.unwrap();
        store.initialize().await.unwrap();
        store.claim("worker-1").await.unwrap();
        store.complete(&Exclusion::empty(), false, vec![], 3).await.unwrap();
        store.complete(&Exclusion::empty(), false, vec![], 3).await.unwrap();
    }

    #[tokio::test]
    async fn record_solutions_expands_queue_to_2_pow_k_exclusions() {
        let store = Store::connect_memory().await.unwrap();
        store.initialize().await.unwrap();
        store.claim("worker-1").await.unwrap();

        let solutions = vec![solution(vec![1, 2, 3, 4], 10), solution(vec![1, 2, 3, 5], 20)];
        store.complete(&Exclusion::empty(), false, solutions, 4).await.unwrap();

        let seen = store.foods_seen().await.unwrap();
        assert_eq!(seen.len(), 5);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exclude")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 32);
    }

    #[tokio::test]
    async fn infeasible_completion_adds_no_foods_or_exclusions() {
        let store = Store::connect_memory().await.unwrap();
        store.initialize().await.unwrap();
        store.claim("worker-1").await.unwrap();
        store.complete(&Exclusion::empty(), false, vec![], 3).await.unwrap();

        assert_eq!(store.solution_count().await.unwrap(), 0);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exclude")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn timeout_clears_claim_and_marks_timed_out() {
        let store = Store::connect_memory().await.unwrap();
        store.initialize().await.unwrap();
        store.claim("worker-1").await.unwrap();
        store.complete(&Exclusion::empty(), true, vec![], 3).await.unwrap();

        let row = sqlx::query("SELECT claimed_by, timeout FROM exclude WHERE id = ''")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        let claimed_by: Option<String> = row.get("claimed_by");
        let timeout: i64 = row.get("timeout");
        assert!(claimed_by.is_none());
        assert_eq!(timeout, 1);
    }
}
