// src/config.rs - Run-wide configuration for the food-set enumerator

use crate::core::errors::{FoodSetError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The integer scale applied to every real-valued nutrient amount before it
/// enters solver arithmetic. Fixed at three decimal places, matching the
/// source system; not reconfigurable at runtime.
pub const SCALE: i64 = 1000;

/// Per-food gram cap used when a food has all-zero nutrient coefficients and
/// therefore no naturally derived `qty_max`.
pub const DEFAULT_QTY_MAX_SENTINEL: i64 = 100_000;

/// Safety cap on how many feasible assignments a single solve job will
/// enumerate via the no-good-cut loop (see `model` module) before giving up
/// and logging a warning. Prevents an unbounded loop on a pathologically
/// permissive exclusion.
pub const MAX_SOLUTIONS_PER_JOB: usize = 5_000;

/// Immutable, once-per-run configuration. Constructed from CLI flags with an
/// optional TOML overlay; never mutated after the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Target cardinality N: every stored FoodSet has exactly this many foods.
    pub cardinality: usize,
    /// Number of worker processes to run concurrently. Defaults to the
    /// logical core count.
    pub worker_count: usize,
    /// Per-job deadline in seconds before the supervisor kills a worker.
    pub job_timeout_secs: u64,
    /// Path to the sqlite file backing the Store.
    pub store_path: PathBuf,
    /// Path to the nutrient-requirements CSV.
    pub requirements_path: PathBuf,
    /// Path to the food-coefficients CSV.
    pub foods_path: PathBuf,
}

impl RunConfig {
    pub fn new(
        cardinality: usize,
        store_path: impl Into<PathBuf>,
        requirements_path: impl Into<PathBuf>,
        foods_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cardinality,
            worker_count: num_cpus::get().max(1),
            job_timeout_secs: 3600,
            store_path: store_path.into(),
            requirements_path: requirements_path.into(),
            foods_path: foods_path.into(),
        }
    }

    /// Apply a TOML overlay file on top of defaults/CLI values. Only fields
    /// present in the file override the existing values.
    pub fn apply_overlay_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let overlay: RunConfigOverlay = toml::from_str(&content)
            .map_err(|e| FoodSetError::config(format!("invalid run config {}: {e}", path.display())))?;

        if let Some(w) = overlay.worker_count {
            self.worker_count = w;
        }
        if let Some(t) = overlay.job_timeout_secs {
            self.job_timeout_secs = t;
        }
        Ok(())
    }

    pub fn validate(&self, catalog_len: usize) -> Result<()> {
        if self.cardinality == 0 {
            return Err(FoodSetError::config("cardinality N must be non-zero"));
        }
        if self.cardinality > catalog_len {
            return Err(FoodSetError::config(format!(
                "cardinality N={} exceeds catalog size {}",
                self.cardinality, catalog_len
            )));
        }
        if self.worker_count == 0 {
            return Err(FoodSetError::config("worker_count must be non-zero"));
        }
        Ok(())
    }
}

/// Optional TOML overlay; every field optional so a partial file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
struct RunConfigOverlay {
    worker_count: Option<usize>,
    job_timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_zero_cardinality() {
        let cfg = RunConfig::new(0, "store.db", "req.csv", "foods.csv");
        assert!(cfg.validate(10).is_err());
    }

    #[test]
    fn validate_rejects_cardinality_over_catalog_size() {
        let cfg = RunConfig::new(20, "store.db", "req.csv", "foods.csv");
        assert!(cfg.validate(5).is_err());
    }

    #[test]
    fn validate_accepts_in_range_cardinality() {
        let cfg = RunConfig::new(3, "store.db", "req.csv", "foods.csv");
        assert!(cfg.validate(5).is_ok());
    }

    #[test]
    fn overlay_file_overrides_only_present_fields() {
        let dir = tempfile::tempdir().unwrap();
        let overlay_path = dir.path().join("run.toml");
        std::fs::write(&overlay_path, "job_timeout_secs = 42\n").unwrap();

        let mut cfg = RunConfig::new(3, "store.db", "req.csv", "foods.csv");
        let default_workers = cfg.worker_count;
        cfg.apply_overlay_file(&overlay_path).unwrap();

        assert_eq!(cfg.job_timeout_secs, 42);
        assert_eq!(cfg.worker_count, default_workers);
    }
}
