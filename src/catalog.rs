// src/catalog.rs - Catalog Loader: parses the normalized two-file tabular
// dataset into the in-memory Catalog the rest of the core consumes.

use crate::config::SCALE;
use crate::core::errors::{FoodSetError, Result};
use crate::exclusion::FoodId;
use csv::ReaderBuilder;
use std::path::Path;

/// Conventional sentinel standing in for a non-finite nutrient upper bound.
pub const UNBOUNDED_MAX: i64 = i64::MAX / 4;

/// A single food: a stable id, a display label, and a vector of K
/// nutrient-amount-per-gram coefficients, scaled by `SCALE` and non-negative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Food {
    pub id: FoodId,
    pub label: String,
    /// nutrient-amount per gram, scaled by SCALE; length == Catalog::nutrient_count()
    pub coeffs: Vec<i64>,
}

/// Per-nutrient lower/upper band, both scaled by SCALE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NutrientBand {
    pub name: String,
    pub min: i64,
    pub max: i64,
}

/// The read-only, process-wide dataset: an ordered sequence of Foods plus
/// the K-vector of NutrientBands, column order agreeing between the two.
#[derive(Debug, Clone)]
pub struct Catalog {
    foods: Vec<Food>,
    bands: Vec<NutrientBand>,
}

impl Catalog {
    pub fn new(foods: Vec<Food>, bands: Vec<NutrientBand>) -> Result<Self> {
        for band in &bands {
            if band.min >= band.max {
                return Err(FoodSetError::config(format!(
                    "nutrient '{}' has inverted band: min {} >= max {}",
                    band.name, band.min, band.max
                )));
            }
        }
        for food in &foods {
            if food.coeffs.len() != bands.len() {
                return Err(FoodSetError::config(format!(
                    "food '{}' (id {}) has {} coefficients, expected {}",
                    food.label,
                    food.id,
                    food.coeffs.len(),
                    bands.len()
                )));
            }
            if food.coeffs.iter().any(|&c| c < 0) {
                return Err(FoodSetError::config(format!(
                    "food '{}' (id {}) has a negative nutrient coefficient",
                    food.label, food.id
                )));
            }
        }
        Ok(Self { foods, bands })
    }

    pub fn foods(&self) -> &[Food] {
        &self.foods
    }

    pub fn bands(&self) -> &[NutrientBand] {
        &self.bands
    }

    pub fn nutrient_count(&self) -> usize {
        self.bands.len()
    }

    pub fn food_by_id(&self, id: FoodId) -> Option<&Food> {
        self.foods.iter().find(|f| f.id == id)
    }

    /// The catalog reduced by an exclusion: every Food whose id does not
    /// appear in `excluded`.
    pub fn effective_foods<'a>(&'a self, excluded: &'a [FoodId]) -> Vec<&'a Food> {
        self.foods
            .iter()
            .filter(|f| !excluded.contains(&f.id))
            .collect()
    }
}

/// Parses the nutrient-requirements CSV: header row, then rows of
/// (nutrient name, min (real), max (real), unit), in the canonical column
/// order that the food table's columns must agree with.
pub fn load_requirements(path: impl AsRef<Path>) -> Result<Vec<NutrientBand>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path.as_ref())?;

    let mut bands = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.len() < 3 {
            return Err(FoodSetError::config(format!(
                "requirements row has {} fields, expected at least 3 (name, min, max[, unit])",
                record.len()
            )));
        }
        let name = record[0].trim().to_string();
        let min = parse_scaled(&record[1], &name, "min")?;
        let max = parse_scaled_or_unbounded(&record[2], &name, "max")?;
        bands.push(NutrientBand { name, min, max });
    }
    if bands.is_empty() {
        return Err(FoodSetError::config("requirements table has no rows"));
    }
    Ok(bands)
}

/// Parses the food table: header row, a second header-like row listing
/// units (ignored by the core beyond skipping it), then rows of
/// (integer id, label, K real columns).
pub fn load_foods(path: impl AsRef<Path>, expected_k: usize) -> Result<Vec<Food>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path.as_ref())?;

    let header_len = rdr.headers()?.len();
    if header_len < 2 + expected_k {
        return Err(FoodSetError::config(format!(
            "food table has {header_len} header columns, expected at least {}",
            2 + expected_k
        )));
    }

    let mut records = rdr.records();

    // Second header-like row: the per-column units line. Present but not
    // semantically consumed by the core (units are normalized upstream).
    records.next().ok_or_else(|| {
        FoodSetError::config("food table is missing its units header row".to_string())
    })??;

    let mut foods = Vec::new();
    for result in records {
        let record = result?;
        if record.len() < 2 + expected_k {
            return Err(FoodSetError::config(format!(
                "food row has {} fields, expected at least {}",
                record.len(),
                2 + expected_k
            )));
        }
        let id: FoodId = record[0]
            .trim()
            .parse()
            .map_err(|_| FoodSetError::config(format!("malformed food id: '{}'", &record[0])))?;
        let label = record[1].trim().to_string();
        let mut coeffs = Vec::with_capacity(expected_k);
        for i in 0..expected_k {
            coeffs.push(parse_scaled(&record[2 + i], &label, "coefficient")?);
        }
        foods.push(Food { id, label, coeffs });
    }
    if foods.is_empty() {
        return Err(FoodSetError::config("food table has no rows"));
    }
    Ok(foods)
}

/// Loads both tables and assembles a validated Catalog.
pub fn load_catalog(requirements_path: impl AsRef<Path>, foods_path: impl AsRef<Path>) -> Result<Catalog> {
    let bands = load_requirements(requirements_path)?;
    let foods = load_foods(foods_path, bands.len())?;
    Catalog::new(foods, bands)
}

fn parse_scaled(field: &str, context: &str, what: &str) -> Result<i64> {
    let value: f64 = field
        .trim()
        .parse()
        .map_err(|_| FoodSetError::config(format!("malformed {what} for '{context}': '{field}'")))?;
    Ok((value * SCALE as f64).trunc() as i64)
}

/// Like `parse_scaled`, but an empty field (or a conventional "inf"/"none")
/// is treated as the unbounded-max sentinel.
fn parse_scaled_or_unbounded(field: &str, context: &str, what: &str) -> Result<i64> {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("inf") || trimmed.eq_ignore_ascii_case("none") {
        return Ok(UNBOUNDED_MAX);
    }
    parse_scaled(trimmed, context, what)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_identity_3x3_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let req_path = write_fixture(
            &dir,
            "requirements.csv",
            "name,min,max,unit\nNutrientA,1,10,mg\nNutrientB,1,10,mg\nNutrientC,1,10,mg\n",
        );
        let food_path = write_fixture(
            &dir,
            "foods.csv",
            "id,label,NutrientA,NutrientB,NutrientC\n,,mg,mg,mg\n1,A,1,0,0\n2,B,0,1,0\n3,C,0,0,1\n",
        );

        let catalog = load_catalog(&req_path, &food_path).unwrap();
        assert_eq!(catalog.nutrient_count(), 3);
        assert_eq!(catalog.foods().len(), 3);
        assert_eq!(catalog.bands()[0].min, 1000);
        assert_eq!(catalog.bands()[0].max, 10000);
        assert_eq!(catalog.food_by_id(1).unwrap().coeffs, vec![1000, 0, 0]);
    }

    #[test]
    fn rejects_inverted_band() {
        let dir = tempfile::tempdir().unwrap();
        let req_path = write_fixture(&dir, "requirements.csv", "name,min,max,unit\nBad,10,1,mg\n");
        let food_path = write_fixture(
            &dir,
            "foods.csv",
            "id,label,Bad\n,,mg\n1,A,5\n",
        );
        let result = load_catalog(&req_path, &food_path);
        assert!(matches!(result, Err(FoodSetError::Config(_))));
    }

    #[test]
    fn rejects_column_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let req_path = write_fixture(
            &dir,
            "requirements.csv",
            "name,min,max,unit\nA,1,10,mg\nB,1,10,mg\n",
        );
        let food_path = write_fixture(
            &dir,
            "foods.csv",
            "id,label,A\n,,mg\n1,OnlyOneColumn,5\n",
        );
        let result = load_catalog(&req_path, &food_path);
        assert!(result.is_err());
    }

    #[test]
    fn unbounded_max_sentinel_for_empty_max_field() {
        let dir = tempfile::tempdir().unwrap();
        let req_path = write_fixture(&dir, "requirements.csv", "name,min,max,unit\nA,1,,mg\n");
        let food_path = write_fixture(&dir, "foods.csv", "id,label,A\n,,mg\n1,X,5\n");
        let catalog = load_catalog(&req_path, &food_path).unwrap();
        assert_eq!(catalog.bands()[0].max, UNBOUNDED_MAX);
    }
}
