// src/bounds.rs - Bound Precomputation: per-food maximum useful gram count
// and, for a target cardinality, per-nutrient maximum possible error.

use crate::catalog::{Food, NutrientBand};
use crate::config::DEFAULT_QTY_MAX_SENTINEL;
use crate::exclusion::FoodId;
use std::collections::HashMap;

/// `qty_max[f] = ceil(min_i { max_i / coeff_i(f) : coeff_i(f) > 0 })`.
///
/// Beyond that quantity, at least one nutrient upper bound is unconditionally
/// exceeded regardless of other foods. A food with all-zero coefficients has
/// no such bound and is capped at `DEFAULT_QTY_MAX_SENTINEL` instead of being
/// left unbounded.
pub fn qty_max_for_food(food: &Food, bands: &[NutrientBand]) -> i64 {
    let mut bound: Option<i64> = None;
    for (coeff, band) in food.coeffs.iter().zip(bands.iter()) {
        if *coeff > 0 {
            // ceil(max / coeff) in integer arithmetic.
            let candidate = (band.max + coeff - 1) / coeff;
            bound = Some(match bound {
                Some(b) => b.min(candidate),
                None => candidate,
            });
        }
    }
    bound.unwrap_or(DEFAULT_QTY_MAX_SENTINEL)
}

/// `qty_max[f]` for every food in an effective food list.
pub fn qty_max_table(foods: &[&Food], bands: &[NutrientBand]) -> HashMap<FoodId, i64> {
    foods
        .iter()
        .map(|f| (f.id, qty_max_for_food(f, bands)))
        .collect()
}

/// `err_max[i] = (sum of the N largest values of coeff_i(f) * qty_max[f]
/// across all foods) - min_i`. A safe upper bound on the deviation variable
/// for nutrient i, computed over whichever food list is in effect for a
/// given solve job (the catalog minus that job's exclusion).
pub fn err_max_table(foods: &[&Food], bands: &[NutrientBand], qty_max: &HashMap<FoodId, i64>, cardinality: usize) -> Vec<i64> {
    let k = bands.len();
    let mut err_max = Vec::with_capacity(k);
    for (i, band) in bands.iter().enumerate() {
        let mut contributions: Vec<i64> = foods
            .iter()
            .map(|f| f.coeffs[i] * qty_max.get(&f.id).copied().unwrap_or(0))
            .collect();
        contributions.sort_unstable_by(|a, b| b.cmp(a));
        let sum_of_n_largest: i64 = contributions.iter().take(cardinality).sum();
        err_max.push((sum_of_n_largest - band.min).max(0));
    }
    err_max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Food;

    fn band(min: i64, max: i64) -> NutrientBand {
        NutrientBand {
            name: "n".to_string(),
            min,
            max,
        }
    }

    #[test]
    fn qty_max_uses_tightest_nutrient_bound() {
        // coeff 2 against max 10 -> 5; coeff 1 against max 10 -> 10. tightest is 5.
        let food = Food {
            id: 1,
            label: "f".to_string(),
            coeffs: vec![2, 1],
        };
        let bands = vec![band(0, 10), band(0, 10)];
        assert_eq!(qty_max_for_food(&food, &bands), 5);
    }

    #[test]
    fn qty_max_ceils_fractional_bound() {
        // coeff 3 against max 10 -> ceil(10/3) = 4.
        let food = Food {
            id: 1,
            label: "f".to_string(),
            coeffs: vec![3],
        };
        let bands = vec![band(0, 10)];
        assert_eq!(qty_max_for_food(&food, &bands), 4);
    }

    #[test]
    fn qty_max_sentinel_for_all_zero_coefficients() {
        let food = Food {
            id: 1,
            label: "f".to_string(),
            coeffs: vec![0, 0],
        };
        let bands = vec![band(0, 10), band(0, 10)];
        assert_eq!(qty_max_for_food(&food, &bands), DEFAULT_QTY_MAX_SENTINEL);
    }

    #[test]
    fn err_max_sums_n_largest_contributions() {
        let f1 = Food { id: 1, label: "a".into(), coeffs: vec![1] };
        let f2 = Food { id: 2, label: "b".into(), coeffs: vec![2] };
        let f3 = Food { id: 3, label: "c".into(), coeffs: vec![3] };
        let bands = vec![band(0, 100)];
        let foods = vec![&f1, &f2, &f3];
        let qty_max = qty_max_table(&foods, &bands);
        // qty_max for each is 100 (coeff*qty<=100 => qty_max = 100/coeff ceil)
        // f1: ceil(100/1)=100 -> contrib 100
        // f2: ceil(100/2)=50 -> contrib 100
        // f3: ceil(100/3)=34 -> contrib 102
        let err_max = err_max_table(&foods, &bands, &qty_max, 2);
        // two largest contributions: 102 + 100 = 202, minus min(0) = 202
        assert_eq!(err_max[0], 202);
    }
}
