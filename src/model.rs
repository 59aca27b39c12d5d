// src/model.rs - Solver Model Builder: the integer program for a given
// effective food list and cardinality, plus the no-good-cut loop that
// emulates all-solutions enumeration on top of a single-optimum MIP solver.

use crate::bounds::{err_max_table, qty_max_table};
use crate::catalog::{Food, NutrientBand};
use crate::collector::{QuantityAssignment, Solution, SolutionCollector};
use crate::config::MAX_SOLUTIONS_PER_JOB;
use crate::core::errors::{FoodSetError, Result};
use crate::exclusion::{FoodId, FoodSet};
use microlp::{ComparisonOp, OptimizationDirection, Problem, Variable};
use std::collections::HashMap;
use tracing::warn;

/// Outcome of attempting to solve one exclusion job. Model-infeasibility is
/// a normal outcome (§4.3 edge-case policy), never an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveOutcome {
    /// At least one feasible FoodSet was found; the collector holds them.
    Solved { solutions_found: usize },
    /// No feasible assignment exists for this effective food list.
    Infeasible,
}

/// Per-food decision-variable handles for one build of the model.
struct FoodVars {
    q: Variable,
    u: Variable,
    z: Variable,
}

fn to_i32_bound(value: i64, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        FoodSetError::model_invalid(format!("{what} value {value} exceeds solver's i32 domain"))
    })
}

/// Solves the effective food list repeatedly, feeding every distinct
/// FoodSet found to `collector`, until the model is proven infeasible or
/// `MAX_SOLUTIONS_PER_JOB` is reached (logged, not silently dropped).
///
/// Edge case: if `foods` has fewer than `cardinality` members the model is
/// infeasible by construction; reported as `Infeasible` without building or
/// solving anything.
pub fn solve_all_food_sets(
    foods: &[&Food],
    bands: &[NutrientBand],
    cardinality: usize,
    collector: &mut SolutionCollector,
) -> Result<SolveOutcome> {
    if foods.is_empty() || foods.len() < cardinality || cardinality == 0 {
        return Ok(SolveOutcome::Infeasible);
    }

    let qty_max = qty_max_table(foods, bands);
    let err_max = err_max_table(foods, bands, &qty_max, cardinality);

    let mut no_good_cuts: Vec<FoodSet> = Vec::new();
    let mut found = 0usize;

    loop {
        if found >= MAX_SOLUTIONS_PER_JOB {
            warn!(
                cap = MAX_SOLUTIONS_PER_JOB,
                "reached MAX_SOLUTIONS_PER_JOB for this exclusion; stopping enumeration early"
            );
            break;
        }

        match solve_once(foods, bands, cardinality, &qty_max, &err_max, &no_good_cuts)? {
            None => break,
            Some(solution) => {
                found += 1;
                no_good_cuts.push(solution.food_set.clone());
                collector.record(solution);
            }
        }
    }

    if found == 0 {
        Ok(SolveOutcome::Infeasible)
    } else {
        Ok(SolveOutcome::Solved {
            solutions_found: found,
        })
    }
}

/// Builds a fresh model (including every accumulated no-good cut) and runs
/// one solve. Returns `None` on a proven-infeasible model.
fn solve_once(
    foods: &[&Food],
    bands: &[NutrientBand],
    cardinality: usize,
    qty_max: &HashMap<FoodId, i64>,
    err_max: &[i64],
    no_good_cuts: &[FoodSet],
) -> Result<Option<Solution>> {
    let mut problem = Problem::new(OptimizationDirection::Minimize);

    let mut food_vars: HashMap<FoodId, FoodVars> = HashMap::with_capacity(foods.len());
    for food in foods {
        let max_q = qty_max.get(&food.id).copied().unwrap_or(0);
        let max_q_i32 = to_i32_bound(max_q, "qty_max")?;

        let q = problem.add_integer_var(0.0, (0, max_q_i32));
        let u = problem.add_integer_var(0.0, (0, 1));
        let z = problem.add_integer_var(0.0, (0, max_q_i32));

        // Multiplicative linkage z = q * u, big-M = qty_max[f]:
        //   z <= qty_max[f] * u
        problem.add_constraint([(z, 1.0), (u, -(max_q as f64))], ComparisonOp::Le, 0.0);
        //   z <= q
        problem.add_constraint([(z, 1.0), (q, -1.0)], ComparisonOp::Le, 0.0);
        //   z >= q - qty_max[f] * (1 - u)  <=>  z - q - qty_max[f]*u >= -qty_max[f]
        problem.add_constraint(
            [(z, 1.0), (q, -1.0), (u, -(max_q as f64))],
            ComparisonOp::Ge,
            -(max_q as f64),
        );

        food_vars.insert(food.id, FoodVars { q, u, z });
    }

    // Cardinality: sum u[f] = N
    let cardinality_terms: Vec<(Variable, f64)> =
        food_vars.values().map(|v| (v.u, 1.0)).collect();
    problem.add_constraint(&cardinality_terms, ComparisonOp::Eq, cardinality as f64);

    // Nutrient band and absolute-deviation variables/constraints.
    let mut e_vars = Vec::with_capacity(bands.len());
    for (i, band) in bands.iter().enumerate() {
        let intake_terms: Vec<(Variable, f64)> = foods
            .iter()
            .filter(|f| f.coeffs[i] != 0)
            .map(|f| (food_vars[&f.id].z, f.coeffs[i] as f64))
            .collect();

        problem.add_constraint(&intake_terms, ComparisonOp::Ge, band.min as f64);
        problem.add_constraint(&intake_terms, ComparisonOp::Le, band.max as f64);

        let e_bound = to_i32_bound(err_max[i].max(0), "err_max")?;
        let e = problem.add_integer_var(1.0, (0, e_bound));

        // e[i] >= intake_i - min_i  <=>  e[i] - intake_i >= -min_i
        let mut ge_min_terms = intake_terms.clone();
        for term in ge_min_terms.iter_mut() {
            term.1 = -term.1;
        }
        ge_min_terms.push((e, 1.0));
        problem.add_constraint(&ge_min_terms, ComparisonOp::Ge, -(band.min as f64));

        // e[i] >= min_i - intake_i  <=>  e[i] + intake_i >= min_i
        let mut ge_max_terms = intake_terms;
        ge_max_terms.push((e, 1.0));
        problem.add_constraint(&ge_max_terms, ComparisonOp::Ge, band.min as f64);

        e_vars.push(e);
    }

    // No-good cuts: forbid re-selecting exactly a previously found FoodSet.
    for prior in no_good_cuts {
        let terms: Vec<(Variable, f64)> = prior
            .ids()
            .iter()
            .filter_map(|id| food_vars.get(id).map(|v| (v.u, 1.0)))
            .collect();
        if terms.len() == prior.len() {
            problem.add_constraint(&terms, ComparisonOp::Le, (prior.len() as f64) - 1.0);
        }
    }

    let solved = match problem.solve() {
        Ok(solution) => solution,
        Err(microlp::Error::Infeasible) => return Ok(None),
        Err(other) => {
            return Err(FoodSetError::model_invalid(format!(
                "solver rejected model: {other:?}"
            )))
        }
    };

    // FoodSet/assignment are derived from z[f] (the linearized q*u product),
    // not u[f]: the cardinality constraint only forces N foods to have u=1,
    // it never forces q[f]>0 for them, so a feasible solution can "pad" with
    // foods that are used (u=1) but contribute zero grams (q=z=0). Keying
    // off u would fold those padding foods into the stored FoodSet with a
    // fabricated gram count, which the solver never actually proved.
    let mut used_ids = Vec::new();
    let mut grams: HashMap<FoodId, i64> = HashMap::new();
    for food in foods {
        let vars = &food_vars[&food.id];
        let z_value = solved.var_value(vars.z).round() as i64;
        if z_value > 0 {
            used_ids.push(food.id);
            grams.insert(food.id, z_value);
        }
    }

    let food_set = FoodSet::from_ids(used_ids);
    let mut nutrient_intake = vec![0i64; bands.len()];
    for food in foods {
        if let Some(&qty) = grams.get(&food.id) {
            for (i, coeff) in food.coeffs.iter().enumerate() {
                nutrient_intake[i] += coeff * qty;
            }
        }
    }
    let total_error: i64 = nutrient_intake
        .iter()
        .zip(bands.iter())
        .map(|(&intake, band)| (intake - band.min).abs())
        .sum();

    Ok(Some(Solution {
        food_set,
        assignment: QuantityAssignment(grams),
        nutrient_intake,
        total_error,
    }))
}
