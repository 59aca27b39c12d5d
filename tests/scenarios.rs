// Integration tests exercising the concrete scenarios from the nutrient
// food-set enumerator's test plan, end to end through the public API:
// catalog loading -> model solving -> collection.

use foodset::catalog::load_catalog;
use foodset::collector::SolutionCollector;
use foodset::config::RunConfig;
use foodset::exclusion::FoodSet;
use foodset::model::{solve_all_food_sets, SolveOutcome};

fn fixture(name: &str) -> (std::path::PathBuf, std::path::PathBuf) {
    let base = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    (base.join("requirements.csv"), base.join("foods.csv"))
}

#[test]
fn identity_3x3_yields_exactly_one_zero_error_food_set() {
    let (req, foods) = fixture("identity_3x3");
    let catalog = load_catalog(&req, &foods).unwrap();

    let all: Vec<&foodset::catalog::Food> = catalog.foods().iter().collect();
    let mut collector = SolutionCollector::new();
    let outcome = solve_all_food_sets(&all, catalog.bands(), 3, &mut collector).unwrap();

    assert_eq!(outcome, SolveOutcome::Solved { solutions_found: 1 });
    let solutions = collector.into_solutions();
    assert_eq!(solutions.len(), 1);
    assert_eq!(solutions[0].food_set, FoodSet::from_ids(vec![1, 2, 3]));
    assert_eq!(solutions[0].total_error, 0);
    assert_eq!(solutions[0].assignment.get(1), 1);
    assert_eq!(solutions[0].assignment.get(2), 1);
    assert_eq!(solutions[0].assignment.get(3), 1);
}

#[test]
fn two_food_cover_finds_the_covering_pair() {
    let (req, foods) = fixture("two_food_cover");
    let catalog = load_catalog(&req, &foods).unwrap();

    let all: Vec<&foodset::catalog::Food> = catalog.foods().iter().collect();
    let mut collector = SolutionCollector::new();
    let outcome = solve_all_food_sets(&all, catalog.bands(), 2, &mut collector).unwrap();

    assert_eq!(outcome, SolveOutcome::Solved { solutions_found: 1 });
    let solutions = collector.into_solutions();
    assert_eq!(solutions[0].food_set, FoodSet::from_ids(vec![1, 2]));
    assert_eq!(solutions[0].nutrient_intake, vec![1000, 1000, 1000]);
    assert_eq!(solutions[0].total_error, 0);
}

#[test]
fn excluding_a_covering_food_makes_the_identity_catalog_infeasible() {
    let (req, foods) = fixture("identity_3x3");
    let catalog = load_catalog(&req, &foods).unwrap();

    // Exclude C: no remaining food contributes to NutrientC, so N=3 over
    // the reduced catalog (only A, B left) is infeasible by construction.
    let effective = catalog.effective_foods(&[3]);
    let mut collector = SolutionCollector::new();
    let outcome = solve_all_food_sets(&effective, catalog.bands(), 3, &mut collector).unwrap();

    assert_eq!(outcome, SolveOutcome::Infeasible);
    assert!(collector.is_empty());
}

#[test]
fn n_zero_is_rejected_at_config_validation() {
    let cfg = RunConfig::new(0, "store.db", "req.csv", "foods.csv");
    assert!(cfg.validate(5).is_err());
}

#[test]
fn n_greater_than_catalog_size_is_rejected_at_config_validation() {
    let (req, foods) = fixture("identity_3x3");
    let catalog = load_catalog(&req, &foods).unwrap();
    let cfg = RunConfig::new(10, "store.db", &req, &foods);
    assert!(cfg.validate(catalog.foods().len()).is_err());
}
