// src/core/errors.rs - Core error types for the food-set enumerator

use thiserror::Error;

/// Errors raised by the catalog loader, bound precomputation, model builder
/// and store. `ModelInfeasible` is deliberately not a variant here: per the
/// design, "no assignment exists for this exclusion" is a normal outcome,
/// not an error.
#[derive(Error, Debug)]
pub enum FoodSetError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("solver model rejected as invalid: {0}")]
    ModelInvalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run interrupted by signal; in-progress exclusions remain claimed for a later resume")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, FoodSetError>;

impl FoodSetError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn model_invalid(msg: impl Into<String>) -> Self {
        Self::ModelInvalid(msg.into())
    }
}
