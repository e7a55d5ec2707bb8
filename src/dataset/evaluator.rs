//! Constraint evaluator seam
//!
//! The cache never interprets function expressions itself; the dispatcher
//! hands it an evaluator along with the dataset. The evaluator parses the
//! function constraint against the source dataset and produces the result
//! dataset whose variables the cache serializes.

use thiserror::Error;

use super::Dataset;

/// Error propagated verbatim from a constraint evaluator.
#[derive(Debug, Error)]
#[error("constraint evaluation failed: {message}")]
pub struct EvaluatorError {
    message: String,
}

impl EvaluatorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Server-side function evaluation over a dataset.
///
/// Implementations are stateful: `parse_constraint` is called first with
/// the function expression, then `eval_function_clauses` computes the
/// result dataset. Result variables the caller should serialize must have
/// their send flag set.
pub trait ConstraintEvaluator {
    /// Parse `expression` in the context of `dataset`.
    fn parse_constraint(
        &mut self,
        expression: &str,
        dataset: &Dataset,
    ) -> Result<(), EvaluatorError>;

    /// Evaluate the parsed function clauses and return the result dataset.
    fn eval_function_clauses(&mut self, dataset: &Dataset) -> Result<Dataset, EvaluatorError>;
}
