//! Shared test fixtures
//!
//! Dataset builders and a scripted constraint evaluator. The evaluator
//! produces a deterministic result dataset derived from the parsed
//! expression, counts how many times it actually evaluates, and can be
//! told to fail, so tests can assert when the cache served a hit versus
//! re-evaluating.

use std::fs;
use std::path::{Path, PathBuf};

use dap_function_cache::{
    ConstraintEvaluator, DataType, Dataset, EvaluatorError, ScalarValue, Variable, VariableValue,
};

/// Create a small file standing in for the on-disk dataset and return
/// its path.
pub fn write_dataset_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"netcdf stand-in\n").unwrap();
    path
}

/// A source dataset pointing at `filename`.
pub fn source_dataset(filename: &Path) -> Dataset {
    Dataset::new("source")
        .with_filename(filename.display().to_string())
        .with_variable(Variable::array(
            "u",
            DataType::Float64,
            vec![4],
            vec![
                ScalarValue::Float64(1.0),
                ScalarValue::Float64(2.0),
                ScalarValue::Float64(3.0),
                ScalarValue::Float64(4.0),
            ],
        ))
}

/// Scripted evaluator with call counting and failure injection.
pub struct FixtureEvaluator {
    /// Number of completed evaluations
    pub evaluations: usize,
    /// When set, the next parse fails
    pub fail: bool,
    /// Number of Float64 elements in the result's bulk array, for tests
    /// that need entries of a particular size
    pub payload_floats: usize,
    parsed: Option<String>,
}

impl FixtureEvaluator {
    pub fn new() -> Self {
        Self {
            evaluations: 0,
            fail: false,
            payload_floats: 8,
            parsed: None,
        }
    }

    pub fn with_payload_floats(mut self, n: usize) -> Self {
        self.payload_floats = n;
        self
    }
}

impl Default for FixtureEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstraintEvaluator for FixtureEvaluator {
    fn parse_constraint(
        &mut self,
        expression: &str,
        _dataset: &Dataset,
    ) -> Result<(), EvaluatorError> {
        if self.fail {
            return Err(EvaluatorError::new("injected parse failure"));
        }
        self.parsed = Some(expression.to_string());
        Ok(())
    }

    fn eval_function_clauses(&mut self, dataset: &Dataset) -> Result<Dataset, EvaluatorError> {
        let expression = self
            .parsed
            .clone()
            .ok_or_else(|| EvaluatorError::new("eval before parse"))?;
        self.evaluations += 1;

        // Deterministic per expression, so different constraints yield
        // distinguishable results.
        let seed = expression.len() as f64;

        let mut result = Dataset::new("function_result");
        result.set_filename(dataset.filename());

        let mut mean = Variable::primitive("mean", ScalarValue::Float64(seed * 0.5));
        mark(&mut mean);
        result.add_variable(mean);

        let mut expr = Variable::primitive("expression", ScalarValue::Str(expression));
        mark(&mut expr);
        result.add_variable(expr);

        let series: Vec<ScalarValue> = (0..self.payload_floats)
            .map(|i| ScalarValue::Float64(seed + i as f64))
            .collect();
        let mut bulk = Variable::array(
            "series",
            DataType::Float64,
            vec![self.payload_floats],
            series,
        );
        mark(&mut bulk);
        result.add_variable(bulk);

        let template = vec![
            Variable::primitive("t", ScalarValue::Int32(0)),
            Variable::primitive("v", ScalarValue::Float64(0.0)),
        ];
        let rows = vec![
            vec![
                VariableValue::Primitive(ScalarValue::Int32(1)),
                VariableValue::Primitive(ScalarValue::Float64(seed)),
            ],
            vec![
                VariableValue::Primitive(ScalarValue::Int32(2)),
                VariableValue::Primitive(ScalarValue::Float64(seed * 2.0)),
            ],
        ];
        let mut samples = Variable::sequence("samples", template, rows);
        mark(&mut samples);
        result.add_variable(samples);

        Ok(result)
    }
}

fn mark(var: &mut Variable) {
    var.set_read_p(true);
    var.set_send_p(true);
}

/// Assert two datasets carry the same variables by name and value.
///
/// Read/send flags are intentionally not compared; a decoded dataset and
/// a freshly evaluated one differ in bookkeeping, not content.
pub fn assert_same_values(left: &Dataset, right: &Dataset) {
    assert_eq!(left.variables().len(), right.variables().len());
    for (l, r) in left.variables().iter().zip(right.variables()) {
        assert_eq!(l.name(), r.name());
        assert_eq!(l.value(), r.value(), "variable {}", l.name());
    }
}
