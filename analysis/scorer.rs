use log::warn;
use ndarray::{Array2, ShapeBuilder};
use thiserror::Error;

use super::clocks::ClockTable;
use super::delta::{DeltaError, PredictionTable};
use crate::beta::BetaMatrix;

#[derive(Error, Debug)]
pub enum ScoreError {
    #[error("Clock '{0}' is not in the coefficient table")]
    UnknownClock(String),
    #[error(transparent)]
    Table(#[from] DeltaError),
}

/// Anything that turns a beta matrix into per-sample clock predictions.
pub trait ClockScorer {
    fn clock_names(&self) -> Vec<String>;

    /// One row per sample of `beta` (keyed by sample id), one column per clock.
    fn predict(&self, beta: &BetaMatrix) -> Result<PredictionTable, ScoreError>;
}

#[derive(Clone, Debug)]
struct LinearClock {
    name: String,
    intercept: f64,
    weights: Vec<(String, f64)>,
}

/// `intercept + Σ coefficient × beta` over the CpGs of each clock that the
/// matrix contains. Missing CpGs and missing beta values contribute nothing.
#[derive(Clone, Debug)]
pub struct LinearClockScorer {
    clocks: Vec<LinearClock>,
}

impl LinearClockScorer {
    pub fn from_table(table: &ClockTable) -> Self {
        Self {
            clocks: table
                .clocks()
                .iter()
                .map(|clock| LinearClock {
                    name: clock.name().to_string(),
                    intercept: clock.intercept(),
                    weights: clock
                        .cpgs()
                        .iter()
                        .map(|cpg| (cpg.cpg.clone(), cpg.coefficient))
                        .collect(),
                })
                .collect(),
        }
    }

    /// Keeps only the named clocks, in the order given.
    pub fn select(table: &ClockTable, names: &[String]) -> Result<Self, ScoreError> {
        let all = Self::from_table(table);
        let mut clocks = Vec::with_capacity(names.len());
        for name in names {
            let clock = all
                .clocks
                .iter()
                .find(|clock| &clock.name == name)
                .ok_or_else(|| ScoreError::UnknownClock(name.clone()))?;
            clocks.push(clock.clone());
        }
        Ok(Self { clocks })
    }
}

impl ClockScorer for LinearClockScorer {
    fn clock_names(&self) -> Vec<String> {
        self.clocks.iter().map(|c| c.name.clone()).collect()
    }

    fn predict(&self, beta: &BetaMatrix) -> Result<PredictionTable, ScoreError> {
        let n_samples = beta.n_samples();
        let values = beta.values();
        let mut buffer = Vec::with_capacity(n_samples * self.clocks.len());

        for clock in &self.clocks {
            let rows: Vec<(usize, f64)> = clock
                .weights
                .iter()
                .filter_map(|(cpg, weight)| beta.cpg_row(cpg).map(|row| (row, *weight)))
                .collect();
            let absent = clock.weights.len() - rows.len();
            if absent > 0 {
                warn!(
                    "{} of {} CpGs of clock '{}' are not in the beta matrix",
                    absent,
                    clock.weights.len(),
                    clock.name
                );
            }

            let mut missing_values = 0usize;
            for sample in 0..n_samples {
                let mut prediction = clock.intercept;
                for &(row, weight) in &rows {
                    let value = values[[row, sample]];
                    if value.is_nan() {
                        missing_values += 1;
                    } else {
                        prediction += weight * value;
                    }
                }
                buffer.push(prediction);
            }
            if missing_values > 0 {
                warn!(
                    "Clock '{}': {} missing beta values were left out of the predictions",
                    clock.name, missing_values
                );
            }
        }

        let predictions = Array2::from_shape_vec((n_samples, self.clocks.len()).f(), buffer)
            .map_err(|e| DeltaError::Shape(e.to_string()))?;
        Ok(PredictionTable::from_parts(
            beta.sample_ids().to_vec(),
            self.clock_names(),
            predictions,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::clocks::Clock;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn table() -> ClockTable {
        let mut table = ClockTable::default();
        let mut first = Clock::new("First");
        first.add_cpg("cg01", 2.0);
        first.add_cpg("cg02", -1.0);
        first.add_cpg("cg99", 5.0);
        table.insert(first);
        let mut second = Clock::new("Second");
        second.add_cpg("cg02", 10.0);
        table.insert(second);
        table
    }

    #[test]
    fn predictions_are_linear_in_beta() {
        let beta = BetaMatrix::from_parts(
            "ID_REF",
            vec!["cg01".into(), "cg02".into()],
            vec!["A".into(), "B".into()],
            array![[0.5, 1.0], [0.25, f64::NAN]],
        )
        .unwrap();
        let scorer = LinearClockScorer::from_table(&table());
        let predictions = scorer.predict(&beta).unwrap();

        assert_eq!(predictions.clocks(), ["First", "Second"]);
        assert_abs_diff_eq!(predictions.get("A", "First").unwrap(), 0.75);
        assert_abs_diff_eq!(predictions.get("B", "First").unwrap(), 2.0);
        assert_abs_diff_eq!(predictions.get("A", "Second").unwrap(), 2.5);
        assert_abs_diff_eq!(predictions.get("B", "Second").unwrap(), 0.0);
    }

    #[test]
    fn selecting_an_unknown_clock_fails() {
        let names = vec!["Second".to_string(), "Missing".to_string()];
        assert!(matches!(
            LinearClockScorer::select(&table(), &names),
            Err(ScoreError::UnknownClock(name)) if name == "Missing"
        ));
        let only = LinearClockScorer::select(&table(), &names[..1]).unwrap();
        assert_eq!(only.clock_names(), vec!["Second"]);
    }
}
