//! # Delta Analysis
//!
//! Compares clock predictions made on the original beta matrix with the
//! predictions made on each simulated matrix. Tables are always joined on the
//! `id` column, never by row position.
//!
//! For every individual and clock:
//!
//! * delta = |perturbed − original|, averaged over runs and summarized by the
//!   sample standard deviation across runs,
//! * percent deviation = (perturbed − original) / original × 100, undefined
//!   when the original prediction is zero.
//!
//! Per-clock summaries average the per-individual values. Undefined cells are
//! skipped by every average and written as `NA`.

use ahash::AHashMap;
use log::{info, warn};
use ndarray::{Array2, ShapeBuilder};
use polars::prelude::{CsvReadOptions, CsvReader, DataType, PolarsError, SerReader};
use std::fs::File;
use std::io::{self, BufWriter, Cursor};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::stats;
use crate::beta::table_parse_options;
use crate::shared::files::{FileError, ensure_parent_dir, list_files, read_to_bytes};

/// Clocks compared when none are named explicitly.
pub const DEFAULT_CLOCKS: [&str; 6] = ["Horvath", "Hannum", "Levine", "skinHorvath", "PedBE", "DUNEDIN"];

const ID_COLUMN: &str = "id";

#[derive(Error, Debug)]
pub enum DeltaError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Malformed prediction table {path}: {message}")]
    Parse { path: String, message: String },
    #[error("Column '{column}' was not found in {path}")]
    MissingColumn { path: String, column: String },
    #[error("Individual '{0}' appears more than once in a prediction table")]
    DuplicateId(String),
    #[error("Prediction values do not match the table labels: {0}")]
    Shape(String),
    #[error("No simulated prediction tables were found in {0}")]
    NoRuns(String),
    #[error("Failed to write delta table: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to write delta table: {0}")]
    Csv(#[from] csv::Error),
}

/// Clock predictions: one row per individual, one column per clock. Missing
/// predictions are `NaN`.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionTable {
    ids: Vec<String>,
    clocks: Vec<String>,
    id_lookup: AHashMap<String, usize>,
    values: Array2<f64>,
}

impl PredictionTable {
    pub fn from_parts(
        ids: Vec<String>,
        clocks: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self, DeltaError> {
        if values.dim() != (ids.len(), clocks.len()) {
            return Err(DeltaError::Shape(format!(
                "{} ids × {} clocks against a {:?} array",
                ids.len(),
                clocks.len(),
                values.dim()
            )));
        }
        let mut id_lookup = AHashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            if id_lookup.insert(id.clone(), i).is_some() {
                return Err(DeltaError::DuplicateId(id.clone()));
            }
        }
        Ok(Self {
            ids,
            clocks,
            id_lookup,
            values,
        })
    }

    /// Reads a comma-separated table with an `id` column.
    pub fn read_csv(path: &Path) -> Result<Self, DeltaError> {
        let bytes = read_to_bytes(path)?;
        let display = path.display().to_string();
        let df = CsvReader::new(Cursor::new(bytes))
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_infer_schema_length(None)
                    .with_parse_options(table_parse_options(b',')),
            )
            .finish()?;

        let id_column = df.column(ID_COLUMN).map_err(|_| DeltaError::MissingColumn {
            path: display.clone(),
            column: ID_COLUMN.to_string(),
        })?;
        let id_series = id_column.as_materialized_series().cast(&DataType::String)?;
        let mut ids = Vec::with_capacity(df.height());
        for (row, id) in id_series.str()?.into_iter().enumerate() {
            match id {
                Some(id) => ids.push(id.to_string()),
                None => {
                    return Err(DeltaError::Parse {
                        path: display,
                        message: format!("row {} has no id", row + 1),
                    });
                }
            }
        }

        let mut clocks = Vec::new();
        let mut buffer = Vec::new();
        for column in df.get_columns() {
            if column.name().as_str() == ID_COLUMN {
                continue;
            }
            let series = column.as_materialized_series();
            if series.dtype() == &DataType::String && series.null_count() < series.len() {
                warn!("Ignoring non-numeric column '{}' of {}", column.name(), display);
                continue;
            }
            let casted = series.cast(&DataType::Float64)?;
            buffer.extend(casted.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)));
            clocks.push(column.name().to_string());
        }

        let values = Array2::from_shape_vec((ids.len(), clocks.len()).f(), buffer)
            .map_err(|e| DeltaError::Shape(e.to_string()))?;
        Self::from_parts(ids, clocks, values)
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), DeltaError> {
        let cells: Vec<Vec<Option<f64>>> = self
            .values
            .rows()
            .into_iter()
            .map(|row| row.iter().map(|&v| defined(v)).collect())
            .collect();
        write_table(path, ID_COLUMN, &self.ids, &self.clocks, &cells)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn clocks(&self) -> &[String] {
        &self.clocks
    }

    pub fn clock_column(&self, clock: &str) -> Option<usize> {
        self.clocks.iter().position(|c| c == clock)
    }

    /// The prediction of `clock` for `id`; `None` when either is absent or the
    /// value is missing.
    pub fn get(&self, id: &str, clock: &str) -> Option<f64> {
        let row = *self.id_lookup.get(id)?;
        defined(self.values[[row, self.clock_column(clock)?]])
    }
}

fn defined(value: f64) -> Option<f64> {
    if value.is_finite() { Some(value) } else { None }
}

/// A labelled table of optional values, the shape of every delta output.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryTable {
    pub index_label: String,
    pub rows: Vec<String>,
    pub columns: Vec<String>,
    pub cells: Vec<Vec<Option<f64>>>,
}

impl SummaryTable {
    pub fn get(&self, row: &str, column: &str) -> Option<f64> {
        let r = self.rows.iter().position(|x| x == row)?;
        let c = self.columns.iter().position(|x| x == column)?;
        self.cells[r][c]
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), DeltaError> {
        write_table(path, &self.index_label, &self.rows, &self.columns, &self.cells)
    }

    /// Column-wise average over rows, skipping undefined cells, as a
    /// one-column table keyed by the original column names.
    fn column_means(&self, label: &str) -> SummaryTable {
        let cells = (0..self.columns.len())
            .map(|c| {
                let values: Vec<f64> = self.cells.iter().filter_map(|row| row[c]).collect();
                vec![stats::mean(&values)]
            })
            .collect();
        SummaryTable {
            index_label: String::new(),
            rows: self.columns.clone(),
            columns: vec![label.to_string()],
            cells,
        }
    }
}

fn write_table(
    path: &Path,
    index_label: &str,
    rows: &[String],
    columns: &[String],
    cells: &[Vec<Option<f64>>],
) -> Result<(), DeltaError> {
    ensure_parent_dir(path)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
    writer.write_field(index_label)?;
    for column in columns {
        writer.write_field(column)?;
    }
    writer.write_record(std::iter::empty::<&[u8]>())?;

    let mut buffer = ryu::Buffer::new();
    for (label, row) in rows.iter().zip(cells) {
        writer.write_field(label)?;
        for cell in row {
            match cell {
                Some(v) => writer.write_field(buffer.format(*v))?,
                None => writer.write_field("NA")?,
            }
        }
        writer.write_record(std::iter::empty::<&[u8]>())?;
    }
    writer.flush()?;
    Ok(())
}

/// All six delta outputs.
#[derive(Clone, Debug, PartialEq)]
pub struct DeltaSummary {
    pub delta_avg_individuals: SummaryTable,
    pub delta_std_individuals: SummaryTable,
    pub delta_avg_clocks: SummaryTable,
    pub delta_std_clocks: SummaryTable,
    pub percent_deviation_avg_individuals: SummaryTable,
    pub percent_deviation_avg_clocks: SummaryTable,
}

impl DeltaSummary {
    /// Writes the six CSV files into `dir` and returns their paths.
    pub fn write_all(&self, dir: &Path) -> Result<Vec<PathBuf>, DeltaError> {
        let outputs = [
            ("delta_age_avg_individuals.csv", &self.delta_avg_individuals),
            ("delta_age_std_individuals.csv", &self.delta_std_individuals),
            ("delta_age_avg_clocks.csv", &self.delta_avg_clocks),
            ("delta_age_std_clocks.csv", &self.delta_std_clocks),
            (
                "percent_deviation_avg_individuals.csv",
                &self.percent_deviation_avg_individuals,
            ),
            ("percent_deviation_avg_clocks.csv", &self.percent_deviation_avg_clocks),
        ];
        let mut written = Vec::with_capacity(outputs.len());
        for (name, table) in outputs {
            let path = dir.join(name);
            table.write_csv(&path)?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Reads every prediction table of a directory, in natural file order.
pub fn load_runs(dir: &Path) -> Result<Vec<PredictionTable>, DeltaError> {
    let mut runs = Vec::new();
    for path in list_files(dir)? {
        runs.push(PredictionTable::read_csv(&path)?);
    }
    if runs.is_empty() {
        return Err(DeltaError::NoRuns(dir.display().to_string()));
    }
    info!("Loaded {} simulated prediction tables from {}", runs.len(), dir.display());
    Ok(runs)
}

#[derive(Clone, Debug)]
pub struct DeltaAnalyzer {
    clocks: Vec<String>,
}

impl Default for DeltaAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCKS.iter().map(|c| c.to_string()).collect())
    }
}

impl DeltaAnalyzer {
    pub fn new(clocks: Vec<String>) -> Self {
        Self { clocks }
    }

    pub fn clocks(&self) -> &[String] {
        &self.clocks
    }

    fn check_clocks(&self, table: &PredictionTable, which: &str) -> Result<(), DeltaError> {
        match self.clocks.iter().find(|c| table.clock_column(c).is_none()) {
            Some(missing) => Err(DeltaError::MissingColumn {
                path: which.to_string(),
                column: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn analyze(
        &self,
        original: &PredictionTable,
        runs: &[PredictionTable],
    ) -> Result<DeltaSummary, DeltaError> {
        if runs.is_empty() {
            return Err(DeltaError::NoRuns("the run list".into()));
        }
        self.check_clocks(original, "the original prediction table")?;
        for (i, run) in runs.iter().enumerate() {
            self.check_clocks(run, &format!("simulated prediction table {i}"))?;
            let absent = original
                .ids()
                .iter()
                .filter(|id| !run.id_lookup.contains_key(id.as_str()))
                .count();
            if absent > 0 {
                warn!("{absent} individuals are missing from simulated prediction table {i}; they are skipped for that run");
            }
        }

        let ids = original.ids().to_vec();
        let mut delta_mean = Vec::with_capacity(ids.len());
        let mut delta_std = Vec::with_capacity(ids.len());
        let mut percent_mean = Vec::with_capacity(ids.len());

        for id in &ids {
            let mut mean_row = Vec::with_capacity(self.clocks.len());
            let mut std_row = Vec::with_capacity(self.clocks.len());
            let mut percent_row = Vec::with_capacity(self.clocks.len());
            for clock in &self.clocks {
                let baseline = original.get(id, clock);
                let mut deltas = Vec::with_capacity(runs.len());
                let mut percents = Vec::with_capacity(runs.len());
                for run in runs {
                    let (Some(o), Some(p)) = (baseline, run.get(id, clock)) else {
                        continue;
                    };
                    deltas.push((p - o).abs());
                    if o != 0.0 {
                        percents.push((p - o) / o * 100.0);
                    }
                }
                mean_row.push(stats::mean(&deltas));
                std_row.push(stats::std_dev(&deltas, 1));
                percent_row.push(stats::mean(&percents));
            }
            delta_mean.push(mean_row);
            delta_std.push(std_row);
            percent_mean.push(percent_row);
        }

        let individuals = |cells| SummaryTable {
            index_label: ID_COLUMN.to_string(),
            rows: ids.clone(),
            columns: self.clocks.clone(),
            cells,
        };
        let delta_avg_individuals = individuals(delta_mean);
        let delta_std_individuals = individuals(delta_std);
        let percent_deviation_avg_individuals = individuals(percent_mean);

        Ok(DeltaSummary {
            delta_avg_clocks: delta_avg_individuals.column_means("Average Delta Age"),
            delta_std_clocks: delta_std_individuals.column_means("Average Delta Age"),
            percent_deviation_avg_clocks: percent_deviation_avg_individuals
                .column_means("Average Percent Deviation"),
            delta_avg_individuals,
            delta_std_individuals,
            percent_deviation_avg_individuals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::fs;
    use tempfile::tempdir;

    fn table(ids: &[&str], values: Array2<f64>) -> PredictionTable {
        PredictionTable::from_parts(
            ids.iter().map(|s| s.to_string()).collect(),
            vec!["Horvath".into(), "Hannum".into()],
            values,
        )
        .unwrap()
    }

    fn analyzer() -> DeltaAnalyzer {
        DeltaAnalyzer::new(vec!["Horvath".into(), "Hannum".into()])
    }

    #[test]
    fn tables_are_joined_by_id() {
        let original = table(&["a", "b"], array![[50.0, 0.0], [40.0, 20.0]]);
        let runs = vec![
            table(&["b", "a"], array![[44.0, 22.0], [52.0, 1.0]]),
            table(&["a", "b"], array![[46.0, 3.0], [40.0, 20.0]]),
        ];
        let summary = analyzer().analyze(&original, &runs).unwrap();

        let avg = &summary.delta_avg_individuals;
        assert_abs_diff_eq!(avg.get("a", "Horvath").unwrap(), 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(avg.get("b", "Horvath").unwrap(), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(avg.get("a", "Hannum").unwrap(), 2.0, epsilon = 1e-9);

        let std = &summary.delta_std_individuals;
        assert_abs_diff_eq!(std.get("a", "Horvath").unwrap(), 2f64.sqrt(), epsilon = 1e-12);

        assert_abs_diff_eq!(summary.delta_avg_clocks.get("Horvath", "Average Delta Age").unwrap(), 2.5, epsilon = 1e-9);
    }

    #[test]
    fn zero_baselines_make_percent_deviation_undefined() {
        let original = table(&["a"], array![[50.0, 0.0]]);
        let runs = vec![table(&["a"], array![[55.0, 3.0]])];
        let summary = analyzer().analyze(&original, &runs).unwrap();

        let percent = &summary.percent_deviation_avg_individuals;
        assert_abs_diff_eq!(percent.get("a", "Horvath").unwrap(), 10.0, epsilon = 1e-9);
        assert_eq!(percent.get("a", "Hannum"), None);
        assert_eq!(
            summary
                .percent_deviation_avg_clocks
                .get("Hannum", "Average Percent Deviation"),
            None
        );
        // One run: the spread across runs is undefined.
        assert_eq!(summary.delta_std_individuals.get("a", "Horvath"), None);
    }

    #[test]
    fn individuals_missing_from_a_run_are_skipped_for_it() {
        let original = table(&["a", "b"], array![[50.0, 10.0], [40.0, 20.0]]);
        let runs = vec![
            table(&["a"], array![[51.0, 11.0]]),
            table(&["a", "b"], array![[53.0, 13.0], [44.0, 20.0]]),
        ];
        let summary = analyzer().analyze(&original, &runs).unwrap();
        assert_abs_diff_eq!(summary.delta_avg_individuals.get("b", "Horvath").unwrap(), 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(summary.delta_avg_individuals.get("a", "Horvath").unwrap(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn missing_clock_columns_are_reported() {
        let original = PredictionTable::from_parts(
            vec!["a".into()],
            vec!["Horvath".into()],
            array![[1.0]],
        )
        .unwrap();
        let err = analyzer().analyze(&original, &[original.clone()]).unwrap_err();
        assert!(matches!(err, DeltaError::MissingColumn { column, .. } if column == "Hannum"));
    }

    #[test]
    fn csv_tables_round_trip_through_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        fs::write(&path, "id,Horvath,Hannum,note\nGSM1,40.5,,x\nGSM2,30,31.5,y\n").unwrap();

        let predictions = PredictionTable::read_csv(&path).unwrap();
        assert_eq!(predictions.clocks(), ["Horvath", "Hannum"]);
        assert_eq!(predictions.get("GSM1", "Horvath"), Some(40.5));
        assert_eq!(predictions.get("GSM1", "Hannum"), None);

        let out = dir.path().join("out").join("copy.csv");
        predictions.write_csv(&out).unwrap();
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "id,Horvath,Hannum\nGSM1,40.5,NA\nGSM2,30.0,31.5\n"
        );
        let reread = PredictionTable::read_csv(&out).unwrap();
        assert_eq!(reread.clocks(), ["Horvath", "Hannum"]);
        assert_eq!(reread.get("GSM1", "Hannum"), None);
        assert_eq!(reread.get("GSM2", "Hannum"), Some(31.5));
    }

    #[test]
    fn na_cells_keep_their_clock_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("predictions.csv");
        fs::write(&path, "id,Horvath,Hannum\nS1,40.0,NA\nS2,41.0,39.0\n").unwrap();

        let predictions = PredictionTable::read_csv(&path).unwrap();
        assert_eq!(predictions.clocks(), ["Horvath", "Hannum"]);
        assert_eq!(predictions.get("S1", "Hannum"), None);
        assert_eq!(predictions.get("S2", "Hannum"), Some(39.0));
    }

    #[test]
    fn summaries_write_six_files() {
        let original = table(&["a"], array![[50.0, 10.0]]);
        let runs = vec![table(&["a"], array![[51.0, 11.0]])];
        let summary = analyzer().analyze(&original, &runs).unwrap();
        let dir = tempdir().unwrap();
        let written = summary.write_all(dir.path()).unwrap();
        assert_eq!(written.len(), 6);
        let clocks = fs::read_to_string(dir.path().join("delta_age_avg_clocks.csv")).unwrap();
        assert_eq!(clocks, ",Average Delta Age\nHorvath,1.0\nHannum,1.0\n");
    }
}
