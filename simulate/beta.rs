//! # Beta Matrix
//!
//! Methylation beta values as a CpG × sample matrix. Rows are addressed by
//! CpG id and columns by sample id; there is never any positional matching
//! between files. Values are expected in `[0, 1]`; missing cells are `NaN`.

use ahash::AHashMap;
use log::{info, warn};
use ndarray::{Array2, ShapeBuilder};
use polars::prelude::{
    CsvParseOptions, CsvReadOptions, CsvReader, DataFrame, DataType, NullValues, PolarsError,
    SerReader,
};
use std::fs::File;
use std::io::{self, BufWriter, Cursor};
use std::path::Path;
use thiserror::Error;

use crate::shared::files::{FileError, ensure_parent_dir, read_to_bytes};

#[derive(Error, Debug)]
pub enum BetaError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Malformed beta matrix {path}: {message}")]
    Parse { path: String, message: String },
    #[error("Beta matrix has {rows} CpG ids and {cols} sample ids but a {shape:?} value array")]
    Shape {
        rows: usize,
        cols: usize,
        shape: (usize, usize),
    },
    #[error("Duplicate {axis} id '{id}' in beta matrix")]
    DuplicateId { axis: &'static str, id: String },
    #[error("Failed to write beta matrix: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to write beta matrix: {0}")]
    Csv(#[from] csv::Error),
}

const DEFAULT_INDEX_LABEL: &str = "ID_REF";

/// Cell spellings read as missing values in every input table.
pub const MISSING_MARKERS: [&str; 3] = ["NA", "NaN", "null"];

/// CSV parse options for `separator` that read [`MISSING_MARKERS`] as nulls.
pub fn table_parse_options(separator: u8) -> CsvParseOptions {
    CsvParseOptions::default()
        .with_separator(separator)
        .with_null_values(Some(NullValues::AllColumns(
            MISSING_MARKERS.iter().map(|&marker| marker.into()).collect(),
        )))
}

#[derive(Clone, Debug, PartialEq)]
pub struct BetaMatrix {
    index_label: String,
    cpg_ids: Vec<String>,
    sample_ids: Vec<String>,
    cpg_lookup: AHashMap<String, usize>,
    sample_lookup: AHashMap<String, usize>,
    values: Array2<f64>,
}

fn build_lookup(ids: &[String], axis: &'static str) -> Result<AHashMap<String, usize>, BetaError> {
    let mut lookup = AHashMap::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        if lookup.insert(id.clone(), i).is_some() {
            return Err(BetaError::DuplicateId {
                axis,
                id: id.clone(),
            });
        }
    }
    Ok(lookup)
}

impl BetaMatrix {
    pub fn from_parts(
        index_label: impl Into<String>,
        cpg_ids: Vec<String>,
        sample_ids: Vec<String>,
        values: Array2<f64>,
    ) -> Result<Self, BetaError> {
        if values.dim() != (cpg_ids.len(), sample_ids.len()) {
            return Err(BetaError::Shape {
                rows: cpg_ids.len(),
                cols: sample_ids.len(),
                shape: values.dim(),
            });
        }
        let cpg_lookup = build_lookup(&cpg_ids, "CpG")?;
        let sample_lookup = build_lookup(&sample_ids, "sample")?;

        let out_of_range = values
            .iter()
            .filter(|v| !v.is_nan() && !(0.0..=1.0).contains(*v))
            .count();
        if out_of_range > 0 {
            warn!("{out_of_range} beta values lie outside [0, 1]");
        }

        let index_label = index_label.into();
        Ok(Self {
            index_label: if index_label.is_empty() {
                DEFAULT_INDEX_LABEL.to_string()
            } else {
                index_label
            },
            cpg_ids,
            sample_ids,
            cpg_lookup,
            sample_lookup,
            values,
        })
    }

    /// Reads a tab-separated matrix (optionally gzip compressed) whose first
    /// column holds the CpG ids.
    pub fn read_tsv(path: &Path) -> Result<Self, BetaError> {
        let bytes = read_to_bytes(path)?;
        let matrix = Self::parse_tsv(bytes, &path.display().to_string())?;
        info!(
            "Loaded beta matrix {} ({} CpGs × {} samples)",
            path.display(),
            matrix.n_cpgs(),
            matrix.n_samples()
        );
        Ok(matrix)
    }

    pub fn parse_tsv(bytes: Vec<u8>, path_display: &str) -> Result<Self, BetaError> {
        let df = CsvReader::new(Cursor::new(bytes))
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_infer_schema_length(None)
                    .with_parse_options(table_parse_options(b'\t')),
            )
            .finish()?;
        Self::from_data_frame(&df, path_display)
    }

    fn from_data_frame(df: &DataFrame, path_display: &str) -> Result<Self, BetaError> {
        let columns = df.get_columns();
        let Some((index_column, sample_columns)) = columns.split_first() else {
            return Err(BetaError::Parse {
                path: path_display.to_string(),
                message: "no columns found".into(),
            });
        };

        let ids = index_column
            .as_materialized_series()
            .cast(&DataType::String)?;
        let mut cpg_ids = Vec::with_capacity(df.height());
        for (row, id) in ids.str()?.into_iter().enumerate() {
            match id {
                Some(id) if !id.trim().is_empty() => cpg_ids.push(id.trim().to_string()),
                _ => {
                    return Err(BetaError::Parse {
                        path: path_display.to_string(),
                        message: format!("row {} has no CpG id", row + 1),
                    });
                }
            }
        }

        let mut sample_ids = Vec::with_capacity(sample_columns.len());
        let mut buffer = Vec::with_capacity(df.height() * sample_columns.len());
        for column in sample_columns {
            let series = column.as_materialized_series();
            if series.dtype() == &DataType::String && series.null_count() < series.len() {
                warn!(
                    "Ignoring non-numeric column '{}' of {}",
                    column.name(),
                    path_display
                );
                continue;
            }
            let casted = series.cast(&DataType::Float64)?;
            buffer.extend(casted.f64()?.into_iter().map(|v| v.unwrap_or(f64::NAN)));
            sample_ids.push(column.name().to_string());
        }

        let values = Array2::from_shape_vec((cpg_ids.len(), sample_ids.len()).f(), buffer)
            .map_err(|e| BetaError::Parse {
                path: path_display.to_string(),
                message: e.to_string(),
            })?;
        Self::from_parts(index_column.name().to_string(), cpg_ids, sample_ids, values)
    }

    /// Writes the matrix in the layout it was read from. Missing values become
    /// empty cells.
    pub fn write_tsv(&self, path: &Path) -> Result<(), BetaError> {
        ensure_parent_dir(path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(BufWriter::new(File::create(path)?));

        writer.write_field(&self.index_label)?;
        for sample in &self.sample_ids {
            writer.write_field(sample)?;
        }
        writer.write_record(std::iter::empty::<&[u8]>())?;

        let mut buffer = ryu::Buffer::new();
        for (row, cpg) in self.values.rows().into_iter().zip(&self.cpg_ids) {
            writer.write_field(cpg)?;
            for &value in row {
                if value.is_nan() {
                    writer.write_field("")?;
                } else {
                    writer.write_field(buffer.format(value))?;
                }
            }
            writer.write_record(std::iter::empty::<&[u8]>())?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn index_label(&self) -> &str {
        &self.index_label
    }

    pub fn cpg_ids(&self) -> &[String] {
        &self.cpg_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_cpgs(&self) -> usize {
        self.cpg_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn cpg_row(&self, cpg: &str) -> Option<usize> {
        self.cpg_lookup.get(cpg).copied()
    }

    pub fn sample_column(&self, sample: &str) -> Option<usize> {
        self.sample_lookup.get(sample).copied()
    }

    pub fn get(&self, cpg: &str, sample: &str) -> Option<f64> {
        Some(self.values[[self.cpg_row(cpg)?, self.sample_column(sample)?]])
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Array2<f64> {
        &mut self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn reads_rows_by_cpg_and_columns_by_sample() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("beta.txt");
        fs::write(&path, "ID_REF\tGSM1\tGSM2\ncg01\t0.5\t0.25\ncg02\t\t1\n").unwrap();

        let matrix = BetaMatrix::read_tsv(&path).unwrap();
        assert_eq!(matrix.cpg_ids(), ["cg01", "cg02"]);
        assert_eq!(matrix.sample_ids(), ["GSM1", "GSM2"]);
        assert_eq!(matrix.get("cg01", "GSM2"), Some(0.25));
        assert!(matrix.get("cg02", "GSM1").unwrap().is_nan());
        assert_eq!(matrix.get("cg02", "GSM2"), Some(1.0));
        assert_eq!(matrix.get("cg03", "GSM1"), None);
    }

    #[test]
    fn missing_markers_become_nan_without_dropping_samples() {
        let matrix = BetaMatrix::parse_tsv(
            b"ID_REF\tGSM1\tGSM2\tGSM3\ncg01\t0.5\tNA\t0.1\ncg02\t0.4\t0.3\tNaN\n".to_vec(),
            "beta.txt",
        )
        .unwrap();
        assert_eq!(matrix.sample_ids(), ["GSM1", "GSM2", "GSM3"]);
        assert!(matrix.get("cg01", "GSM2").unwrap().is_nan());
        assert_eq!(matrix.get("cg02", "GSM2"), Some(0.3));
        assert!(matrix.get("cg02", "GSM3").unwrap().is_nan());
    }

    #[test]
    fn written_matrix_keeps_layout_and_missing_cells() {
        let matrix = BetaMatrix::from_parts(
            "ID_REF",
            vec!["cg01".into(), "cg02".into()],
            vec!["A".into(), "B".into()],
            array![[0.5, f64::NAN], [0.125, 1.0]],
        )
        .unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.txt");
        matrix.write_tsv(&path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "ID_REF\tA\tB\ncg01\t0.5\t\ncg02\t0.125\t1.0\n"
        );
        let reread = BetaMatrix::read_tsv(&path).unwrap();
        assert_eq!(reread.get("cg02", "A"), Some(0.125));
        assert!(reread.get("cg01", "B").unwrap().is_nan());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = BetaMatrix::from_parts(
            "",
            vec!["cg01".into(), "cg01".into()],
            vec!["A".into()],
            array![[0.1], [0.2]],
        )
        .unwrap_err();
        assert!(matches!(err, BetaError::DuplicateId { axis: "CpG", .. }));
    }

    #[test]
    fn shape_must_match_ids() {
        let err = BetaMatrix::from_parts("", vec!["cg01".into()], vec![], array![[0.1]]).unwrap_err();
        assert!(matches!(err, BetaError::Shape { .. }));
    }
}
