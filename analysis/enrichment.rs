//! # Mutation Enrichment
//!
//! Contingency-table tests of whether mutations fall on a clock's CpGs more
//! often than on the CpGs of the other clocks (clock level), or whether one
//! population's SNPs overlap clock CpGs more often than other populations'
//! SNPs do (population level). Both use two-sided Fisher exact tests with a
//! Benjamini-Hochberg correction over all tests of the run, and report a
//! relative risk next to the p-values.

use log::{info, warn};
use polars::prelude::{
    Column, CsvReadOptions, CsvReader, DataFrame, DataType, PolarsError, SerReader,
};
use std::fs::File;
use std::io::{self, BufWriter, Cursor};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::clocks::{ClockTable, EXCLUDED_CLOCKS};
use super::stats::{benjamini_hochberg, fisher_exact};
use crate::shared::files::{FileError, ensure_parent_dir, read_to_bytes};
use crate::types::MutationStatus;

/// Populations reported when none are named explicitly.
pub const DEFAULT_POPULATIONS: [&str; 9] =
    ["afr", "sas", "amr", "eas", "fin", "nfe", "asj", "ami", "mid"];

const CONTINUITY: f64 = 0.5;

#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("Malformed count table {path} at row {row}: {message}")]
    Parse {
        path: String,
        row: usize,
        message: String,
    },
    #[error("Column '{column}' was not found in {path}")]
    MissingColumn { path: String, column: String },
    #[error("Failed to write enrichment table: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to write enrichment table: {0}")]
    Csv(#[from] csv::Error),
}

fn read_csv_frame(path: &Path) -> Result<DataFrame, EnrichmentError> {
    let bytes = read_to_bytes(path)?;
    Ok(CsvReader::new(Cursor::new(bytes))
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None),
        )
        .finish()?)
}

fn find_column<'a>(
    df: &'a DataFrame,
    name: &str,
    path: &str,
) -> Result<&'a Column, EnrichmentError> {
    df.get_columns()
        .iter()
        .find(|column| column.name().as_str().eq_ignore_ascii_case(name))
        .ok_or_else(|| EnrichmentError::MissingColumn {
            path: path.to_string(),
            column: name.to_string(),
        })
}

fn string_column(df: &DataFrame, name: &str, path: &str) -> Result<Vec<String>, EnrichmentError> {
    let series = find_column(df, name, path)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    let mut values = Vec::with_capacity(series.len());
    for (row, value) in series.str()?.into_iter().enumerate() {
        values.push(
            value
                .ok_or_else(|| EnrichmentError::Parse {
                    path: path.to_string(),
                    row: row + 1,
                    message: format!("empty '{name}'"),
                })?
                .to_string(),
        );
    }
    Ok(values)
}

/// A column of non-negative whole counts.
fn count_column(df: &DataFrame, name: &str, path: &str) -> Result<Vec<u64>, EnrichmentError> {
    let series = find_column(df, name, path)?
        .as_materialized_series()
        .cast(&DataType::Float64)?;
    let mut counts = Vec::with_capacity(series.len());
    for (row, value) in series.f64()?.into_iter().enumerate() {
        match value {
            Some(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 => counts.push(v as u64),
            other => {
                return Err(EnrichmentError::Parse {
                    path: path.to_string(),
                    row: row + 1,
                    message: format!("'{name}' must be a non-negative whole count, found {other:?}"),
                });
            }
        }
    }
    Ok(counts)
}

fn write_optional(
    writer: &mut csv::Writer<BufWriter<File>>,
    buffer: &mut ryu::Buffer,
    value: Option<f64>,
) -> Result<(), csv::Error> {
    match value {
        Some(v) if v.is_finite() => writer.write_field(buffer.format(v)),
        _ => writer.write_field("NA"),
    }
}

fn csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>, EnrichmentError> {
    ensure_parent_dir(path)?;
    Ok(csv::Writer::from_writer(BufWriter::new(File::create(path)?)))
}

/// Relative risk of mutation for one group against a comparison group. A
/// zero numerator count becomes 0.5; a rate that cannot be formed, or a zero
/// comparison rate, leaves the risk undefined.
pub fn relative_risk(mutated: u64, total: u64, other_mutated: u64, other_total: u64) -> Option<f64> {
    if total == 0 || other_total == 0 || other_mutated == 0 {
        return None;
    }
    let numerator = if mutated == 0 {
        CONTINUITY
    } else {
        mutated as f64
    };
    Some((numerator / total as f64) / (other_mutated as f64 / other_total as f64))
}

/// CpG counts of one clock in one population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MutationCounts {
    pub mutated: u64,
    pub not_mutated: u64,
}

impl MutationCounts {
    pub fn total(&self) -> u64 {
        self.mutated + self.not_mutated
    }
}

/// Per-clock, per-population CpG counts with and without mutations.
#[derive(Clone, Debug, PartialEq)]
pub struct ClockSummary {
    populations: Vec<String>,
    clocks: Vec<String>,
    counts: Vec<Vec<MutationCounts>>,
}

impl ClockSummary {
    pub fn new(populations: Vec<String>) -> Self {
        Self {
            populations,
            clocks: Vec::new(),
            counts: Vec::new(),
        }
    }

    /// Adds a clock with one count pair per population. Excluded clocks are
    /// dropped.
    pub fn push(&mut self, clock: &str, counts: Vec<MutationCounts>) -> bool {
        if EXCLUDED_CLOCKS.contains(&clock) {
            return false;
        }
        debug_assert_eq!(counts.len(), self.populations.len());
        self.clocks.push(clock.to_string());
        self.counts.push(counts);
        true
    }

    /// Reads a summary with a `clock` column and `<pop>_site_with_mutations`
    /// / `<pop>_site_without_mutations` columns for every population.
    pub fn read_csv(path: &Path, populations: &[String]) -> Result<Self, EnrichmentError> {
        let display = path.display().to_string();
        let df = read_csv_frame(path)?;
        let clocks = string_column(&df, "clock", &display)?;

        let mut per_population = Vec::with_capacity(populations.len());
        for population in populations {
            let with = count_column(&df, &format!("{population}_site_with_mutations"), &display)?;
            let without =
                count_column(&df, &format!("{population}_site_without_mutations"), &display)?;
            per_population.push((with, without));
        }

        let mut summary = Self::new(populations.to_vec());
        for (row, clock) in clocks.iter().enumerate() {
            let counts = per_population
                .iter()
                .map(|(with, without)| MutationCounts {
                    mutated: with[row],
                    not_mutated: without[row],
                })
                .collect();
            summary.push(clock, counts);
        }
        info!(
            "Read mutation counts of {} clocks for {} populations from {}",
            summary.clocks.len(),
            populations.len(),
            display
        );
        Ok(summary)
    }

    /// Counts the CpGs of every clock by mutation status. CpGs with unknown
    /// status in a population are not counted for it.
    pub fn from_clock_table(table: &ClockTable, populations: &[String]) -> Self {
        let mut summary = Self::new(populations.to_vec());
        for clock in table.clocks() {
            let counts = populations
                .iter()
                .map(|population| MutationCounts {
                    mutated: clock.count_status(population, MutationStatus::Mutated) as u64,
                    not_mutated: clock.count_status(population, MutationStatus::NotMutated) as u64,
                })
                .collect();
            summary.push(clock.name(), counts);
        }
        summary
    }

    pub fn populations(&self) -> &[String] {
        &self.populations
    }

    pub fn clocks(&self) -> &[String] {
        &self.clocks
    }

    pub fn counts(&self, clock: usize, population: usize) -> MutationCounts {
        self.counts[clock][population]
    }

    /// Counts of every clock but `clock` in one population.
    fn others(&self, clock: usize, population: usize) -> MutationCounts {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != clock)
            .fold(MutationCounts::default(), |acc, (_, row)| MutationCounts {
                mutated: acc.mutated + row[population].mutated,
                not_mutated: acc.not_mutated + row[population].not_mutated,
            })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FisherRow {
    pub population: String,
    pub clock: String,
    pub raw_p: Option<f64>,
    pub adjusted_p: Option<f64>,
}

/// Relative risk per population (rows) and clock (columns), plus the
/// per-clock average over populations.
#[derive(Clone, Debug, PartialEq)]
pub struct RelativeRiskTable {
    pub populations: Vec<String>,
    pub clocks: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
    pub average: Vec<Option<f64>>,
}

impl RelativeRiskTable {
    pub fn get(&self, population: &str, clock: &str) -> Option<f64> {
        let p = self.populations.iter().position(|x| x == population)?;
        let c = self.clocks.iter().position(|x| x == clock)?;
        self.values[p][c]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnrichmentReport {
    pub fisher: Vec<FisherRow>,
    pub relative_risk: RelativeRiskTable,
}

impl EnrichmentReport {
    /// Writes `fisher_fdr_pvalues.csv` and `relative_risk_scores.csv` into
    /// `dir`.
    pub fn write_all(&self, dir: &Path) -> Result<Vec<PathBuf>, EnrichmentError> {
        let mut buffer = ryu::Buffer::new();

        let fisher_path = dir.join("fisher_fdr_pvalues.csv");
        let mut writer = csv_writer(&fisher_path)?;
        writer.write_record(["Population", "Clock", "Raw_p", "Adjusted_p"])?;
        for row in &self.fisher {
            writer.write_field(&row.population)?;
            writer.write_field(&row.clock)?;
            write_optional(&mut writer, &mut buffer, row.raw_p)?;
            write_optional(&mut writer, &mut buffer, row.adjusted_p)?;
            writer.write_record(std::iter::empty::<&[u8]>())?;
        }
        writer.flush()?;

        let risk_path = dir.join("relative_risk_scores.csv");
        let table = &self.relative_risk;
        let mut writer = csv_writer(&risk_path)?;
        writer.write_field("")?;
        for clock in &table.clocks {
            writer.write_field(clock)?;
        }
        writer.write_record(std::iter::empty::<&[u8]>())?;
        let labelled = table
            .populations
            .iter()
            .map(String::as_str)
            .zip(table.values.iter())
            .chain(std::iter::once(("average", &table.average)));
        for (label, values) in labelled {
            writer.write_field(label)?;
            for &value in values {
                write_optional(&mut writer, &mut buffer, value)?;
            }
            writer.write_record(std::iter::empty::<&[u8]>())?;
        }
        writer.flush()?;

        Ok(vec![fisher_path, risk_path])
    }
}

/// Clock-level enrichment over a fixed population list.
#[derive(Clone, Debug)]
pub struct EnrichmentTester {
    populations: Vec<String>,
}

impl Default for EnrichmentTester {
    fn default() -> Self {
        Self::new(DEFAULT_POPULATIONS.iter().map(|p| p.to_string()).collect())
    }
}

impl EnrichmentTester {
    pub fn new(populations: Vec<String>) -> Self {
        Self { populations }
    }

    pub fn populations(&self) -> &[String] {
        &self.populations
    }

    pub fn read_summary(&self, path: &Path) -> Result<ClockSummary, EnrichmentError> {
        ClockSummary::read_csv(path, &self.populations)
    }

    pub fn summarize(&self, table: &ClockTable) -> ClockSummary {
        ClockSummary::from_clock_table(table, &self.populations)
    }

    /// For every population and clock, tests this clock's mutated/unmutated
    /// CpG counts against the pooled counts of all other clocks.
    pub fn test(&self, summary: &ClockSummary) -> EnrichmentReport {
        let mut fisher = Vec::with_capacity(summary.populations.len() * summary.clocks.len());
        let mut values = Vec::with_capacity(summary.populations.len());

        for (p, population) in summary.populations.iter().enumerate() {
            let mut row = Vec::with_capacity(summary.clocks.len());
            for (c, clock) in summary.clocks.iter().enumerate() {
                let this = summary.counts(c, p);
                let others = summary.others(c, p);
                fisher.push(FisherRow {
                    population: population.clone(),
                    clock: clock.clone(),
                    raw_p: Some(fisher_exact(
                        this.mutated,
                        this.not_mutated,
                        others.mutated,
                        others.not_mutated,
                    )),
                    adjusted_p: None,
                });
                row.push(relative_risk(
                    this.mutated,
                    this.total(),
                    others.mutated,
                    others.total(),
                ));
            }
            values.push(row);
        }

        let raw: Vec<Option<f64>> = fisher.iter().map(|row| row.raw_p).collect();
        for (row, adjusted) in fisher.iter_mut().zip(benjamini_hochberg(&raw)) {
            row.adjusted_p = adjusted;
        }

        let average = (0..summary.clocks.len())
            .map(|c| {
                let defined: Vec<f64> = values.iter().filter_map(|row| row[c]).collect();
                super::stats::mean(&defined)
            })
            .collect();

        let undefined = values.iter().flatten().filter(|v| v.is_none()).count();
        if undefined > 0 {
            warn!("{undefined} relative risks are undefined (no mutated CpGs in the comparison clocks)");
        }

        EnrichmentReport {
            fisher,
            relative_risk: RelativeRiskTable {
                populations: summary.populations.clone(),
                clocks: summary.clocks.clone(),
                values,
                average,
            },
        }
    }
}

const POPULATION_COLUMN: &str = "Population";
const CLOCK_COLUMN: &str = "Clock";
const A_COLUMN: &str = "a (SNPs in pop overlap CpGs)";
const B_COLUMN: &str = "b (All SNPs in pop)";
const C_COLUMN: &str = "c (Other pop SNPs overlap CpGs)";
const D_COLUMN: &str = "d (All SNPs in other pops)";

/// SNP counts of one population against all others, for one clock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PopulationCounts {
    pub population: String,
    pub clock: String,
    /// Population SNPs overlapping the clock's CpGs.
    pub a: u64,
    /// All population SNPs.
    pub b: u64,
    /// Other populations' SNPs overlapping the clock's CpGs.
    pub c: u64,
    /// All SNPs of the other populations.
    pub d: u64,
}

impl PopulationCounts {
    /// `(a/b) / (c/d)`, with `c` raised to 0.5 when zero.
    pub fn relative_risk(&self) -> Option<f64> {
        if self.b == 0 || self.d == 0 {
            return None;
        }
        let c = if self.c == 0 { CONTINUITY } else { self.c as f64 };
        Some((self.a as f64 / self.b as f64) / (c / self.d as f64))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PopulationEnrichment {
    pub counts: PopulationCounts,
    pub relative_risk: Option<f64>,
    pub p_value: Option<f64>,
    pub fdr: Option<f64>,
}

pub fn read_population_counts(path: &Path) -> Result<Vec<PopulationCounts>, EnrichmentError> {
    let display = path.display().to_string();
    let df = read_csv_frame(path)?;
    let populations = string_column(&df, POPULATION_COLUMN, &display)?;
    let clocks = string_column(&df, CLOCK_COLUMN, &display)?;
    let a = count_column(&df, A_COLUMN, &display)?;
    let b = count_column(&df, B_COLUMN, &display)?;
    let c = count_column(&df, C_COLUMN, &display)?;
    let d = count_column(&df, D_COLUMN, &display)?;

    let mut rows = Vec::with_capacity(populations.len());
    for (i, (population, clock)) in populations.into_iter().zip(clocks).enumerate() {
        if a[i] > b[i] || c[i] > d[i] {
            return Err(EnrichmentError::Parse {
                path: display,
                row: i + 1,
                message: "overlapping SNPs exceed the SNP total".into(),
            });
        }
        rows.push(PopulationCounts {
            population,
            clock,
            a: a[i],
            b: b[i],
            c: c[i],
            d: d[i],
        });
    }
    Ok(rows)
}

/// Fisher test of `[[a, b − a], [c, d − c]]` per row, corrected over all
/// rows.
pub fn population_enrichment(rows: &[PopulationCounts]) -> Vec<PopulationEnrichment> {
    let raw: Vec<Option<f64>> = rows
        .iter()
        .map(|row| {
            (row.a <= row.b && row.c <= row.d)
                .then(|| fisher_exact(row.a, row.b - row.a, row.c, row.d - row.c))
        })
        .collect();
    let adjusted = benjamini_hochberg(&raw);
    rows.iter()
        .zip(raw)
        .zip(adjusted)
        .map(|((row, p_value), fdr)| PopulationEnrichment {
            counts: row.clone(),
            relative_risk: row.relative_risk(),
            p_value,
            fdr,
        })
        .collect()
}

pub fn write_population_enrichment(
    path: &Path,
    rows: &[PopulationEnrichment],
) -> Result<(), EnrichmentError> {
    let mut writer = csv_writer(path)?;
    writer.write_record([
        POPULATION_COLUMN,
        CLOCK_COLUMN,
        A_COLUMN,
        B_COLUMN,
        C_COLUMN,
        D_COLUMN,
        "RR",
        "p_value",
        "FDR",
    ])?;
    let mut buffer = ryu::Buffer::new();
    for row in rows {
        let counts = &row.counts;
        writer.write_field(&counts.population)?;
        writer.write_field(&counts.clock)?;
        for count in [counts.a, counts.b, counts.c, counts.d] {
            writer.write_field(count.to_string())?;
        }
        for value in [row.relative_risk, row.p_value, row.fdr] {
            write_optional(&mut writer, &mut buffer, value)?;
        }
        writer.write_record(std::iter::empty::<&[u8]>())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::clocks::Clock;
    use crate::cpg_index::parse_annotation_line;
    use approx::assert_abs_diff_eq;
    use std::fs;
    use tempfile::tempdir;

    fn counts(mutated: u64, not_mutated: u64) -> MutationCounts {
        MutationCounts {
            mutated,
            not_mutated,
        }
    }

    fn summary() -> ClockSummary {
        let mut summary = ClockSummary::new(vec!["afr".into(), "eas".into()]);
        summary.push("A", vec![counts(2, 8), counts(0, 10)]);
        summary.push("B", vec![counts(1, 9), counts(5, 5)]);
        summary
    }

    #[test]
    fn relative_risk_uses_continuity_for_an_empty_numerator() {
        assert_abs_diff_eq!(relative_risk(2, 10, 1, 10).unwrap(), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(relative_risk(0, 10, 5, 10).unwrap(), 0.1, epsilon = 1e-9);
        assert_eq!(relative_risk(3, 10, 0, 10), None);
        assert_eq!(relative_risk(3, 0, 2, 10), None);
    }

    #[test]
    fn clock_level_report_pools_the_other_clocks() {
        let tester = EnrichmentTester::new(vec!["afr".into(), "eas".into()]);
        let report = tester.test(&summary());

        let risk = &report.relative_risk;
        assert_abs_diff_eq!(risk.get("afr", "A").unwrap(), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(risk.get("eas", "A").unwrap(), 0.1, epsilon = 1e-9);
        assert_abs_diff_eq!(risk.get("afr", "B").unwrap(), 0.5, epsilon = 1e-9);
        assert_eq!(risk.get("eas", "B"), None);
        assert_abs_diff_eq!(risk.average[0].unwrap(), 1.05, epsilon = 1e-9);
        assert_abs_diff_eq!(risk.average[1].unwrap(), 0.5, epsilon = 1e-9);

        assert_eq!(report.fisher.len(), 4);
        assert_eq!(report.fisher[0].population, "afr");
        assert_eq!(report.fisher[0].clock, "A");
        // [[2, 8], [1, 9]]: every table is at most as likely as the observed one.
        assert_abs_diff_eq!(report.fisher[0].raw_p.unwrap(), 1.0, epsilon = 1e-12);
        for row in &report.fisher {
            assert!(row.adjusted_p.unwrap() >= row.raw_p.unwrap() - 1e-12);
        }
    }

    #[test]
    fn excluded_clocks_are_dropped() {
        let mut summary = summary();
        assert!(!summary.push("Carola", vec![counts(1, 1), counts(1, 1)]));
        assert_eq!(summary.clocks(), ["A", "B"]);
    }

    #[test]
    fn summaries_are_read_from_count_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counts.csv");
        fs::write(
            &path,
            "clock,afr_site_with_mutations,afr_site_without_mutations,extra\n\
             Hannum,3,68,x\nMaria,1,1,y\nHorvath,0,353,z\n",
        )
        .unwrap();

        let summary = ClockSummary::read_csv(&path, &["afr".to_string()]).unwrap();
        assert_eq!(summary.clocks(), ["Hannum", "Horvath"]);
        assert_eq!(summary.counts(0, 0), counts(3, 68));
        assert_eq!(summary.counts(1, 0), counts(0, 353));

        let err = ClockSummary::read_csv(&path, &["sas".to_string()]).unwrap_err();
        assert!(matches!(err, EnrichmentError::MissingColumn { column, .. } if column == "sas_site_with_mutations"));
    }

    #[test]
    fn summaries_follow_clock_table_mutation_status() {
        let mut table = ClockTable::default();
        let mut clock = Clock::new("Hannum");
        clock.add_cpg("cg1", 0.1);
        clock.add_cpg("cg2", 0.2);
        clock.add_cpg("cg3", 0.3);
        table.insert(clock);
        for line in ["x,Hannum,cg1,rs1", "x,Hannum,cg2,"] {
            table.apply_annotation("afr", &parse_annotation_line(line).unwrap());
        }

        let summary = ClockSummary::from_clock_table(&table, &["afr".to_string()]);
        assert_eq!(summary.counts(0, 0), counts(1, 1));
    }

    #[test]
    fn report_files_carry_an_average_row() {
        let tester = EnrichmentTester::new(vec!["afr".into(), "eas".into()]);
        let dir = tempdir().unwrap();
        let written = tester.test(&summary()).write_all(dir.path()).unwrap();
        assert_eq!(written.len(), 2);

        let risk = fs::read_to_string(dir.path().join("relative_risk_scores.csv")).unwrap();
        assert_eq!(risk, ",A,B\nafr,2.0,0.5\neas,0.1,NA\naverage,1.05,0.5\n");
        let fisher = fs::read_to_string(dir.path().join("fisher_fdr_pvalues.csv")).unwrap();
        assert!(fisher.starts_with("Population,Clock,Raw_p,Adjusted_p\nafr,A,"));
    }

    #[test]
    fn population_rows_get_risk_and_corrected_p_values() {
        let rows = vec![
            PopulationCounts {
                population: "afr".into(),
                clock: "Hannum".into(),
                a: 4,
                b: 100,
                c: 0,
                d: 400,
            },
            PopulationCounts {
                population: "eas".into(),
                clock: "Hannum".into(),
                a: 0,
                b: 0,
                c: 4,
                d: 500,
            },
        ];
        let results = population_enrichment(&rows);
        assert_abs_diff_eq!(results[0].relative_risk.unwrap(), 32.0, epsilon = 1e-9);
        assert_eq!(results[1].relative_risk, None);
        assert!(results[0].p_value.unwrap() < 0.01);
        assert_abs_diff_eq!(results[1].p_value.unwrap(), 1.0, epsilon = 1e-12);
        assert!(results[0].fdr.unwrap() >= results[0].p_value.unwrap());

        let dir = tempdir().unwrap();
        let path = dir.path().join("population.csv");
        write_population_enrichment(&path, &results).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with(
            "Population,Clock,a (SNPs in pop overlap CpGs),b (All SNPs in pop),\
             c (Other pop SNPs overlap CpGs),d (All SNPs in other pops),RR,p_value,FDR\n"
        ));
        assert!(written.contains("eas,Hannum,0,0,4,500,NA,1.0,"));
    }

    #[test]
    fn population_counts_are_validated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("counts.csv");
        fs::write(
            &path,
            "Population,Clock,a (SNPs in pop overlap CpGs),b (All SNPs in pop),\
             c (Other pop SNPs overlap CpGs),d (All SNPs in other pops)\n\
             afr,Hannum,3,100,2,400\nsas,Hannum,7,5,2,400\n",
        )
        .unwrap();
        let err = read_population_counts(&path).unwrap_err();
        assert!(matches!(err, EnrichmentError::Parse { row: 2, .. }));
    }
}
