//! # Clock Coefficient Table
//!
//! Epigenetic clocks as weighted CpG lists, read from a tab-separated file:
//!
//! ```text
//! clock    CpG          coefficient   ...
//! Hannum   cg00000029   0.129         ...
//! ```
//!
//! Rows of the pan-mammalian clock carry a tissue/species qualifier in their
//! last field and form one composite clock per qualifier
//! (`Horvath-pan-mammalian-<qualifier>`). Rows whose CpG is `intercept` or
//! `(Intercept)` set the clock's intercept instead of adding a CpG.
//!
//! Once loaded, the table can be annotated with per-population mutation status
//! from the intersected-annotation files and each clock's |coefficients| can be
//! standardized. Both passes only fill fields; clocks and CpGs are never added
//! or removed afterwards.

use ahash::AHashMap;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use thiserror::Error;

use super::stats;
use crate::config::PopulationToken;
use crate::cpg_index::{AnnotationLine, parse_annotation_line};
use crate::shared::files::{
    FileError, TextSource, ensure_parent_dir, file_name_str, list_files, open_text_source,
};
use crate::types::MutationStatus;

/// The clock whose rows expand into one composite clock per qualifier.
pub const PAN_MAMMALIAN_CLOCK: &str = "Horvath-pan-mammalian";

/// Clocks that are not part of the mutation analyses.
pub const EXCLUDED_CLOCKS: [&str; 3] = ["Monika", "Carola", "Maria"];

#[derive(Error, Debug)]
pub enum ClockTableError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("Parse error in {path} at line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("Failed to write coefficient report: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to write coefficient report: {0}")]
    Csv(#[from] csv::Error),
}

/// One CpG membership of a clock.
#[derive(Clone, Debug, PartialEq)]
pub struct ClockCpg {
    pub cpg: String,
    /// Signed coefficient as found in the file.
    pub coefficient: f64,
    /// Standardized |coefficient|; `None` until computed or when undefined.
    pub scaled_coefficient: Option<f64>,
    /// Mutation status per population; absent populations are unknown.
    pub mutation: BTreeMap<String, MutationStatus>,
}

impl ClockCpg {
    pub fn abs_coefficient(&self) -> f64 {
        self.coefficient.abs()
    }

    pub fn status(&self, population: &str) -> MutationStatus {
        self.mutation.get(population).copied().unwrap_or_default()
    }

    pub fn is_mutated_anywhere(&self) -> bool {
        self.mutation
            .values()
            .any(|status| *status == MutationStatus::Mutated)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Clock {
    name: String,
    intercept: f64,
    cpgs: Vec<ClockCpg>,
    lookup: AHashMap<String, usize>,
}

impl Clock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            intercept: 0.0,
            cpgs: Vec::new(),
            lookup: AHashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn cpgs(&self) -> &[ClockCpg] {
        &self.cpgs
    }

    pub fn cpg(&self, cpg: &str) -> Option<&ClockCpg> {
        self.lookup.get(cpg).map(|&i| &self.cpgs[i])
    }

    fn cpg_mut(&mut self, cpg: &str) -> Option<&mut ClockCpg> {
        match self.lookup.get(cpg) {
            Some(&i) => Some(&mut self.cpgs[i]),
            None => None,
        }
    }

    /// Adds a CpG, replacing the coefficient if it is already listed.
    pub fn add_cpg(&mut self, cpg: &str, coefficient: f64) {
        if let Some(&i) = self.lookup.get(cpg) {
            warn!(
                "CpG '{}' is listed twice for clock '{}'; keeping the last coefficient",
                cpg, self.name
            );
            self.cpgs[i].coefficient = coefficient;
            return;
        }
        self.lookup.insert(cpg.to_string(), self.cpgs.len());
        self.cpgs.push(ClockCpg {
            cpg: cpg.to_string(),
            coefficient,
            scaled_coefficient: None,
            mutation: BTreeMap::new(),
        });
    }

    pub fn abs_coefficients(&self) -> Vec<f64> {
        self.cpgs.iter().map(ClockCpg::abs_coefficient).collect()
    }

    /// Fills `scaled_coefficient` with the z-score of |coefficient| using the
    /// population standard deviation of this clock. Returns false, leaving
    /// every value undefined, when the clock has no spread.
    pub fn standardize(&mut self) -> bool {
        match stats::standardize(&self.abs_coefficients()) {
            Some(scaled) => {
                for (cpg, value) in self.cpgs.iter_mut().zip(scaled) {
                    cpg.scaled_coefficient = Some(value);
                }
                true
            }
            None => {
                for cpg in &mut self.cpgs {
                    cpg.scaled_coefficient = None;
                }
                false
            }
        }
    }

    /// |coefficients| split into CpGs mutated in at least one population and
    /// the rest.
    pub fn mutation_partition(&self) -> (Vec<f64>, Vec<f64>) {
        let (mutated, not_mutated): (Vec<&ClockCpg>, Vec<&ClockCpg>) =
            self.cpgs.iter().partition(|cpg| cpg.is_mutated_anywhere());
        (
            mutated.iter().map(|cpg| cpg.abs_coefficient()).collect(),
            not_mutated.iter().map(|cpg| cpg.abs_coefficient()).collect(),
        )
    }

    /// Number of CpGs with the given status in a population.
    pub fn count_status(&self, population: &str, status: MutationStatus) -> usize {
        self.cpgs
            .iter()
            .filter(|cpg| cpg.status(population) == status)
            .count()
    }
}

/// Counts of a mutation-annotation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnotationSummary {
    pub files: usize,
    pub applied: usize,
    pub skipped: usize,
}

/// Per-clock distribution statistics of |coefficient|.
#[derive(Clone, Debug, PartialEq)]
pub struct CoefficientReport {
    pub clock: String,
    pub mutated: usize,
    pub not_mutated: usize,
    pub mutated_mean: Option<f64>,
    pub not_mutated_mean: Option<f64>,
    pub mutated_median: Option<f64>,
    pub not_mutated_median: Option<f64>,
    pub shapiro_p: Option<f64>,
    pub ks_scaled_p: Option<f64>,
    pub mann_whitney_p: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClockTable {
    clocks: Vec<Clock>,
    index: AHashMap<String, usize>,
}

fn is_intercept(cpg: &str) -> bool {
    cpg.eq_ignore_ascii_case("intercept") || cpg.eq_ignore_ascii_case("(intercept)")
}

impl ClockTable {
    pub fn from_file(path: &Path) -> Result<Self, ClockTableError> {
        let mut source = open_text_source(path)?;
        let table = Self::parse_source(source.as_mut())?;
        info!(
            "Loaded {} clocks from {}",
            table.clocks.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn parse_source(source: &mut dyn TextSource) -> Result<Self, ClockTableError> {
        let path = source.path_display().to_string();
        let mut table = Self::default();
        let mut header_skipped = false;
        let mut line_number = 0usize;

        while let Some(line) = source.next_str()? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            if !header_skipped {
                header_skipped = true;
                continue;
            }
            let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
            if fields.len() < 3 {
                return Err(ClockTableError::Parse {
                    path: path.clone(),
                    line: line_number,
                    message: format!("expected at least 3 tab-separated fields, found {}", fields.len()),
                });
            }
            let coefficient: f64 = fields[2].parse().map_err(|_| ClockTableError::Parse {
                path: path.clone(),
                line: line_number,
                message: format!("coefficient '{}' is not numeric", fields[2]),
            })?;

            let name = if fields[0] == PAN_MAMMALIAN_CLOCK {
                format!("{}-{}", fields[0], fields[fields.len() - 1])
            } else {
                fields[0].to_string()
            };
            let clock = table.clock_entry(&name);
            if is_intercept(fields[1]) {
                clock.intercept = coefficient;
            } else {
                clock.add_cpg(fields[1], coefficient);
            }
        }
        Ok(table)
    }

    fn clock_entry(&mut self, name: &str) -> &mut Clock {
        let position = match self.index.get(name) {
            Some(&i) => i,
            None => {
                self.index.insert(name.to_string(), self.clocks.len());
                self.clocks.push(Clock::new(name));
                self.clocks.len() - 1
            }
        };
        &mut self.clocks[position]
    }

    pub fn insert(&mut self, clock: Clock) {
        match self.index.get(clock.name()) {
            Some(&i) => self.clocks[i] = clock,
            None => {
                self.index.insert(clock.name().to_string(), self.clocks.len());
                self.clocks.push(clock);
            }
        }
    }

    pub fn clocks(&self) -> &[Clock] {
        &self.clocks
    }

    pub fn clock(&self, name: &str) -> Option<&Clock> {
        self.index.get(name).map(|&i| &self.clocks[i])
    }

    pub fn clock_names(&self) -> Vec<String> {
        self.clocks.iter().map(|c| c.name.clone()).collect()
    }

    /// Records the mutation status one annotation line implies for one
    /// population. Returns false when the line names an excluded or unknown
    /// clock, or a CpG the clock does not use.
    pub fn apply_annotation(&mut self, population: &str, line: &AnnotationLine<'_>) -> bool {
        if EXCLUDED_CLOCKS.contains(&line.clock) {
            return false;
        }
        let status = if line.variant_ids.is_empty() {
            MutationStatus::NotMutated
        } else {
            MutationStatus::Mutated
        };

        let mut applied = false;
        let composite_prefix = format!("{PAN_MAMMALIAN_CLOCK}-");
        for clock in &mut self.clocks {
            let matches = if line.clock == PAN_MAMMALIAN_CLOCK {
                clock.name.starts_with(&composite_prefix)
            } else {
                clock.name == line.clock
            };
            if !matches {
                continue;
            }
            if let Some(cpg) = clock.cpg_mut(line.cpg) {
                let entry = cpg
                    .mutation
                    .entry(population.to_string())
                    .or_insert(status);
                if *entry != MutationStatus::Mutated {
                    *entry = status;
                }
                applied = true;
            }
        }
        applied
    }

    /// Reads every annotation file of `dir` and records mutation status. The
    /// population of a file is taken from its name with `token`.
    pub fn apply_mutation_annotations(
        &mut self,
        dir: &Path,
        token: PopulationToken,
    ) -> Result<AnnotationSummary, ClockTableError> {
        let mut summary = AnnotationSummary::default();
        for path in list_files(dir)? {
            let Some(population) = token.extract(file_name_str(&path)).map(str::to_string) else {
                debug!("Skipping {} (no population token)", path.display());
                continue;
            };
            summary.files += 1;
            let mut source = open_text_source(&path)?;
            while let Some(line) = source.next_str()? {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_annotation_line(line) {
                    Some(parsed) if self.apply_annotation(&population, &parsed) => summary.applied += 1,
                    _ => summary.skipped += 1,
                }
            }
        }
        info!(
            "Applied {} mutation annotations from {} files ({} lines skipped)",
            summary.applied, summary.files, summary.skipped
        );
        Ok(summary)
    }

    /// Standardizes every clock. Clocks without spread are reported.
    pub fn standardize_all(&mut self) {
        for clock in &mut self.clocks {
            if !clock.standardize() {
                warn!(
                    "Coefficients of clock '{}' have zero variance; scaled values are undefined",
                    clock.name
                );
            }
        }
    }

    /// Distribution statistics of every clock. Expects `standardize_all` to
    /// have run for the KS column.
    pub fn coefficient_report(&self) -> Vec<CoefficientReport> {
        self.clocks
            .iter()
            .map(|clock| {
                let (mutated, not_mutated) = clock.mutation_partition();
                let scaled: Option<Vec<f64>> = clock
                    .cpgs
                    .iter()
                    .map(|cpg| cpg.scaled_coefficient)
                    .collect();
                CoefficientReport {
                    clock: clock.name.clone(),
                    mutated: mutated.len(),
                    not_mutated: not_mutated.len(),
                    mutated_mean: stats::mean(&mutated),
                    not_mutated_mean: stats::mean(&not_mutated),
                    mutated_median: stats::median(&mutated),
                    not_mutated_median: stats::median(&not_mutated),
                    shapiro_p: stats::shapiro_wilk(&clock.abs_coefficients()).map(|(_, p)| p),
                    ks_scaled_p: scaled
                        .filter(|values| !values.is_empty())
                        .and_then(|values| stats::ks_test_standard_normal(&values))
                        .map(|(_, p)| p),
                    mann_whitney_p: stats::mann_whitney_u(&mutated, &not_mutated).map(|(_, p)| p),
                }
            })
            .collect()
    }
}

/// Writes a report as a tab-separated table; undefined statistics are `NA`.
pub fn write_coefficient_report(
    path: &Path,
    rows: &[CoefficientReport],
) -> Result<(), ClockTableError> {
    ensure_parent_dir(path)?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(BufWriter::new(File::create(path)?));
    writer.write_record([
        "clock",
        "mutated_cpgs",
        "not_mutated_cpgs",
        "mutated_mean",
        "not_mutated_mean",
        "mutated_median",
        "not_mutated_median",
        "shapiro_p",
        "ks_scaled_p",
        "mann_whitney_p",
    ])?;
    let mut buffer = ryu::Buffer::new();
    for row in rows {
        writer.write_field(&row.clock)?;
        writer.write_field(row.mutated.to_string())?;
        writer.write_field(row.not_mutated.to_string())?;
        for value in [
            row.mutated_mean,
            row.not_mutated_mean,
            row.mutated_median,
            row.not_mutated_median,
            row.shapiro_p,
            row.ks_scaled_p,
            row.mann_whitney_p,
        ] {
            match value {
                Some(v) if v.is_finite() => writer.write_field(buffer.format(v))?,
                _ => writer.write_field("NA")?,
            }
        }
        writer.write_record(std::iter::empty::<&[u8]>())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::fs;
    use tempfile::tempdir;

    const TABLE: &str = "\
clock\tCpG\tcoefficient\tqualifier
Hannum\tcg01\t-0.5\t
Hannum\tcg02\t1.5\t
Hannum\tintercept\t30\t
Horvath-pan-mammalian\tcg01\t0.2\tblood
Horvath-pan-mammalian\tcg03\t0.4\tliver
Monika\tcg01\t1\t
";

    fn load(dir: &Path) -> ClockTable {
        let path = dir.join("coefficients.tsv");
        fs::write(&path, TABLE).unwrap();
        ClockTable::from_file(&path).unwrap()
    }

    #[test]
    fn composite_and_intercept_rows() {
        let dir = tempdir().unwrap();
        let table = load(dir.path());
        assert_eq!(
            table.clock_names(),
            vec![
                "Hannum",
                "Horvath-pan-mammalian-blood",
                "Horvath-pan-mammalian-liver",
                "Monika"
            ]
        );
        let hannum = table.clock("Hannum").unwrap();
        assert_eq!(hannum.intercept(), 30.0);
        assert_eq!(hannum.cpgs().len(), 2);
        assert_eq!(hannum.abs_coefficients(), vec![0.5, 1.5]);
    }

    #[test]
    fn malformed_coefficients_are_parse_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.tsv");
        fs::write(&path, "clock\tCpG\tcoefficient\nHannum\tcg01\tx\n").unwrap();
        match ClockTable::from_file(&path).unwrap_err() {
            ClockTableError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn annotations_set_status_per_population() {
        let dir = tempdir().unwrap();
        let mut table = load(dir.path());
        let annotations = dir.path().join("annotations");
        fs::create_dir(&annotations).unwrap();
        fs::write(
            annotations.join("clocks.intersected.afr.common.snps.csv"),
            "chr,clock,cpg,pos,variants\n\
             chr1,Hannum,cg01,1,rs1;rs2\n\
             chr1,Hannum,cg02,2,\n\
             chr1,Horvath-pan-mammalian,cg01,1,rs1\n\
             chr1,Monika,cg01,1,rs1\n\
             chr1,Unknown,cg01,1,rs1\n",
        )
        .unwrap();

        let summary = table
            .apply_mutation_annotations(&annotations, PopulationToken::FourthFromLast)
            .unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.applied, 3);

        let hannum = table.clock("Hannum").unwrap();
        assert_eq!(hannum.cpg("cg01").unwrap().status("afr"), MutationStatus::Mutated);
        assert_eq!(hannum.cpg("cg02").unwrap().status("afr"), MutationStatus::NotMutated);
        assert_eq!(hannum.cpg("cg02").unwrap().status("eas"), MutationStatus::Unknown);
        assert_eq!(hannum.count_status("afr", MutationStatus::Mutated), 1);

        let blood = table.clock("Horvath-pan-mammalian-blood").unwrap();
        assert_eq!(blood.cpg("cg01").unwrap().status("afr"), MutationStatus::Mutated);
        let liver = table.clock("Horvath-pan-mammalian-liver").unwrap();
        assert_eq!(liver.cpg("cg03").unwrap().status("afr"), MutationStatus::Unknown);

        let monika = table.clock("Monika").unwrap();
        assert_eq!(monika.cpg("cg01").unwrap().status("afr"), MutationStatus::Unknown);
    }

    #[test]
    fn standardization_uses_the_population_deviation() {
        let mut clock = Clock::new("c");
        clock.add_cpg("a", -1.0);
        clock.add_cpg("b", 3.0);
        assert!(clock.standardize());
        assert_abs_diff_eq!(clock.cpg("a").unwrap().scaled_coefficient.unwrap(), -1.0);
        assert_abs_diff_eq!(clock.cpg("b").unwrap().scaled_coefficient.unwrap(), 1.0);

        let mut flat = Clock::new("flat");
        flat.add_cpg("a", 2.0);
        flat.add_cpg("b", -2.0);
        assert!(!flat.standardize());
        assert_eq!(flat.cpg("a").unwrap().scaled_coefficient, None);
    }

    #[test]
    fn report_marks_degenerate_groups_as_undefined() {
        let mut clock = Clock::new("c");
        for (i, value) in [0.1, 0.2, 0.3, 0.4].iter().enumerate() {
            clock.add_cpg(&format!("cg{i}"), *value);
        }
        let mut table = ClockTable::default();
        table.insert(clock);
        table.standardize_all();

        let report = table.coefficient_report();
        assert_eq!(report[0].mutated, 0);
        assert_eq!(report[0].mutated_mean, None);
        assert_eq!(report[0].mann_whitney_p, None);
        assert!(report[0].ks_scaled_p.is_some());

        let dir = tempdir().unwrap();
        let path = dir.path().join("coefficients_stat.tsv");
        write_coefficient_report(&path, &report).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("c\t0\t4\tNA\t"));
    }
}
