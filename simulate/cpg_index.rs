//! # CpG Index
//!
//! Cross-references the mutation catalog against the per-population
//! "intersected" annotation files. Each annotation line names one clock CpG
//! and, in its last field, the `;`-separated variant ids overlapping it:
//!
//! ```text
//! chr1,Hannum,cg00000029,...,rs123;rs456
//! ```
//!
//! Resolution fills `Variant::cpg` and `Variant::clocks`. Coverage of the
//! annotation is expected to be partial, so ids that are not in the catalog are
//! skipped without complaint. The resolved CpGs are then deduplicated into the
//! list of simulation targets.

use ahash::AHashMap;
use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::catalog::MutationCatalog;
use crate::config::PopulationToken;
use crate::shared::files::{FileError, ensure_parent_dir, file_name_str, list_files, open_text_source};
use crate::types::{CpgTarget, Zygosity};

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("Annotation directory '{0}' does not exist or is not a directory")]
    NotADirectory(String),
    #[error("Failed to write target report: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to write target report: {0}")]
    Csv(#[from] csv::Error),
}

/// One parsed line of an intersected-annotation file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationLine<'a> {
    pub clock: &'a str,
    pub cpg: &'a str,
    pub variant_ids: Vec<&'a str>,
}

/// Splits an annotation line. Returns `None` when the line has fewer than the
/// three comma-separated fields needed to name a clock and a CpG.
pub fn parse_annotation_line(line: &str) -> Option<AnnotationLine<'_>> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 3 {
        return None;
    }
    let last = fields[fields.len() - 1].trim();
    Some(AnnotationLine {
        clock: fields[1].trim(),
        cpg: fields[2].trim().trim_end_matches('*'),
        variant_ids: last
            .split(';')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .collect(),
    })
}

/// What happened while resolving an annotation directory.
#[derive(Clone, Debug, Default)]
pub struct ResolutionReport {
    pub files_scanned: usize,
    pub files_skipped: Vec<PathBuf>,
    pub failed_files: Vec<(PathBuf, String)>,
    pub assignments: usize,
    pub unresolved_ids: usize,
}

struct Assignment {
    variant_id: String,
    cpg: String,
    clock: String,
}

/// Reads every annotation file of `dir` and records, for each listed variant of
/// the file's population, the CpG it overlaps and the clock contributing it.
///
/// A malformed file is abandoned as a whole (nothing from it is applied) and
/// reported; the remaining files are still processed.
pub fn resolve_annotations(
    dir: &Path,
    token: PopulationToken,
    catalog: &mut MutationCatalog,
) -> Result<ResolutionReport, IndexError> {
    if !dir.is_dir() {
        return Err(IndexError::NotADirectory(dir.display().to_string()));
    }

    let mut report = ResolutionReport::default();
    for path in list_files(dir)? {
        let name = file_name_str(&path);
        let population = match token.extract(name) {
            Some(population) if catalog.population(population).is_some() => population.to_string(),
            _ => {
                debug!("Skipping annotation file {} (no matching population)", path.display());
                report.files_skipped.push(path.clone());
                continue;
            }
        };
        report.files_scanned += 1;

        let assignments = match read_assignments(&path) {
            Ok(assignments) => assignments,
            Err(message) => {
                warn!("Abandoning annotation file {}: {}", path.display(), message);
                report.failed_files.push((path, message));
                continue;
            }
        };

        if let Some(variants) = catalog.population_mut(&population) {
            for assignment in assignments {
                match variants.get_mut(&assignment.variant_id) {
                    Some(variant) => {
                        variant.cpg = Some(assignment.cpg);
                        variant.clocks.push(assignment.clock);
                        report.assignments += 1;
                    }
                    None => report.unresolved_ids += 1,
                }
            }
        }
    }

    info!(
        "Resolved {} variant/CpG assignments from {} annotation files ({} skipped, {} failed)",
        report.assignments,
        report.files_scanned,
        report.files_skipped.len(),
        report.failed_files.len()
    );
    Ok(report)
}

fn read_assignments(path: &Path) -> Result<Vec<Assignment>, String> {
    let mut source = open_text_source(path).map_err(|e| e.to_string())?;
    let mut assignments = Vec::new();
    let mut line_number = 0usize;
    while let Some(line) = source.next_str().map_err(|e| e.to_string())? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let parsed = parse_annotation_line(line)
            .ok_or_else(|| format!("line {line_number} has fewer than 3 comma-separated fields"))?;
        for id in parsed.variant_ids {
            assignments.push(Assignment {
                variant_id: id.to_string(),
                cpg: parsed.cpg.to_string(),
                clock: parsed.clock.to_string(),
            });
        }
    }
    Ok(assignments)
}

/// Answers "which zygosity applies to this CpG" for the perturbation engine.
pub trait ZygosityLookup {
    fn zygosity(&self, cpg: &str) -> Option<Zygosity>;
}

impl ZygosityLookup for AHashMap<String, Zygosity> {
    fn zygosity(&self, cpg: &str) -> Option<Zygosity> {
        self.get(cpg).copied()
    }
}

/// The deduplicated set of CpGs overlapping at least one resolved variant.
#[derive(Clone, Debug, Default)]
pub struct CpGIndex {
    targets: Vec<CpgTarget>,
    lookup: AHashMap<String, usize>,
    duplicates: Vec<String>,
}

impl CpGIndex {
    /// Builds the target list from a resolved catalog. Targets keep first-seen
    /// order (population, then file order); when several variants share a CpG
    /// the last one supplies frequency, zygosity and weight, and clocks are
    /// merged.
    pub fn from_catalog(catalog: &MutationCatalog) -> Self {
        let mut targets: Vec<CpgTarget> = Vec::new();
        let mut lookup: AHashMap<String, usize> = AHashMap::new();
        let mut resolved: Vec<&str> = Vec::new();

        for population in catalog.populations() {
            for (variant, weight) in population.weighted_variants() {
                let Some(cpg) = variant.cpg.as_deref() else {
                    continue;
                };
                resolved.push(cpg);
                let position = *lookup.entry(cpg.to_string()).or_insert_with(|| {
                    targets.push(CpgTarget {
                        cpg: cpg.to_string(),
                        allele_frequency: variant.allele_frequency,
                        zygosity: variant.zygosity,
                        selection_weight: weight,
                        clocks: BTreeSet::new(),
                    });
                    targets.len() - 1
                });
                let target = &mut targets[position];
                target.allele_frequency = variant.allele_frequency;
                target.zygosity = variant.zygosity;
                target.selection_weight = weight;
                target.clocks.extend(variant.clocks.iter().cloned());
            }
        }

        let duplicates: Vec<String> = resolved
            .iter()
            .duplicates()
            .map(|cpg| cpg.to_string())
            .collect();
        if !duplicates.is_empty() {
            warn!(
                "{} CpG ids are shared by several variants and were deduplicated: {}",
                duplicates.len(),
                duplicates.iter().take(10).join(", ")
            );
        }

        info!("Indexed {} target CpGs", targets.len());
        Self {
            targets,
            lookup,
            duplicates,
        }
    }

    pub fn targets(&self) -> &[CpgTarget] {
        &self.targets
    }

    pub fn target(&self, cpg: &str) -> Option<&CpgTarget> {
        self.lookup.get(cpg).map(|&i| &self.targets[i])
    }

    pub fn cpg_ids(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.cpg.clone()).collect()
    }

    /// CpG ids that more than one variant resolved to.
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Writes `cpg, allele_frequency, zygosity, weight, clocks` per target.
    pub fn write_targets_tsv(&self, path: &Path) -> Result<(), IndexError> {
        ensure_parent_dir(path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(BufWriter::new(File::create(path)?));
        writer.write_record(["cpg", "allele_frequency", "zygosity", "weight", "clocks"])?;
        let mut buffer = ryu::Buffer::new();
        for target in &self.targets {
            writer.write_field(&target.cpg)?;
            writer.write_field(buffer.format(target.allele_frequency))?;
            writer.write_field(target.zygosity.label())?;
            writer.write_field(buffer.format(target.selection_weight))?;
            writer.write_field(target.clocks.iter().join(";"))?;
            writer.write_record(std::iter::empty::<&[u8]>())?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl ZygosityLookup for CpGIndex {
    fn zygosity(&self, cpg: &str) -> Option<Zygosity> {
        self.target(cpg).map(|t| t.zygosity)
    }
}
