//! # Perturbation Engine
//!
//! Applies the simulated effect of a variant to the beta values of its
//! carriers. For each selected (CpG, sample) pair the beta value `b` becomes
//! `b × (1 − factor)`, where `factor` is drawn uniformly from the reduction
//! range of the variant's zygosity.
//!
//! The engine works on a copy of the input matrix; the baseline is never
//! touched. A negative result cannot be produced from valid input and is
//! reported as `PerturbationError::InvariantViolation`, which callers must
//! treat as fatal for the whole run.

use ahash::AHashSet;
use log::{debug, warn};
use rand::Rng;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::beta::BetaMatrix;
use crate::config::{ReductionRange, SimulationConfig};
use crate::cpg_index::ZygosityLookup;
use crate::manifest::PerturbationManifest;
use crate::sampling::Selection;
use crate::types::Zygosity;

#[derive(Error, Debug)]
pub enum PerturbationError {
    #[error(
        "Perturbing CpG '{cpg}' in sample '{sample}' produced the negative beta value {value}. \
         This can only happen with corrupted input data; the run has been aborted."
    )]
    InvariantViolation {
        cpg: String,
        sample: String,
        value: f64,
    },
}

/// `b − b × factor`, rejecting a negative result.
pub fn reduced_beta(
    cpg: &str,
    sample: &str,
    beta: f64,
    factor: f64,
) -> Result<f64, PerturbationError> {
    let value = beta - beta * factor;
    if value < 0.0 {
        return Err(PerturbationError::InvariantViolation {
            cpg: cpg.to_string(),
            sample: sample.to_string(),
            value,
        });
    }
    Ok(value)
}

/// Counts gathered while perturbing one matrix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PerturbationReport {
    pub selected: usize,
    pub perturbed: usize,
    /// Pairs whose beta value was missing or negative.
    pub skipped: usize,
    /// Pairs whose CpG or sample is not in the matrix.
    pub not_found: usize,
    /// Missing CpGs that are not on the known-missing list.
    pub flagged_missing: BTreeSet<String>,
    /// Missing CpGs that are on the known-missing list.
    pub suppressed_missing: BTreeSet<String>,
}

pub struct PerturbationOutcome {
    pub matrix: BetaMatrix,
    pub manifest: PerturbationManifest,
    pub report: PerturbationReport,
}

#[derive(Clone, Debug)]
pub struct PerturbationEngine {
    heterozygous: ReductionRange,
    homozygous: ReductionRange,
    unknown: ReductionRange,
    known_missing: AHashSet<String>,
}

impl PerturbationEngine {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            heterozygous: config.reduction_for(Zygosity::Heterozygous),
            homozygous: config.reduction_for(Zygosity::Homozygous),
            unknown: config.reduction_for(Zygosity::Unknown),
            known_missing: config.missing_probe_allowlist.iter().cloned().collect(),
        }
    }

    pub fn range_for(&self, zygosity: Zygosity) -> ReductionRange {
        match zygosity {
            Zygosity::Heterozygous => self.heterozygous,
            Zygosity::Homozygous => self.homozygous,
            Zygosity::Unknown => self.unknown,
        }
    }

    pub fn draw_factor<R: Rng + ?Sized>(&self, zygosity: Zygosity, rng: &mut R) -> f64 {
        let range = self.range_for(zygosity);
        if range.high > range.low {
            rng.gen_range(range.low..range.high)
        } else {
            range.low
        }
    }

    /// Perturbs a copy of `beta` at every selected pair. `manifest` is the
    /// starting manifest of the iteration and is returned with every reduced
    /// pair appended.
    pub fn perturb<L, R>(
        &self,
        beta: &BetaMatrix,
        selection: &Selection,
        zygosity: &L,
        mut manifest: PerturbationManifest,
        rng: &mut R,
    ) -> Result<PerturbationOutcome, PerturbationError>
    where
        L: ZygosityLookup + ?Sized,
        R: Rng + ?Sized,
    {
        let mut matrix = beta.clone();
        let mut report = PerturbationReport {
            selected: selection.len(),
            ..PerturbationReport::default()
        };

        for (cpg, sample) in selection.pairs() {
            let Some(row) = matrix.cpg_row(cpg) else {
                report.not_found += 1;
                if self.known_missing.contains(cpg) {
                    report.suppressed_missing.insert(cpg.clone());
                } else {
                    report.flagged_missing.insert(cpg.clone());
                }
                continue;
            };
            let Some(col) = matrix.sample_column(sample) else {
                report.not_found += 1;
                debug!("Sample '{sample}' is not a column of the beta matrix");
                continue;
            };

            let current = matrix.values()[[row, col]];
            if current.is_nan() || current < 0.0 {
                report.skipped += 1;
                continue;
            }

            let factor = self.draw_factor(
                zygosity.zygosity(cpg).unwrap_or(Zygosity::Unknown),
                rng,
            );
            matrix.values_mut()[[row, col]] = reduced_beta(cpg, sample, current, factor)?;
            manifest.record(cpg, sample);
            report.perturbed += 1;
        }

        if !report.flagged_missing.is_empty() {
            warn!(
                "{} selected CpGs are not in the beta matrix: {}",
                report.flagged_missing.len(),
                report
                    .flagged_missing
                    .iter()
                    .take(10)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        if !report.suppressed_missing.is_empty() {
            debug!(
                "{} known-missing probes were selected and ignored",
                report.suppressed_missing.len()
            );
        }
        if report.skipped > 0 {
            debug!("{} selected pairs had no usable beta value", report.skipped);
        }

        Ok(PerturbationOutcome {
            matrix,
            manifest,
            report,
        })
    }
}
