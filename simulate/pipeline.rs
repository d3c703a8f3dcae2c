//! # Simulation Pipeline
//!
//! Drives a complete multi-iteration simulation run:
//!
//! 1. load the mutation catalog and resolve it against the annotation files,
//! 2. deduplicate the resolved CpGs into targets,
//! 3. for each iteration, select (CpG, sample) pairs, perturb a copy of the
//!    baseline beta matrix and hand the result to a sink.
//!
//! Every iteration owns a generator seeded from `(base seed, iteration)`, so a
//! seeded run is reproducible whether per-CpG iterations execute sequentially
//! or on the rayon pool. Per-sample iterations always run in order because
//! they share one selection tracker.

use indicatif::ProgressBar;
use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::beta::{BetaError, BetaMatrix};
use crate::catalog::{CatalogError, MutationCatalog};
use crate::config::{ConfigError, SamplingStrategy, SimulationConfig};
use crate::cpg_index::{CpGIndex, IndexError, ResolutionReport, resolve_annotations};
use crate::engine::{PerturbationEngine, PerturbationError, PerturbationReport};
use crate::manifest::PerturbationManifest;
use crate::sampling::{select_per_cpg, select_per_sample};
use crate::shared::files::file_name_str;
use crate::tracker::{SelectionTracker, TrackingAxis};

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Beta(#[from] BetaError),
    #[error(transparent)]
    Perturbation(#[from] PerturbationError),
    #[error("Failed to write manifest '{path}': {source}")]
    Manifest {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Receives iteration milestones. Implementations must be shareable across
/// threads because per-CpG iterations may run concurrently.
pub trait SimulationProgressObserver: Sync {
    fn on_run_start(&self, iterations: usize) {
        let _ = iterations;
    }
    fn on_iteration_finish(&self, report: &IterationReport) {
        let _ = report;
    }
    fn on_run_finish(&self) {}
}

#[derive(Default)]
pub struct NoopSimulationProgress;

impl SimulationProgressObserver for NoopSimulationProgress {}

impl SimulationProgressObserver for ProgressBar {
    fn on_run_start(&self, iterations: usize) {
        self.set_length(iterations as u64);
    }
    fn on_iteration_finish(&self, report: &IterationReport) {
        self.set_message(format!(
            "iteration {}: {} pairs perturbed",
            report.iteration, report.perturbation.perturbed
        ));
        self.inc(1);
    }
    fn on_run_finish(&self) {
        self.finish_and_clear();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IterationReport {
    pub iteration: usize,
    pub perturbation: PerturbationReport,
    /// Pairs held by the selection tracker after this iteration. Per-sample
    /// runs share one tracker, so the count accumulates across iterations.
    pub tracked_pairs: usize,
    /// Distinct tracker keys (CpGs or samples) after this iteration.
    pub tracked_keys: usize,
}

/// Everything an iteration produced, handed to the sink before it is dropped.
pub struct IterationOutput {
    pub iteration: usize,
    pub matrix: BetaMatrix,
    pub manifest: PerturbationManifest,
    pub report: IterationReport,
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub strategy: SamplingStrategy,
    pub seed: u64,
    pub targets: usize,
    pub iterations: Vec<IterationReport>,
}

/// Targets ready for simulation, plus what resolution reported.
pub struct PreparedTargets {
    pub catalog: MutationCatalog,
    pub index: CpGIndex,
    pub resolution: ResolutionReport,
}

pub struct Simulator {
    config: SimulationConfig,
    engine: PerturbationEngine,
}

/// Generator of one iteration, derived from the run seed.
pub fn iteration_rng(base_seed: u64, iteration: usize) -> StdRng {
    let mixed = (iteration as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    StdRng::seed_from_u64(base_seed ^ mixed)
}

/// File name of a beta matrix without `.gz` and its last extension.
pub fn beta_stem(beta_file: &Path) -> &str {
    let name = file_name_str(beta_file);
    let name = name.strip_suffix(".gz").unwrap_or(name);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// `dir/stem.simulated_<strategy>.<i>.txt` and `dir/stem.manifest_<strategy>.<i>.json`.
pub fn output_paths(
    beta_file: &Path,
    output_dir: &Path,
    strategy: SamplingStrategy,
    iteration: usize,
) -> (PathBuf, PathBuf) {
    let stem = beta_stem(beta_file);
    let label = strategy.label();
    (
        output_dir.join(format!("{stem}.simulated_{label}.{iteration}.txt")),
        output_dir.join(format!("{stem}.manifest_{label}.{iteration}.json")),
    )
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> Result<Self, SimulationError> {
        config.validate()?;
        let engine = PerturbationEngine::new(&config);
        Ok(Self { config, engine })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Loads one mutation file and resolves it against an annotation directory.
    pub fn prepare(
        &self,
        mutation_file: &Path,
        annotation_dir: &Path,
    ) -> Result<PreparedTargets, SimulationError> {
        let mut catalog = MutationCatalog::load_files(&[mutation_file])?;
        let resolution =
            resolve_annotations(annotation_dir, self.config.population_token(), &mut catalog)?;
        let index = CpGIndex::from_catalog(&catalog);
        debug!(
            "{} annotation assignments over {} variants give {} target CpGs",
            resolution.assignments,
            catalog.variant_count(),
            index.len()
        );
        if index.is_empty() {
            warn!(
                "No variant of {} overlaps an annotated CpG; every iteration will leave the matrix unchanged",
                mutation_file.display()
            );
        }
        Ok(PreparedTargets {
            catalog,
            index,
            resolution,
        })
    }

    fn base_seed(&self) -> u64 {
        match self.config.seed {
            Some(seed) => seed,
            None => {
                let seed: u64 = rand::random();
                info!("No seed configured; this run uses seed {seed}");
                seed
            }
        }
    }

    fn run_iteration(
        &self,
        iteration: usize,
        index: &CpGIndex,
        beta: &BetaMatrix,
        tracker: &mut SelectionTracker,
        rng: &mut StdRng,
    ) -> Result<IterationOutput, SimulationError> {
        let selection = match self.config.strategy {
            SamplingStrategy::PerCpg => select_per_cpg(
                index.targets(),
                beta.sample_ids(),
                self.config.min_samples_per_cpg,
                tracker,
                rng,
            ),
            SamplingStrategy::PerSample => select_per_sample(
                index.targets(),
                beta.sample_ids(),
                self.config.per_sample_draw_size(),
                tracker,
                rng,
            ),
        };
        let manifest = PerturbationManifest::new(iteration, index.cpg_ids());
        let outcome = self
            .engine
            .perturb(beta, &selection, index, manifest, rng)?;
        info!(
            "Iteration {}: {} pairs selected, {} perturbed, {} skipped, {} tracked",
            iteration,
            outcome.report.selected,
            outcome.report.perturbed,
            outcome.report.skipped,
            tracker.total_recorded()
        );
        Ok(IterationOutput {
            iteration,
            matrix: outcome.matrix,
            manifest: outcome.manifest,
            report: IterationReport {
                iteration,
                perturbation: outcome.report,
                tracked_pairs: tracker.total_recorded(),
                tracked_keys: tracker.tracked_keys(),
            },
        })
    }

    /// Runs every iteration against `beta` and passes each result to `sink`.
    /// The first error ends the run; in particular an invariant violation
    /// means no output is produced for the offending iteration or any later
    /// one. In parallel per-CpG runs, iterations that reached the sink before
    /// the failure keep their outputs; every other iteration is dropped
    /// without reaching the sink.
    pub fn run<F>(
        &self,
        index: &CpGIndex,
        beta: &BetaMatrix,
        observer: &dyn SimulationProgressObserver,
        sink: F,
    ) -> Result<RunSummary, SimulationError>
    where
        F: Fn(&IterationOutput) -> Result<(), SimulationError> + Sync,
    {
        let seed = self.base_seed();
        let iterations = self.config.iterations();
        observer.on_run_start(iterations);
        info!(
            "Simulating {} iterations ({} sampling) over {} targets and {} samples",
            iterations,
            self.config.strategy.label(),
            index.len(),
            beta.n_samples()
        );

        let finish = |output: IterationOutput| -> Result<IterationReport, SimulationError> {
            sink(&output)?;
            observer.on_iteration_finish(&output.report);
            Ok(output.report)
        };

        let reports = match self.config.strategy {
            SamplingStrategy::PerCpg if self.config.parallel_iterations => {
                let aborted = AtomicBool::new(false);
                let reports = (0..iterations)
                    .into_par_iter()
                    .map(|i| {
                        if aborted.load(Ordering::Acquire) {
                            return Ok(None);
                        }
                        let mut tracker = SelectionTracker::new(TrackingAxis::Cpg);
                        let result = self
                            .run_iteration(i, index, beta, &mut tracker, &mut iteration_rng(seed, i))
                            .and_then(|output| {
                                if aborted.load(Ordering::Acquire) {
                                    Ok(None)
                                } else {
                                    finish(output).map(Some)
                                }
                            });
                        if result.is_err() {
                            aborted.store(true, Ordering::Release);
                        }
                        result
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                reports.into_iter().flatten().collect()
            }
            SamplingStrategy::PerCpg => {
                let mut reports = Vec::with_capacity(iterations);
                for i in 0..iterations {
                    let mut tracker = SelectionTracker::new(TrackingAxis::Cpg);
                    let output =
                        self.run_iteration(i, index, beta, &mut tracker, &mut iteration_rng(seed, i))?;
                    reports.push(finish(output)?);
                }
                reports
            }
            SamplingStrategy::PerSample => {
                let mut tracker = SelectionTracker::new(TrackingAxis::Sample);
                let mut reports = Vec::with_capacity(iterations);
                for i in 0..iterations {
                    let output =
                        self.run_iteration(i, index, beta, &mut tracker, &mut iteration_rng(seed, i))?;
                    reports.push(finish(output)?);
                }
                info!(
                    "{} (sample, CpG) pairs consumed across the run",
                    tracker.total_recorded()
                );
                reports
            }
        };

        observer.on_run_finish();
        Ok(RunSummary {
            strategy: self.config.strategy,
            seed,
            targets: index.len(),
            iterations: reports,
        })
    }

    /// The file-based run: writes `targets.tsv`, then one simulated matrix and
    /// one manifest per iteration next to the beta file (or into the
    /// configured output directory).
    pub fn run_files(
        &self,
        mutation_file: &Path,
        annotation_dir: &Path,
        beta_file: &Path,
        observer: &dyn SimulationProgressObserver,
    ) -> Result<RunSummary, SimulationError> {
        let prepared = self.prepare(mutation_file, annotation_dir)?;
        let beta = BetaMatrix::read_tsv(beta_file)?;

        let output_dir = match &self.config.output_dir {
            Some(dir) => dir.clone(),
            None => beta_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        prepared
            .index
            .write_targets_tsv(&output_dir.join("targets.tsv"))?;

        let strategy = self.config.strategy;
        self.run(&prepared.index, &beta, observer, |output| {
            let (matrix_path, manifest_path) =
                output_paths(beta_file, &output_dir, strategy, output.iteration);
            output.matrix.write_tsv(&matrix_path)?;
            output
                .manifest
                .write_json(&manifest_path)
                .map_err(|source| SimulationError::Manifest {
                    path: manifest_path.display().to_string(),
                    source,
                })?;
            Ok(())
        })
    }
}
