#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use epiclock::analysis::clocks::{ClockTable, write_coefficient_report};
use epiclock::analysis::delta::{DeltaAnalyzer, PredictionTable, load_runs};
use epiclock::analysis::enrichment::{
    EnrichmentTester, population_enrichment, read_population_counts, write_population_enrichment,
};
use epiclock::analysis::scorer::{ClockScorer, LinearClockScorer};
use epiclock::beta::BetaMatrix;
use epiclock::config::{PopulationToken, SamplingStrategy, SimulationConfig};
use epiclock::pipeline::{Simulator, beta_stem};

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Clone, Copy, ValueEnum)]
enum StrategyCli {
    PerCpg,
    PerSample,
}

impl From<StrategyCli> for SamplingStrategy {
    fn from(value: StrategyCli) -> Self {
        match value {
            StrategyCli::PerCpg => SamplingStrategy::PerCpg,
            StrategyCli::PerSample => SamplingStrategy::PerSample,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PopulationTokenCli {
    FourthFromLast,
    SecondFromLast,
}

impl From<PopulationTokenCli> for PopulationToken {
    fn from(value: PopulationTokenCli) -> Self {
        match value {
            PopulationTokenCli::FourthFromLast => PopulationToken::FourthFromLast,
            PopulationTokenCli::SecondFromLast => PopulationToken::SecondFromLast,
        }
    }
}

fn existing_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("'{value}' is not an existing file"))
    }
}

fn existing_dir(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("'{value}' is not an existing directory"))
    }
}

#[derive(Parser)]
#[command(
    name = "epiclock",
    version,
    about = "Mutation sensitivity of epigenetic clocks",
    long_about = "Simulates mutation-driven methylation loss at clock CpGs, scores clocks on \
                  the perturbed matrices and tests mutated CpGs against the rest."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Perturb a beta matrix at mutated clock CpGs
    #[command(about = "Simulate mutation effects (outputs: simulated matrices + manifests)")]
    Simulate {
        /// Per-population mutation list (variant id, allele frequency, zygosity)
        #[arg(value_name = "MUTATION_FILE", value_parser = existing_file)]
        mutation_file: PathBuf,

        /// Directory of intersected clock/variant annotation files
        #[arg(value_name = "ANNOTATION_DIR", value_parser = existing_dir)]
        annotation_dir: PathBuf,

        /// Tab-separated beta matrix (CpG rows, sample columns)
        #[arg(value_name = "BETA_FILE", value_parser = existing_file)]
        beta_file: PathBuf,

        /// TOML simulation settings; flags below override it
        #[arg(long, value_parser = existing_file)]
        config: Option<PathBuf>,

        #[arg(long, value_enum)]
        strategy: Option<StrategyCli>,

        #[arg(long, value_name = "N")]
        iterations: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Which dot-separated segment of annotation file names is the population
        #[arg(long, value_enum)]
        population_token: Option<PopulationTokenCli>,

        /// Defaults to the directory of the beta file
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Run per-CpG iterations concurrently
        #[arg(long)]
        parallel: bool,
    },

    /// Predict clock ages from beta matrices
    #[command(about = "Score linear clocks (outputs: <stem>.predictions.csv)")]
    Score {
        #[arg(value_name = "BETA_FILE", required = true, value_parser = existing_file)]
        beta_files: Vec<PathBuf>,

        /// Clock coefficient table
        #[arg(long, value_parser = existing_file)]
        coefficients: PathBuf,

        /// Restrict scoring to these clocks
        #[arg(long = "clock")]
        clocks: Vec<String>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Compare original and simulated clock predictions
    #[command(about = "Delta-age analysis (outputs: six delta/percent-deviation tables)")]
    Delta {
        #[arg(value_name = "ORIGINAL_TABLE", value_parser = existing_file)]
        original: PathBuf,

        #[arg(value_name = "SIMULATION_DIR", value_parser = existing_dir)]
        simulation_dir: PathBuf,

        /// Clocks to compare (default: Horvath, Hannum, Levine, skinHorvath, PedBE, DUNEDIN)
        #[arg(long = "clock")]
        clocks: Vec<String>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Coefficient distributions of mutated vs non-mutated CpGs
    #[command(about = "Test clock coefficient distributions (outputs: coefficient report TSV)")]
    Weights {
        #[arg(value_name = "COEFFICIENT_FILE", value_parser = existing_file)]
        coefficients: PathBuf,

        #[arg(value_name = "ANNOTATION_DIR", value_parser = existing_dir)]
        annotation_dir: PathBuf,

        #[arg(long, value_enum, default_value = "fourth-from-last")]
        population_token: PopulationTokenCli,

        #[arg(long, default_value = "coefficient_report.tsv")]
        output: PathBuf,
    },

    /// Clock-level mutation enrichment
    #[command(about = "Fisher/FDR and relative risk per population and clock")]
    Enrichment {
        /// Mutation count table, or a coefficient table when --annotations is given
        #[arg(short, long, value_parser = existing_file)]
        input: PathBuf,

        /// Derive counts from this annotation directory instead of reading them
        #[arg(long, value_parser = existing_dir)]
        annotations: Option<PathBuf>,

        #[arg(long, value_enum, default_value = "fourth-from-last")]
        population_token: PopulationTokenCli,

        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Populations to test (default: afr sas amr eas fin nfe asj ami mid)
        #[arg(long = "population")]
        populations: Vec<String>,
    },

    /// Population-level SNP overlap enrichment
    #[command(about = "Fisher/FDR and relative risk per population row")]
    PopulationEnrichment {
        #[arg(value_name = "INPUT", value_parser = existing_file)]
        input: PathBuf,

        #[arg(long, default_value = "enrichment_results_with_rr_fdr.csv")]
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp
            | ErrorKind::DisplayVersion
            | ErrorKind::MissingRequiredArgument
            | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => match e.print() {
                Ok(()) => process::exit(0),
                Err(io) => {
                    eprintln!("Error: {io}");
                    process::exit(1);
                }
            },
            _ => e.exit(),
        },
    };

    let result = match cli.command {
        Some(Commands::Simulate {
            mutation_file,
            annotation_dir,
            beta_file,
            config,
            strategy,
            iterations,
            seed,
            population_token,
            output_dir,
            parallel,
        }) => {
            let overrides = SimulateOverrides {
                strategy: strategy.map(Into::into),
                iterations,
                seed,
                population_token: population_token.map(Into::into),
                output_dir,
                parallel,
            };
            run_simulate(&mutation_file, &annotation_dir, &beta_file, config, overrides)
        }
        Some(Commands::Score {
            beta_files,
            coefficients,
            clocks,
            output_dir,
        }) => run_score(&beta_files, &coefficients, &clocks, output_dir),
        Some(Commands::Delta {
            original,
            simulation_dir,
            clocks,
            output_dir,
        }) => run_delta(&original, &simulation_dir, clocks, output_dir),
        Some(Commands::Weights {
            coefficients,
            annotation_dir,
            population_token,
            output,
        }) => run_weights(&coefficients, &annotation_dir, population_token.into(), &output),
        Some(Commands::Enrichment {
            input,
            annotations,
            population_token,
            output_dir,
            populations,
        }) => run_enrichment(
            &input,
            annotations.as_deref(),
            population_token.into(),
            &output_dir,
            populations,
        ),
        Some(Commands::PopulationEnrichment { input, output }) => {
            run_population_enrichment(&input, &output)
        }
        None => print_usage(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(0), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

struct SimulateOverrides {
    strategy: Option<SamplingStrategy>,
    iterations: Option<usize>,
    seed: Option<u64>,
    population_token: Option<PopulationToken>,
    output_dir: Option<PathBuf>,
    parallel: bool,
}

fn run_simulate(
    mutation_file: &Path,
    annotation_dir: &Path,
    beta_file: &Path,
    config_path: Option<PathBuf>,
    overrides: SimulateOverrides,
) -> CliResult {
    let mut config = match &config_path {
        Some(path) => SimulationConfig::from_toml_file(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(strategy) = overrides.strategy {
        config.strategy = strategy;
    }
    if overrides.iterations.is_some() {
        config.iterations = overrides.iterations;
    }
    if overrides.seed.is_some() {
        config.seed = overrides.seed;
    }
    if overrides.population_token.is_some() {
        config.population_token = overrides.population_token;
    }
    if overrides.output_dir.is_some() {
        config.output_dir = overrides.output_dir;
    }
    config.parallel_iterations |= overrides.parallel;

    let simulator = Simulator::new(config)?;
    let progress = create_progress_bar("Simulating...");
    let summary = simulator.run_files(mutation_file, annotation_dir, beta_file, &progress)?;

    println!(
        "Simulated {} iterations ({} sampling, seed {}) over {} target CpGs",
        summary.iterations.len(),
        summary.strategy.label(),
        summary.seed,
        summary.targets
    );
    for report in &summary.iterations {
        let perturbation = &report.perturbation;
        println!(
            "  iteration {}: {} selected, {} perturbed, {} skipped, {} not in matrix",
            report.iteration,
            perturbation.selected,
            perturbation.perturbed,
            perturbation.skipped,
            perturbation.not_found
        );
    }
    Ok(())
}

fn run_score(
    beta_files: &[PathBuf],
    coefficients: &Path,
    clocks: &[String],
    output_dir: Option<PathBuf>,
) -> CliResult {
    let table = ClockTable::from_file(coefficients)?;
    let scorer = if clocks.is_empty() {
        LinearClockScorer::from_table(&table)
    } else {
        LinearClockScorer::select(&table, clocks)?
    };
    info!("Scoring {} clocks", scorer.clock_names().len());

    for beta_file in beta_files {
        let beta = BetaMatrix::read_tsv(beta_file)?;
        let predictions = scorer.predict(&beta)?;
        let dir = match &output_dir {
            Some(dir) => dir.clone(),
            None => beta_file.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let path = dir.join(format!("{}.predictions.csv", beta_stem(beta_file)));
        predictions.write_csv(&path)?;
        println!(
            "Predictions for {} samples written to {}",
            predictions.ids().len(),
            path.display()
        );
    }
    Ok(())
}

fn run_delta(
    original: &Path,
    simulation_dir: &Path,
    clocks: Vec<String>,
    output_dir: Option<PathBuf>,
) -> CliResult {
    let analyzer = if clocks.is_empty() {
        DeltaAnalyzer::default()
    } else {
        DeltaAnalyzer::new(clocks)
    };
    let original_table = PredictionTable::read_csv(original)?;
    let runs = load_runs(simulation_dir)?;
    let summary = analyzer.analyze(&original_table, &runs)?;

    let dir = output_dir.unwrap_or_else(|| original.parent().map(Path::to_path_buf).unwrap_or_default());
    for path in summary.write_all(&dir)? {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn run_weights(
    coefficients: &Path,
    annotation_dir: &Path,
    token: PopulationToken,
    output: &Path,
) -> CliResult {
    let mut table = ClockTable::from_file(coefficients)?;
    let annotated = table.apply_mutation_annotations(annotation_dir, token)?;
    table.standardize_all();
    let report = table.coefficient_report();
    write_coefficient_report(output, &report)?;
    println!(
        "Coefficient report for {} clocks ({} annotation lines from {} files) written to {}",
        report.len(),
        annotated.applied,
        annotated.files,
        output.display()
    );
    Ok(())
}

fn run_enrichment(
    input: &Path,
    annotations: Option<&Path>,
    token: PopulationToken,
    output_dir: &Path,
    populations: Vec<String>,
) -> CliResult {
    let tester = if populations.is_empty() {
        EnrichmentTester::default()
    } else {
        EnrichmentTester::new(populations)
    };
    let summary = match annotations {
        Some(dir) => {
            let mut table = ClockTable::from_file(input)?;
            table.apply_mutation_annotations(dir, token)?;
            tester.summarize(&table)
        }
        None => tester.read_summary(input)?,
    };
    let report = tester.test(&summary);
    for path in report.write_all(output_dir)? {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn print_usage() -> CliResult {
    Cli::command().print_help()?;
    println!();
    Ok(())
}

fn run_population_enrichment(input: &Path, output: &Path) -> CliResult {
    let rows = read_population_counts(input)?;
    let results = population_enrichment(&rows);
    write_population_enrichment(output, &results)?;
    println!(
        "Enrichment results for {} rows written to {}",
        results.len(),
        output.display()
    );
    Ok(())
}
