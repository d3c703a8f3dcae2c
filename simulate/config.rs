//! # Simulation Configuration
//!
//! All tunable behaviour of a simulation run lives in `SimulationConfig`.
//! It can be written as a TOML file and is then overridden field by field
//! from the command line. Defaults reproduce the two established pipeline
//! variants: per-CpG sampling over 10 iterations, and per-sample sampling
//! over 3 iterations with a persistent selection tracker.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::Zygosity;

/// Probes that are known to be absent from the 450k array. CpGs from this list
/// that cannot be found in a beta matrix are not reported as anomalies.
pub const DEFAULT_MISSING_PROBES: [&str; 14] = [
    "cg06094762",
    "cg08724636",
    "cg10959651",
    "cg11620135",
    "cg14361627",
    "cg17238334",
    "cg18769120",
    "cg20674577",
    "cg21944491",
    "cg22029879",
    "cg22512531",
    "cg23091758",
    "cg26311454",
    "cg26665419",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration value for '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// How (CpG, sample) pairs are chosen in each iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingStrategy {
    /// For every CpG, draw `max(min, floor(af × samples))` carriers. Selection
    /// state is kept for audit only and is not carried across iterations.
    #[default]
    PerCpg,
    /// For every sample, draw a fixed number of CpGs it has never received in
    /// any earlier iteration of the run.
    PerSample,
}

impl SamplingStrategy {
    pub fn label(self) -> &'static str {
        match self {
            Self::PerCpg => "per_cpg",
            Self::PerSample => "per_sample",
        }
    }

    fn default_iterations(self) -> usize {
        match self {
            Self::PerCpg => 10,
            Self::PerSample => 3,
        }
    }

    fn default_population_token(self) -> PopulationToken {
        match self {
            Self::PerCpg => PopulationToken::FourthFromLast,
            Self::PerSample => PopulationToken::SecondFromLast,
        }
    }
}

/// Which dot-separated segment of an annotation file name holds the
/// population label. The two conventions come from different upstream
/// intersection runs and are not interchangeable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PopulationToken {
    /// `clocks.intersected.afr.common.snps.csv` → `afr`
    FourthFromLast,
    /// `clocks.intersected.afr.csv` → `afr`
    SecondFromLast,
}

impl PopulationToken {
    pub fn extract(self, file_name: &str) -> Option<&str> {
        let segments: Vec<&str> = file_name.split('.').collect();
        let from_end = match self {
            Self::FourthFromLast => 4,
            Self::SecondFromLast => 2,
        };
        let index = segments.len().checked_sub(from_end)?;
        segments.get(index).copied().filter(|s| !s.is_empty())
    }
}

/// Reduction range used for variants of unknown zygosity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnknownZygosityPolicy {
    #[default]
    Homozygous,
    Heterozygous,
}

/// Fraction of the beta value removed from a carrier, drawn uniformly from
/// `[low, high)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReductionRange {
    pub low: f64,
    pub high: f64,
}

impl ReductionRange {
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        let valid = self.low.is_finite()
            && self.high.is_finite()
            && 0.0 <= self.low
            && self.low <= self.high
            && self.high <= 1.0;
        if valid {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                field,
                message: format!(
                    "expected 0 <= low <= high <= 1, found [{}, {}]",
                    self.low, self.high
                ),
            })
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    pub strategy: SamplingStrategy,
    /// Defaults to 10 for per-CpG and 3 for per-sample sampling.
    pub iterations: Option<usize>,
    /// Base seed; a random one is drawn (and logged) when absent.
    pub seed: Option<u64>,
    /// Defaults to the convention of the chosen strategy.
    pub population_token: Option<PopulationToken>,
    pub min_samples_per_cpg: usize,
    pub per_sample_fraction: f64,
    pub per_sample_pool: usize,
    pub heterozygous_reduction: ReductionRange,
    pub homozygous_reduction: ReductionRange,
    pub unknown_zygosity: UnknownZygosityPolicy,
    pub missing_probe_allowlist: Vec<String>,
    /// Per-CpG iterations are independent and may run on the rayon pool.
    pub parallel_iterations: bool,
    pub output_dir: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            strategy: SamplingStrategy::default(),
            iterations: None,
            seed: None,
            population_token: None,
            min_samples_per_cpg: 5,
            per_sample_fraction: 0.07,
            per_sample_pool: 656,
            heterozygous_reduction: ReductionRange::new(0.0, 0.5),
            homozygous_reduction: ReductionRange::new(0.6, 1.0),
            unknown_zygosity: UnknownZygosityPolicy::default(),
            missing_probe_allowlist: DEFAULT_MISSING_PROBES
                .iter()
                .map(|probe| probe.to_string())
                .collect(),
            parallel_iterations: false,
            output_dir: None,
        }
    }
}

impl SimulationConfig {
    pub fn for_strategy(strategy: SamplingStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn iterations(&self) -> usize {
        self.iterations
            .unwrap_or_else(|| self.strategy.default_iterations())
    }

    pub fn population_token(&self) -> PopulationToken {
        self.population_token
            .unwrap_or_else(|| self.strategy.default_population_token())
    }

    /// Number of CpGs drawn per sample under per-sample sampling.
    pub fn per_sample_draw_size(&self) -> usize {
        (self.per_sample_fraction * self.per_sample_pool as f64).floor() as usize
    }

    /// Reduction range that applies to a variant of the given zygosity.
    pub fn reduction_for(&self, zygosity: Zygosity) -> ReductionRange {
        match (zygosity, self.unknown_zygosity) {
            (Zygosity::Heterozygous, _) => self.heterozygous_reduction,
            (Zygosity::Homozygous, _) => self.homozygous_reduction,
            (Zygosity::Unknown, UnknownZygosityPolicy::Homozygous) => self.homozygous_reduction,
            (Zygosity::Unknown, UnknownZygosityPolicy::Heterozygous) => {
                self.heterozygous_reduction
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == Some(0) {
            return Err(ConfigError::Invalid {
                field: "iterations",
                message: "at least one iteration is required".into(),
            });
        }
        if !self.per_sample_fraction.is_finite() || !(0.0..=1.0).contains(&self.per_sample_fraction)
        {
            return Err(ConfigError::Invalid {
                field: "per_sample_fraction",
                message: format!("expected a value in [0, 1], found {}", self.per_sample_fraction),
            });
        }
        self.heterozygous_reduction
            .validate("heterozygous_reduction")?;
        self.homozygous_reduction.validate("homozygous_reduction")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_defaults_follow_the_established_pipelines() {
        let per_cpg = SimulationConfig::for_strategy(SamplingStrategy::PerCpg);
        assert_eq!(per_cpg.iterations(), 10);
        assert_eq!(per_cpg.population_token(), PopulationToken::FourthFromLast);

        let per_sample = SimulationConfig::for_strategy(SamplingStrategy::PerSample);
        assert_eq!(per_sample.iterations(), 3);
        assert_eq!(per_sample.population_token(), PopulationToken::SecondFromLast);
        assert_eq!(per_sample.per_sample_draw_size(), 45);
    }

    #[test]
    fn population_token_positions() {
        let name = "clocks.intersected.afr.common.snps.csv";
        assert_eq!(PopulationToken::FourthFromLast.extract(name), Some("afr"));
        assert_eq!(PopulationToken::SecondFromLast.extract(name), Some("snps"));
        assert_eq!(
            PopulationToken::SecondFromLast.extract("clocks.intersected.eas.csv"),
            Some("eas")
        );
        assert_eq!(PopulationToken::FourthFromLast.extract("eas.csv"), None);
    }

    #[test]
    fn toml_overrides_only_named_fields() {
        let config = SimulationConfig::from_toml_str(
            r#"
            strategy = "per-sample"
            seed = 42
            homozygous_reduction = { low = 0.7, high = 0.9 }
            "#,
        )
        .unwrap();
        assert_eq!(config.strategy, SamplingStrategy::PerSample);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.iterations(), 3);
        assert_eq!(config.homozygous_reduction, ReductionRange::new(0.7, 0.9));
        assert_eq!(config.heterozygous_reduction, ReductionRange::new(0.0, 0.5));
        assert_eq!(config.missing_probe_allowlist.len(), 14);
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let err = SimulationConfig::from_toml_str(
            "heterozygous_reduction = { low = 0.6, high = 0.2 }",
        )
        .unwrap_err();
        match err {
            ConfigError::Invalid { field, .. } => assert_eq!(field, "heterozygous_reduction"),
            other => panic!("expected an invalid-field error, got {other:?}"),
        }

        let err = SimulationConfig::from_toml_str("iterations = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "iterations", .. }));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            SimulationConfig::from_toml_str("iteration_count = 4"),
            Err(ConfigError::TomlParseError(_))
        ));
    }

    #[test]
    fn unknown_zygosity_follows_policy() {
        let mut config = SimulationConfig::default();
        assert_eq!(
            config.reduction_for(Zygosity::Unknown),
            config.homozygous_reduction
        );
        config.unknown_zygosity = UnknownZygosityPolicy::Heterozygous;
        assert_eq!(
            config.reduction_for(Zygosity::Unknown),
            config.heterozygous_reduction
        );
    }
}
