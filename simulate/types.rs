use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Number of mutated allele copies a carrier holds at a variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Zygosity {
    Heterozygous,
    Homozygous,
    Unknown,
}

impl Zygosity {
    /// Maps the labels found in the mutation files (`het`, `homo`, ...) onto a
    /// zygosity. Anything unrecognised is `Unknown` rather than an error.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "het" | "heterozygous" => Self::Heterozygous,
            "homo" | "hom" | "homozygous" => Self::Homozygous,
            _ => Self::Unknown,
        }
    }

    /// Multiplier applied to the allele frequency when building selection weights.
    pub fn weight(self) -> f64 {
        match self {
            Self::Homozygous => 2.0,
            Self::Heterozygous | Self::Unknown => 1.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Heterozygous => "het",
            Self::Homozygous => "homo",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Zygosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One population-specific variant record from a mutation file.
///
/// The CpG site and the affected clocks are unknown when the record is read;
/// they are filled in later by the CpG index.
#[derive(Clone, Debug, PartialEq)]
pub struct Variant {
    pub id: String,
    pub population: String,
    pub allele_frequency: f64,
    pub zygosity: Zygosity,
    pub cpg: Option<String>,
    pub clocks: Vec<String>,
}

impl Variant {
    /// Builds a record, returning `None` when the allele frequency is not a
    /// probability.
    pub fn new(
        id: impl Into<String>,
        population: impl Into<String>,
        allele_frequency: f64,
        zygosity: Zygosity,
    ) -> Option<Self> {
        if !allele_frequency.is_finite() || !(0.0..=1.0).contains(&allele_frequency) {
            return None;
        }
        Some(Self {
            id: id.into(),
            population: population.into(),
            allele_frequency,
            zygosity,
            cpg: None,
            clocks: Vec::new(),
        })
    }

    /// `allele_frequency × zygosity weight`, before normalisation.
    pub fn adjusted_frequency(&self) -> f64 {
        self.allele_frequency * self.zygosity.weight()
    }
}

/// A CpG site selected for perturbation, with the properties of the variant
/// that overlaps it.
#[derive(Clone, Debug, PartialEq)]
pub struct CpgTarget {
    pub cpg: String,
    pub allele_frequency: f64,
    pub zygosity: Zygosity,
    pub selection_weight: f64,
    pub clocks: BTreeSet<String>,
}

/// Whether a clock CpG carries a variant in a given population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MutationStatus {
    Mutated,
    NotMutated,
    #[default]
    Unknown,
}

impl MutationStatus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Mutated => "mutated",
            Self::NotMutated => "not_mutated",
            Self::Unknown => "na",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zygosity_labels_are_parsed_leniently() {
        assert_eq!(Zygosity::parse("het"), Zygosity::Heterozygous);
        assert_eq!(Zygosity::parse(" Homo "), Zygosity::Homozygous);
        assert_eq!(Zygosity::parse("homozygous"), Zygosity::Homozygous);
        assert_eq!(Zygosity::parse("na"), Zygosity::Unknown);
        assert_eq!(Zygosity::parse(""), Zygosity::Unknown);
    }

    #[test]
    fn adjusted_frequency_doubles_homozygous_variants() {
        let het = Variant::new("rs1", "afr", 0.2, Zygosity::Heterozygous).unwrap();
        let homo = Variant::new("rs2", "afr", 0.2, Zygosity::Homozygous).unwrap();
        let unknown = Variant::new("rs3", "afr", 0.2, Zygosity::Unknown).unwrap();
        assert_eq!(het.adjusted_frequency(), 0.2);
        assert_eq!(homo.adjusted_frequency(), 0.4);
        assert_eq!(unknown.adjusted_frequency(), 0.2);
    }

    #[test]
    fn allele_frequency_must_be_a_probability() {
        assert!(Variant::new("rs1", "afr", 1.2, Zygosity::Heterozygous).is_none());
        assert!(Variant::new("rs1", "afr", -0.1, Zygosity::Heterozygous).is_none());
        assert!(Variant::new("rs1", "afr", f64::NAN, Zygosity::Heterozygous).is_none());
        assert!(Variant::new("rs1", "afr", 0.0, Zygosity::Heterozygous).is_some());
        assert!(Variant::new("rs1", "afr", 1.0, Zygosity::Homozygous).is_some());
    }
}
