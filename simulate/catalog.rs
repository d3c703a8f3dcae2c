//! # Mutation Catalog
//!
//! Loads the per-population variant lists (`variant_id`, `AF`, zygosity, ...)
//! and computes each variant's normalised selection weight
//! `af × zygosity_weight / Σ(af × zygosity_weight)`.
//!
//! A catalog is built once per run by pure loader functions and is then only
//! touched by the CpG index, which fills in the `cpg` and `clocks` fields.

use ahash::AHashMap;
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::shared::files::{FileError, TextSource, file_name_str, open_text_source};
use crate::types::{Variant, Zygosity};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error(transparent)]
    File(#[from] FileError),
    #[error("Parse error in {path} at line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("Could not derive a population label from the file name '{0}'")]
    MissingPopulation(String),
    #[error("Population '{0}' was loaded twice")]
    DuplicatePopulation(String),
}

/// The variants of a single population, in file order.
#[derive(Clone, Debug)]
pub struct PopulationCatalog {
    population: String,
    variants: Vec<Variant>,
    index: AHashMap<String, usize>,
    weights: Vec<f64>,
}

impl PopulationCatalog {
    /// Builds a catalog from already validated variants. A repeated id replaces
    /// the earlier record in place.
    pub fn from_variants(population: impl Into<String>, records: Vec<Variant>) -> Self {
        let population = population.into();
        let mut variants: Vec<Variant> = Vec::with_capacity(records.len());
        let mut index: AHashMap<String, usize> = AHashMap::with_capacity(records.len());

        for variant in records {
            match index.get(&variant.id) {
                Some(&position) => {
                    warn!(
                        "Variant '{}' is listed more than once for population '{}'; keeping the last record",
                        variant.id, population
                    );
                    variants[position] = variant;
                }
                None => {
                    index.insert(variant.id.clone(), variants.len());
                    variants.push(variant);
                }
            }
        }

        let weights = normalized_weights(&variants);
        if !variants.is_empty() && weights.iter().all(|w| w.is_nan()) {
            warn!(
                "All adjusted allele frequencies of population '{population}' are zero; selection weights are undefined"
            );
        }

        Self {
            population,
            variants,
            index,
            weights,
        }
    }

    pub fn population(&self) -> &str {
        &self.population
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Variant> {
        self.index.get(id).map(|&i| &self.variants[i])
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Variant> {
        match self.index.get(id) {
            Some(&i) => Some(&mut self.variants[i]),
            None => None,
        }
    }

    /// Normalised selection weight of a variant; `NaN` when every adjusted
    /// frequency of the population is zero.
    pub fn selection_weight(&self, id: &str) -> Option<f64> {
        self.index.get(id).map(|&i| self.weights[i])
    }

    /// Variants paired with their selection weights, in file order.
    pub fn weighted_variants(&self) -> impl Iterator<Item = (&Variant, f64)> {
        self.variants.iter().zip(self.weights.iter().copied())
    }
}

fn normalized_weights(variants: &[Variant]) -> Vec<f64> {
    let total: f64 = variants.iter().map(Variant::adjusted_frequency).sum();
    variants
        .iter()
        .map(|variant| {
            if total > 0.0 {
                variant.adjusted_frequency() / total
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Every population of a run, keyed by population label.
#[derive(Clone, Debug, Default)]
pub struct MutationCatalog {
    populations: BTreeMap<String, PopulationCatalog>,
}

impl MutationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, catalog: PopulationCatalog) -> Result<(), CatalogError> {
        if self.populations.contains_key(catalog.population()) {
            return Err(CatalogError::DuplicatePopulation(
                catalog.population().to_string(),
            ));
        }
        self.populations
            .insert(catalog.population().to_string(), catalog);
        Ok(())
    }

    pub fn population(&self, name: &str) -> Option<&PopulationCatalog> {
        self.populations.get(name)
    }

    pub fn population_mut(&mut self, name: &str) -> Option<&mut PopulationCatalog> {
        self.populations.get_mut(name)
    }

    pub fn populations(&self) -> impl Iterator<Item = &PopulationCatalog> {
        self.populations.values()
    }

    pub fn variant_count(&self) -> usize {
        self.populations.values().map(PopulationCatalog::len).sum()
    }

    /// Loads one mutation file per population.
    pub fn load_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, CatalogError> {
        let mut catalog = Self::new();
        for path in paths {
            catalog.insert(load_population_file(path.as_ref())?)?;
        }
        Ok(catalog)
    }
}

/// The population label of a mutation file is the first dot-separated segment
/// of its name: `afr.common_mutations_in_CpG.with_zygosity.txt` → `afr`.
pub fn population_from_file_name(path: &Path) -> Option<String> {
    file_name_str(path)
        .split('.')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Loads a mutation file, deriving the population from its file name.
pub fn load_population_file(path: &Path) -> Result<PopulationCatalog, CatalogError> {
    let population = population_from_file_name(path)
        .ok_or_else(|| CatalogError::MissingPopulation(path.display().to_string()))?;
    load_population_file_as(path, &population)
}

pub fn load_population_file_as(
    path: &Path,
    population: &str,
) -> Result<PopulationCatalog, CatalogError> {
    let mut source = open_text_source(path)?;
    let catalog = parse_mutation_source(source.as_mut(), population)?;
    info!(
        "Loaded {} variants for population '{}' from {}",
        catalog.len(),
        population,
        path.display()
    );
    Ok(catalog)
}

/// Parses a tab-separated mutation list. The first non-empty line is a header.
pub fn parse_mutation_source(
    source: &mut dyn TextSource,
    population: &str,
) -> Result<PopulationCatalog, CatalogError> {
    let path = source.path_display().to_string();
    let mut header_skipped = false;
    let mut records = Vec::new();
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
        let parse_error = |message: String| CatalogError::Parse {
            path: path.clone(),
            line: line_number,
            message,
        };

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(parse_error(format!(
                "expected at least 3 tab-separated fields, found {}",
                fields.len()
            )));
        }

        let id = fields[0].trim();
        let allele_frequency: f64 = fields[1].trim().parse().map_err(|_| {
            parse_error(format!("allele frequency '{}' is not numeric", fields[1]))
        })?;
        let zygosity = Zygosity::parse(fields[2]);
        let variant = Variant::new(id, population, allele_frequency, zygosity).ok_or_else(|| {
            parse_error(format!(
                "allele frequency {allele_frequency} is outside [0, 1]"
            ))
        })?;
        records.push(variant);
    }

    Ok(PopulationCatalog::from_variants(population, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "variant\tAF\tzyogosity_probability\tgene";

    fn write_mutations(dir: &Path, name: &str, rows: &[&str]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut content = vec![HEADER.to_string()];
        content.extend(rows.iter().map(|r| r.to_string()));
        fs::write(&path, content.join("\n")).unwrap();
        path
    }

    #[test]
    fn weights_are_normalised_adjusted_frequencies() {
        let dir = tempdir().unwrap();
        let path = write_mutations(
            dir.path(),
            "afr.common_mutations_in_CpG.with_zygosity.txt",
            &["rs1\t0.1\thet\tA", "rs2\t0.2\thomo\tB", "rs3\t0.3\tna\tC"],
        );

        let catalog = load_population_file(&path).unwrap();
        assert_eq!(catalog.population(), "afr");
        assert_eq!(catalog.len(), 3);

        // adjusted: 0.1, 0.4, 0.3 → total 0.8
        assert_abs_diff_eq!(catalog.selection_weight("rs1").unwrap(), 0.125, epsilon = 1e-12);
        assert_abs_diff_eq!(catalog.selection_weight("rs2").unwrap(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(catalog.selection_weight("rs3").unwrap(), 0.375, epsilon = 1e-12);
        let total: f64 = catalog.weighted_variants().map(|(_, w)| w).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);

        assert_eq!(catalog.get("rs2").unwrap().zygosity, Zygosity::Homozygous);
        assert_eq!(catalog.get("rs3").unwrap().zygosity, Zygosity::Unknown);
    }

    #[test]
    fn short_rows_are_parse_errors() {
        let dir = tempdir().unwrap();
        let path = write_mutations(dir.path(), "eas.txt", &["rs1\t0.1\thet", "rs2\t0.2"]);
        match load_population_file(&path).unwrap_err() {
            CatalogError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_frequency_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = write_mutations(dir.path(), "eas.txt", &["rs1\tabc\thet"]);
        assert!(matches!(
            load_population_file(&path),
            Err(CatalogError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn out_of_range_frequency_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = write_mutations(dir.path(), "eas.txt", &["rs1\t1.5\thet"]);
        assert!(matches!(
            load_population_file(&path),
            Err(CatalogError::Parse { .. })
        ));
    }

    #[test]
    fn duplicated_ids_keep_the_last_record() {
        let variants = vec![
            Variant::new("rs1", "sas", 0.1, Zygosity::Heterozygous).unwrap(),
            Variant::new("rs2", "sas", 0.3, Zygosity::Heterozygous).unwrap(),
            Variant::new("rs1", "sas", 0.5, Zygosity::Homozygous).unwrap(),
        ];
        let catalog = PopulationCatalog::from_variants("sas", variants);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.variants()[0].id, "rs1");
        assert_eq!(catalog.get("rs1").unwrap().allele_frequency, 0.5);
        assert_abs_diff_eq!(catalog.selection_weight("rs1").unwrap(), 1.0 / 1.3, epsilon = 1e-12);
    }

    #[test]
    fn zero_frequencies_leave_weights_undefined() {
        let variants = vec![Variant::new("rs1", "fin", 0.0, Zygosity::Homozygous).unwrap()];
        let catalog = PopulationCatalog::from_variants("fin", variants);
        assert!(catalog.selection_weight("rs1").unwrap().is_nan());
    }

    #[test]
    fn catalog_rejects_the_same_population_twice() {
        let dir = tempdir().unwrap();
        let first = write_mutations(dir.path(), "nfe.a.txt", &["rs1\t0.1\thet"]);
        let second = write_mutations(dir.path(), "nfe.b.txt", &["rs2\t0.1\thet"]);
        assert!(matches!(
            MutationCatalog::load_files(&[first, second]),
            Err(CatalogError::DuplicatePopulation(p)) if p == "nfe"
        ));
    }
}
