use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::shared::files::ensure_parent_dir;

/// The audit trail of one iteration: for every target CpG, the samples whose
/// beta value was actually reduced, in the order they were perturbed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PerturbationManifest {
    iteration: usize,
    entries: BTreeMap<String, Vec<String>>,
}

impl PerturbationManifest {
    /// Starts a manifest in which every target is listed, untouched.
    pub fn new<I, S>(iteration: usize, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            iteration,
            entries: targets
                .into_iter()
                .map(|cpg| (cpg.into(), Vec::new()))
                .collect(),
        }
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn record(&mut self, cpg: &str, sample: &str) {
        match self.entries.get_mut(cpg) {
            Some(samples) => samples.push(sample.to_string()),
            None => {
                self.entries
                    .insert(cpg.to_string(), vec![sample.to_string()]);
            }
        }
    }

    pub fn samples(&self, cpg: &str) -> Option<&[String]> {
        self.entries.get(cpg).map(Vec::as_slice)
    }

    pub fn entries(&self) -> &BTreeMap<String, Vec<String>> {
        &self.entries
    }

    /// Number of perturbed (CpG, sample) pairs.
    pub fn perturbed_pairs(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        ensure_parent_dir(path)?;
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &self.entries)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub fn read_json(path: &Path, iteration: usize) -> io::Result<Self> {
        let entries: BTreeMap<String, Vec<String>> =
            serde_json::from_reader(io::BufReader::new(File::open(path)?))?;
        Ok(Self { iteration, entries })
    }
}
