//! # Carrier Selection
//!
//! Chooses the (CpG, sample) pairs perturbed in one iteration. Two strategies
//! exist and both draw without replacement through `rand::seq::index::sample`:
//!
//! * **per CpG**: every target CpG receives `max(min, floor(af × samples))`
//!   carriers drawn from the whole cohort. The tracker only records what was
//!   drawn.
//! * **per sample**: every sample receives a fixed number of CpGs drawn from
//!   the targets it has not been given in any earlier iteration. The tracker
//!   is a hard constraint and must outlive the iteration.

use log::debug;
use rand::Rng;
use rand::seq::index;

use crate::tracker::{SelectionTracker, TrackingAxis};
use crate::types::CpgTarget;

/// Ordered (CpG, sample) pairs chosen for one iteration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    pairs: Vec<(String, String)>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, cpg: impl Into<String>, sample: impl Into<String>) {
        self.pairs.push((cpg.into(), sample.into()));
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl FromIterator<(String, String)> for Selection {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

/// Number of carriers drawn for a CpG: `max(min, floor(af × total))`, never
/// more than `total`.
pub fn per_cpg_sample_size(allele_frequency: f64, total: usize, min_samples: usize) -> usize {
    let expected = (allele_frequency * total as f64).floor();
    let expected = if expected.is_finite() && expected > 0.0 {
        expected as usize
    } else {
        0
    };
    expected.max(min_samples).min(total)
}

pub fn select_per_cpg<R: Rng + ?Sized>(
    targets: &[CpgTarget],
    samples: &[String],
    min_samples: usize,
    tracker: &mut SelectionTracker,
    rng: &mut R,
) -> Selection {
    debug_assert_eq!(tracker.axis(), TrackingAxis::Cpg);
    let mut selection = Selection::new();
    for target in targets {
        let amount = per_cpg_sample_size(target.allele_frequency, samples.len(), min_samples);
        for i in index::sample(rng, samples.len(), amount) {
            let sample = &samples[i];
            tracker.record(&target.cpg, sample);
            selection.push(target.cpg.as_str(), sample.as_str());
        }
        debug!("{}: {} carriers drawn", target.cpg, amount);
    }
    selection
}

pub fn select_per_sample<R: Rng + ?Sized>(
    targets: &[CpgTarget],
    samples: &[String],
    draw_size: usize,
    tracker: &mut SelectionTracker,
    rng: &mut R,
) -> Selection {
    debug_assert_eq!(tracker.axis(), TrackingAxis::Sample);
    let mut selection = Selection::new();
    for sample in samples {
        let available: Vec<&CpgTarget> = targets
            .iter()
            .filter(|target| tracker.is_available(sample, &target.cpg))
            .collect();
        let amount = draw_size.min(available.len());
        if amount == 0 {
            continue;
        }
        for i in index::sample(rng, available.len(), amount) {
            let cpg = &available[i].cpg;
            tracker.record(sample, cpg);
            selection.push(cpg.as_str(), sample.as_str());
        }
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Zygosity;
    use ahash::AHashSet;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::BTreeSet;

    fn target(cpg: &str, af: f64) -> CpgTarget {
        CpgTarget {
            cpg: cpg.to_string(),
            allele_frequency: af,
            zygosity: Zygosity::Heterozygous,
            selection_weight: 1.0,
            clocks: BTreeSet::new(),
        }
    }

    fn samples(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("S{i}")).collect()
    }

    #[test]
    fn per_cpg_size_has_a_floor_and_a_ceiling() {
        assert_eq!(per_cpg_sample_size(0.1, 100, 5), 10);
        assert_eq!(per_cpg_sample_size(0.01, 100, 5), 5);
        assert_eq!(per_cpg_sample_size(0.8, 100, 5), 80);
        assert_eq!(per_cpg_sample_size(0.5, 3, 5), 3);
        assert_eq!(per_cpg_sample_size(1.0, 7, 5), 7);
    }

    #[test]
    fn per_cpg_draws_distinct_carriers_and_ignores_other_cpgs() {
        let targets = vec![target("cg01", 0.1), target("cg02", 0.8)];
        let cohort = samples(100);
        let mut tracker = SelectionTracker::new(TrackingAxis::Cpg);
        let mut rng = StdRng::seed_from_u64(7);

        let selection = select_per_cpg(&targets, &cohort, 5, &mut tracker, &mut rng);
        let first: AHashSet<&str> = selection
            .pairs()
            .iter()
            .filter(|(cpg, _)| cpg == "cg01")
            .map(|(_, s)| s.as_str())
            .collect();
        assert_eq!(first.len(), 10);
        assert_eq!(tracker.consumed_count("cg02"), 80);
        assert_eq!(selection.len(), 90);
    }

    #[test]
    fn per_sample_never_repeats_a_pair_across_iterations() {
        let targets: Vec<CpgTarget> = (0..5).map(|i| target(&format!("cg{i}"), 0.2)).collect();
        let cohort = samples(4);
        let mut tracker = SelectionTracker::new(TrackingAxis::Sample);
        let mut rng = StdRng::seed_from_u64(11);

        let mut seen: AHashSet<(String, String)> = AHashSet::new();
        let mut sizes = Vec::new();
        for _ in 0..3 {
            let selection = select_per_sample(&targets, &cohort, 2, &mut tracker, &mut rng);
            sizes.push(selection.len());
            for pair in selection.pairs() {
                assert!(seen.insert(pair.clone()), "pair {pair:?} drawn twice");
            }
        }
        // 5 targets per sample: 2, 2, then the single remaining one.
        assert_eq!(sizes, vec![8, 8, 4]);
        assert_eq!(tracker.total_recorded(), 20);

        let exhausted = select_per_sample(&targets, &cohort, 2, &mut tracker, &mut rng);
        assert!(exhausted.is_empty());
    }

    #[test]
    fn same_seed_gives_the_same_selection() {
        let targets = vec![target("cg01", 0.3), target("cg02", 0.6)];
        let cohort = samples(20);
        let draw = |seed| {
            let mut tracker = SelectionTracker::new(TrackingAxis::Cpg);
            select_per_cpg(&targets, &cohort, 5, &mut tracker, &mut StdRng::seed_from_u64(seed))
        };
        assert_eq!(draw(3), draw(3));
    }
}
