use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use epiclock::beta::BetaMatrix;
use epiclock::catalog::{MutationCatalog, PopulationCatalog};
use epiclock::config::SimulationConfig;
use epiclock::cpg_index::CpGIndex;
use epiclock::engine::PerturbationEngine;
use epiclock::manifest::PerturbationManifest;
use epiclock::sampling::select_per_cpg;
use epiclock::tracker::{SelectionTracker, TrackingAxis};
use epiclock::types::{Variant, Zygosity};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SAMPLES: usize = 656;

fn fixture(targets: usize) -> (CpGIndex, BetaMatrix) {
    let mut rng = StdRng::seed_from_u64(0x5EED_B7A + targets as u64);
    let variants = (0..targets)
        .filter_map(|i| {
            let zygosity = if i % 3 == 0 {
                Zygosity::Homozygous
            } else {
                Zygosity::Heterozygous
            };
            let mut variant = Variant::new(format!("rs{i}"), "afr", rng.gen_range(0.0..0.3), zygosity)?;
            variant.cpg = Some(format!("cg{i:08}"));
            Some(variant)
        })
        .collect();
    let mut catalog = MutationCatalog::new();
    catalog
        .insert(PopulationCatalog::from_variants("afr", variants))
        .expect("single population");

    let cpgs: Vec<String> = (0..targets * 2).map(|i| format!("cg{i:08}")).collect();
    let samples: Vec<String> = (0..SAMPLES).map(|s| format!("GSM{s}")).collect();
    let values = Array2::from_shape_fn((cpgs.len(), SAMPLES), |_| rng.gen_range(0.0..1.0));
    let beta = BetaMatrix::from_parts("ID_REF", cpgs, samples, values).expect("labels match");
    (CpGIndex::from_catalog(&catalog), beta)
}

fn benchmark_perturbation(c: &mut Criterion) {
    let config = SimulationConfig::default();
    let engine = PerturbationEngine::new(&config);

    let mut group = c.benchmark_group("per_cpg_iteration");
    for targets in [100_usize, 1_000, 5_000] {
        let (index, beta) = fixture(targets);
        group.throughput(Throughput::Elements(targets as u64));
        group.bench_with_input(BenchmarkId::from_parameter(targets), &(index, beta), |b, (index, beta)| {
            let mut rng = StdRng::seed_from_u64(7);
            b.iter(|| {
                let mut tracker = SelectionTracker::new(TrackingAxis::Cpg);
                let selection = select_per_cpg(
                    index.targets(),
                    beta.sample_ids(),
                    config.min_samples_per_cpg,
                    &mut tracker,
                    &mut rng,
                );
                let manifest = PerturbationManifest::new(0, index.cpg_ids());
                let outcome = engine
                    .perturb(black_box(beta), &selection, index, manifest, &mut rng)
                    .expect("betas stay in range");
                black_box(outcome.report.perturbed);
            });
        });
    }
    group.finish();
}

criterion_group!(perturbation, benchmark_perturbation);
criterion_main!(perturbation);
