use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use terrain_core::{
    ElevationGrid, ErosionMode, HydraulicErosion, PotentialGenerator, Stage, StageContext,
    TerrainConfig,
};

fn bench_erosion(c: &mut Criterion) {
    let mut group = c.benchmark_group("erosion");
    group.sample_size(10);

    for mode in [ErosionMode::Sequential, ErosionMode::ParallelBatches] {
        let mut config = TerrainConfig::builtin().with_size(128);
        config.erosion.particles = 5_000;
        config.erosion.mode = mode;
        let (potential, _) = PotentialGenerator::new(&config)
            .generate()
            .expect("potential");
        let base = ElevationGrid::from_fn(128, |x, y| {
            let fx = x as f32 / 128.0;
            let fy = y as f32 / 128.0;
            0.5 + 0.3 * ((fx * 9.0).sin() * (fy * 7.0).cos())
        });
        let erosion = HydraulicErosion::new(&config);

        group.bench_with_input(
            BenchmarkId::new("particles_5k", format!("{mode:?}")),
            &mode,
            |b, _| {
                b.iter_batched(
                    || base.clone(),
                    |grid| {
                        let ctx = StageContext::detached(&potential, config.scale());
                        erosion.run(grid, &ctx).expect("erosion")
                    },
                    BatchSize::LargeInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(erosion_benches, bench_erosion);
criterion_main!(erosion_benches);
