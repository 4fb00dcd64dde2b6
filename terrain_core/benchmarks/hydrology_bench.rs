use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use terrain_core::{ElevationGrid, FlowExtractor, TerrainConfig};

fn bench_hydrology(c: &mut Criterion) {
    let mut group = c.benchmark_group("hydrology");

    for size in [64u32, 128, 256] {
        let config = TerrainConfig::builtin().with_size(size);
        let grid = ElevationGrid::from_fn(size, |x, y| {
            let fx = x as f32 / size as f32;
            let fy = y as f32 / size as f32;
            0.5 + 0.25 * ((fx * 11.0).sin() + (fy * 5.0).cos()) * 0.5 + 0.1 * fx
        });
        let extractor = FlowExtractor::new(&config);
        group.bench_with_input(BenchmarkId::new("extract", size), &grid, |b, grid| {
            b.iter(|| extractor.extract(grid))
        });
    }

    group.finish();
}

criterion_group!(hydrology_benches, bench_hydrology);
criterion_main!(hydrology_benches);
