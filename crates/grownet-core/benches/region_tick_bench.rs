use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use grownet_core::Region;

fn build_scalar_region(excitatory: usize) -> Region {
    let mut region = Region::new("bench_scalar");
    let hidden = region.add_layer(excitatory, 0, 0);
    region.bind_input("x", &[hidden]).expect("bench binding");
    region
}

fn build_image_region(side: usize) -> Region {
    let mut region = Region::new("bench_image");
    let input = region
        .add_input_layer_2d(side, side, 1.0, 0.01)
        .expect("bench input layer");
    let output = region
        .add_output_layer_2d(side, side, 0.2)
        .expect("bench output layer");
    region
        .connect_layers_windowed(input, output, 3, 3, 1, 1, "same", false)
        .expect("bench windowed wiring");
    region.bind_input("img", &[input]).expect("bench binding");
    region
}

fn moving_dot_frame(side: usize, step: usize) -> Vec<Vec<f64>> {
    let mut frame = vec![vec![0.0; side]; side];
    frame[step % side][(step * 3) % side] = 1.0;
    frame
}

fn bench_scalar_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_scalar_tick");
    for &n in &[16usize, 64, 256] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("drifting_input", n), &n, |b, &n| {
            b.iter_batched(
                || build_scalar_region(n),
                |mut region| {
                    // Drifting values keep allocating and reusing slots.
                    for step in 0..20 {
                        let value = 0.5 + step as f64 * 0.07;
                        let _metrics = region.tick("x", value).unwrap();
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_image_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_image_tick");
    for &side in &[8usize, 16] {
        group.throughput(Throughput::Elements((side * side) as u64));
        group.bench_with_input(BenchmarkId::new("moving_dot", side), &side, |b, &side| {
            b.iter_batched(
                || build_image_region(side),
                |mut region| {
                    for step in 0..10 {
                        let frame = moving_dot_frame(side, step);
                        let _metrics = region.tick_2d("img", &frame).unwrap();
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scalar_tick, bench_image_tick);
criterion_main!(benches);
