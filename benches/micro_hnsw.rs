use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nornicdb::model::NodeId;
use nornicdb::HnswIndex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const DIMENSIONS: usize = 64;
const CORPUS_SIZE: usize = 2_000;

fn micro_hnsw(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/hnsw");
    group.sample_size(20);

    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let index = HnswIndex::with_seed(DIMENSIONS, 16, 200, 100, 1);
    let mut vectors = Vec::with_capacity(CORPUS_SIZE);
    for i in 0..CORPUS_SIZE {
        let v: Vec<f32> = (0..DIMENSIONS).map(|_| rng.gen_range(-1.0..1.0)).collect();
        index.add(NodeId::from(format!("n{i}")), v.clone()).unwrap();
        vectors.push(v);
    }

    group.throughput(Throughput::Elements(1));
    group.bench_function(BenchmarkId::new("search", "k10"), |b| {
        let query = vectors[0].clone();
        b.iter(|| index.search(&query, 10, -1.0, None).unwrap());
    });

    group.bench_function(BenchmarkId::new("insert", "single"), |b| {
        let mut n = CORPUS_SIZE;
        b.iter(|| {
            let v: Vec<f32> = (0..DIMENSIONS).map(|_| rng.gen_range(-1.0..1.0)).collect();
            index.add(NodeId::from(format!("bench{n}")), v).unwrap();
            n += 1;
        });
    });

    group.finish();
}

criterion_group!(benches, micro_hnsw);
criterion_main!(benches);
