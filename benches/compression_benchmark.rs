use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use quarry::compression::{CompressionMethod, compress_with, decompress_any};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_postings(len: usize, avg_gap: u64, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut postings = Vec::with_capacity(len);
    let mut prev = 0u64;
    for _ in 0..len {
        prev += rng.gen_range(1..avg_gap * 2);
        postings.push(prev);
    }
    postings
}

fn bench_codecs(c: &mut Criterion) {
    let postings = random_postings(16384, 32, 42);
    let methods = [
        CompressionMethod::VByte,
        CompressionMethod::Gamma,
        CompressionMethod::Simple9,
        CompressionMethod::PForDelta,
        CompressionMethod::GroupVarInt,
        CompressionMethod::LLRun,
        CompressionMethod::Interpolative,
    ];

    let mut group = c.benchmark_group("compress_segment");
    group.throughput(Throughput::Elements(postings.len() as u64));
    for method in methods {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", method)),
            &postings,
            |bench, postings| {
                bench.iter(|| compress_with(method, black_box(postings)).unwrap());
            },
        );
    }
    group.finish();

    let mut group = c.benchmark_group("decompress_segment");
    group.throughput(Throughput::Elements(postings.len() as u64));
    for method in methods {
        let compressed = compress_with(method, &postings).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", method)),
            &compressed,
            |bench, compressed| {
                bench.iter(|| decompress_any(black_box(compressed)).unwrap());
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_codecs);
criterion_main!(benches);
