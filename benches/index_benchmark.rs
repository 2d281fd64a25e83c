use criterion::{Criterion, black_box, criterion_group, criterion_main};
use quarry::core::config::Config;
use quarry::core::stats::EngineStats;
use quarry::index::compact_reader::CompactIndex;
use quarry::index::compact_writer::CompactIndexWriter;
use quarry::index::extent::ExtentSource;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

fn build_test_index(dir: &tempfile::TempDir, term_count: usize) -> (Config, Arc<EngineStats>) {
    let config = Config { storage_path: dir.path().to_path_buf(), ..Config::default() };
    let stats = Arc::new(EngineStats::new());
    let mut rng = StdRng::seed_from_u64(7);

    let mut terms: Vec<String> = (0..term_count).map(|i| format!("term{:06}", i)).collect();
    terms.sort();

    let path = dir.path().join("index.000");
    let mut writer = CompactIndexWriter::create(&path, &config, Arc::clone(&stats)).unwrap();
    for term in &terms {
        let len = rng.gen_range(1..2000usize);
        let mut postings = Vec::with_capacity(len);
        let mut prev = 0u64;
        for _ in 0..len {
            prev += rng.gen_range(1..100);
            postings.push(prev);
        }
        writer.add_postings(term, &postings).unwrap();
    }
    writer.finish().unwrap();
    (config, stats)
}

fn bench_lookups(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let (config, stats) = build_test_index(&dir, 5000);
    let index =
        CompactIndex::open(&dir.path().join("index.000"), &config, Arc::clone(&stats)).unwrap();
    let mut rng = StdRng::seed_from_u64(11);

    c.bench_function("exact_term_lookup", |bench| {
        bench.iter(|| {
            let term = format!("term{:06}", rng.gen_range(0..5000));
            let mut list = index.get_postings(black_box(&term)).unwrap();
            black_box(list.length())
        });
    });

    c.bench_function("prefix_wildcard_lookup", |bench| {
        bench.iter(|| {
            let prefix = format!("term{:03}*", rng.gen_range(0..500));
            let mut list = index.get_postings(black_box(&prefix)).unwrap();
            black_box(list.length())
        });
    });

    c.bench_function("positional_probes", |bench| {
        let mut list = index.get_postings("term000777").unwrap();
        bench.iter(|| {
            let target = rng.gen_range(0..100_000u64);
            black_box(list.first_start_bigger_eq(black_box(target)))
        });
    });
}

criterion_group!(benches, bench_lookups);
criterion_main!(benches);
