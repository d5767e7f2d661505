// scheduler.rs - Benchmarks for reparse scheduling, coverage queries and
// smart header processing
//
// Run with: cargo bench --features test-support --bench scheduler
// Compare baselines: cargo bench --features test-support --bench scheduler -- --baseline before

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cxxmodel::reparse::{
    coverage, ConditionalFingerprint, FileKey, ParseTarget, Priority, ProjectId, ReparseConfig,
    ReparseScheduler, SourceModel,
};
use cxxmodel::test_utils::fixture_workspace::{populate, FixtureConfig};
use cxxmodel::test_utils::mock_parser::ScriptedParser;

fn keys(count: usize) -> Vec<FileKey> {
    let project = ProjectId::from("bench");
    (0..count)
        .map(|i| FileKey::new(project.clone(), format!("/src/file_{}.cpp", i)))
        .collect()
}

/// A fingerprint with `count` excluded intervals of 16 bytes every 64 bytes
fn striped_fingerprint(count: u64) -> ConditionalFingerprint {
    let pairs: Vec<(u64, u64)> = (0..count).map(|i| (i * 64 + 16, i * 64 + 32)).collect();
    ConditionalFingerprint::from_intervals(&pairs).unwrap()
}

// ---------------------------------------------------------------------------
// Benchmark: enqueue/dequeue throughput
//
// Measures submitting N distinct files at mixed priorities and draining them,
// and the cost of coalescing repeated requests for the same files.
// ---------------------------------------------------------------------------

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_queue");
    group.sample_size(30);

    for &count in &[100usize, 1_000, 10_000] {
        let files = keys(count);
        group.bench_with_input(BenchmarkId::new("enqueue_drain", count), &files, |b, files| {
            b.iter(|| {
                let scheduler = ReparseScheduler::new();
                scheduler.startup();
                for (i, file) in files.iter().enumerate() {
                    let priority = match i % 3 {
                        0 => Priority::Immediate,
                        1 => Priority::Head,
                        _ => Priority::Tail,
                    };
                    scheduler.enqueue(file.clone(), ParseTarget::Parse, priority);
                }
                while let Some(item) = scheduler.try_dequeue() {
                    scheduler.finish(black_box(&item));
                }
            })
        });

        group.bench_with_input(BenchmarkId::new("coalesce", count), &files, |b, files| {
            b.iter(|| {
                let scheduler = ReparseScheduler::new();
                for _ in 0..3 {
                    for file in files.iter().take(100) {
                        scheduler.enqueue(file.clone(), ParseTarget::PartialReparse, Priority::Tail);
                    }
                }
                black_box(scheduler.len())
            })
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: coverage queries against fingerprints of growing size
// ---------------------------------------------------------------------------

fn bench_coverage(c: &mut Criterion) {
    let mut group = c.benchmark_group("coverage");

    for &intervals in &[10u64, 100, 1_000] {
        let fp = striped_fingerprint(intervals);
        let span = intervals * 64;
        group.bench_with_input(BenchmarkId::new("mid_span", intervals), &fp, |b, fp| {
            b.iter(|| black_box(coverage(black_box(fp), 40, span / 2 + 40)))
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: processing a synthetic multi-project workspace on one thread
//
// Measures registering and fully processing every translation unit and
// shared header, which exercises observe/record on the inclusion cache.
// ---------------------------------------------------------------------------

fn bench_smart_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("smart_headers");
    group.sample_size(10);

    let configs: &[(&str, FixtureConfig)] = &[
        ("small", FixtureConfig::small()),
        ("medium", FixtureConfig::medium()),
    ];

    for (label, config) in configs {
        group.bench_with_input(BenchmarkId::new("process_workspace", *label), config, |b, config| {
            b.iter(|| {
                let model = SourceModel::new(ReparseConfig::default());
                let parser = ScriptedParser::new();
                populate(config, &parser, &model);
                model.scheduler().startup();
                black_box(model.process_pending(&parser).len())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_queue, bench_coverage, bench_smart_headers);
criterion_main!(benches);
