use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fs::{self, File};

use staticserver::{EventSink, PathResolver};

fn build_fixture() -> (tempfile::TempDir, PathResolver) {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("assets/css")).unwrap();
    File::create(dir.path().join("index.html")).unwrap();
    File::create(dir.path().join("a.txt")).unwrap();
    File::create(dir.path().join("assets/css/site.css")).unwrap();

    let root = fs::canonicalize(dir.path()).unwrap();
    let resolver = PathResolver::new(root, "index.html", false);
    (dir, resolver)
}

fn flat_resolve_benchmark(c: &mut Criterion) {
    let (_dir, resolver) = build_fixture();
    let events = EventSink::disconnected();

    c.bench_function("resolve_flat_file", |b| {
        b.iter(|| {
            let _ = resolver.resolve(black_box("/a.txt"), 0, &events);
        });
    });
}

fn nested_resolve_benchmark(c: &mut Criterion) {
    let (_dir, resolver) = build_fixture();
    let events = EventSink::disconnected();

    c.bench_function("resolve_nested_file", |b| {
        b.iter(|| {
            let _ = resolver.resolve(black_box("/assets/css/site.css"), 0, &events);
        });
    });
}

fn resolve_outcomes_benchmark(c: &mut Criterion) {
    let (_dir, resolver) = build_fixture();
    let events = EventSink::disconnected();
    let mut group = c.benchmark_group("resolve_outcomes");

    let paths = [
        ("index_via_root", "/"),
        ("missing", "/nope.txt"),
        ("traversal", "/../../etc/passwd"),
        ("encoded", "/assets%2Fcss%2Fsite.css"),
    ];

    for (name, path) in paths.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), path, |b, path| {
            b.iter(|| {
                let _ = resolver.resolve(black_box(path), 0, &events);
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    flat_resolve_benchmark,
    nested_resolve_benchmark,
    resolve_outcomes_benchmark
);
criterion_main!(benches);
