//! Criterion benchmarks for flaky-core.
//!
//! ## Benchmark groups
//!
//! 1. **extraction**: import extraction over synthetic sources per language.
//! 2. **graph**: building and fingerprinting chains and shared leaves on disk.
//! 3. **classification**: classifying outcome sequences of growing length.
//! 4. **schema**: DDL init + version stamp overhead.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/flaky-core/Cargo.toml -- graph
//! ```

use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;

use _flaky_core::config::FlakyConfig;
use _flaky_core::context::ScanContext;
use _flaky_core::indexer::extract::{extract_imports, ExtractOptions};
use _flaky_core::indexer::graph::GraphBuilder;
use _flaky_core::indexer::hasher::fingerprint;
use _flaky_core::models::{Language, Outcome, TestIdentity};
use _flaky_core::runs::classifier::{classify_outcomes, ClassifierPolicy};
use _flaky_core::store::schema::{check_schema_version, SCHEMA_STATEMENTS};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn js_source(imports: usize) -> String {
    let mut src = String::new();
    for i in 0..imports {
        src.push_str(&format!("import {{ thing{i} }} from './module_{i}';\n"));
        src.push_str(&format!("const pkg{i} = require('package-{i}');\n"));
    }
    src.push_str("test('works', () => { expect(1).toBe(1); });\n");
    src
}

fn python_source(imports: usize) -> String {
    let mut src = String::new();
    for i in 0..imports {
        src.push_str(&format!("from .helpers_{i} import value\n"));
        src.push_str(&format!("import numpy_{i}\n"));
    }
    src.push_str("def test_value():\n    assert value == 1\n");
    src
}

/// `tests/root.test.js` importing a chain of `depth` modules, each also
/// importing one shared leaf.
fn write_chain(dir: &Path, depth: usize) {
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::create_dir_all(dir.join("tests")).unwrap();
    std::fs::write(dir.join("src/leaf.js"), "module.exports = 1;\n").unwrap();
    for i in 0..depth {
        let next = if i + 1 < depth {
            format!("require('./m{}');\n", i + 1)
        } else {
            String::new()
        };
        std::fs::write(
            dir.join(format!("src/m{i}.js")),
            format!("{next}require('./leaf');\nmodule.exports = {i};\n"),
        )
        .unwrap();
    }
    std::fs::write(
        dir.join("tests/root.test.js"),
        "const m = require('../src/m0');\ntest('chain', () => {});\n",
    )
    .unwrap();
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("extraction");
    let options = ExtractOptions::default();
    for &imports in &[10, 100, 1000] {
        let js = js_source(imports);
        let py = python_source(imports);
        group.bench_with_input(BenchmarkId::new("javascript", imports), &js, |b, src| {
            b.iter(|| black_box(extract_imports(src, Language::JavaScript, &options)));
        });
        group.bench_with_input(BenchmarkId::new("python", imports), &py, |b, src| {
            b.iter(|| black_box(extract_imports(src, Language::Python, &options)));
        });
    }
    group.finish();
}

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");
    for &depth in &[10, 100, 500] {
        let dir = tempfile::tempdir().unwrap();
        write_chain(dir.path(), depth);
        group.bench_with_input(BenchmarkId::new("cold_build", depth), &depth, |b, _| {
            b.iter_with_setup(
                || ScanContext::new(dir.path(), FlakyConfig::default()).unwrap(),
                |ctx| {
                    let graph = GraphBuilder::new(ctx.cache(), ctx.resolver())
                        .build("tests/root.test.js")
                        .unwrap();
                    black_box(fingerprint(&graph));
                },
            );
        });

        let ctx = ScanContext::new(dir.path(), FlakyConfig::default()).unwrap();
        group.bench_with_input(BenchmarkId::new("warm_build", depth), &depth, |b, _| {
            b.iter(|| {
                let graph = GraphBuilder::new(ctx.cache(), ctx.resolver())
                    .build("tests/root.test.js")
                    .unwrap();
                black_box(fingerprint(&graph))
            });
        });
    }
    group.finish();
}

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");
    let id = TestIdentity::new("tests/root.test.js", "chain");
    for &runs in &[20, 200, 2000] {
        let outcomes: Vec<Outcome> = (0..runs)
            .map(|i| if i % 7 == 0 { Outcome::Fail } else { Outcome::Pass })
            .collect();
        group.bench_with_input(BenchmarkId::new("outcomes", runs), &outcomes, |b, outcomes| {
            b.iter(|| black_box(classify_outcomes(&id, outcomes, &ClassifierPolicy::DEFAULT)));
        });
    }
    group.finish();
}

fn bench_schema_init(c: &mut Criterion) {
    c.bench_function("schema_init", |b| {
        b.iter(|| {
            let conn = Connection::open_in_memory().unwrap();
            for stmt in SCHEMA_STATEMENTS {
                conn.execute_batch(stmt).unwrap();
            }
            check_schema_version(&conn).unwrap();
            black_box(&conn);
        });
    });
}

criterion_group!(
    benches,
    bench_extraction,
    bench_graph,
    bench_classification,
    bench_schema_init,
);
criterion_main!(benches);
