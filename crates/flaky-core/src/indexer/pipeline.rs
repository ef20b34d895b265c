//! Batch scan orchestration with Rayon-based parallelism.
//!
//! Every root is built and fingerprinted independently; workers share only
//! the context's fill-once file cache and outcome recorder. A failing root is
//! reported in its own [`RootScan`] and never aborts the batch.

use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::context::ScanContext;
use crate::errors::{FlakyError, FlakyResult};
use crate::indexer::extract::{extract_imports, RawImport};
use crate::indexer::filesystem::{discover_test_files, normalize_posix_path};
use crate::indexer::graph::GraphBuilder;
use crate::indexer::hasher::fingerprint;
use crate::indexer::testcases::{discover_test_cases, test_identities};
use crate::models::{FingerprintReport, RootScan};

/// Build, fingerprint and describe one root.
///
/// Every test identity of the root is rebased onto the new fingerprint, so a
/// changed dependency set starts a fresh outcome epoch.
pub fn scan_root(ctx: &ScanContext, root: &str) -> FlakyResult<FingerprintReport> {
    let graph = GraphBuilder::new(ctx.cache(), ctx.resolver()).build(root)?;
    let print = fingerprint(&graph);
    let test_cases = graph
        .nodes
        .get(&graph.root)
        .and_then(|file| file.language.map(|lang| discover_test_cases(&file.content, lang)))
        .unwrap_or_default();
    for identity in test_identities(&graph.root, &test_cases) {
        ctx.recorder().rebase(&identity, &print.digest);
    }

    Ok(FingerprintReport {
        root_file: graph.root.clone(),
        fingerprint: print.digest,
        dependency_count: graph.dependency_count(),
        dependency_paths: graph.dependency_paths(),
        unresolved: graph.unresolved(),
        test_cases,
        changed: None,
    })
}

fn scan_worker(ctx: &ScanContext, root: &str) -> RootScan {
    match scan_root(ctx, root) {
        Ok(report) => RootScan {
            root_file: report.root_file.clone(),
            report: Some(report),
            error: None,
        },
        Err(e) => {
            warn!(root, error = %e, "root scan failed");
            RootScan {
                root_file: root.to_string(),
                report: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Scan `roots` on the context's worker pool. Results keep input order.
pub fn scan_roots(ctx: &ScanContext, roots: &[String]) -> Vec<RootScan> {
    if roots.is_empty() {
        return vec![];
    }
    let started = Instant::now();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.config().workers.max(1))
        .build();

    let results: Vec<RootScan> = match pool {
        Ok(pool) => pool.install(|| roots.par_iter().map(|root| scan_worker(ctx, root)).collect()),
        Err(e) => {
            warn!(error = %e, "worker pool unavailable; scanning sequentially");
            roots.iter().map(|root| scan_worker(ctx, root)).collect()
        }
    };

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    info!(
        roots = results.len(),
        failed,
        cached_files = ctx.cache().len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan complete"
    );
    results
}

/// Local import targets of a single file, as the graph builder sees them.
pub fn extract_file(ctx: &ScanContext, path: &str) -> FlakyResult<Vec<RawImport>> {
    let rel = normalize_posix_path(path).ok_or_else(|| FlakyError::RootMissing(path.into()))?;
    let file = ctx
        .cache()
        .get(&rel)
        .ok_or_else(|| FlakyError::RootMissing(ctx.repo_root().join(&rel)))?;
    let Some(language) = file.language else {
        return Ok(vec![]);
    };
    let builder = GraphBuilder::new(ctx.cache(), ctx.resolver());
    Ok(extract_imports(&file.content, language, builder.options()))
}

/// Discover test files under the context's repository and scan them all.
pub fn scan_repository(ctx: &ScanContext) -> Vec<RootScan> {
    let roots = discover_test_files(ctx.repo_root(), ctx.config());
    info!(roots = roots.len(), "discovered test files");
    scan_roots(ctx, &roots)
}
