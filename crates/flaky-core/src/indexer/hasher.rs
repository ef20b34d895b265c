//! Graph fingerprints.
//!
//! The fingerprint covers the root path and the multiset of node content
//! hashes. Hashes are sorted before combining, so discovery order never
//! affects the result.

use sha2::{Digest, Sha256};

use crate::models::{DependencyGraph, GraphFingerprint};

/// Combine a root path with node content hashes in canonical order.
pub fn combine_digests<'d>(root: &str, node_hashes: impl IntoIterator<Item = &'d str>) -> String {
    let mut sorted: Vec<&str> = node_hashes.into_iter().collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(root.as_bytes());
    hasher.update([0u8]);
    for digest in sorted {
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

pub fn fingerprint(graph: &DependencyGraph) -> GraphFingerprint {
    let digest = combine_digests(
        &graph.root,
        graph.nodes.values().map(|file| file.content_hash.as_str()),
    );
    GraphFingerprint {
        root: graph.root.clone(),
        digest,
        node_count: graph.nodes.len(),
    }
}
