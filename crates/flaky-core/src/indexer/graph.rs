//! Dependency graph construction from a root file.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::errors::{FlakyError, FlakyResult};
use crate::indexer::cache::FileCache;
use crate::indexer::extract::{extract_imports, ExtractOptions};
use crate::indexer::filesystem::normalize_posix_path;
use crate::indexer::resolve::Resolver;
use crate::models::{DependencyGraph, ImportEdge, SourceFile};

/// Builds rooted import graphs over a shared [`FileCache`].
pub struct GraphBuilder<'a> {
    cache: &'a FileCache,
    resolver: &'a Resolver,
    options: ExtractOptions,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(cache: &'a FileCache, resolver: &'a Resolver) -> Self {
        let options = ExtractOptions {
            alias_prefixes: resolver.aliases().prefixes(),
            go_module: resolver.go_module().map(str::to_string),
        };
        Self {
            cache,
            resolver,
            options,
        }
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Breadth-first walk of local imports starting at `root`.
    ///
    /// A missing root is an error. Unresolvable or unreadable dependencies
    /// become unresolved edges and the walk carries on.
    pub fn build(&self, root: &str) -> FlakyResult<DependencyGraph> {
        let root = normalize_posix_path(root)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| FlakyError::RootMissing(root.into()))?;
        let root_file = self
            .cache
            .get(&root)
            .ok_or_else(|| FlakyError::RootMissing(self.cache.repo_root().join(&root)))?;

        let mut nodes: IndexMap<String, SourceFile> = IndexMap::new();
        let mut edges: Vec<ImportEdge> = Vec::new();
        let mut seen_edges: HashSet<(String, String)> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        nodes.insert(root.clone(), root_file);
        queue.push_back(root.clone());

        while let Some(current) = queue.pop_front() {
            let Some(file) = nodes.get(&current).cloned() else {
                continue;
            };
            let Some(language) = file.language else {
                continue;
            };

            for import in extract_imports(&file.content, language, &self.options) {
                let targets = self.resolver.resolve(&current, language, &import.target);
                if targets.is_empty() {
                    debug!(from = %current, target = %import.target, "unresolved import");
                    if seen_edges.insert((current.clone(), format!("?{}", import.target))) {
                        edges.push(ImportEdge {
                            from: current.clone(),
                            raw: import.target.clone(),
                            line_number: import.line_number,
                            resolved: None,
                        });
                    }
                    continue;
                }

                for target in targets {
                    if !seen_edges.insert((current.clone(), target.clone())) {
                        continue;
                    }
                    let mut resolved = Some(target.clone());
                    if !nodes.contains_key(&target) {
                        match self.cache.get(&target) {
                            Some(dep) => {
                                nodes.insert(target.clone(), dep);
                                queue.push_back(target.clone());
                            }
                            None => {
                                warn!(from = %current, path = %target, "dependency unreadable; excluded");
                                resolved = None;
                            }
                        }
                    }
                    edges.push(ImportEdge {
                        from: current.clone(),
                        raw: import.target.clone(),
                        line_number: import.line_number,
                        resolved,
                    });
                }
            }
        }

        debug!(root = %root, nodes = nodes.len(), edges = edges.len(), "graph built");
        Ok(DependencyGraph { root, nodes, edges })
    }
}
