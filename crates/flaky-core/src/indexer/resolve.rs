//! Resolution of raw import targets to repository files.
//!
//! All paths handed in and out are repo-relative POSIX strings. A target that
//! maps to nothing resolves to an empty list; the graph builder records it as
//! an unresolved edge.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::indexer::filesystem::{join_relative, normalize_posix_path, parent_dir};
use crate::models::Language;

const ECMASCRIPT_EXTENSIONS: &[&str] = &[
    ".js", ".jsx", ".ts", ".tsx", ".mjs", ".cjs", ".mts", ".cts",
];
const PYTHON_EXTENSIONS: &[&str] = &[".py"];
const RUBY_EXTENSIONS: &[&str] = &[".rb"];
const PHP_EXTENSIONS: &[&str] = &[".php"];

/// Prefix rewrites such as `@` → `src`, longest prefix first.
#[derive(Clone, Debug, Default)]
pub struct AliasTable {
    entries: Vec<(String, String)>,
}

impl AliasTable {
    /// Build from the configured map. Trailing `/` on prefixes and leading
    /// `./` on directories are dropped; directories escaping the repository
    /// are ignored.
    pub fn from_config(aliases: &IndexMap<String, String>) -> Self {
        let mut entries: Vec<(String, String)> = aliases
            .iter()
            .filter_map(|(prefix, dir)| {
                let prefix = prefix.trim().trim_end_matches('/');
                if prefix.is_empty() {
                    return None;
                }
                let dir = normalize_posix_path(dir.trim())?;
                Some((prefix.to_string(), dir))
            })
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.entries.iter().map(|(p, _)| p.clone()).collect()
    }

    /// Rewrite `target` to a repo-relative path if an alias prefix matches.
    pub fn rewrite(&self, target: &str) -> Option<String> {
        for (prefix, dir) in &self.entries {
            let rest = if target == prefix {
                ""
            } else if let Some(rest) = target.strip_prefix(prefix.as_str()).and_then(|r| r.strip_prefix('/')) {
                rest
            } else {
                continue;
            };
            return join_relative(dir, rest);
        }
        None
    }
}

/// Maps raw targets to files under `repo_root`.
#[derive(Clone, Debug)]
pub struct Resolver {
    repo_root: PathBuf,
    aliases: AliasTable,
    go_module: Option<String>,
}

impl Resolver {
    pub fn new(repo_root: &Path, aliases: AliasTable) -> Self {
        Self {
            repo_root: repo_root.to_path_buf(),
            go_module: read_go_module(repo_root),
            aliases,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    pub fn go_module(&self) -> Option<&str> {
        self.go_module.as_deref()
    }

    fn is_file(&self, rel: &str) -> bool {
        !rel.is_empty() && self.repo_root.join(rel).is_file()
    }

    /// Files directly inside `rel_dir` accepted by `keep`, sorted.
    fn list_dir(&self, rel_dir: &str, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.repo_root.join(rel_dir)) else {
            return vec![];
        };
        let mut files: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                keep(&name).then(|| {
                    if rel_dir.is_empty() {
                        name
                    } else {
                        format!("{rel_dir}/{name}")
                    }
                })
            })
            .collect();
        files.sort();
        files
    }

    /// Resolve one raw target found in `from` (repo-relative).
    pub fn resolve(&self, from: &str, language: Language, target: &str) -> Vec<String> {
        match language {
            Language::JavaScript | Language::TypeScript => {
                self.resolve_path_like(from, target, ECMASCRIPT_EXTENSIONS, "index")
            }
            Language::Python => self.resolve_path_like(from, target, PYTHON_EXTENSIONS, "__init__"),
            Language::Ruby => self.resolve_path_like(from, target, RUBY_EXTENSIONS, ""),
            Language::Php => self.resolve_path_like(from, target, PHP_EXTENSIONS, ""),
            Language::C | Language::Cpp => self.resolve_include(from, target),
            Language::Java => self.resolve_dotted(from, target, &[".java"]),
            Language::Kotlin => self.resolve_dotted(from, target, &[".kt", ".java"]),
            Language::Go => self.resolve_go(from, target),
            Language::Rust => self.resolve_rust_mod(from, target),
        }
    }

    /// Alias rewrite, then exact file, then each extension, then
    /// `<target>/<index>.<ext>`.
    fn resolve_path_like(&self, from: &str, target: &str, extensions: &[&str], index: &str) -> Vec<String> {
        let base = match self.aliases.rewrite(target) {
            Some(rewritten) => Some(rewritten),
            None if target.starts_with('.') => join_relative(parent_dir(from), target),
            None => None,
        };
        let Some(base) = base else {
            return vec![];
        };
        if self.is_file(&base) {
            return vec![base];
        }
        if let Some(hit) = extensions
            .iter()
            .map(|ext| format!("{base}{ext}"))
            .find(|candidate| self.is_file(candidate))
        {
            return vec![hit];
        }
        if !index.is_empty() {
            if let Some(hit) = extensions
                .iter()
                .map(|ext| join_relative(&base, &format!("{index}{ext}")).unwrap_or_default())
                .find(|candidate| self.is_file(candidate))
            {
                return vec![hit];
            }
        }
        vec![]
    }

    /// Quoted includes: relative to the including file, then to the root.
    fn resolve_include(&self, from: &str, target: &str) -> Vec<String> {
        [join_relative(parent_dir(from), target), normalize_posix_path(target)]
            .into_iter()
            .flatten()
            .find(|candidate| self.is_file(candidate))
            .into_iter()
            .collect()
    }

    /// `com.foo.Bar` → `<source-root>/com/foo/Bar.<ext>`, trying every
    /// ancestor directory of the importer as a source root. Wildcards
    /// resolve to the whole package directory.
    fn resolve_dotted(&self, from: &str, target: &str, extensions: &[&str]) -> Vec<String> {
        let (dotted, wildcard) = match target.strip_suffix(".*") {
            Some(package) => (package, true),
            None => (target, false),
        };
        let rel = dotted.replace('.', "/");
        let parent_class = rel.rsplit_once('/').map(|(p, _)| p.to_string());

        for root in ancestors(parent_dir(from)) {
            if wildcard {
                let Some(dir) = join_relative(root, &rel) else { continue };
                let files = self.list_dir(&dir, |name| extensions.iter().any(|ext| name.ends_with(ext)));
                if !files.is_empty() {
                    return files;
                }
                continue;
            }
            // Nested classes (`Outer.Inner`) live in `Outer.<ext>`.
            for candidate_rel in std::iter::once(rel.as_str()).chain(parent_class.as_deref()) {
                for ext in extensions {
                    if let Some(candidate) = join_relative(root, &format!("{candidate_rel}{ext}")) {
                        if self.is_file(&candidate) {
                            return vec![candidate];
                        }
                    }
                }
            }
        }
        vec![]
    }

    fn resolve_go(&self, from: &str, target: &str) -> Vec<String> {
        let dir = if target.starts_with('.') {
            join_relative(parent_dir(from), target)
        } else {
            self.go_module.as_deref().and_then(|module| {
                let rest = target.strip_prefix(module)?;
                if !(rest.is_empty() || rest.starts_with('/')) {
                    return None;
                }
                normalize_posix_path(rest)
            })
        };
        let Some(dir) = dir else {
            return vec![];
        };
        self.list_dir(&dir, |name| name.ends_with(".go") && !name.ends_with("_test.go"))
    }

    /// `mod foo;` in `a/lib.rs` → `a/foo.rs` or `a/foo/mod.rs`; in `a/b.rs` →
    /// `a/b/foo.rs` or `a/b/foo/mod.rs`.
    fn resolve_rust_mod(&self, from: &str, target: &str) -> Vec<String> {
        let file_name = from.rsplit('/').next().unwrap_or(from);
        let dir = parent_dir(from);
        let module_dir = match file_name {
            "mod.rs" | "lib.rs" | "main.rs" => Some(dir.to_string()),
            _ => file_name
                .strip_suffix(".rs")
                .and_then(|stem| join_relative(dir, stem)),
        };
        let Some(module_dir) = module_dir else {
            return vec![];
        };
        [format!("{target}.rs"), format!("{target}/mod.rs")]
            .iter()
            .filter_map(|candidate| join_relative(&module_dir, candidate))
            .find(|candidate| self.is_file(candidate))
            .into_iter()
            .collect()
    }
}

/// `a/b/c` → `a/b/c`, `a/b`, `a`, `""`.
fn ancestors(dir: &str) -> impl Iterator<Item = &str> {
    let mut current = Some(dir);
    std::iter::from_fn(move || {
        let this = current?;
        current = if this.is_empty() {
            None
        } else {
            Some(parent_dir(this))
        };
        Some(this)
    })
}

fn read_go_module(repo_root: &Path) -> Option<String> {
    let content = std::fs::read_to_string(repo_root.join("go.mod")).ok()?;
    content
        .lines()
        .find_map(|line| line.trim().strip_prefix("module "))
        .map(|m| m.trim().to_string())
}
