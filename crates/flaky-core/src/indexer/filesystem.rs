//! Filesystem helpers: language detection, hashing and repository walks.

use std::path::{Path, PathBuf};

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::FlakyConfig;
use crate::models::Language;

const LANGUAGE_BY_EXTENSION: &[(&str, Language)] = &[
    (".js", Language::JavaScript),
    (".jsx", Language::JavaScript),
    (".mjs", Language::JavaScript),
    (".cjs", Language::JavaScript),
    (".ts", Language::TypeScript),
    (".tsx", Language::TypeScript),
    (".mts", Language::TypeScript),
    (".cts", Language::TypeScript),
    (".py", Language::Python),
    (".c", Language::C),
    (".h", Language::C),
    (".cc", Language::Cpp),
    (".cpp", Language::Cpp),
    (".cxx", Language::Cpp),
    (".hh", Language::Cpp),
    (".hpp", Language::Cpp),
    (".hxx", Language::Cpp),
    (".java", Language::Java),
    (".kt", Language::Kotlin),
    (".kts", Language::Kotlin),
    (".go", Language::Go),
    (".rb", Language::Ruby),
    (".php", Language::Php),
    (".rs", Language::Rust),
];

const DEFAULT_SENSITIVE_EXCLUDE_PATTERNS: &[&str] = &[
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*secret*",
    "*secrets*",
    "*credential*",
    "id_rsa",
    "id_dsa",
];

const IMPLICIT_IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target", "__pycache__"];

/// Repo-local ignore file, read in addition to `.gitignore`.
pub const IGNORE_FILE_NAME: &str = ".flakyignore";

pub fn detect_language(path: &str) -> Option<Language> {
    let ext = Path::new(path)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))?;
    LANGUAGE_BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext.as_str())
        .map(|(_, lang)| *lang)
}

/// Hex SHA-256 of raw bytes.
pub fn compute_content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Lexically normalise a POSIX path: drop `.` and empty segments, fold `..`.
///
/// Returns `None` when `..` would climb above the start of the path, which
/// for repo-relative paths means the target lies outside the repository.
pub fn normalize_posix_path(path: &str) -> Option<String> {
    let mut stack: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop()?;
            }
            _ => stack.push(part),
        }
    }
    Some(stack.join("/"))
}

/// Directory part of a repo-relative path (`""` for top-level files).
pub fn parent_dir(rel_path: &str) -> &str {
    rel_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// Join `rel` onto the repo-relative directory `dir` and normalise.
pub fn join_relative(dir: &str, rel: &str) -> Option<String> {
    if dir.is_empty() {
        normalize_posix_path(rel)
    } else {
        normalize_posix_path(&format!("{dir}/{rel}"))
    }
}

/// Repo-relative POSIX form of `path`.
pub fn relative_posix(repo_root: &Path, path: &Path) -> String {
    path.strip_prefix(repo_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Walk the repository honouring `.gitignore`, `.flakyignore`, the configured
/// include/exclude globs and, unless disabled, the sensitive-file excludes.
pub fn iter_repo_files(repo_root: &Path, config: &FlakyConfig) -> Vec<PathBuf> {
    let mut overrides = OverrideBuilder::new(repo_root);
    for pattern in config.include.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        if let Err(e) = overrides.add(pattern.trim_start_matches("./")) {
            warn!(pattern, error = %e, "ignoring invalid include pattern");
        }
    }
    let mut excludes: Vec<&str> = config
        .exclude
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect();
    if config.exclude_sensitive {
        excludes.extend(DEFAULT_SENSITIVE_EXCLUDE_PATTERNS.iter().copied());
    }
    for pattern in excludes {
        let pattern = pattern.trim_start_matches("./");
        if let Err(e) = overrides.add(&format!("!{pattern}")) {
            warn!(pattern, error = %e, "ignoring invalid exclude pattern");
        }
    }

    let mut builder = WalkBuilder::new(repo_root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_exclude(false)
        .git_global(false)
        .require_git(false)
        .add_custom_ignore_filename(IGNORE_FILE_NAME)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            !(is_dir
                && IMPLICIT_IGNORED_DIRS
                    .iter()
                    .any(|d| entry.file_name() == std::ffi::OsStr::new(d)))
        });
    match overrides.build() {
        Ok(built) => {
            builder.overrides(built);
        }
        Err(e) => warn!(error = %e, "include/exclude patterns rejected"),
    }

    let mut result: Vec<PathBuf> = builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.into_path())
        .collect();
    result.sort();
    result
}

/// Whether a file name follows one of the common test-file conventions.
pub fn is_test_file(rel_path: &str) -> bool {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    if detect_language(name).is_none() {
        return false;
    }
    match ext.to_ascii_lowercase().as_str() {
        "js" | "jsx" | "mjs" | "cjs" | "ts" | "tsx" | "mts" | "cts" => {
            stem.ends_with(".test") || stem.ends_with(".spec")
        }
        "py" => stem.starts_with("test_") || stem.ends_with("_test"),
        "go" => stem.ends_with("_test"),
        "java" | "kt" | "kts" => stem.ends_with("Test") || stem.ends_with("Tests"),
        "rb" => stem.ends_with("_spec") || stem.starts_with("test_") || stem.ends_with("_test"),
        "c" | "cc" | "cpp" | "cxx" => stem.starts_with("test_") || stem.ends_with("_test"),
        "php" => stem.ends_with("Test"),
        _ => false,
    }
}

/// Repo-relative paths of all test files, sorted.
pub fn discover_test_files(repo_root: &Path, config: &FlakyConfig) -> Vec<String> {
    iter_repo_files(repo_root, config)
        .iter()
        .map(|p| relative_posix(repo_root, p))
        .filter(|rel| is_test_file(rel))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("src/a.ts"), Some(Language::TypeScript));
        assert_eq!(detect_language("tests/x.test.js"), Some(Language::JavaScript));
        assert_eq!(detect_language("lib/UTIL.HPP"), Some(Language::Cpp));
        assert_eq!(detect_language("README.md"), None);
        assert_eq!(detect_language("Makefile"), None);
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            compute_content_hash(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_normalize_posix_path() {
        assert_eq!(normalize_posix_path("a/./b/../c").as_deref(), Some("a/c"));
        assert_eq!(normalize_posix_path("./x//y/").as_deref(), Some("x/y"));
        assert_eq!(normalize_posix_path("a/../.."), None);
        assert_eq!(join_relative("tests/unit", "../../src/utils").as_deref(), Some("src/utils"));
        assert_eq!(join_relative("", "src/a.js").as_deref(), Some("src/a.js"));
        assert_eq!(join_relative("tests", "../../outside"), None);
    }

    #[test]
    fn test_is_test_file() {
        assert!(is_test_file("tests/auth.test.js"));
        assert!(is_test_file("tests/typescript-deep/test-ts-4-level.test.ts"));
        assert!(is_test_file("tests/python-deep/test_4_level_chain.py"));
        assert!(is_test_file("pkg/server_test.go"));
        assert!(is_test_file("src/test/java/com/app/UserServiceTest.java"));
        assert!(is_test_file("spec/models/user_spec.rb"));
        assert!(is_test_file("tests/cpp-tests/test_utils.cpp"));
        assert!(!is_test_file("src/utils.js"));
        assert!(!is_test_file("tests/python-deps/helpers.py"));
        assert!(!is_test_file("tests/notes.test.md"));
    }

    #[test]
    fn test_walk_respects_ignores() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::create_dir_all(root.join("build")).unwrap();
        std::fs::write(root.join("src/a.js"), "x").unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "x").unwrap();
        std::fs::write(root.join("build/out.js"), "x").unwrap();
        std::fs::write(root.join("server.pem"), "x").unwrap();
        std::fs::write(root.join(".gitignore"), "build/\n").unwrap();

        let files: Vec<String> = iter_repo_files(root, &FlakyConfig::default())
            .iter()
            .map(|p| relative_posix(root, p))
            .collect();
        assert!(files.contains(&"src/a.js".to_string()));
        assert!(!files.iter().any(|f| f.starts_with("node_modules/")));
        assert!(!files.iter().any(|f| f.starts_with("build/")));
        assert!(!files.contains(&"server.pem".to_string()));
    }
}
