//! Test-case discovery inside a test file.
//!
//! Names are pulled out with the same line-level regex approach as import
//! extraction. Identities built from these names are what outcome history
//! attaches to.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::{Language, TestIdentity, FILE_LEVEL_TEST};

static JS_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:test|it)(?:\.(?:only|concurrent|skip|each\([^)]*\)))?\s*\(\s*(?:'([^'\n]*)'|"([^"\n]*)"|`([^`\n]*)`)"#)
        .unwrap()
});

static PY_TEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+(test[A-Za-z0-9_]*)[ \t]*\(").unwrap());

static GO_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^func[ \t]+(Test[A-Za-z0-9_]*)[ \t]*\([ \t]*\w+[ \t]+\*testing\.T").unwrap()
});

static JVM_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@Test\b[^\n]*\n(?:[ \t]*@[^\n]*\n)*[^\n(]*?\b(?:void|fun)[ \t]+`?([A-Za-z_][A-Za-z0-9_ ]*?)`?[ \t]*\(")
        .unwrap()
});

static C_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:static[ \t]+)?void[ \t]+(test[A-Za-z0-9_]*)[ \t]*\([ \t]*(?:void)?[ \t]*\)").unwrap()
});

static RUBY_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:it[ \t]*\(?[ \t]*['"]([^'"\n]+)['"]|def[ \t]+(test_[A-Za-z0-9_?!]*))"#).unwrap()
});

static PHP_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*public[ \t]+function[ \t]+(test[A-Za-z0-9_]*)[ \t]*\(").unwrap()
});

static RUST_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#\[(?:tokio::)?test\][ \t\n]*(?:#\[[^\]]*\][ \t\n]*)*(?:async[ \t]+)?fn[ \t]+([A-Za-z_][A-Za-z0-9_]*)")
        .unwrap()
});

fn pattern_for(language: Language) -> &'static Regex {
    match language {
        Language::JavaScript | Language::TypeScript => &JS_TEST_RE,
        Language::Python => &PY_TEST_RE,
        Language::Go => &GO_TEST_RE,
        Language::Java | Language::Kotlin => &JVM_TEST_RE,
        Language::C | Language::Cpp => &C_TEST_RE,
        Language::Ruby => &RUBY_TEST_RE,
        Language::Php => &PHP_TEST_RE,
        Language::Rust => &RUST_TEST_RE,
    }
}

/// Test names declared in `content`, in source order, without duplicates.
pub fn discover_test_cases(content: &str, language: Language) -> Vec<String> {
    let re = pattern_for(language);
    let mut seen = HashSet::new();
    re.captures_iter(content)
        .filter_map(|caps| {
            caps.iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| m.as_str().trim().to_string())
        })
        .filter(|name| !name.is_empty() && seen.insert(name.clone()))
        .collect()
}

/// Identities for every discovered case of `root_file`, or a single
/// file-level identity when none were found.
pub fn test_identities(root_file: &str, test_cases: &[String]) -> Vec<TestIdentity> {
    if test_cases.is_empty() {
        return vec![TestIdentity::new(root_file, FILE_LEVEL_TEST)];
    }
    test_cases
        .iter()
        .map(|name| TestIdentity::new(root_file, name.as_str()))
        .collect()
}
