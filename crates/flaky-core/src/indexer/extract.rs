//! Static import extraction.
//!
//! Each language gets one rule function that scans raw text with regexes and
//! returns the *local* import targets it finds. Library, system and package
//! references are filtered out here; whether a local target actually exists is
//! decided later by the resolver. The scan is purely textual, so an import in
//! a dead branch still counts.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::models::Language;

/// A raw import target with the 1-based line it was found on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawImport {
    pub target: String,
    pub line_number: usize,
}

/// Inputs that change which targets count as local.
#[derive(Clone, Debug, Default)]
pub struct ExtractOptions {
    /// Configured alias prefixes, without trailing `/` (e.g. `@`, `@utils`).
    pub alias_prefixes: Vec<String>,
    /// Module path declared in `go.mod`, if any.
    pub go_module: Option<String>,
}

impl ExtractOptions {
    fn is_alias(&self, target: &str) -> bool {
        WELL_KNOWN_ALIAS_PREFIXES
            .iter()
            .any(|p| target.starts_with(p))
            || self
                .alias_prefixes
                .iter()
                .any(|p| target == p || target.strip_prefix(p.as_str()).is_some_and(|r| r.starts_with('/')))
    }
}

/// Alias shapes treated as local even without configuration, so they surface
/// as unresolved rather than disappearing as packages.
const WELL_KNOWN_ALIAS_PREFIXES: &[&str] = &["@/", "~/"];

type Rule = fn(&str, &ExtractOptions) -> Vec<(usize, String)>;

/// Strategy table: one extraction rule per language.
const RULES: &[(Language, Rule)] = &[
    (Language::JavaScript, ecmascript_imports),
    (Language::TypeScript, ecmascript_imports),
    (Language::Python, python_imports),
    (Language::C, c_includes),
    (Language::Cpp, c_includes),
    (Language::Java, java_imports),
    (Language::Kotlin, kotlin_imports),
    (Language::Go, go_imports),
    (Language::Ruby, ruby_requires),
    (Language::Php, php_includes),
    (Language::Rust, rust_modules),
];

/// Extract the ordered, de-duplicated local import targets of `content`.
pub fn extract_imports(content: &str, language: Language, options: &ExtractOptions) -> Vec<RawImport> {
    let Some((_, rule)) = RULES.iter().find(|(lang, _)| *lang == language) else {
        return vec![];
    };
    let mut found = rule(content, options);
    found.sort_by_key(|(offset, _)| *offset);
    if found.is_empty() {
        let import_lines = import_like_lines(content);
        if import_lines > 0 {
            debug!(%language, import_lines, "import-like lines yielded no local targets");
        }
    }

    let line_starts = line_starts(content);
    let mut seen: HashSet<String> = HashSet::new();
    found
        .into_iter()
        .filter(|(_, target)| seen.insert(target.clone()))
        .map(|(offset, target)| RawImport {
            target,
            line_number: line_of(&line_starts, offset),
        })
        .collect()
}

/// Lines that start like an import in any supported language.
static IMPORT_LIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*(?:import|from|#\s*include|use|mod|require|require_once|include|include_once)\b"#)
        .unwrap()
});

fn import_like_lines(content: &str) -> usize {
    IMPORT_LIKE_RE.find_iter(content).count()
}

fn line_starts(content: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(content.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

fn line_of(line_starts: &[usize], offset: usize) -> usize {
    match line_starts.binary_search(&offset) {
        Ok(idx) => idx + 1,
        Err(idx) => idx,
    }
}

fn captures(re: &Regex, content: &str, group: usize) -> Vec<(usize, String)> {
    re.captures_iter(content)
        .filter_map(|caps| caps.get(group))
        .map(|m| (m.start(), m.as_str().to_string()))
        .collect()
}

fn is_relative(target: &str) -> bool {
    target == "."
        || target == ".."
        || target.starts_with("./")
        || target.starts_with("../")
}

// ---------------------------------------------------------------------------
// JavaScript / TypeScript
// ---------------------------------------------------------------------------

static ES_IMPORT_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:import|export)\s+(?:type\s+)?[^'";]*?\bfrom\s*['"]([^'"\n]+)['"]"#).unwrap()
});

static ES_IMPORT_BARE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bimport\s*['"]([^'"\n]+)['"]"#).unwrap());

static ES_REQUIRE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:require|import)\s*\(\s*['"]([^'"\n]+)['"]\s*\)"#).unwrap()
});

fn ecmascript_imports(content: &str, options: &ExtractOptions) -> Vec<(usize, String)> {
    let mut found = captures(&ES_IMPORT_FROM_RE, content, 1);
    found.extend(captures(&ES_IMPORT_BARE_RE, content, 1));
    found.extend(captures(&ES_REQUIRE_RE, content, 1));
    found.retain(|(_, target)| is_relative(target) || options.is_alias(target));
    found
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

static PY_FROM_RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*from[ \t]+(\.+)([A-Za-z0-9_.]*)[ \t]+import[ \t]+([^\n#]+)").unwrap()
});

/// `.` → `./`, `..` → `../`, `...` → `../../`.
fn python_level_prefix(dots: usize) -> String {
    if dots <= 1 {
        "./".to_string()
    } else {
        "../".repeat(dots - 1)
    }
}

fn python_imports(content: &str, _options: &ExtractOptions) -> Vec<(usize, String)> {
    let mut found = Vec::new();
    for caps in PY_FROM_RELATIVE_RE.captures_iter(content) {
        let (Some(whole), Some(dots), Some(module), Some(names)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };
        let prefix = python_level_prefix(dots.as_str().len());
        let module = module.as_str().trim_matches('.');
        if !module.is_empty() {
            found.push((whole.start(), format!("{prefix}{}", module.replace('.', "/"))));
            continue;
        }
        // `from . import a, b as c` names sibling modules.
        for name in names.as_str().trim().trim_matches(|c| c == '(' || c == ')').split(',') {
            let name = name.split_whitespace().next().unwrap_or("");
            if !name.is_empty() && name != "*" && name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                found.push((whole.start(), format!("{prefix}{name}")));
            }
        }
    }
    found
}

// ---------------------------------------------------------------------------
// C / C++
// ---------------------------------------------------------------------------

static C_INCLUDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^[ \t]*#[ \t]*include[ \t]*"([^"\n]+)""#).unwrap());

fn c_includes(content: &str, _options: &ExtractOptions) -> Vec<(usize, String)> {
    captures(&C_INCLUDE_RE, content, 1)
}

// ---------------------------------------------------------------------------
// Java / Kotlin
// ---------------------------------------------------------------------------

static JAVA_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*import[ \t]+(static[ \t]+)?([A-Za-z0-9_.]+(?:\.\*)?)[ \t]*;").unwrap()
});

static KOTLIN_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*import[ \t]+([A-Za-z0-9_.`]+(?:\.\*)?)(?:[ \t]+as[ \t]+\w+)?[ \t]*;?[ \t]*$")
        .unwrap()
});

const JAVA_PLATFORM_PREFIXES: &[&str] = &["java.", "javax.", "jdk.", "sun."];

const KOTLIN_PLATFORM_PREFIXES: &[&str] = &[
    "kotlin.",
    "kotlinx.",
    "android.",
    "androidx.",
    "java.",
    "javax.",
];

fn java_imports(content: &str, _options: &ExtractOptions) -> Vec<(usize, String)> {
    let mut found = Vec::new();
    for caps in JAVA_IMPORT_RE.captures_iter(content) {
        let Some(name) = caps.get(2) else { continue };
        let mut target = name.as_str().to_string();
        if JAVA_PLATFORM_PREFIXES.iter().any(|p| target.starts_with(p)) {
            continue;
        }
        if caps.get(1).is_some() {
            // `import static a.b.Cls.member;` depends on `a.b.Cls`.
            target = match target.strip_suffix(".*") {
                Some(class) => class.to_string(),
                None => match target.rsplit_once('.') {
                    Some((class, _)) => class.to_string(),
                    None => continue,
                },
            };
        }
        found.push((name.start(), target));
    }
    found
}

fn kotlin_imports(content: &str, _options: &ExtractOptions) -> Vec<(usize, String)> {
    captures(&KOTLIN_IMPORT_RE, content, 1)
        .into_iter()
        .map(|(offset, target)| (offset, target.replace('`', "")))
        .filter(|(_, target)| !KOTLIN_PLATFORM_PREFIXES.iter().any(|p| target.starts_with(p)))
        .collect()
}

// ---------------------------------------------------------------------------
// Go
// ---------------------------------------------------------------------------

static GO_IMPORT_SINGLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*import[ \t]+(?:[A-Za-z_][A-Za-z0-9_]*[ \t]+|[._][ \t]+)?"([^"\n]+)""#)
        .unwrap()
});

static GO_IMPORT_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*import[ \t]*\(([^)]*)\)").unwrap());

static GO_IMPORT_BLOCK_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:[A-Za-z_][A-Za-z0-9_]*[ \t]+|[._][ \t]+)?"([^"\n]+)""#).unwrap()
});

fn go_imports(content: &str, options: &ExtractOptions) -> Vec<(usize, String)> {
    let mut found = captures(&GO_IMPORT_SINGLE_RE, content, 1);
    for block in GO_IMPORT_BLOCK_RE.captures_iter(content) {
        let Some(body) = block.get(1) else { continue };
        for (offset, target) in captures(&GO_IMPORT_BLOCK_LINE_RE, body.as_str(), 1) {
            found.push((body.start() + offset, target));
        }
    }
    found.retain(|(_, target)| {
        is_relative(target)
            || options.go_module.as_deref().is_some_and(|module| {
                target == module || target.strip_prefix(module).is_some_and(|r| r.starts_with('/'))
            })
    });
    found
}

// ---------------------------------------------------------------------------
// Ruby
// ---------------------------------------------------------------------------

static RUBY_REQUIRE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*(require|require_relative)[ \t]*\(?[ \t]*['"]([^'"\n]+)['"]"#).unwrap()
});

fn ruby_requires(content: &str, _options: &ExtractOptions) -> Vec<(usize, String)> {
    let mut found = Vec::new();
    for caps in RUBY_REQUIRE_RE.captures_iter(content) {
        let (Some(kind), Some(target)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let raw = target.as_str();
        let normalized = if kind.as_str() == "require_relative" && !is_relative(raw) {
            format!("./{raw}")
        } else if is_relative(raw) {
            raw.to_string()
        } else {
            continue;
        };
        found.push((target.start(), normalized));
    }
    found
}

// ---------------------------------------------------------------------------
// PHP
// ---------------------------------------------------------------------------

static PHP_INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\b(?:require|include)(?:_once)?[ \t]*\(?[ \t]*(__DIR__[ \t]*\.[ \t]*)?['"]([^'"\n]+)['"]"#,
    )
    .unwrap()
});

fn php_includes(content: &str, _options: &ExtractOptions) -> Vec<(usize, String)> {
    let mut found = Vec::new();
    for caps in PHP_INCLUDE_RE.captures_iter(content) {
        let Some(target) = caps.get(2) else { continue };
        let raw = target.as_str();
        let normalized = if caps.get(1).is_some() {
            format!(".{}", if raw.starts_with('/') { raw.to_string() } else { format!("/{raw}") })
        } else if is_relative(raw) {
            raw.to_string()
        } else {
            continue;
        };
        found.push((target.start(), normalized));
    }
    found
}

// ---------------------------------------------------------------------------
// Rust
// ---------------------------------------------------------------------------

static RUST_MOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:pub(?:\([^)]*\))?[ \t]+)?mod[ \t]+([A-Za-z_][A-Za-z0-9_]*)[ \t]*;").unwrap()
});

fn rust_modules(content: &str, _options: &ExtractOptions) -> Vec<(usize, String)> {
    captures(&RUST_MOD_RE, content, 1)
}
