//! flaky-core: import-graph fingerprints and flaky-test classification.
//!
//! The indexer builds a transitive local-import graph per test file and hashes
//! it into a fingerprint; the run layer records pass/fail outcomes per test
//! identity, classifies them, and gates automated fixes on a usage quota.
//! With the `python` feature the crate also builds as the `_flaky_core`
//! extension module.

pub mod config;
pub mod context;
pub mod errors;
pub mod indexer;
pub mod logging;
pub mod models;
pub mod runs;
pub mod store;

#[cfg(feature = "python")]
mod python {
    use std::path::PathBuf;

    use pyo3::prelude::*;
    use pyo3::wrap_pyfunction;

    use crate::context::ScanContext;
    use crate::errors::FlakyError;
    use crate::indexer::{filesystem, pipeline};
    use crate::models::{Outcome, TestIdentity};
    use crate::runs::classifier::{classify_outcomes, ClassifierPolicy};

    // -----------------------------------------------------------------------
    // Python entry points. Structured results cross the boundary as JSON.
    // -----------------------------------------------------------------------

    /// Scan `roots` (or every discovered test file) and return the per-root
    /// results as a JSON array.
    #[pyfunction]
    #[pyo3(signature = (repo_root, roots=None))]
    fn scan(py: Python<'_>, repo_root: PathBuf, roots: Option<Vec<String>>) -> PyResult<String> {
        let results = py.allow_threads(|| -> Result<_, FlakyError> {
            let ctx = ScanContext::load(&repo_root)?;
            Ok(match roots {
                Some(roots) => ctx.scan(&roots),
                None => ctx.scan_all(),
            })
        })?;
        Ok(serde_json::to_string(&results).map_err(FlakyError::from)?)
    }

    /// Local import targets of one repo-relative file.
    #[pyfunction]
    fn extract(repo_root: PathBuf, path: &str) -> PyResult<Vec<(String, usize)>> {
        let ctx = ScanContext::load(&repo_root)?;
        Ok(pipeline::extract_file(&ctx, path)?
            .into_iter()
            .map(|raw| (raw.target, raw.line_number))
            .collect())
    }

    /// Classify an oldest-first list of `"pass"`/`"fail"` strings with the
    /// default policy; returns the classification as JSON.
    #[pyfunction]
    #[pyo3(signature = (root_file, test_name, outcomes, min_samples=None))]
    fn classify(
        root_file: &str,
        test_name: &str,
        outcomes: Vec<String>,
        min_samples: Option<usize>,
    ) -> PyResult<String> {
        let parsed = outcomes
            .iter()
            .map(|o| Outcome::parse(o).ok_or_else(|| FlakyError::Config(format!("unknown outcome {o:?}"))))
            .collect::<Result<Vec<_>, _>>()?;
        let policy = ClassifierPolicy {
            min_samples: min_samples.unwrap_or(ClassifierPolicy::DEFAULT.min_samples),
            ..ClassifierPolicy::DEFAULT
        };
        let result = classify_outcomes(&TestIdentity::new(root_file, test_name), &parsed, &policy);
        Ok(serde_json::to_string(&result).map_err(FlakyError::from)?)
    }

    #[pyfunction]
    fn detect_language(path: &str) -> Option<&'static str> {
        filesystem::detect_language(path).map(|lang| lang.as_str())
    }

    #[pyfunction]
    fn compute_content_hash(data: &[u8]) -> String {
        filesystem::compute_content_hash(data)
    }

    #[pymodule]
    fn _flaky_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add("CONFIG_FILE_NAME", crate::config::CONFIG_FILE_NAME)?;
        m.add("FILE_LEVEL_TEST", crate::models::FILE_LEVEL_TEST)?;

        m.add_function(wrap_pyfunction!(scan, m)?)?;
        m.add_function(wrap_pyfunction!(extract, m)?)?;
        m.add_function(wrap_pyfunction!(classify, m)?)?;
        m.add_function(wrap_pyfunction!(detect_language, m)?)?;
        m.add_function(wrap_pyfunction!(compute_content_hash, m)?)?;
        Ok(())
    }
}
