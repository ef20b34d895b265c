use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;

use _flaky_core::context::ScanContext;
use _flaky_core::errors::{FlakyError, FlakyResult};
use _flaky_core::indexer::pipeline;
use _flaky_core::logging::init_logging;
use _flaky_core::models::{Classification, OutcomeRecord, RootScan};
use _flaky_core::runs::classifier::classify_outcomes;
use _flaky_core::runs::gate::{BillingPeriod, FixDecision};
use _flaky_core::store::database::Database;

#[derive(Parser)]
#[command(name = "flaky-core")]
#[command(version, about = "Import-graph fingerprints and flaky-test classification")]
struct Cli {
    /// Debug-level logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint test files and their transitive local imports
    Scan {
        /// Repository root (default: current dir)
        #[arg(default_value = ".")]
        directory: PathBuf,
        /// Scan only these repo-relative roots instead of discovering test files
        #[arg(long = "root")]
        roots: Vec<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Record fingerprints here and report whether they changed
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the local import targets of one file
    Extract {
        /// Repo-relative file path
        file: String,
        /// Repository root
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
    /// Classify outcome records read from a JSON-lines file
    Classify {
        /// One OutcomeRecord per line
        outcomes: PathBuf,
        /// Repository root (for configuration)
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Request fixes for flaky tests on behalf of this account
        #[arg(long)]
        account: Option<String>,
        /// Billing period `YYYY-MM` (default: current month)
        #[arg(long)]
        period: Option<String>,
        /// Persist outcomes and usage here
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Scan {
            directory,
            roots,
            json,
            db,
        } => cmd_scan(&directory, &roots, json, db.as_deref()),
        Commands::Extract { file, repo } => cmd_extract(&repo, &file),
        Commands::Classify {
            outcomes,
            repo,
            account,
            period,
            db,
        } => cmd_classify(&outcomes, &repo, account.as_deref(), period.as_deref(), db.as_deref()),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// CLI command implementations
// ---------------------------------------------------------------------------

fn print_json<T: Serialize + ?Sized>(value: &T) -> FlakyResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Exit code 2 when at least one root failed.
fn cmd_scan(directory: &Path, roots: &[String], json: bool, db: Option<&Path>) -> FlakyResult<i32> {
    let ctx = ScanContext::load(directory)?;
    let mut results: Vec<RootScan> = if roots.is_empty() {
        ctx.scan_all()
    } else {
        ctx.scan(roots)
    };

    if let Some(db_path) = db {
        let db = Database::open(db_path)?;
        for report in results.iter_mut().filter_map(|r| r.report.as_mut()) {
            report.changed = Some(db.save_fingerprint(report)?);
        }
    }

    if json {
        print_json(&results)?;
    } else {
        for scan in &results {
            match (&scan.report, &scan.error) {
                (Some(report), _) => {
                    let changed = match report.changed {
                        Some(true) => " changed",
                        Some(false) => " unchanged",
                        None => "",
                    };
                    println!(
                        "{}  {}  deps={} unresolved={} tests={}{}",
                        &report.fingerprint[..12.min(report.fingerprint.len())],
                        report.root_file,
                        report.dependency_count,
                        report.unresolved.len(),
                        report.test_cases.len(),
                        changed,
                    );
                }
                (None, Some(error)) => println!("ERROR  {}  {}", scan.root_file, error),
                (None, None) => {}
            }
        }
    }

    Ok(if results.iter().all(RootScan::is_ok) { 0 } else { 2 })
}

fn cmd_extract(repo: &Path, file: &str) -> FlakyResult<i32> {
    let ctx = ScanContext::load(repo)?;
    for raw in pipeline::extract_file(&ctx, file)? {
        println!("{}:{}  {}", file, raw.line_number, raw.target);
    }
    Ok(0)
}

fn read_outcomes(path: &Path) -> FlakyResult<Vec<OutcomeRecord>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: OutcomeRecord = serde_json::from_str(&line)
            .map_err(|e| FlakyError::Config(format!("{}:{}: {e}", path.display(), index + 1)))?;
        records.push(record);
    }
    Ok(records)
}

#[derive(Serialize)]
struct ClassifyRow {
    #[serde(flatten)]
    classification: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    fix: Option<FixDecision>,
}

fn cmd_classify(
    outcomes: &Path,
    repo: &Path,
    account: Option<&str>,
    period: Option<&str>,
    db: Option<&Path>,
) -> FlakyResult<i32> {
    let ctx = ScanContext::load(repo)?;
    let db = db.map(Database::open).transpose()?;
    let period = match period {
        Some(p) => BillingPeriod::parse(p)
            .ok_or_else(|| FlakyError::Config(format!("invalid period {p:?}, expected YYYY-MM")))?,
        None => BillingPeriod::current(),
    };

    for record in read_outcomes(outcomes)? {
        if let Some(db) = &db {
            db.append_outcome(&record)?;
        }
        ctx.record(record);
    }

    let classifier = ctx.classifier();
    let mut rows = Vec::new();
    for identity in ctx.recorder().identities() {
        let classification = match &db {
            Some(db) => {
                let outcomes: Vec<_> = db.history(&identity, None)?.into_iter().map(|r| r.outcome).collect();
                classify_outcomes(&identity, &outcomes, classifier.policy())
            }
            None => classifier.classify(&identity),
        };
        let fix = match (account, &db) {
            (Some(account), Some(db)) => {
                Some(db.request_fix(account, &period, &classification, ctx.config().plan)?)
            }
            (Some(account), None) => Some(ctx.gate().request_fix(account, &period, &classification)),
            (None, _) => None,
        };
        rows.push(ClassifyRow { classification, fix });
    }
    print_json(&rows)?;
    Ok(0)
}
