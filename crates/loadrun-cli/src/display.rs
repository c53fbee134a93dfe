//! Terminal output for run progress, summaries, and maintenance commands.

use colored::Colorize;
use loadrun_core::retention::{RetentionPolicy, RetentionStats, SweepReport};
use loadrun_core::{ArtifactName, BatchResult, Config, ProgressCallback, ProgressEvent, RunOutcome};
use std::path::Path;

const RULE_WIDTH: usize = 60;

fn rule() -> String {
    "━".repeat(RULE_WIDTH)
}

/// Prints a separator before each run of a multi-run batch and a verdict after.
pub fn progress_printer() -> ProgressCallback {
    Box::new(|event| match event {
        ProgressEvent::UnitStarted {
            index,
            total,
            test_name,
        } if total > 1 => {
            println!("\n{}", rule().dimmed());
            println!("{}", run_header(index, total, &test_name).bold());
            println!("{}", rule().dimmed());
        }
        ProgressEvent::UnitCompleted { outcome, .. } => {
            println!("{}", outcome_line(&outcome));
        }
        _ => {}
    })
}

fn run_header(index: usize, total: usize, test_name: &str) -> String {
    format!("[{}/{}] {}", index + 1, total, test_name)
}

fn outcome_line(outcome: &RunOutcome) -> String {
    if outcome.passed() {
        format!("{} {} passed", "✓".green(), outcome.test_name())
    } else {
        format!(
            "{} {} failed ({})",
            "✗".red(),
            outcome.test_name(),
            failure_reason(outcome)
        )
    }
}

fn failure_reason(outcome: &RunOutcome) -> String {
    match (&outcome.error, outcome.exit_code) {
        (Some(error), _) => error.clone(),
        (None, Some(code)) => format!("exit code {code}"),
        (None, None) => "terminated by signal".to_string(),
    }
}

/// Final batch summary with artifact locations.
pub fn print_summary(result: &BatchResult, config: &Config) {
    println!("\n{}", rule().dimmed());
    println!("{}", "Summary".bold());
    print_counts(result);

    if result.total() == 1 {
        let outcome = &result.outcomes()[0];
        print_artifact("HTML report", &outcome.artifacts.html_path, outcome.artifacts_present.html);
        print_artifact("Raw results", &outcome.artifacts.json_path, outcome.artifacts_present.json);
        if let Some(dashboard) = &outcome.artifacts.dashboard_path {
            print_artifact("Dashboard", dashboard, dashboard.is_file());
        }
    } else {
        println!("  Reports:     {}", config.reports_dir.display());
        println!("  Raw results: {}", config.output_dir.display());
    }

    if result.all_passed() {
        println!("\n{}", "All tests passed".green().bold());
    } else {
        println!("\n{}", "Failed runs:".red().bold());
        for outcome in result.failures() {
            println!("  {}", outcome_line(outcome));
        }
    }
}

/// Summary for a batch cut short by a shutdown signal.
pub fn print_interrupted(partial: &BatchResult, planned: usize, config: &Config) {
    println!("\n{}", rule().dimmed());
    println!(
        "{} after {} of {} runs",
        "Interrupted".yellow().bold(),
        partial.total(),
        planned
    );
    if partial.total() > 0 {
        print_counts(partial);
        println!("  Reports:     {}", config.reports_dir.display());
        println!("  Raw results: {}", config.output_dir.display());
    }
}

fn print_counts(result: &BatchResult) {
    println!("  Total:  {}", result.total());
    println!("  Passed: {}", result.passed().to_string().green());
    let failed = result.failed().to_string();
    if result.failed() > 0 {
        println!("  Failed: {}", failed.red());
    } else {
        println!("  Failed: {failed}");
    }
}

fn print_artifact(label: &str, path: &Path, present: bool) {
    if present {
        println!("  {label}: {}", path.display());
    } else {
        println!(
            "  {label}: {} {}",
            path.display(),
            "(missing)".yellow()
        );
    }
}

/// Shown when the default scan found no scripts.
pub fn print_nothing_to_do(scanned: &Path) {
    println!(
        "{} No test scripts found in {}. Set TEST_FILE or TEST_FOLDER, or pass a subcommand.\n",
        "Nothing to run:".yellow(),
        scanned.display()
    );
}

pub fn print_dashboard_url(port: u16) {
    println!(
        "{} http://localhost:{port}",
        "Web dashboard:".cyan().bold()
    );
}

pub fn print_hook_status(script: &Path, has_hook: bool) {
    let status = if has_hook {
        "declares its own summary hook; it will run unchanged"
    } else {
        "has no summary hook; an HTML report hook will be added"
    };
    println!("{} {}", script.display(), status.dimmed());
}

pub fn print_validation_passed(script: &Path) {
    println!("{} {} is valid", "✓".green(), script.display());
}

pub fn print_validation_failed(script: &Path, code: Option<i32>) {
    let reason = code.map_or_else(|| "terminated by signal".to_string(), |c| format!("exit code {c}"));
    println!("{} {} failed inspection ({reason})", "✗".red(), script.display());
}

pub fn print_report_lookup(name: &ArtifactName, results: &Path, html: &Path, found: bool) {
    println!("{} {}", "Test:".bold(), name.test_name);
    if let Some(time) = name.local_time() {
        println!("{} {}", "Run at:".bold(), time.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("{} {}", "Raw results:".bold(), results.display());
    if found {
        println!("{} {}", "HTML report:".bold(), html.display());
    } else {
        println!(
            "{} {} {}",
            "HTML report:".bold(),
            html.display(),
            "(not found)".yellow()
        );
    }
}

pub fn print_sweep(policy: &RetentionPolicy, report: &SweepReport) {
    println!(
        "{} {} (older than {} days)",
        "Cleaning".cyan().bold(),
        policy.directory.display(),
        policy.max_age_days
    );
    for removed in &report.removed {
        println!(
            "  {} {} ({}, {} days old)",
            "removed".dimmed(),
            removed.path.display(),
            format_bytes(removed.size),
            removed.age_days
        );
    }
    for failure in &report.failures {
        println!(
            "  {} {}: {}",
            "failed".red(),
            failure.path.display(),
            failure.error
        );
    }
    println!(
        "  {} of {} files removed, {} freed",
        report.removed.len(),
        report.scanned,
        format_bytes(report.bytes_removed)
    );
}

pub fn print_scan_failure(dir: &Path, error: &std::io::Error) {
    println!(
        "{} {}: {error}",
        "Cannot scan".red().bold(),
        dir.display()
    );
}

pub fn print_stats(stats: &RetentionStats) {
    println!("{} {}", "Artifacts in".cyan().bold(), stats.directory.display());
    for bucket in &stats.buckets {
        println!(
            "  {:<10} {:>5} files  {:>10}",
            bucket.bucket.to_string(),
            bucket.files,
            format_bytes(bucket.bytes)
        );
    }
    println!(
        "  {:<10} {:>5} files  {:>10}",
        "total",
        stats.total_files(),
        format_bytes(stats.total_bytes())
    );
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
