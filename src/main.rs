use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use entry_patcher::{
    ApplyOptions, Confirmation, Gate, PatchApplier, PatchError, PatchMode, PatchReport,
    RewriteState, RewriteStatus, RunOutcome, StatusReport, TargetStatus,
};
use similar::{ChangeTag, TextDiff};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Environment variable consulted when `--mode` is not given.
const MODE_ENV: &str = "ENTRY_PATCHER_MODE";

const EXIT_CANCELLED: u8 = 2;
const EXIT_INCONSISTENT: u8 = 3;

#[derive(Parser)]
#[command(name = "entry-patcher")]
#[command(about = "Instrument async function entry points in bundled JavaScript", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level for diagnostics on stderr (RUST_LOG overrides)
    #[arg(long, value_enum, global = true, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Patch a script file
    Apply {
        /// Script to patch (`~/` is expanded)
        file: PathBuf,

        /// Patch mode (falls back to $ENTRY_PATCHER_MODE, then `random`)
        #[arg(short, long)]
        mode: Option<String>,

        /// Write the patched text here instead of patching in place
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Answer yes to every confirmation
        #[arg(short, long)]
        yes: bool,

        /// Dry run - show what would be changed without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report whether a script is patched, without changing it
    Status {
        file: PathBuf,

        /// Print the status report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Put the backed-up original back in place
    Restore {
        file: PathBuf,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// List available patch modes
    Modes,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    let result = match cli.command {
        Commands::Apply {
            file,
            mode,
            output,
            yes,
            dry_run,
            diff,
            json,
        } => cmd_apply(file, mode, output, yes, dry_run, diff, json),

        Commands::Status { file, json } => cmd_status(file, json),

        Commands::Restore { file, yes } => cmd_restore(file, yes),

        Commands::Modes => cmd_modes(),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Resolve the patch mode
///
/// Priority order:
/// 1. Explicit --mode flag
/// 2. ENTRY_PATCHER_MODE environment variable
/// 3. Default (`random`)
fn resolve_mode(flag: Option<&str>, env_value: Option<&str>) -> Result<PatchMode> {
    if let Some(name) = flag {
        return Ok(name.parse()?);
    }

    if let Some(name) = env_value.filter(|v| !v.trim().is_empty()) {
        return name
            .parse()
            .with_context(|| format!("{MODE_ENV} is set to an invalid mode"));
    }

    Ok(PatchMode::default())
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: PathBuf) -> PathBuf {
    let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) else {
        return path;
    };
    match home::home_dir() {
        Some(home) => home.join(rest),
        None => path,
    }
}

fn prompt_yes_no(question: &str) -> bool {
    eprint!("{} [y/N] ", question);
    let _ = io::stderr().flush();

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
    }
}

/// Interactive confirmation on stdin; `--yes` short-circuits it.
struct Prompt {
    assume_yes: bool,
}

impl Confirmation for Prompt {
    fn confirm(&mut self, gate: &Gate) -> bool {
        let question = match gate {
            Gate::AlreadyPatched { markers } => format!(
                "{} File appears to be already patched (found {}). Continue anyway?",
                "⊙".yellow(),
                markers.join(", ")
            ),
            Gate::BackupExists { path } => format!(
                "{} Backup file {} already exists. Overwrite it?",
                "⊙".yellow(),
                path.display()
            ),
        };

        if self.assume_yes {
            eprintln!("{question} {}", "yes (--yes)".dimmed());
            return true;
        }
        prompt_yes_no(&question)
    }
}

/// Helper: Show the changed hunks between original and patched content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for group in diff.grouped_ops(1) {
        for op in group {
            for change in diff.iter_changes(&op) {
                let line = match change.tag() {
                    ChangeTag::Delete => format!("-{}", change).red(),
                    ChangeTag::Insert => format!("+{}", change).green(),
                    ChangeTag::Equal => format!(" {}", change).normal(),
                };
                print!("{}", line);
                if change.missing_newline() {
                    println!();
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_apply(
    file: PathBuf,
    mode: Option<String>,
    output: Option<PathBuf>,
    yes: bool,
    dry_run: bool,
    show_diff: bool,
    json: bool,
) -> Result<ExitCode> {
    // 1. Resolve inputs
    let env_mode = env::var(MODE_ENV).ok();
    let mode = resolve_mode(mode.as_deref(), env_mode.as_deref())?;
    let file = expand_home(file);
    let output = output.map(expand_home);

    if !json {
        println!("Input: {}", file.display());
        println!("Mode: {} - {}", mode.to_string().bold(), mode.description());
        if dry_run {
            println!("{}", "[DRY RUN - nothing will be written]".cyan());
        }
        println!();
    }

    // 2. Run
    let applier = PatchApplier::default();
    let options = ApplyOptions {
        mode,
        output,
        dry_run,
    };
    let mut prompt = Prompt { assume_yes: yes };

    match applier.run(&file, &options, &mut prompt) {
        Ok(RunOutcome::Completed(report)) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if show_diff {
                let shown = report.output.as_deref().unwrap_or(report.input.as_path());
                display_diff(shown, &report.original, &report.patched);
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunOutcome::Cancelled { gate }) => {
            if json {
                println!("{}", serde_json::json!({ "cancelled": gate }));
            } else {
                println!("{}", "Operation cancelled - no files were changed".yellow());
            }
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
        Err(e) => Ok(report_failure(&e)),
    }
}

fn print_report(report: &PatchReport) {
    for target in &report.targets {
        match target.status {
            TargetStatus::Patched { offset, .. } => println!(
                "{} {}: Patched at offset {}",
                "✓".green(),
                target.function,
                offset
            ),
            TargetStatus::Skipped => {
                println!("{} {}: Not found, skipped", "⊘".cyan(), target.function)
            }
        }
    }

    for rewrite in &report.rewrites {
        match rewrite.status {
            RewriteStatus::Applied { replacements } => println!(
                "{} {}: {} replacement(s) ({})",
                "✓".green(),
                rewrite.rule,
                replacements,
                rewrite.description.dimmed()
            ),
            RewriteStatus::AlreadyApplied => {
                println!("{} {}: Already applied", "⊙".yellow(), rewrite.rule)
            }
            RewriteStatus::NotFound => {
                println!("{} {}: Pattern not found", "⊘".cyan(), rewrite.rule)
            }
        }
    }

    println!();
    if let Some(backup) = &report.backup {
        println!("Backup: {}", backup.display());
    }
    match &report.output {
        Some(output) => println!("Output: {}", output.display()),
        None => println!("Output: {}", "(dry run, not written)".dimmed()),
    }
    println!("Run: {}", report.run_id.dimmed());
    println!();

    println!("{}", "Summary:".bold());
    println!(
        "  {} of {} functions patched",
        format!("{}", report.patched_functions()).green(),
        report.targets.len()
    );
    println!(
        "  {} -> {} bytes",
        report.bytes_before,
        format!("{}", report.bytes_after).green()
    );
    println!(
        "  {} warnings",
        format!("{}", report.warnings.len()).yellow()
    );
}

fn report_failure(e: &PatchError) -> ExitCode {
    eprintln!("{} {}", "✗".red(), e);

    match e {
        PatchError::Locate(_) => {
            eprintln!("  {}", "No file was modified".dimmed());
            eprintln!("  Possible causes:");
            eprintln!("    - The script was already rebuilt with a different signature");
            eprintln!("    - The function was renamed or removed in this release");
        }
        PatchError::CommitRestored { .. } => {
            eprintln!("  {}", "The original content is back in place".dimmed());
        }
        PatchError::CommitUnrestored { path, backup, .. } => {
            eprintln!(
                "  {}",
                "INCONSISTENT STATE: the target may hold partially written content"
                    .red()
                    .bold()
            );
            eprintln!("  Target: {}", path.display());
            eprintln!("  Recover manually by copying {} over it", backup.display());
        }
        _ => {}
    }

    if e.is_inconsistent() {
        ExitCode::from(EXIT_INCONSISTENT)
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_status(file: PathBuf, json: bool) -> Result<ExitCode> {
    let file = expand_home(file);
    let status = PatchApplier::default().inspect(&file)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(&status);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_status(status: &StatusReport) {
    println!("{}", "Patch Status Report".bold());
    println!("File: {}", status.input.display());
    println!();

    if status.is_patched() {
        println!("{} {}", "✓".green(), "PATCHED".green().bold());
        for marker in &status.markers {
            println!("  - marker {}", marker.dimmed());
        }
        for id in &status.run_ids {
            println!("  - run {}", id.dimmed());
        }
    } else {
        println!("{} {}", "⊙".yellow(), "NOT PATCHED".yellow().bold());
    }
    println!();

    for target in &status.targets {
        let kind = if target.required { "required" } else { "optional" };
        match target.offset {
            Some(offset) => println!(
                "{} {} ({}): entry at offset {}",
                "✓".green(),
                target.function,
                kind,
                offset
            ),
            None => println!("{} {} ({}): not found", "⊘".cyan(), target.function, kind),
        }
    }

    for rewrite in &status.rewrites {
        let label = match rewrite.state {
            RewriteState::Applied => "applied".green(),
            RewriteState::Pending => "pending".yellow(),
            RewriteState::Absent => "not present".cyan(),
        };
        println!(
            "  rewrite {}: {} ({})",
            rewrite.rule,
            label,
            rewrite.description.dimmed()
        );
    }
    println!();

    if status.backup_exists {
        println!("Backup: {}", status.backup.display());
    } else {
        println!("Backup: {}", "none".dimmed());
    }
}

fn cmd_restore(file: PathBuf, yes: bool) -> Result<ExitCode> {
    let file = expand_home(file);
    let applier = PatchApplier::default();
    // works even when the patched file itself is gone
    let (target, backup) = applier.restore_paths(&file)?;

    let question = format!("Restore {} from {}?", target.display(), backup.display());
    if !yes && !prompt_yes_no(&question) {
        println!("{}", "Operation cancelled - no files were changed".yellow());
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }

    applier.restore(&file)?;
    println!(
        "{} Restored {} from {}",
        "✓".green(),
        target.display(),
        backup.display()
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_modes() -> Result<ExitCode> {
    println!("{}", "Available modes:".bold());
    for mode in PatchMode::ALL {
        let name = if mode == PatchMode::default() {
            format!("{:<8}", mode.as_str()).green().bold()
        } else {
            format!("{:<8}", mode.as_str()).bold()
        };
        println!("  {} {}", name, mode.description());
    }
    println!();
    println!(
        "{}",
        format!("Default: {} (override with --mode or {MODE_ENV})", PatchMode::default()).dimmed()
    );
    Ok(ExitCode::SUCCESS)
}
