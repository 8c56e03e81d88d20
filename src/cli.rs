//! Command-line front ends shared by the binaries.
//!
//! - `stockroom-migrate`: run the whole plan, or `status`
//! - `run-migration <MIGRATION_FILE>`: run one unit
//!
//! Both go through [`Migrator`]; the single-unit binary just hands it a
//! one-element list.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::*;

use crate::config::{DEFAULT_TRACKING_TABLE, DbConfig, TableName};
use crate::migrator::{
    ErrorPolicy, Migrator, Outcome, RunObserver, RunOptions, RunSummary, Silent, UnitReport,
};
use crate::plan::{MigrationUnit, Plan, PlanOrigin};
use crate::status::{StatusReport, collect_status};
use crate::store::PgTrackingStore;

/// Options shared by both binaries.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Directory holding the migration SQL files.
    #[arg(long, env = "MIGRATIONS_DIR", default_value = "migrations", global = true)]
    pub migrations_dir: PathBuf,

    /// TOML manifest listing migrations in application order.
    #[arg(long, global = true)]
    pub manifest: Option<PathBuf>,

    /// Name of the tracking table.
    #[arg(long, default_value = DEFAULT_TRACKING_TABLE, global = true)]
    pub table: String,

    /// Per-statement timeout in seconds.
    #[arg(long, env = "DB_STATEMENT_TIMEOUT", default_value_t = 60, global = true)]
    pub statement_timeout: u64,

    /// Stop at the first migration that fails.
    #[arg(long, global = true)]
    pub fail_fast: bool,

    /// Print a JSON summary instead of the progress trace.
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl CommonArgs {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            policy: if self.fail_fast {
                ErrorPolicy::FailFast
            } else {
                ErrorPolicy::Continue
            },
            ..RunOptions::default()
        }
    }
}

/// Apply the schema migrations of the Stockroom backend, in order.
#[derive(Parser, Debug)]
#[command(name = "stockroom-migrate", version, about)]
pub struct MigrateCli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Option<MigrateCommand>,
}

#[derive(Subcommand, Debug)]
pub enum MigrateCommand {
    /// Show applied and pending migrations.
    Status,
}

/// Apply exactly one migration.
#[derive(Parser, Debug)]
#[command(name = "run-migration", version, about)]
pub struct RunOneCli {
    /// Migration identifier, file name, or path to a SQL file.
    #[arg(value_name = "MIGRATION_FILE")]
    pub migration: String,

    #[command(flatten)]
    pub common: CommonArgs,
}

/// Parse arguments; usage errors exit with status 1, help/version with 0.
pub fn parse_args<P: Parser>() -> P {
    P::try_parse().unwrap_or_else(|e| {
        let code = if e.use_stderr() { 1 } else { 0 };
        let _ = e.print();
        std::process::exit(code);
    })
}

/// Map a front-end result to the process exit status.
pub fn exit_with(result: Result<ExitCode>) -> ExitCode {
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Entry point of `stockroom-migrate`.
pub async fn migrate(cli: MigrateCli, db: DbConfig) -> Result<ExitCode> {
    let plan = Plan::discover(&cli.common.migrations_dir, cli.common.manifest.as_deref())?;
    match cli.command {
        None => {
            let units = plan.units().to_vec();
            run_units(&cli.common, db, &plan, &units).await
        }
        Some(MigrateCommand::Status) => status(&cli.common, db, &plan).await,
    }
}

/// Entry point of `run-migration`.
pub async fn run_one(cli: RunOneCli, db: DbConfig) -> Result<ExitCode> {
    let plan = Plan::discover(&cli.common.migrations_dir, cli.common.manifest.as_deref())?;
    let unit = plan.resolve(&cli.migration);
    run_units(&cli.common, db, &plan, std::slice::from_ref(&unit)).await
}

async fn connect(common: &CommonArgs, db: DbConfig) -> Result<PgTrackingStore> {
    let table = TableName::new(&common.table)?;
    let db = db.with_statement_timeout(Duration::from_secs(common.statement_timeout));
    let target = db.target();
    let store = PgTrackingStore::connect(&db, table)
        .await
        .with_context(|| format!("failed to connect to {target}"))?;
    Ok(store)
}

async fn run_units(
    common: &CommonArgs,
    db: DbConfig,
    plan: &Plan,
    units: &[MigrationUnit],
) -> Result<ExitCode> {
    // Validate everything local before touching the network.
    TableName::new(&common.table)?;

    if !common.json {
        println!("{} {}", "Migrating:".cyan().bold(), db.target().yellow());
        println!("  Plan: {}", describe_origin(plan));
        println!("  Migrations: {}", units.len());
        println!();
    }

    let store = connect(common, db).await?;
    let migrator = Migrator::new(store, common.run_options());

    let result = if common.json {
        migrator.run_observed(units, &mut Silent).await
    } else {
        migrator.run_observed(units, &mut ConsoleObserver).await
    };
    migrator.store().close().await;
    let summary = result?;

    if common.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary, migrator.store().table());
    }

    Ok(ExitCode::from(summary.exit_code()))
}

async fn status(common: &CommonArgs, db: DbConfig, plan: &Plan) -> Result<ExitCode> {
    TableName::new(&common.table)?;
    let target = db.target();
    let store = connect(common, db).await?;
    let result = collect_status(&store, plan.units()).await;
    store.close().await;
    let report = result?;

    if common.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_status(&report, &target, plan);
    }
    Ok(ExitCode::SUCCESS)
}

fn describe_origin(plan: &Plan) -> String {
    match &plan.origin {
        PlanOrigin::Manifest(path) => path.display().to_string(),
        PlanOrigin::Builtin => format!("built-in ({})", plan.directory.display()),
    }
}

/// Prints one progress line per unit.
struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn unit_started(&mut self, index: usize, total: usize, unit: &MigrationUnit) {
        print!(
            "  {} {}... ",
            format!("[{}/{}]", index + 1, total).cyan(),
            unit.identifier
        );
        let _ = std::io::stdout().flush();
    }

    fn unit_finished(&mut self, _index: usize, _total: usize, report: &UnitReport) {
        match report.outcome {
            Outcome::Applied => println!("{}", "✓ applied".green()),
            Outcome::Recovered => println!(
                "{}",
                "✓ marked executed (objects already existed)".yellow()
            ),
            Outcome::SkippedMissing => println!(
                "{} {}",
                "○ skipped: file not found".dimmed(),
                report.source.display().to_string().dimmed()
            ),
            Outcome::SkippedApplied => println!("{}", "○ skipped: already executed".dimmed()),
            Outcome::Errored => {
                println!("{}", "✗ failed".red().bold());
                if let Some(err) = &report.error {
                    println!("      {}", err.to_string().red());
                }
            }
        }
    }
}

fn print_summary(summary: &RunSummary, table: &TableName) {
    let t = &summary.tally;
    println!();
    println!(
        "{} {} applied, {} recovered, {} skipped, {} errored",
        "Summary:".cyan().bold(),
        t.applied.to_string().green(),
        t.recovered.to_string().yellow(),
        t.skipped.to_string().dimmed(),
        if t.errored > 0 {
            t.errored.to_string().red().bold()
        } else {
            t.errored.to_string().normal()
        }
    );
    if summary.aborted {
        println!("  {}", "Stopped at the first failure (--fail-fast).".red());
    }

    println!();
    println!(
        "  Tracking table {}: {} record(s)",
        table.as_str().green(),
        summary.applied.len()
    );
    for record in &summary.applied {
        println!(
            "    {} {} {}",
            "•".dimmed(),
            record.name,
            record
                .executed_at
                .format("%Y-%m-%d %H:%M:%S UTC")
                .to_string()
                .dimmed()
        );
    }
    println!("  Tables: {}", summary.tables.join(", "));

    println!();
    if summary.has_errors() {
        println!("{}", "✗ Migration run finished with errors".red().bold());
    } else {
        println!("{}", "✓ Migration run complete".green().bold());
    }
}

fn print_status(report: &StatusReport, target: &str, plan: &Plan) {
    println!("{}", "📋 Migration Status".cyan().bold());
    println!();
    println!("  Database: {}", target.yellow());
    println!("  Plan: {}", describe_origin(plan));
    println!();

    for entry in &report.plan {
        match entry.executed_at {
            Some(at) => println!(
                "  {} {} {}",
                "✓".green(),
                entry.name,
                at.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed()
            ),
            None => println!("  {} {} {}", "○".yellow(), entry.name, "pending".yellow()),
        }
    }

    if !report.unknown.is_empty() {
        println!();
        println!("  {}", "Applied but not in plan:".dimmed());
        for record in &report.unknown {
            println!("  {} {}", "?".dimmed(), record.name.dimmed());
        }
    }

    println!();
    println!(
        "  {} applied, {} pending",
        (report.plan.len() - report.pending()).to_string().green(),
        report.pending().to_string().yellow()
    );
}
