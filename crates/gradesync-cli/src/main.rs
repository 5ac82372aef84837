use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use gradesync_core::{SyncConfig, WipeScope};
use gradesync_engine::{RunOptions, RunSummary, SyncPipeline};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "gradesync")]
#[command(about = "GradeSync - mirror LMS student progress into a spreadsheet store", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ./gradesync.toml when present)
    #[arg(short, long, global = true, env = "GRADESYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Output format for results
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Debug logging for gradesync crates
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    All,
    Students,
}

impl From<ScopeArg> for WipeScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::All => WipeScope::All,
            ScopeArg::Students => WipeScope::Students,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the given students and rewrite both target tables
    Run {
        /// Student ids (comma-separated); prompted for when omitted
        #[arg(short, long, value_delimiter = ',')]
        students: Vec<String>,

        /// Crawl and validate only; nothing is deleted or written
        #[arg(long)]
        dry_run: bool,

        /// Coerce unknown single-select values instead of aborting
        #[arg(long)]
        allow_select_fallback: bool,

        /// Which existing records to delete before writing
        #[arg(long, value_enum)]
        scope: Option<ScopeArg>,
    },

    /// Check that both target tables are readable
    Check,

    /// Show select options and writable fields of the target tables
    Schema,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(1)
        }
    }
}

async fn execute(cli: &Cli) -> Result<ExitCode> {
    let mut config = SyncConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config, cli.verbose);
    info!("Configuration: {}", config_source(cli.config.as_deref()));

    match &cli.command {
        Commands::Run {
            students,
            dry_run,
            allow_select_fallback,
            scope,
        } => {
            if *allow_select_fallback {
                config.schema.allow_select_fallback = true;
            }
            if let Some(scope) = scope {
                config.wipe.scope = (*scope).into();
            }
            config.validate().context("Invalid configuration")?;

            let ids = if students.is_empty() {
                prompt_student_ids()?
            } else {
                parse_student_ids(&students.join(","))
            };
            if ids.is_empty() {
                anyhow::bail!("no student ids given");
            }

            let pipeline = SyncPipeline::from_config(config).context("Failed to build clients")?;
            let summary = pipeline
                .run(&ids, RunOptions { dry_run: *dry_run })
                .await
                .context("Sync run failed")?;
            print_summary(cli.output, &summary)?;

            let partial = !summary.failed_students.is_empty() || summary.wipe_survivors() > 0;
            Ok(if partial {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            })
        }

        Commands::Check => {
            config.validate().context("Invalid configuration")?;
            let pipeline = SyncPipeline::from_config(config).context("Failed to build clients")?;
            pipeline.preflight().await.context("Store preflight failed")?;
            println!("{} both target tables are readable", "OK".green().bold());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Schema => {
            config.validate().context("Invalid configuration")?;
            let pipeline = SyncPipeline::from_config(config).context("Failed to build clients")?;
            print_schema(cli.output, &pipeline).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(config: &SyncConfig, verbose: bool) {
    let debug_env = std::env::var("DEBUG").map(|v| v == "1").unwrap_or(false);
    let level = if verbose || debug_env {
        "debug"
    } else {
        config.logging.level.as_str()
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("gradesync={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Where the configuration was read from, for the start-up log.
fn config_source(path: Option<&Path>) -> String {
    match path {
        Some(path) => format!("file {}", path.display()),
        None => "./gradesync.toml if present, then the environment".to_string(),
    }
}

/// Split a comma-separated list, dropping blanks and repeats.
fn parse_student_ids(input: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in input.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

fn prompt_student_ids() -> Result<Vec<String>> {
    print!("Enter student IDs (comma-separated): ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read student ids from stdin")?;
    Ok(parse_student_ids(&line))
}

fn print_summary(format: OutputFormat, summary: &RunSummary) -> Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    let title = if summary.dry_run {
        "Dry run complete"
    } else {
        "Sync complete"
    };
    println!("\n{} {}", title.cyan().bold(), summary.run_id.to_string().dimmed());
    println!(
        "{}: {}/{}",
        "Students synced".cyan().bold(),
        summary.students_synced.len().to_string().yellow(),
        summary.students_requested
    );
    println!(
        "{}: {} processed, {} skipped, {} courses excluded",
        "Assignments".cyan().bold(),
        summary.assignments_processed.to_string().yellow(),
        summary.assignments_skipped,
        summary.courses_excluded
    );
    println!(
        "{}: {} detail, {} summary",
        "Rows built".cyan().bold(),
        summary.detail_rows.to_string().yellow(),
        summary.summary_rows.to_string().yellow()
    );
    if summary.coerced_values > 0 {
        println!(
            "{}: {}",
            "Select values coerced".cyan().bold(),
            summary.coerced_values.to_string().yellow()
        );
    }
    if !summary.dropped_fields.is_empty() {
        println!(
            "{}: {}",
            "Fields not written".cyan().bold(),
            summary.dropped_fields.join(", ")
        );
    }

    for wipe in &summary.wipes {
        let status = if wipe.converged() {
            "clean".green()
        } else {
            format!("{} left", wipe.survivors.len()).red()
        };
        println!(
            "{} {}: {} deleted in {} passes ({})",
            "Wipe".cyan().bold(),
            wipe.table,
            wipe.deleted,
            wipe.passes,
            status
        );
    }
    if !summary.dry_run {
        println!(
            "{}: {}",
            "Rows written".cyan().bold(),
            summary.rows_written.to_string().green()
        );
    }

    for failed in &summary.failed_students {
        println!(
            "{} {}: {}",
            "Failed student".red().bold(),
            failed.student_id,
            failed.reason
        );
    }
    println!("{}: {:.1}s", "Duration".cyan().bold(), summary.duration_secs());
    Ok(())
}

async fn print_schema(format: OutputFormat, pipeline: &SyncPipeline) -> Result<()> {
    let tables = pipeline
        .describe_tables()
        .await
        .context("Failed to read the base schema")?;

    if let OutputFormat::Json = format {
        let value: Vec<serde_json::Value> = tables
            .iter()
            .map(|(table, schema)| {
                serde_json::json!({
                    "table": table.to_string(),
                    "schema": schema,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for (table, schema) in &tables {
        let Some(schema) = schema else {
            println!("{} {} not found in the base", "Missing".red().bold(), table);
            continue;
        };
        println!("\n{} {} {}", "Table".cyan().bold(), schema.name.green(), table);

        let mut writable: Vec<String> = schema.writable_fields().into_iter().collect();
        writable.sort();
        println!("  {}: {}", "writable".cyan(), writable.join(", "));
        for (field, options) in schema.select_options() {
            println!("  {} '{}': {:?}", "select".cyan(), field, options);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn student_ids_are_trimmed_and_deduplicated() {
        assert_eq!(
            parse_student_ids(" 42, 7 ,,42,\n"),
            vec!["42".to_string(), "7".to_string()]
        );
        assert!(parse_student_ids(" , ").is_empty());
    }

    #[test]
    fn config_source_names_the_given_file() {
        assert_eq!(
            config_source(Some(Path::new("/etc/gradesync.toml"))),
            "file /etc/gradesync.toml"
        );
        assert!(config_source(None).contains("environment"));
    }

    #[test]
    fn run_accepts_comma_separated_students() {
        let cli = Cli::try_parse_from([
            "gradesync",
            "run",
            "--students",
            "1,2",
            "--dry-run",
            "--scope",
            "students",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                students,
                dry_run,
                scope,
                ..
            } => {
                assert_eq!(students, vec!["1", "2"]);
                assert!(dry_run);
                assert!(matches!(scope, Some(ScopeArg::Students)));
            }
            _ => panic!("expected run"),
        }
    }
}
