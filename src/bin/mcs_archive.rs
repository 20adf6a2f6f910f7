use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use mcs_archive::check::{check_year, summarize_year};
use mcs_archive::config::{ConfigLoader, ResolvedConfig};
use mcs_archive::error::ArchiveError;
use mcs_archive::import::{ImportReport, Importer, MissingReport};
use mcs_archive::output::{JsonOutput, LogSink};
use mcs_archive::parse::TabParser;
use mcs_archive::store::Archive;

#[derive(Parser)]
#[command(name = "mcs-archive")]
#[command(about = "Per-year columnar archive of Mars Climate Sounder DDR retrievals")]
#[command(version, author)]
struct Cli {
    /// JSON config file (default: ~/.mcs-archive.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print machine-readable JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Import local raw products that are not yet archived")]
    Import(YearArgs),
    #[command(about = "Restore key order for a year")]
    Sort(YearArgs),
    #[command(about = "Verify a year's invariants")]
    Check(YearArgs),
    #[command(about = "List local raw products that are not yet archived")]
    Missing(YearArgs),
    #[command(about = "Show what is stored for a year")]
    Show(YearArgs),
}

#[derive(Args)]
struct YearArgs {
    #[arg(long)]
    year: i32,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ArchiveError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ArchiveError) -> u8 {
    match error {
        ArchiveError::NotFound { .. } => 2,
        error if error.is_invariant_violation() => 4,
        ArchiveError::Locked { .. } => 5,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let archive = Archive::from_config(&config);

    match cli.command {
        Commands::Import(args) => run_import(&config, args.year, cli.json),
        Commands::Sort(args) => {
            let importer = importer(&config);
            let report = importer.sort_year(args.year)?;
            if cli.json {
                JsonOutput::print_sort(&report).into_diagnostic()?;
            } else {
                println!(
                    "{}: profiles reordered: {}, rows reordered: {}",
                    report.year, report.profiles_reordered, report.rows_reordered
                );
            }
            Ok(())
        }
        Commands::Check(args) => {
            let report = check_year(&archive, args.year)?;
            if cli.json {
                JsonOutput::print_check(&report).into_diagnostic()?;
            } else {
                println!(
                    "{}: ok ({} profiles, {} rows)",
                    report.year, report.profile_count, report.row_count
                );
            }
            Ok(())
        }
        Commands::Missing(args) => {
            let importer = importer(&config);
            let missing = importer.missing_products(args.year)?;
            let report = MissingReport::new(args.year, &missing);
            if cli.json {
                JsonOutput::print_missing(&report).into_diagnostic()?;
            } else {
                for product in &report.products {
                    println!("{product}");
                }
            }
            Ok(())
        }
        Commands::Show(args) => {
            let summary = summarize_year(&archive, args.year)?;
            if cli.json {
                JsonOutput::print_show(&summary).into_diagnostic()?;
            } else {
                println!("year: {}", summary.year);
                println!("profiles: {}", summary.profile_count);
                if let (Some(first), Some(last)) = (&summary.first_profile, &summary.last_profile) {
                    println!("range: {first} .. {last}");
                }
                println!("metadata columns: {}", summary.metadata_columns.len());
                println!("profile variables: {}", summary.profile_variables.join(", "));
            }
            Ok(())
        }
    }
}

fn importer(config: &ResolvedConfig) -> Importer<TabParser> {
    Importer::from_config(config, TabParser::default())
}

fn run_import(config: &ResolvedConfig, year: i32, json: bool) -> miette::Result<()> {
    let importer = importer(config);
    importer.archive().ensure_root()?;
    let report = importer.import_year(year, &LogSink)?;
    if json {
        JsonOutput::print_import(&report).into_diagnostic()?;
    } else {
        print_import_summary(&report);
    }
    Ok(())
}

fn print_import_summary(report: &ImportReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!("{cyan}MCS archive import {}{reset}", report.year);
    println!(
        "{green}products: {} found, {} imported in {} batches{reset}",
        report.products_found, report.products_imported, report.batches
    );
    if report.skipped_batches > 0 {
        println!(
            "{yellow}skipped batches without usable retrievals: {}{reset}",
            report.skipped_batches
        );
    }
    println!(
        "{green}added {} profiles, {} level rows{reset}",
        report.profiles_added, report.rows_added
    );
    println!(
        "{cyan}year now holds {} profiles, {} level rows{reset}",
        report.check.profile_count, report.check.row_count
    );
}
