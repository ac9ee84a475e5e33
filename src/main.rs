//! testpool - Parallel test execution coordinator
//!
//! A CLI tool that distributes a manifest of test files across a pool of
//! worker tasks, runs each file through a configurable runner program, and
//! merges every outcome into a single report.
//!
//! ## Features
//!
//! - Bounded worker pool with batch dispatch for message-passing throughput
//! - Exactly-once accounting of every dispatched test file
//! - Crash attribution: a dying runner or worker never loses results
//! - Multiple output formats (Table, JSON, CSV) and persistent run storage
//!
//! ## Usage
//!
//! ```bash
//! # Run a manifest with 8 workers
//! testpool run tests.manifest --command ./run-test --workers 8
//!
//! # Single-file dispatch, save the run
//! testpool run tests.manifest --command ./run-test --no-batch --save
//!
//! # List runner kinds
//! testpool list --detailed
//!
//! # Inspect stored runs
//! testpool results
//! testpool results --id run_20260807_101500123 --export outcomes.csv
//! ```

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

mod cli;
mod config;
mod coordinator;
mod executor;
mod manifest;
mod output;
mod protocol;
mod report;
mod results;
mod utils;
mod worker;

use cli::Args;
use config::AppConfig;
use coordinator::{spawn_pool, Coordinator};
use executor::ProcessExecutor;
use manifest::Manifest;
use output::{write_report_to_file, OutputFormat, ReportFormatter};
use protocol::RunnerKind;
use results::{ResultsStorage, StoredRun};
use utils::{init_logger, LogLevel, Timer};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logger(if args.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    });

    match args.command {
        cli::Command::Run(run_args) => {
            run_tests(run_args).await?;
        }
        cli::Command::List(list_args) => {
            list_runners(list_args);
        }
        cli::Command::Results(results_args) => {
            show_results(results_args)?;
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args)?;
        }
    }

    Ok(())
}

async fn run_tests(args: cli::RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    let mut pool_config = config.coordinator();
    if let Some(workers) = args.workers {
        pool_config.workers = workers.max(1);
    }
    if let Some(batch_size) = args.batch_size {
        pool_config.batch_size = batch_size.max(1);
    }
    if args.no_batch {
        pool_config.batching = false;
    }

    let manifest = Manifest::load(&args.manifest)?;
    info!(
        "loaded {} test files from {}",
        manifest.len(),
        args.manifest
    );

    let mut executor = ProcessExecutor::new(&args.command);
    for arg in &args.runner_args {
        executor = executor.arg(arg);
    }

    let format_name = args.format.as_deref().unwrap_or(&config.default_format);
    let format = OutputFormat::from_str(format_name).unwrap_or(OutputFormat::Table);
    let formatter = ReportFormatter::new(format);

    let started_at = chrono::Utc::now();
    let timer = Timer::start("run");

    let (endpoints, handles) = spawn_pool(Arc::new(executor), pool_config.workers);
    let coordinator = Coordinator::new(pool_config, endpoints);
    let report = coordinator.run(manifest.into_assignments()).await?;

    // Workers have been told to close; wait for the pool to drain
    for handle in handles {
        let _ = handle.await;
    }

    info!("run finished in {}ms wall time", timer.elapsed_ms());
    println!("{}", formatter.format_report(&report));

    if let Some(path) = &args.output {
        write_report_to_file(path, &report, format)?;
        println!("Report written to: {path}");
    }

    if args.save {
        let storage = match &config.results_dir {
            Some(dir) => ResultsStorage::new(dir),
            None => ResultsStorage::default_dir(),
        };
        let batch_size = if pool_config.batching {
            pool_config.batch_size
        } else {
            1
        };
        let run = StoredRun::from_report(
            &report,
            &args.command,
            pool_config.workers,
            batch_size,
            started_at,
        );
        let path = storage.save(&run)?;
        println!("Results saved to: {}", path.display());
    }

    if report.files_failed() > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn list_runners(args: cli::ListArgs) {
    println!("\nSupported runner kinds\n");
    println!("──────────────────────────────────────────────────────────────────────");

    for kind in RunnerKind::all() {
        if args.detailed {
            println!("  {:12} {:14} {}", kind.tag(), kind.name(), kind.description());
        } else {
            println!("  {}", kind.tag());
        }
    }

    println!("──────────────────────────────────────────────────────────────────────\n");
}

fn show_results(args: cli::ResultsArgs) -> Result<()> {
    let storage = ResultsStorage::default_dir();

    // Show a specific run
    if let Some(id) = &args.id {
        let run = storage.load(id)?;

        match args.format.as_str() {
            "json" => {
                println!("{}", serde_json::to_string_pretty(&run)?);
            }
            _ => {
                println!("\n┌─────────────────────────────────────────────────────────────┐");
                println!("│ Run: {:55} │", run.id);
                println!("├─────────────────────────────────────────────────────────────┤");
                println!("│ Command: {:51} │", run.command);
                println!("│ Workers: {:3}  Batch size: {:3}                               │", run.workers, run.batch_size);
                println!("│ Files: {:4}  Pass: {:4}  Fail: {:4}  Rate: {:5.1}%            │", run.total_files, run.files_passed, run.files_failed, run.pass_rate);
                println!("│ Passing sub-tests: {:8}  Duration: {:8}ms            │", run.passing, run.duration_ms);
                println!("└─────────────────────────────────────────────────────────────┘");

                if !run.errors.is_empty() {
                    println!("\nFailures:");
                    for tagged in &run.errors {
                        println!(
                            "  - {} [{}] {}: {}",
                            tagged.file.display(),
                            tagged.runner,
                            tagged.info.name,
                            tagged.info.error
                        );
                    }
                }
            }
        }

        if let Some(export_path) = &args.export {
            storage.export_csv(&run, export_path)?;
            println!("\n✓ Outcomes exported to: {export_path}");
        }

        return Ok(());
    }

    // List all stored runs
    let runs = storage.list()?;

    if runs.is_empty() {
        println!("\n📭 No stored results found.");
        println!("   Run tests with: testpool run <manifest> --command <runner> --save");
        return Ok(());
    }

    println!("\n┌──────────────────────────────────────────────────────────────────────┐");
    println!("│ Stored Runs                                                          │");
    println!("├──────────────────────────────────────────────────────────────────────┤");

    for run in &runs {
        println!(
            "│ {:24} │ {:4} files │ {:5.1}% │ {:19} │",
            run.id,
            run.total_files,
            run.pass_rate,
            run.started_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    println!("└──────────────────────────────────────────────────────────────────────┘");
    println!("\nUse --id <run_id> to view details for a specific run.\n");

    Ok(())
}

fn manage_config(args: cli::ConfigArgs) -> Result<()> {
    use std::path::Path;

    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            let config = AppConfig::default();
            config.save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { file, format } => {
            let config = match file {
                Some(path) => AppConfig::load(&path)?,
                None => AppConfig::default(),
            };
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Validate { file } => match AppConfig::load(&file) {
            Ok(_) => {
                println!("✓ Configuration file is valid: {file}");
            }
            Err(e) => {
                println!("✗ Configuration file is invalid: {file}");
                println!("  Error: {e}");
                return Err(e);
            }
        },
    }

    Ok(())
}
