//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Parallel test execution coordinator
#[derive(Parser, Debug)]
#[command(name = "testpool")]
#[command(author = "hephaex@gmail.com")]
#[command(version = "0.1.0")]
#[command(about = "Distribute test files across a pool of workers")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the test files listed in a manifest
    Run(RunArgs),

    /// List supported runner kinds
    List(ListArgs),

    /// View stored run results
    Results(ResultsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Manifest of test files (json, yaml, or `runner path` lines)
    pub manifest: String,

    /// Runner program invoked per test file
    #[arg(short, long)]
    pub command: String,

    /// Extra argument for the runner program (repeatable)
    #[arg(long = "runner-arg")]
    pub runner_args: Vec<String>,

    /// Number of workers in the pool
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Assignments per batch dispatch
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Dispatch every file as a single test message
    #[arg(long)]
    pub no_batch: bool,

    /// Output format (table, json, json-pretty, csv, summary); defaults to
    /// the configured format
    #[arg(short, long)]
    pub format: Option<String>,

    /// Write the formatted report to a file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Persist the run to results storage
    #[arg(long)]
    pub save: bool,

    /// Configuration file
    #[arg(long)]
    pub config: Option<String>,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show detailed runner information
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    /// Show a specific run by ID
    #[arg(short, long)]
    pub id: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Export per-file outcomes to a CSV file
    #[arg(short, long)]
    pub export: Option<String>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "./testpool.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Configuration file to show (defaults built in when omitted)
        #[arg(short, long)]
        file: Option<String>,

        /// Output format (yaml, json)
        #[arg(long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file to check
        file: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["testpool", "list", "--detailed"]);
        match args.command {
            Command::List(list_args) => {
                assert!(list_args.detailed);
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "testpool",
            "run",
            "tests.manifest",
            "--command",
            "cargo-test-runner",
            "--workers",
            "8",
            "--no-batch",
        ]);
        match args.command {
            Command::Run(run_args) => {
                assert_eq!(run_args.manifest, "tests.manifest");
                assert_eq!(run_args.command, "cargo-test-runner");
                assert_eq!(run_args.workers, Some(8));
                assert!(run_args.no_batch);
                assert!(!run_args.save);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_config_init_args() {
        let args = Args::parse_from(["testpool", "config", "init", "--force"]);
        match args.command {
            Command::Config(config_args) => match config_args.action {
                ConfigAction::Init { output, force } => {
                    assert_eq!(output, "./testpool.yaml");
                    assert!(force);
                }
                _ => panic!("Expected Init action"),
            },
            _ => panic!("Expected Config command"),
        }
    }
}
