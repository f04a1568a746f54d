//! CLI for opensensor: an edge environmental sensor station.

mod commands;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use opensensor_core::config::DEFAULT_CONFIG_FILE;

#[derive(Parser)]
#[command(name = "opensensor")]
#[command(about = "opensensor: clock-aligned environmental sensor batches, written as Parquet")]
#[command(version = opensensor_core::VERSION)]
struct Cli {
    /// JSON config file (default: ./opensensor.json if present)
    #[arg(long, global = true, env = "OPENSENSOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect readings until Ctrl+C, writing one file per batch window
    Run,

    /// Take a few readings right away (no warm-up) and print them as JSON
    Test {
        /// Number of readings to take
        #[arg(long, short = 'n', default_value = "3")]
        count: u32,
    },

    /// List sensor channels and whether each one is available
    Scan,

    /// Show configuration, file counts and a health snapshot of this station
    Info,

    /// Upload every batch file in the output directory once, then exit
    Sync,

    /// Write a config file with a freshly generated station id
    Init {
        /// Replace the station id of an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show row count, time range and field coverage of a batch file
    Inspect {
        /// Path to a .parquet batch file
        path: PathBuf,

        /// Also print every row as JSON
        #[arg(long)]
        rows: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Run => commands::run::run(&commands::setup(config)),
        Commands::Test { count } => commands::test::run(&commands::setup(config), count),
        Commands::Scan => commands::scan::run(&commands::setup(config)),
        Commands::Info => commands::info::run(&commands::setup(config)),
        Commands::Sync => commands::sync::run(&commands::setup(config)),
        Commands::Init { force } => {
            commands::init_logging("info");
            commands::init::run(config.unwrap_or(Path::new(DEFAULT_CONFIG_FILE)), force);
        }
        Commands::Inspect { path, rows } => {
            commands::init_logging("info");
            commands::inspect::run(&path, rows);
        }
    }
}
