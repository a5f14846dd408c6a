use clap::{Parser, Subcommand};
use std::path::PathBuf;

use commands::GlobalArgs;

mod commands;
mod output;

use commands::{deploy, prune, releases, rollback, run, setup, tasks, unlock};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "shipwright")]
#[command(version = VERSION)]
#[command(about = "Release-directory deploys over SSH with atomic activation")]
struct Cli {
    /// Project configuration file (default: ./shipwright.json or ./shipwright.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and activate a new release
    Deploy(deploy::DeployArgs),
    /// Create the deploy root and shared directories
    Setup(setup::SetupArgs),
    /// Re-activate the previous release
    Rollback(rollback::RollbackArgs),
    /// Remove old releases
    Prune(prune::PruneArgs),
    /// List releases and their status
    Releases(releases::ReleasesArgs),
    /// Run a task against the live release
    Run(run::RunArgs),
    /// List configured tasks
    Tasks(tasks::TasksArgs),
    /// Remove a stale deploy lock
    Unlock(unlock::UnlockArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let global = GlobalArgs { config: cli.config };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if let Err(e) = output::print_json_result(json_result) {
        eprintln!("{}", e);
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
