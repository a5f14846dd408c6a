use std::path::PathBuf;

use shipwright::config::{self, ProjectConfig};
use shipwright::{defaults, environment, log_status, Deployer};

pub type CmdResult<T> = shipwright::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    /// Explicit project configuration path (`--config`).
    pub config: Option<PathBuf>,
}

pub mod deploy;
pub mod prune;
pub mod releases;
pub mod rollback;
pub mod run;
pub mod setup;
pub mod tasks;
pub mod unlock;

// ============================================================================
// Project loading (CLI layer)
// ============================================================================

/// Load the project configuration from `--config` or the working directory.
pub(crate) fn load_project(global: &GlobalArgs) -> shipwright::Result<ProjectConfig> {
    let cwd = std::env::current_dir().map_err(|e| {
        shipwright::Error::internal_io(e.to_string(), Some("read current directory".to_string()))
    })?;
    let (path, project) = config::load_project(global.config.as_deref(), &cwd)?;
    log_status!("config", "Using {}", path.display());
    Ok(project)
}

/// Resolve `environment` and connect to its hosts.
pub(crate) fn deployer(
    global: &GlobalArgs,
    environment: &str,
    git_ref: Option<&str>,
) -> shipwright::Result<Deployer> {
    let project = load_project(global)?;
    let defaults = defaults::load_defaults();

    let mut env = environment::resolve(&project, environment, &defaults)?;
    if let Some(git_ref) = git_ref {
        env = env.with_ref(git_ref)?;
    }

    Deployer::connect(env, project.task_graph()?, &defaults.ssh)
}

macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (shipwright::Result<serde_json::Value>, i32) {
    match command {
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::Setup(args) => dispatch!(args, global, setup),
        crate::Commands::Rollback(args) => dispatch!(args, global, rollback),
        crate::Commands::Prune(args) => dispatch!(args, global, prune),
        crate::Commands::Releases(args) => dispatch!(args, global, releases),
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Tasks(args) => dispatch!(args, global, tasks),
        crate::Commands::Unlock(args) => dispatch!(args, global, unlock),
    }
}
