use clap::Args;
use serde::Serialize;

use shipwright::retention::PruneReport;

use super::CmdResult;

#[derive(Args)]
pub struct PruneArgs {
    /// Environment to prune
    pub environment: String,

    /// Releases to keep on disk, the live one included (default: keepReleases)
    #[arg(long, value_name = "N")]
    pub keep: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneOutput {
    pub command: String,
    pub environment: String,
    pub keep: usize,
    pub hosts: Vec<PruneReport>,
}

pub fn run(args: PruneArgs, global: &super::GlobalArgs) -> CmdResult<PruneOutput> {
    let deployer = super::deployer(global, &args.environment, None)?;
    let keep = args.keep.unwrap_or(deployer.environment().keep_releases);
    let hosts = deployer.prune(Some(keep))?;

    let exit_code = if hosts.iter().any(|h| !h.failed.is_empty()) { 1 } else { 0 };

    Ok((
        PruneOutput {
            command: "prune".to_string(),
            environment: args.environment,
            keep,
            hosts,
        },
        exit_code,
    ))
}
