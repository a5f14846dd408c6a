use clap::Args;
use serde::Serialize;

use shipwright::deploy::HostReleases;

use super::CmdResult;

#[derive(Args)]
pub struct ReleasesArgs {
    /// Environment to inspect
    pub environment: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleasesOutput {
    pub command: String,
    pub environment: String,
    pub hosts: Vec<HostReleases>,
}

pub fn run(args: ReleasesArgs, global: &super::GlobalArgs) -> CmdResult<ReleasesOutput> {
    let hosts = super::deployer(global, &args.environment, None)?.releases()?;

    Ok((
        ReleasesOutput {
            command: "releases".to_string(),
            environment: args.environment,
            hosts,
        },
        0,
    ))
}
