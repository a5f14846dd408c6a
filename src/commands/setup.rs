use clap::Args;
use serde::Serialize;

use shipwright::deploy::HostSetupReport;

use super::CmdResult;

#[derive(Args)]
pub struct SetupArgs {
    /// Environment whose deploy root should be created
    pub environment: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupOutput {
    pub command: String,
    pub environment: String,
    pub hosts: Vec<HostSetupReport>,
}

pub fn run(args: SetupArgs, global: &super::GlobalArgs) -> CmdResult<SetupOutput> {
    let deployer = super::deployer(global, &args.environment, None)?;
    let hosts = deployer.setup()?;

    Ok((
        SetupOutput {
            command: "setup".to_string(),
            environment: args.environment,
            hosts,
        },
        0,
    ))
}
