use clap::Args;
use serde::Serialize;

use shipwright::deploy::RollbackReport;

use super::CmdResult;

#[derive(Args)]
pub struct RollbackArgs {
    /// Environment to roll back
    pub environment: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutput {
    pub command: String,
    pub environment: String,
    pub hosts: Vec<RollbackReport>,
}

pub fn run(args: RollbackArgs, global: &super::GlobalArgs) -> CmdResult<RollbackOutput> {
    let hosts = super::deployer(global, &args.environment, None)?.rollback()?;

    Ok((
        RollbackOutput {
            command: "rollback".to_string(),
            environment: args.environment,
            hosts,
        },
        0,
    ))
}
