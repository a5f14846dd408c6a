use clap::Args;
use serde::Serialize;

use shipwright::deploy::UnlockReport;

use super::CmdResult;

#[derive(Args)]
pub struct UnlockArgs {
    /// Environment whose deploy lock should be removed
    pub environment: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockOutput {
    pub command: String,
    pub environment: String,
    pub hosts: Vec<UnlockReport>,
}

pub fn run(args: UnlockArgs, global: &super::GlobalArgs) -> CmdResult<UnlockOutput> {
    let hosts = super::deployer(global, &args.environment, None)?.unlock()?;

    Ok((
        UnlockOutput {
            command: "unlock".to_string(),
            environment: args.environment,
            hosts,
        },
        0,
    ))
}
