use clap::Args;
use serde::Serialize;

use shipwright::deploy::TaskRunReport;

use super::CmdResult;

#[derive(Args)]
pub struct RunArgs {
    /// Environment to run against
    pub environment: String,

    /// Task to run in the live release (e.g. loadData)
    pub task: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    pub command: String,
    pub environment: String,
    pub task: String,
    pub hosts: Vec<TaskRunReport>,
}

pub fn run(args: RunArgs, global: &super::GlobalArgs) -> CmdResult<RunOutput> {
    let hosts = super::deployer(global, &args.environment, None)?.run_task(&args.task)?;

    Ok((
        RunOutput {
            command: "run".to_string(),
            environment: args.environment,
            task: args.task,
            hosts,
        },
        0,
    ))
}
