use clap::Args;
use serde::Serialize;

use shipwright::deploy::{CancelFlag, DeployReport};
use shipwright::log_status;

use super::CmdResult;

#[derive(Args)]
pub struct DeployArgs {
    /// Environment to deploy (e.g. staging)
    pub environment: String,

    /// Branch, tag or commit to deploy instead of the configured branch
    #[arg(long = "ref", value_name = "REF")]
    pub git_ref: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutput {
    pub command: String,
    #[serde(flatten)]
    pub report: DeployReport,
}

pub fn run(args: DeployArgs, global: &super::GlobalArgs) -> CmdResult<DeployOutput> {
    let cancel = CancelFlag::new();
    let handle = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        handle.cancel();
    }) {
        log_status!("deploy", "Ctrl-C cancellation unavailable: {}", e);
    }

    let deployer = super::deployer(global, &args.environment, args.git_ref.as_deref())?
        .with_cancel(cancel);
    let report = deployer.deploy()?;

    Ok((
        DeployOutput {
            command: "deploy".to_string(),
            report,
        },
        0,
    ))
}
