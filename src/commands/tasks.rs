use clap::Args;
use serde::Serialize;

use shipwright::tasks::Task;

use super::CmdResult;

#[derive(Args)]
pub struct TasksArgs {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksOutput {
    pub command: String,
    pub environments: Vec<String>,
    pub tasks: Vec<Task>,
}

pub fn run(_args: TasksArgs, global: &super::GlobalArgs) -> CmdResult<TasksOutput> {
    let project = super::load_project(global)?;
    let graph = project.task_graph()?;

    Ok((
        TasksOutput {
            command: "tasks".to_string(),
            environments: project.environment_names(),
            tasks: graph.tasks().to_vec(),
        },
        0,
    ))
}
