//! Named, composable deploy tasks.
//!
//! A task has ordered dependencies, ordered steps and optional hook points
//! that other configuration attaches extra steps to. The registration table
//! is validated up front: a registration that would close a cycle is
//! rejected, and `validate` reports references to tasks that were never
//! registered. Execution happens through a `TaskSession`, which remembers
//! every task it has completed so shared dependencies run once per
//! invocation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::validation;

/// Built-in task run after activation; its `launch` hook point receives the
/// configured launch steps.
pub const LAUNCH_TASK: &str = "deploy:launch";
pub const LAUNCH_HOOK: &str = "launch";

/// Task run by `shipwright setup` after the deploy root is bootstrapped.
pub const SETUP_TASK: &str = "setup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Run on every target host, inside the working directory of the phase.
    Remote(String),
    /// Run on the controller.
    Local(String),
    /// Run another task (memoized like a dependency).
    Invoke(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub dependencies: Vec<String>,
    pub steps: Vec<Step>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hook_points: Vec<HookPoint>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookPoint {
    pub name: String,
    pub steps: Vec<Step>,
}

impl Task {
    /// Every task this one can cause to run: dependencies, then invoked tasks.
    fn edges(&self) -> impl Iterator<Item = &str> {
        let invoked = self
            .steps
            .iter()
            .chain(self.hook_points.iter().flat_map(|h| h.steps.iter()))
            .filter_map(|step| match step {
                Step::Invoke(name) => Some(name.as_str()),
                _ => None,
            });
        self.dependencies.iter().map(String::as_str).chain(invoked)
    }
}

/// Executes the command steps of a task. `Invoke` steps never reach the
/// runner; the session resolves them.
pub trait StepRunner {
    fn remote(&mut self, task: &str, command: &str) -> Result<()>;
    fn local(&mut self, task: &str, command: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    index: HashMap<String, usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Task> {
        self.index.get(name).map(|&idx| &self.tasks[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn register(&mut self, name: &str, dependencies: Vec<String>, steps: Vec<Step>) -> Result<()> {
        self.register_task(Task {
            name: name.to_string(),
            description: None,
            dependencies,
            steps,
            hook_points: Vec::new(),
        })
    }

    /// Register a fully built task. References to tasks that are not
    /// registered yet are allowed; a registration that closes a cycle is
    /// rejected and leaves the graph unchanged.
    pub fn register_task(&mut self, task: Task) -> Result<()> {
        validation::require_name(&task.name, "task")?;
        for dep in task.edges() {
            validation::require_name(dep, "task")?;
        }
        for point in &task.hook_points {
            validation::require_name(&point.name, "hook_point")?;
        }
        if self.index.contains_key(&task.name) {
            return Err(Error::validation_invalid_argument(
                "task",
                format!("Task '{}' is already registered", task.name),
                Some(task.name.clone()),
                None,
            ));
        }

        let name = task.name.clone();
        self.index.insert(name.clone(), self.tasks.len());
        self.tasks.push(task);

        if let Some(cycle) = self.find_cycle_from(&name) {
            self.tasks.pop();
            self.index.remove(&name);
            return Err(Error::task_cyclic_dependency(name, cycle));
        }

        Ok(())
    }

    pub fn declare_hook_point(&mut self, task: &str, point: &str) -> Result<()> {
        validation::require_name(point, "hook_point")?;
        let idx = *self
            .index
            .get(task)
            .ok_or_else(|| Error::task_not_found(task, None))?;
        let hook_points = &mut self.tasks[idx].hook_points;
        if !hook_points.iter().any(|h| h.name == point) {
            hook_points.push(HookPoint {
                name: point.to_string(),
                steps: Vec::new(),
            });
        }
        Ok(())
    }

    /// Attach steps to a declared hook point. Attached steps run after the
    /// task's own steps, in attachment order.
    pub fn attach(&mut self, task: &str, point: &str, steps: Vec<Step>) -> Result<()> {
        let idx = *self
            .index
            .get(task)
            .ok_or_else(|| Error::task_not_found(task, None))?;

        for step in &steps {
            if let Step::Invoke(target) = step {
                validation::require_name(target, "task")?;
            }
        }

        let hook = self.tasks[idx]
            .hook_points
            .iter_mut()
            .find(|h| h.name == point)
            .ok_or_else(|| {
                Error::validation_invalid_argument(
                    "hook_point",
                    format!("Task '{}' does not declare hook point '{}'", task, point),
                    Some(point.to_string()),
                    None,
                )
            })?;
        let previous_len = hook.steps.len();
        hook.steps.extend(steps);

        if let Some(cycle) = self.find_cycle_from(task) {
            if let Some(hook) = self.tasks[idx].hook_points.iter_mut().find(|h| h.name == point) {
                hook.steps.truncate(previous_len);
            }
            return Err(Error::task_cyclic_dependency(task, cycle));
        }

        Ok(())
    }

    /// Check that every referenced task is registered.
    pub fn validate(&self) -> Result<()> {
        for task in &self.tasks {
            for dep in task.edges() {
                if !self.index.contains_key(dep) {
                    return Err(Error::task_not_found(dep, Some(task.name.clone())));
                }
            }
        }
        Ok(())
    }

    pub fn session(&self) -> TaskSession<'_> {
        TaskSession {
            graph: self,
            completed: HashSet::new(),
            order: Vec::new(),
        }
    }

    /// Depth-first search with visiting/visited marks. Unregistered names are
    /// skipped; they are reported by `validate`.
    fn find_cycle_from(&self, start: &str) -> Option<Vec<String>> {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut path: Vec<&str> = Vec::new();
        self.dfs(start, &mut marks, &mut path)
    }

    fn dfs<'a>(
        &'a self,
        name: &'a str,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(name) {
            Some(Mark::Visited) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            None => {}
        }

        let task = self.get(name)?;
        marks.insert(name, Mark::Visiting);
        path.push(name);

        for next in task.edges() {
            if let Some(cycle) = self.dfs(next, marks, path) {
                return Some(cycle);
            }
        }

        path.pop();
        marks.insert(name, Mark::Visited);
        None
    }
}

/// One invocation's view of the graph. Completed tasks are skipped on every
/// later `run` through the same session.
pub struct TaskSession<'g> {
    graph: &'g TaskGraph,
    completed: HashSet<String>,
    order: Vec<String>,
}

impl<'g> TaskSession<'g> {
    /// Run `name` after its transitive dependencies. The first failing step
    /// aborts the whole run and its error is returned unchanged.
    pub fn run(&mut self, name: &str, runner: &mut dyn StepRunner) -> Result<()> {
        self.visit(name, None, runner)
    }

    pub fn has_run(&self, name: &str) -> bool {
        self.completed.contains(name)
    }

    /// Tasks completed so far, in completion order.
    pub fn completed(&self) -> &[String] {
        &self.order
    }

    fn visit(&mut self, name: &str, parent: Option<&str>, runner: &mut dyn StepRunner) -> Result<()> {
        if self.completed.contains(name) {
            return Ok(());
        }

        let graph = self.graph;
        let task = graph
            .get(name)
            .ok_or_else(|| Error::task_not_found(name, parent.map(str::to_string)))?;

        for dep in &task.dependencies {
            self.visit(dep, Some(name), runner)?;
        }

        let hooked = task.hook_points.iter().flat_map(|h| h.steps.iter());
        for step in task.steps.iter().chain(hooked) {
            match step {
                Step::Remote(command) => runner.remote(name, command)?,
                Step::Local(command) => runner.local(name, command)?,
                Step::Invoke(target) => self.visit(target, Some(name), runner)?,
            }
        }

        self.completed.insert(name.to_string());
        self.order.push(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        fail_on: Option<String>,
    }

    impl StepRunner for Recorder {
        fn remote(&mut self, task: &str, command: &str) -> Result<()> {
            if self.fail_on.as_deref() == Some(command) {
                return Err(Error::internal_unexpected(format!("{} failed", command)));
            }
            self.calls.push(format!("{}:remote:{}", task, command));
            Ok(())
        }

        fn local(&mut self, task: &str, command: &str) -> Result<()> {
            self.calls.push(format!("{}:local:{}", task, command));
            Ok(())
        }
    }

    fn remote(cmd: &str) -> Step {
        Step::Remote(cmd.to_string())
    }

    fn deps(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn cycle_is_rejected_at_registration() {
        let mut graph = TaskGraph::new();
        graph.register("a", deps(&["b"]), vec![]).unwrap();
        graph.register("b", deps(&["c"]), vec![]).unwrap();
        let err = graph.register("c", deps(&["a"]), vec![]).unwrap_err();

        assert_eq!(err.code, ErrorCode::TaskCyclicDependency);
        let cycle: Vec<String> = serde_json::from_value(err.details["cycle"].clone()).unwrap();
        assert_eq!(cycle, deps(&["c", "a", "b", "c"]));
        assert!(!graph.contains("c"));
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut graph = TaskGraph::new();
        let err = graph.register("loop", deps(&["loop"]), vec![]).unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskCyclicDependency);
    }

    #[test]
    fn cycle_through_invoke_is_rejected() {
        let mut graph = TaskGraph::new();
        graph
            .register("deploy", vec![], vec![Step::Invoke("migrate".to_string())])
            .unwrap();
        let err = graph
            .register("migrate", deps(&["deploy"]), vec![])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskCyclicDependency);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut graph = TaskGraph::new();
        graph.register("build", vec![], vec![]).unwrap();
        let err = graph.register("build", vec![], vec![]).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn validate_reports_unknown_dependency() {
        let mut graph = TaskGraph::new();
        graph.register("deploy", deps(&["compile"]), vec![]).unwrap();
        let err = graph.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
        assert_eq!(err.details["id"], "compile");
        assert_eq!(err.details["referencedBy"], "deploy");
    }

    #[test]
    fn diamond_dependency_runs_once() {
        let mut graph = TaskGraph::new();
        graph.register("env", vec![], vec![remote("load env")]).unwrap();
        graph.register("build", deps(&["env"]), vec![remote("go build")]).unwrap();
        graph.register("migrate", deps(&["env"]), vec![remote("make migrate")]).unwrap();
        graph
            .register("deploy", deps(&["build", "migrate"]), vec![remote("restart")])
            .unwrap();

        let mut runner = Recorder::default();
        let mut session = graph.session();
        session.run("deploy", &mut runner).unwrap();

        assert_eq!(
            runner.calls,
            vec![
                "env:remote:load env",
                "build:remote:go build",
                "migrate:remote:make migrate",
                "deploy:remote:restart",
            ]
        );
        assert_eq!(session.completed(), &deps(&["env", "build", "migrate", "deploy"])[..]);
    }

    #[test]
    fn invoke_is_memoized_across_runs_in_one_session() {
        let mut graph = TaskGraph::new();
        graph.register("seed", vec![], vec![remote("make seed")]).unwrap();
        graph
            .register(
                "loadData",
                vec![],
                vec![Step::Invoke("seed".to_string()), remote("make loadUser")],
            )
            .unwrap();

        let mut runner = Recorder::default();
        let mut session = graph.session();
        session.run("seed", &mut runner).unwrap();
        session.run("loadData", &mut runner).unwrap();
        session.run("loadData", &mut runner).unwrap();

        assert_eq!(
            runner.calls,
            vec!["seed:remote:make seed", "loadData:remote:make loadUser"]
        );
    }

    #[test]
    fn forward_references_resolve_once_registered() {
        let mut graph = TaskGraph::new();
        graph.register("deploy", deps(&["build"]), vec![]).unwrap();
        graph.register("build", vec![], vec![Step::Local("make assets".to_string())]).unwrap();
        graph.validate().unwrap();

        let mut runner = Recorder::default();
        graph.session().run("deploy", &mut runner).unwrap();
        assert_eq!(runner.calls, vec!["build:local:make assets"]);
    }

    #[test]
    fn failing_step_aborts_the_run() {
        let mut graph = TaskGraph::new();
        graph
            .register("build", vec![], vec![remote("go build"), remote("make migrate")])
            .unwrap();
        graph.register("deploy", deps(&["build"]), vec![remote("restart")]).unwrap();

        let mut runner = Recorder {
            fail_on: Some("go build".to_string()),
            ..Default::default()
        };
        let mut session = graph.session();
        let err = session.run("deploy", &mut runner).unwrap_err();

        assert_eq!(err.message, "Unexpected error");
        assert_eq!(err.details["error"], "go build failed");
        assert!(runner.calls.is_empty());
        assert!(!session.has_run("build"));
        assert!(!session.has_run("deploy"));
    }

    #[test]
    fn hooks_run_after_own_steps_in_attachment_order() {
        let mut graph = TaskGraph::new();
        graph.register(LAUNCH_TASK, vec![], vec![remote("echo launching")]).unwrap();
        graph.declare_hook_point(LAUNCH_TASK, LAUNCH_HOOK).unwrap();
        graph
            .attach(LAUNCH_TASK, LAUNCH_HOOK, vec![remote("systemctl restart app")])
            .unwrap();
        graph
            .attach(LAUNCH_TASK, LAUNCH_HOOK, vec![remote("curl localhost/health")])
            .unwrap();

        let mut runner = Recorder::default();
        graph.session().run(LAUNCH_TASK, &mut runner).unwrap();

        assert_eq!(
            runner.calls,
            vec![
                "deploy:launch:remote:echo launching",
                "deploy:launch:remote:systemctl restart app",
                "deploy:launch:remote:curl localhost/health",
            ]
        );
    }

    #[test]
    fn attach_requires_declared_hook_point() {
        let mut graph = TaskGraph::new();
        graph.register("build", vec![], vec![]).unwrap();
        assert!(graph.attach("build", "launch", vec![remote("x")]).is_err());
        assert_eq!(
            graph.attach("missing", "launch", vec![]).unwrap_err().code,
            ErrorCode::TaskNotFound
        );
    }

    #[test]
    fn attach_rejects_invoke_cycle() {
        let mut graph = TaskGraph::new();
        graph.register("launch", vec![], vec![]).unwrap();
        graph.declare_hook_point("launch", "after").unwrap();
        let err = graph
            .attach("launch", "after", vec![Step::Invoke("launch".to_string())])
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskCyclicDependency);
        assert!(graph.get("launch").unwrap().hook_points[0].steps.is_empty());
    }

    #[test]
    fn run_unknown_task_fails() {
        let graph = TaskGraph::new();
        let mut runner = Recorder::default();
        let err = graph.session().run("nope", &mut runner).unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskNotFound);
    }

    #[test]
    fn step_deserializes_from_tagged_object() {
        let steps: Vec<Step> = serde_json::from_str(
            r#"[{"remote":"go build cmd/main.go"},{"local":"make assets"},{"invoke":"setup"}]"#,
        )
        .unwrap();
        assert_eq!(
            steps,
            vec![
                Step::Remote("go build cmd/main.go".to_string()),
                Step::Local("make assets".to_string()),
                Step::Invoke("setup".to_string()),
            ]
        );
    }
}
