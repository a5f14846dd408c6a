use crate::error::{Error, Result};
use crate::tasks::{Step, Task, TaskGraph, LAUNCH_HOOK, LAUNCH_TASK};
use crate::utils::validation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// Project configuration
// ============================================================================

/// Contents of `shipwright.json` / `shipwright.toml`.
///
/// Top-level connection and release settings apply to every environment;
/// an environment entry overrides them field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,

    #[serde(default)]
    pub forward_agent: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_files: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_dirs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_releases: Option<usize>,

    /// Command that populates a fresh release directory. Defaults to a
    /// shallow `git clone` of `{{ref}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_task: Option<String>,

    #[serde(default)]
    pub activation: ActivationMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_hosts: Option<usize>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,

    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tasks: BTreeMap<String, TaskConfig>,

    /// Steps attached to the `launch` hook of `deploy:launch`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub launch: Vec<Step>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hooks: Vec<HookConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnvironmentConfig {
    pub hosts: Vec<String>,

    pub deploy_to: String,

    /// Default ref deployed to this environment; `--ref` overrides it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_agent: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_releases: Option<usize>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_files: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_dirs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation: Option<ActivationMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_hosts: Option<usize>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TaskConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, alias = "dependencies", skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,

    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hook_points: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HookConfig {
    pub task: String,
    pub point: String,
    pub steps: Vec<Step>,
}

/// How activation is coordinated across the hosts of an environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// Every host is prepared before any host switches `current`.
    #[default]
    Atomic,
    /// Each host switches as soon as its own release is prepared.
    Rolling,
}

// ============================================================================
// Loading
// ============================================================================

impl ProjectConfig {
    /// Read and validate a project configuration file. The format follows
    /// the extension: `.toml` is TOML, anything else is JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::config_not_found(vec![path.display().to_string()])
            } else {
                Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
            }
        })?;

        let display = path.display().to_string();
        let config = if is_toml(path) {
            Self::from_toml_str(&content, &display)?
        } else {
            Self::from_json_str(&content, &display)?
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str, source: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::config_invalid_json(source, e))
    }

    pub fn from_toml_str(content: &str, source: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config_invalid_toml(source, e))
    }

    /// Structural checks that do not depend on the process environment.
    /// `${VAR}` expansion and per-environment checks happen at resolve time.
    pub fn validate(&self) -> Result<()> {
        for name in self.environments.keys() {
            validation::require_name(name, "environment")?;
        }

        for path in self.shared_files.iter().chain(&self.shared_dirs) {
            validation::require_relative_path(path, "sharedFiles")?;
        }

        if self.max_parallel_hosts == Some(0) {
            return Err(Error::config_invalid_value(
                "maxParallelHosts",
                Some("0".to_string()),
                "must be at least 1",
            ));
        }

        self.task_graph().map(|_| ())
    }

    pub fn environment(&self, name: &str) -> Result<&EnvironmentConfig> {
        self.environments
            .get(name)
            .ok_or_else(|| Error::environment_not_found(name, self.environment_names()))
    }

    pub fn environment_names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    /// Build the task table: the built-in launch task, every configured task,
    /// then hook attachments in file order.
    pub fn task_graph(&self) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();

        graph.register_task(Task {
            name: LAUNCH_TASK.to_string(),
            description: Some("Runs after the new release is live".to_string()),
            dependencies: Vec::new(),
            steps: Vec::new(),
            hook_points: Vec::new(),
        })?;
        graph.declare_hook_point(LAUNCH_TASK, LAUNCH_HOOK)?;

        for (name, task) in &self.tasks {
            graph.register_task(Task {
                name: name.clone(),
                description: task.description.clone(),
                dependencies: task.depends.clone(),
                steps: task.steps.clone(),
                hook_points: Vec::new(),
            })?;
            for point in &task.hook_points {
                graph.declare_hook_point(name, point)?;
            }
        }

        if !self.launch.is_empty() {
            graph.attach(LAUNCH_TASK, LAUNCH_HOOK, self.launch.clone())?;
        }

        for hook in &self.hooks {
            if !graph.contains(&hook.task) {
                return Err(Error::task_not_found(&hook.task, None));
            }
            graph.attach(&hook.task, &hook.point, hook.steps.clone())?;
        }

        graph.validate()?;
        Ok(graph)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("toml")
}

/// Find and load the project configuration for `dir`.
pub fn load_project(explicit: Option<&Path>, dir: &Path) -> Result<(PathBuf, ProjectConfig)> {
    let path = crate::paths::project_config(explicit, dir)?;
    let config = ProjectConfig::load(&path)?;
    Ok((path, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const PEERLY_JSON: &str = r#"{
        "repository": "git@github.com:joshsoftware/peerly-backend.git",
        "user": "ubuntu",
        "forwardAgent": true,
        "sharedFiles": [".env"],
        "environments": {
            "staging": {
                "hosts": ["${PEERLY_STAGING_IP}"],
                "deployTo": "/www/peerly-backend",
                "branch": "Deployment"
            },
            "production": {
                "hosts": ["${PEERLY_PRODUCTION_IP}"],
                "deployTo": "/www/peerly",
                "branch": "main"
            }
        },
        "tasks": {
            "build": { "steps": [{ "remote": "go build cmd/main.go" }, { "remote": "make migrate" }] },
            "setup": { "steps": [{ "remote": "createdb -U postgres peerly" }] },
            "loadData": { "steps": [{ "remote": "make seed" }, { "remote": "make loadUser" }] }
        },
        "launch": [{ "remote": "sudo systemctl restart golang.service" }]
    }"#;

    #[test]
    fn parses_json_project() {
        let config = ProjectConfig::from_json_str(PEERLY_JSON, "shipwright.json").unwrap();
        config.validate().unwrap();

        assert_eq!(config.environment_names(), vec!["production", "staging"]);
        assert!(config.forward_agent);
        assert_eq!(config.activation, ActivationMode::Atomic);
        let staging = config.environment("staging").unwrap();
        assert_eq!(staging.branch.as_deref(), Some("Deployment"));
    }

    #[test]
    fn parses_toml_project() {
        let toml = r#"
repository = "git@example.com:app.git"
sharedFiles = [".env"]
activation = "rolling"

[environments.staging]
hosts = ["10.0.0.4", "10.0.0.5"]
deployTo = "/www/app"
branch = "main"

[tasks.build]
steps = [{ remote = "make build" }]
"#;
        let config = ProjectConfig::from_toml_str(toml, "shipwright.toml").unwrap();
        config.validate().unwrap();
        assert_eq!(config.activation, ActivationMode::Rolling);
        assert_eq!(config.environment("staging").unwrap().hosts.len(), 2);
    }

    #[test]
    fn unknown_environment_lists_available() {
        let config = ProjectConfig::from_json_str(PEERLY_JSON, "shipwright.json").unwrap();
        let err = config.environment("qa").unwrap_err();
        assert_eq!(err.code, ErrorCode::EnvironmentNotFound);
        assert_eq!(err.hints[0].message, "Available environments: production, staging");
    }

    #[test]
    fn task_graph_attaches_launch_steps() {
        let config = ProjectConfig::from_json_str(PEERLY_JSON, "shipwright.json").unwrap();
        let graph = config.task_graph().unwrap();
        let launch = graph.get(LAUNCH_TASK).unwrap();
        assert_eq!(
            launch.hook_points[0].steps,
            vec![Step::Remote("sudo systemctl restart golang.service".to_string())]
        );
        assert!(graph.contains("loadData"));
    }

    #[test]
    fn cyclic_tasks_fail_validation() {
        let json = r#"{
            "environments": {},
            "tasks": {
                "a": { "depends": ["b"] },
                "b": { "depends": ["c"] },
                "c": { "depends": ["a"] }
            }
        }"#;
        let config = ProjectConfig::from_json_str(json, "shipwright.json").unwrap();
        let err = config.validate().unwrap_err();
        assert_eq!(err.code, ErrorCode::TaskCyclicDependency);
    }

    #[test]
    fn hook_on_unknown_task_fails() {
        let json = r#"{
            "environments": {},
            "hooks": [{ "task": "build", "point": "after", "steps": [] }]
        }"#;
        let config = ProjectConfig::from_json_str(json, "shipwright.json").unwrap();
        assert_eq!(config.validate().unwrap_err().code, ErrorCode::TaskNotFound);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ProjectConfig::from_json_str(r#"{"deploy_to": "/www"}"#, "x.json").unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidJson);
    }

    #[test]
    fn absolute_shared_path_is_rejected() {
        let json = r#"{"sharedFiles": ["/etc/app.env"], "environments": {}}"#;
        let config = ProjectConfig::from_json_str(json, "x.json").unwrap();
        assert_eq!(config.validate().unwrap_err().code, ErrorCode::ConfigInvalidValue);
    }

    #[test]
    fn load_reads_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shipwright.toml");
        fs::write(
            &path,
            "[environments.local]\nhosts = [\"localhost\"]\ndeployTo = \"/tmp/app\"\n",
        )
        .unwrap();
        let (found, config) = load_project(None, dir.path()).unwrap();
        assert_eq!(found, path);
        assert_eq!(config.environment("local").unwrap().deploy_to, "/tmp/app");
    }
}
