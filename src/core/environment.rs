//! Environment resolution.
//!
//! Turns a named entry of the project configuration into a fully resolved
//! `Environment`: global settings merged with the environment's overrides,
//! `${VAR}` references expanded from the process environment, and every
//! value validated before any host is contacted. The result is passed by
//! value into the deploy components; nothing reads configuration globally.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::config::{ActivationMode, ProjectConfig};
use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::release::ReleaseLayout;
use crate::utils::template::TemplateVars;
use crate::utils::{template, validation};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,
    pub hosts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
    pub forward_agent: bool,
    pub deploy_to: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    pub keep_releases: usize,
    pub shared_files: Vec<String>,
    pub shared_dirs: Vec<String>,
    pub checkout_command: String,
    pub build_task: String,
    pub activation: ActivationMode,
    pub max_parallel_hosts: usize,
    pub vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn layout(&self) -> ReleaseLayout {
        ReleaseLayout::new(&self.deploy_to)
    }

    /// Replace the configured ref, e.g. from `--ref`.
    pub fn with_ref(mut self, git_ref: &str) -> Result<Self> {
        let trimmed = validation::require_non_empty(git_ref, "ref", "Ref must not be empty")?;
        self.git_ref = trimmed.to_string();
        Ok(self)
    }

    /// Template variables for commands run on `host`. Release variables are
    /// added by the caller once a release exists.
    pub fn template_vars(&self, host: &str) -> HashMap<String, String> {
        let layout = self.layout();
        let mut vars: HashMap<String, String> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        vars.insert(TemplateVars::ENVIRONMENT.to_string(), self.name.clone());
        vars.insert(TemplateVars::HOST.to_string(), host.to_string());
        vars.insert(TemplateVars::REF.to_string(), self.git_ref.clone());
        vars.insert(TemplateVars::DEPLOY_TO.to_string(), self.deploy_to.clone());
        vars.insert(TemplateVars::CURRENT_PATH.to_string(), layout.current());
        vars.insert(TemplateVars::SHARED_PATH.to_string(), layout.shared());
        if let Some(repository) = &self.repository {
            vars.insert(TemplateVars::REPOSITORY.to_string(), repository.clone());
        }
        vars
    }
}

/// Resolve environment `name` against the project configuration.
pub fn resolve(config: &ProjectConfig, name: &str, defaults: &Defaults) -> Result<Environment> {
    let entry = config.environment(name)?;
    let key = |field: &str| format!("environments.{}.{}", name, field);

    let mut hosts = Vec::with_capacity(entry.hosts.len());
    for host in &entry.hosts {
        let expanded = expand(host, &key("hosts"))?;
        let trimmed = validation::require_non_empty(
            &expanded,
            "hosts",
            &format!("Environment '{}' has an empty host (from '{}')", name, host),
        )?;
        hosts.push(trimmed.to_string());
    }
    validation::require_non_empty_vec(
        &hosts,
        "hosts",
        &format!("Environment '{}' has no hosts", name),
    )?;

    let deploy_to = expand(&entry.deploy_to, &key("deployTo"))?;
    let deploy_to = deploy_to.trim_end_matches('/').to_string();
    if !deploy_to.starts_with('/') || deploy_to.len() < 2 {
        return Err(Error::config_invalid_value(
            key("deployTo"),
            Some(entry.deploy_to.clone()),
            "deploy root must be an absolute path below /",
        ));
    }

    let git_ref = match &entry.branch {
        Some(branch) => expand(branch, &key("branch"))?,
        None => return Err(Error::config_missing_key(key("branch"), None)),
    };
    let git_ref = validation::require_non_empty(&git_ref, "ref", "Ref must not be empty")?.to_string();

    let repository = match entry.repository.as_ref().or(config.repository.as_ref()) {
        Some(repo) => Some(expand(repo, "repository")?),
        None => None,
    };

    let checkout_command = config
        .checkout_command
        .clone()
        .unwrap_or_else(|| defaults.deploy.checkout_command.clone());
    if repository.is_none() && template::is_present(&checkout_command, TemplateVars::REPOSITORY) {
        return Err(Error::config_missing_key("repository", None)
            .with_hint("The checkout command clones {{repository}}; set \"repository\" or a custom checkoutCommand"));
    }

    let mut shared_files = Vec::new();
    merge_unique(&mut shared_files, &config.shared_files);
    merge_unique(&mut shared_files, &entry.shared_files);
    let mut shared_dirs = Vec::new();
    merge_unique(&mut shared_dirs, &config.shared_dirs);
    merge_unique(&mut shared_dirs, &entry.shared_dirs);
    for path in &shared_files {
        validation::require_relative_path(path, &key("sharedFiles"))?;
    }
    for path in &shared_dirs {
        validation::require_relative_path(path, &key("sharedDirs"))?;
    }

    let mut vars = BTreeMap::new();
    for (var, value) in config.vars.iter().chain(&entry.vars) {
        vars.insert(var.clone(), expand(value, &format!("vars.{}", var))?);
    }

    let max_parallel_hosts = entry
        .max_parallel_hosts
        .or(config.max_parallel_hosts)
        .unwrap_or(1);
    if max_parallel_hosts == 0 {
        return Err(Error::config_invalid_value(
            key("maxParallelHosts"),
            Some("0".to_string()),
            "must be at least 1",
        ));
    }

    let user = match entry.user.as_ref().or(config.user.as_ref()) {
        Some(user) => Some(expand(user, &key("user"))?),
        None => None,
    };

    Ok(Environment {
        name: name.to_string(),
        hosts,
        user,
        port: entry.port.or(config.port),
        identity_file: entry
            .identity_file
            .clone()
            .or_else(|| config.identity_file.clone()),
        forward_agent: entry.forward_agent.unwrap_or(config.forward_agent),
        deploy_to,
        git_ref,
        repository,
        keep_releases: entry
            .keep_releases
            .or(config.keep_releases)
            .unwrap_or(defaults.deploy.keep_releases),
        shared_files,
        shared_dirs,
        checkout_command,
        build_task: config
            .build_task
            .clone()
            .unwrap_or_else(|| defaults.deploy.build_task.clone()),
        activation: entry.activation.unwrap_or(config.activation),
        max_parallel_hosts,
        vars,
    })
}

fn expand(value: &str, key: &str) -> Result<String> {
    shellexpand::env(value).map(|v| v.into_owned()).map_err(|e| {
        Error::config_invalid_value(
            key,
            Some(value.to_string()),
            format!("environment variable '{}' is not set", e.var_name),
        )
    })
}

fn merge_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        let item = item.trim().trim_end_matches('/').to_string();
        if !target.contains(&item) {
            target.push(item);
        }
    }
}
