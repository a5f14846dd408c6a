use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::ActivationMode;
use crate::defaults::SshDefaults;
use crate::environment::Environment;
use crate::error::{CommandFailedDetails, Error, Result, TargetDetails};
use crate::lock::{self, DeployLock};
use crate::release::{self, Release, ReleaseLayout, ReleaseStatus};
use crate::retention::{self, PruneReport};
use crate::shared::{self, LinkOutcome, SharedPaths};
use crate::ssh::{execute_local_command_in_dir, RemoteExecutor, SshClient};
use crate::tasks::{StepRunner, TaskGraph, TaskSession, LAUNCH_TASK, SETUP_TASK};
use crate::utils::shell;
use crate::utils::template::{self, render_map, TemplateVars};

// =============================================================================
// Cancellation
// =============================================================================

/// Operator cancellation, checked between deploy steps up to activation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    Resolved,
    ReleaseStaged,
    SharedLinked,
    Built,
    Activated,
    CleanedUp,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDeployReport {
    pub host: String,
    pub release_id: u64,
    pub release_path: String,
    pub phase: DeployPhase,
    pub linked: Vec<LinkOutcome>,
    pub build_task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruned: Option<PruneReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    pub environment: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub activation: ActivationMode,
    pub phase: DeployPhase,
    pub hosts: Vec<HostDeployReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSetupReport {
    pub host: String,
    pub deploy_to: String,
    pub directories: Vec<String>,
    pub missing_shared_files: Vec<String>,
    pub setup_task_ran: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub host: String,
    pub from: u64,
    pub to: u64,
    pub release_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunReport {
    pub host: String,
    pub task: String,
    pub release_id: u64,
    pub completed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReleases {
    pub host: String,
    pub current: Option<u64>,
    pub releases: Vec<Release>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockReport {
    pub host: String,
    pub removed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

// =============================================================================
// Step runner
// =============================================================================

/// Runs task steps for one host: remote steps inside `dir` on the host,
/// local steps on the controller. Commands are rendered with `vars` first.
struct HostStepRunner<'a> {
    exec: &'a dyn RemoteExecutor,
    environment: &'a str,
    vars: &'a HashMap<String, String>,
    dir: &'a str,
    cancel: Option<&'a CancelFlag>,
}

impl HostStepRunner<'_> {
    fn check_cancel(&self, task: &str) -> Result<()> {
        match self.cancel {
            Some(flag) if flag.is_cancelled() => Err(Error::deploy_cancelled(format!("task {}", task))),
            _ => Ok(()),
        }
    }
}

impl StepRunner for HostStepRunner<'_> {
    fn remote(&mut self, task: &str, command: &str) -> Result<()> {
        self.check_cancel(task)?;
        let rendered = render_map(command, self.vars);
        log_status!("task", "[{}] {}: {}", self.exec.host(), task, rendered);

        self.exec
            .execute_checked(&shell::in_dir(self.dir, &rendered))
            .map(|_| ())
            .map_err(|e| e.with_detail("task", task))
    }

    fn local(&mut self, task: &str, command: &str) -> Result<()> {
        self.check_cancel(task)?;
        let rendered = render_map(command, self.vars);
        log_status!("task", "[local] {}: {}", task, rendered);

        let env = [
            ("SHIPWRIGHT_ENVIRONMENT", self.environment),
            ("SHIPWRIGHT_HOST", self.exec.host()),
        ];
        let output = execute_local_command_in_dir(&rendered, None, Some(&env[..]))?;
        if output.success {
            return Ok(());
        }

        Err(Error::local_command_failed(CommandFailedDetails {
            command: rendered,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            target: TargetDetails {
                environment: Some(self.environment.to_string()),
                host: None,
            },
        })
        .with_detail("task", task))
    }
}

// =============================================================================
// Deployer
// =============================================================================

/// A release that finished preparation on one host, with the task session
/// that prepared it so launch hooks share its memoization.
struct Prepared<'g> {
    release: Release,
    linked: Vec<LinkOutcome>,
    build_task: Option<String>,
    session: TaskSession<'g>,
    phase: DeployPhase,
}

/// Drives releases for one resolved environment across its hosts.
pub struct Deployer {
    environment: Environment,
    graph: TaskGraph,
    executors: Vec<Box<dyn RemoteExecutor>>,
    cancel: CancelFlag,
}

impl Deployer {
    /// Build an SSH client per host of `environment`.
    pub fn connect(environment: Environment, graph: TaskGraph, ssh: &SshDefaults) -> Result<Self> {
        let mut executors: Vec<Box<dyn RemoteExecutor>> = Vec::with_capacity(environment.hosts.len());
        for host in &environment.hosts {
            executors.push(Box::new(SshClient::for_host(&environment, host, ssh)?));
        }
        Ok(Self::with_executors(environment, graph, executors))
    }

    pub fn with_executors(
        environment: Environment,
        graph: TaskGraph,
        executors: Vec<Box<dyn RemoteExecutor>>,
    ) -> Self {
        Self {
            environment,
            graph,
            executors,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn layout(&self) -> ReleaseLayout {
        self.environment.layout()
    }

    // -------------------------------------------------------------------------
    // deploy
    // -------------------------------------------------------------------------

    /// Stage, prepare and activate a new release on every host.
    ///
    /// Nothing is activated unless preparation succeeded (on every host in
    /// atomic mode). A failed release directory is left on the host.
    pub fn deploy(&self) -> Result<DeployReport> {
        let env = &self.environment;
        log_status!(
            "deploy",
            "Deploying {} ({}) to {} host(s), {:?} activation",
            env.name,
            env.git_ref,
            self.executors.len(),
            env.activation
        );

        self.check_cancel("lock")?;
        let locks = self.lock_all()?;

        let mut prepared = match env.activation {
            ActivationMode::Atomic => {
                let mut prepared = self.for_each_host(|exec| self.prepare(exec))?;
                self.check_cancel("activation")?;
                self.switch_all(&mut prepared)?;
                self.launch_all(&mut prepared)?;
                prepared
            }
            ActivationMode::Rolling => self.for_each_host(|exec| {
                let mut host = self.prepare(exec)?;
                self.go_live(exec, &mut host)?;
                Ok(host)
            })?,
        };

        let keep_retired = env.keep_releases.saturating_sub(1);
        let layout = self.layout();
        let mut hosts = Vec::with_capacity(prepared.len());
        for (exec, host) in self.executors.iter().zip(prepared.iter_mut()) {
            let mut warnings = Vec::new();
            let pruned = match retention::prune(&**exec, &layout, keep_retired) {
                Ok(report) => {
                    for failure in &report.failed {
                        warnings.push(format!("Could not prune release {}: {}", failure.id, failure.error));
                    }
                    Some(report)
                }
                Err(e) => {
                    log_status!("prune", "Skipped pruning on {}: {}", exec.host(), e.message);
                    warnings.push(format!("Pruning skipped: {}", e.message));
                    None
                }
            };
            host.phase = DeployPhase::CleanedUp;

            hosts.push(HostDeployReport {
                host: exec.host().to_string(),
                release_id: host.release.id,
                release_path: host.release.path.clone(),
                phase: host.phase,
                linked: std::mem::take(&mut host.linked),
                build_task: host.build_task.take(),
                pruned,
                warnings,
            });
        }

        release_locks(locks);
        log_status!("deploy", "Deployed {} ({})", env.name, env.git_ref);

        Ok(DeployReport {
            environment: env.name.clone(),
            git_ref: env.git_ref.clone(),
            activation: env.activation,
            phase: DeployPhase::CleanedUp,
            hosts,
        })
    }

    fn prepare<'s>(&'s self, exec: &dyn RemoteExecutor) -> Result<Prepared<'s>> {
        let layout = self.layout();
        self.check_cancel("release staging")?;

        let mut release = release::begin_release(exec, &layout, &self.environment.git_ref)?;
        let mut phase = DeployPhase::Resolved;

        match self.stage(exec, &layout, &mut release, &mut phase) {
            Ok((linked, build_task, session)) => Ok(Prepared {
                release,
                linked,
                build_task,
                session,
                phase,
            }),
            Err(e) => {
                log_status!(
                    "deploy",
                    "Aborted on {} after {:?}; release {} kept at {}",
                    exec.host(),
                    phase,
                    release.id,
                    release.path
                );
                let hint = format!(
                    "Release {} was left at {} on {} for inspection; the previous release is still live",
                    release.id,
                    release.path,
                    exec.host()
                );
                Err(e
                    .with_detail("releaseId", release.id)
                    .with_detail("releasePath", &release.path)
                    .with_detail("phase", DeployPhase::Aborted)
                    .with_detail("lastPhase", phase)
                    .with_hint(hint))
            }
        }
    }

    fn stage<'s>(
        &'s self,
        exec: &dyn RemoteExecutor,
        layout: &ReleaseLayout,
        release: &mut Release,
        phase: &mut DeployPhase,
    ) -> Result<(Vec<LinkOutcome>, Option<String>, TaskSession<'s>)> {
        let env = &self.environment;
        let vars = self.release_vars(exec.host(), release);

        let checkout = render_map(&env.checkout_command, &checkout_vars(&vars));
        let checkout = if template::is_present(&env.checkout_command, TemplateVars::RELEASE_PATH) {
            checkout
        } else {
            shell::in_dir(&release.path, &checkout)
        };
        log_status!("deploy", "[{}] Checking out {} into {}", exec.host(), env.git_ref, release.path);
        exec.execute_checked(&checkout)?;
        *phase = DeployPhase::ReleaseStaged;

        self.check_cancel("shared linking")?;
        let linked = shared::link(
            exec,
            layout,
            &release.path,
            &SharedPaths {
                files: &env.shared_files,
                dirs: &env.shared_dirs,
            },
        )?;
        *phase = DeployPhase::SharedLinked;

        self.check_cancel("build")?;
        let mut session = self.graph.session();
        let build_task = if self.graph.contains(&env.build_task) {
            let mut runner = HostStepRunner {
                exec,
                environment: &env.name,
                vars: &vars,
                dir: &release.path,
                cancel: Some(&self.cancel),
            };
            session.run(&env.build_task, &mut runner)?;
            Some(env.build_task.clone())
        } else {
            log_status!(
                "deploy",
                "Warning: build task '{}' is not defined, skipping build",
                env.build_task
            );
            None
        };

        release::mark_prepared(exec, layout, release)?;
        *phase = DeployPhase::Built;

        Ok((linked, build_task, session))
    }

    /// Activate a prepared release and run the launch hooks against it.
    fn go_live(&self, exec: &dyn RemoteExecutor, host: &mut Prepared<'_>) -> Result<()> {
        self.switch(exec, host)?;
        self.launch_prepared(exec, host)
    }

    fn switch(&self, exec: &dyn RemoteExecutor, host: &mut Prepared<'_>) -> Result<()> {
        let active = release::activate(exec, &self.layout(), host.release.id)?;
        host.release = active;
        host.phase = DeployPhase::Activated;
        Ok(())
    }

    fn launch_prepared(&self, exec: &dyn RemoteExecutor, host: &mut Prepared<'_>) -> Result<()> {
        let layout = self.layout();
        let vars = self.release_vars(exec.host(), &host.release);
        self.launch(exec, &layout, &vars, &mut host.session)
            .map_err(|e| {
                let hint = format!(
                    "Release {} is live on {} but its launch hooks did not complete",
                    host.release.id,
                    exec.host()
                );
                e.with_detail("releaseId", host.release.id).with_hint(hint)
            })
    }

    /// Swap `current` on every host. When one host refuses, hosts that
    /// already switched are pointed back at the release they served before.
    fn switch_all(&self, prepared: &mut [Prepared<'_>]) -> Result<()> {
        let layout = self.layout();
        let previous = self
            .executors
            .iter()
            .map(|exec| release::current_release(&**exec, &layout))
            .collect::<Result<Vec<_>>>()?;

        for (idx, (exec, host)) in self.executors.iter().zip(prepared.iter_mut()).enumerate() {
            if let Err(e) = self.switch(&**exec, host) {
                self.revert_activation(&previous[..idx]);
                return Err(e.with_hint(
                    "Hosts that had already switched were pointed back at their previous release",
                ));
            }
        }
        Ok(())
    }

    fn revert_activation(&self, previous: &[Option<u64>]) {
        let layout = self.layout();
        for (exec, previous) in self.executors.iter().zip(previous) {
            let exec = &**exec;
            let outcome = match previous {
                Some(id) => release::activate(exec, &layout, *id).map(|_| ()),
                None => exec
                    .execute_checked(&format!("rm -f {}", shell::quote_path(&layout.current())))
                    .map(|_| ()),
            };
            if let Err(e) = outcome {
                log_status!("deploy", "[{}] Could not revert current: {}", exec.host(), e.message);
            } else if previous.is_none() {
                log_status!("deploy", "[{}] Removed current", exec.host());
            }
        }
    }

    /// Run the launch hooks on every host, even after one fails.
    fn launch_all(&self, prepared: &mut [Prepared<'_>]) -> Result<()> {
        let mut failures: Vec<(String, Error)> = Vec::new();
        for (exec, host) in self.executors.iter().zip(prepared.iter_mut()) {
            if let Err(e) = self.launch_prepared(&**exec, host) {
                log_status!("deploy", "[{}] Launch hooks failed: {}", exec.host(), e.message);
                failures.push((exec.host().to_string(), e));
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        let failed_hosts: Vec<String> = failures.iter().map(|(host, _)| host.clone()).collect();
        let summary: Vec<serde_json::Value> = failures
            .iter()
            .map(|(host, e)| {
                serde_json::json!({
                    "host": host,
                    "code": e.code.as_str(),
                    "message": e.message,
                })
            })
            .collect();
        let hint = format!(
            "The new release is live on every host; launch hooks failed on {}",
            failed_hosts.join(", ")
        );

        let (_, first) = failures.remove(0);
        Err(first
            .with_detail("failedHosts", failed_hosts)
            .with_detail("launchFailures", summary)
            .with_hint(hint))
    }

    fn launch(
        &self,
        exec: &dyn RemoteExecutor,
        layout: &ReleaseLayout,
        vars: &HashMap<String, String>,
        session: &mut TaskSession<'_>,
    ) -> Result<()> {
        let current = layout.current();
        let mut runner = HostStepRunner {
            exec,
            environment: &self.environment.name,
            vars,
            dir: &current,
            cancel: None,
        };
        session.run(LAUNCH_TASK, &mut runner)
    }

    // -------------------------------------------------------------------------
    // setup
    // -------------------------------------------------------------------------

    /// Create the deploy root skeleton and run the `setup` task if defined.
    pub fn setup(&self) -> Result<Vec<HostSetupReport>> {
        let env = &self.environment;
        let layout = self.layout();

        let mut directories = vec![layout.releases(), layout.shared(), layout.meta()];
        for dir in &env.shared_dirs {
            directories.push(shell::join_path(&layout.shared(), dir));
        }
        for file in &env.shared_files {
            let path = shell::join_path(&layout.shared(), file);
            if let Some((parent, _)) = path.rsplit_once('/') {
                if !directories.iter().any(|d| d == parent) {
                    directories.push(parent.to_string());
                }
            }
        }

        let mkdir = format!(
            "mkdir -p {}",
            directories
                .iter()
                .map(|d| shell::quote_path(d))
                .collect::<Vec<_>>()
                .join(" ")
        );

        self.for_each_host(|exec| {
            log_status!("setup", "[{}] Preparing {}", exec.host(), layout.root());
            exec.execute_checked(&mkdir)?;

            let missing = shared::missing_files(exec, &layout, &env.shared_files)?;
            for file in &missing {
                log_status!(
                    "setup",
                    "[{}] Seed {} before the first deploy",
                    exec.host(),
                    shell::join_path(&layout.shared(), file)
                );
            }

            let setup_task_ran = if self.graph.contains(SETUP_TASK) {
                let vars = env.template_vars(exec.host());
                let mut runner = HostStepRunner {
                    exec,
                    environment: &env.name,
                    vars: &vars,
                    dir: layout.root(),
                    cancel: None,
                };
                self.graph.session().run(SETUP_TASK, &mut runner)?;
                true
            } else {
                false
            };

            Ok(HostSetupReport {
                host: exec.host().to_string(),
                deploy_to: layout.root().to_string(),
                directories: directories.clone(),
                missing_shared_files: missing,
                setup_task_ran,
            })
        })
    }

    // -------------------------------------------------------------------------
    // rollback
    // -------------------------------------------------------------------------

    /// Re-activate the newest retired release older than the active one.
    ///
    /// Targets are resolved on every host before any host switches.
    pub fn rollback(&self) -> Result<Vec<RollbackReport>> {
        let layout = self.layout();
        let locks = self.lock_all()?;

        let targets = self.for_each_host(|exec| {
            let releases = release::list_releases(exec, &layout)?;
            let active = releases
                .iter()
                .find(|r| r.status == ReleaseStatus::Active)
                .ok_or_else(|| Error::release_not_found(exec.host(), "No release is active"))?;
            let target = releases
                .iter()
                .filter(|r| r.status == ReleaseStatus::Retired && r.id < active.id)
                .max_by_key(|r| r.id)
                .ok_or_else(|| {
                    Error::release_not_found(
                        exec.host(),
                        format!("No retired release older than {} to roll back to", active.id),
                    )
                })?;
            Ok((active.id, target.id))
        })?;

        let mut reports = Vec::with_capacity(targets.len());
        for (exec, (from, to)) in self.executors.iter().zip(targets) {
            let exec = &**exec;
            log_status!("rollback", "[{}] Rolling back from {} to {}", exec.host(), from, to);
            let active = release::activate(exec, &layout, to)?;
            let vars = self.release_vars(exec.host(), &active);
            let mut session = self.graph.session();
            self.launch(exec, &layout, &vars, &mut session)?;
            reports.push(RollbackReport {
                host: exec.host().to_string(),
                from,
                to,
                release_path: active.path,
            });
        }

        release_locks(locks);
        Ok(reports)
    }

    // -------------------------------------------------------------------------
    // run / prune / releases / unlock
    // -------------------------------------------------------------------------

    /// Run a registered task against the live release on every host.
    pub fn run_task(&self, name: &str) -> Result<Vec<TaskRunReport>> {
        if !self.graph.contains(name) {
            return Err(Error::task_not_found(name, None));
        }
        let layout = self.layout();

        self.for_each_host(|exec| {
            let id = release::current_release(exec, &layout)?.ok_or_else(|| {
                Error::release_not_found(exec.host(), "Nothing is deployed yet")
                    .with_hint("Run 'shipwright deploy <env>' first")
            })?;

            let mut vars = self.environment.template_vars(exec.host());
            vars.insert(TemplateVars::RELEASE_PATH.to_string(), layout.release(id));
            vars.insert(TemplateVars::RELEASE_ID.to_string(), id.to_string());

            let current = layout.current();
            let mut runner = HostStepRunner {
                exec,
                environment: &self.environment.name,
                vars: &vars,
                dir: &current,
                cancel: None,
            };
            let mut session = self.graph.session();
            session.run(name, &mut runner)?;

            Ok(TaskRunReport {
                host: exec.host().to_string(),
                task: name.to_string(),
                release_id: id,
                completed: session.completed().to_vec(),
            })
        })
    }

    /// Prune under the deploy lock. `keep` counts releases left on disk,
    /// the active one included.
    pub fn prune(&self, keep: Option<usize>) -> Result<Vec<PruneReport>> {
        let keep = keep.unwrap_or(self.environment.keep_releases);
        let layout = self.layout();
        let locks = self.lock_all()?;
        let reports = self.for_each_host(|exec| retention::prune(exec, &layout, keep.saturating_sub(1)))?;
        release_locks(locks);
        Ok(reports)
    }

    pub fn releases(&self) -> Result<Vec<HostReleases>> {
        let layout = self.layout();
        self.for_each_host(|exec| {
            let releases = release::list_releases(exec, &layout)?;
            let current = releases
                .iter()
                .find(|r| r.status == ReleaseStatus::Active)
                .map(|r| r.id);
            Ok(HostReleases {
                host: exec.host().to_string(),
                current,
                releases,
            })
        })
    }

    /// Remove the deploy lock on every host, whoever holds it.
    pub fn unlock(&self) -> Result<Vec<UnlockReport>> {
        let layout = self.layout();
        self.for_each_host(|exec| {
            let owner = lock::force_unlock(exec, &layout)?;
            if let Some(owner) = &owner {
                log_status!("lock", "[{}] Removed lock held by {}", exec.host(), owner);
            }
            Ok(UnlockReport {
                host: exec.host().to_string(),
                removed: owner.is_some(),
                owner: owner.filter(|o| !o.is_empty()),
            })
        })
    }

    // -------------------------------------------------------------------------
    // helpers
    // -------------------------------------------------------------------------

    fn check_cancel(&self, phase: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            log_status!("deploy", "Cancelled during {}", phase);
            return Err(Error::deploy_cancelled(phase));
        }
        Ok(())
    }

    /// Acquire the deploy lock on every host. Locks already taken are
    /// released again when a later host refuses.
    fn lock_all(&self) -> Result<Vec<DeployLock<'_>>> {
        let layout = self.layout();
        self.executors
            .iter()
            .map(|exec| DeployLock::acquire(&**exec, &layout, &self.environment.name))
            .collect()
    }

    fn release_vars(&self, host: &str, release: &Release) -> HashMap<String, String> {
        let mut vars = self.environment.template_vars(host);
        vars.insert(TemplateVars::RELEASE_PATH.to_string(), release.path.clone());
        vars.insert(TemplateVars::RELEASE_ID.to_string(), release.id.to_string());
        vars.insert(TemplateVars::REF.to_string(), release.git_ref.clone());
        vars
    }

    /// Run `f` for every host in order, `max_parallel_hosts` at a time. The
    /// first error stops hosts that have not started yet.
    fn for_each_host<'s, T, F>(&'s self, f: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&'s dyn RemoteExecutor) -> Result<T> + Sync,
    {
        let width = self.environment.max_parallel_hosts.max(1);
        let mut results = Vec::with_capacity(self.executors.len());

        for chunk in self.executors.chunks(width) {
            if let [exec] = chunk {
                results.push(f(&**exec)?);
                continue;
            }

            let outcomes: Vec<Result<T>> = thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|exec| {
                        let f = &f;
                        scope.spawn(move || f(&**exec))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle
                            .join()
                            .unwrap_or_else(|_| Err(Error::internal_unexpected("host worker panicked")))
                    })
                    .collect()
            });

            for outcome in outcomes {
                results.push(outcome?);
            }
        }

        Ok(results)
    }
}

/// Variables for the checkout command, with the values it splices in as bare
/// shell words quoted.
fn checkout_vars(vars: &HashMap<String, String>) -> HashMap<String, String> {
    let mut quoted = vars.clone();
    for key in [TemplateVars::REF, TemplateVars::REPOSITORY, TemplateVars::RELEASE_PATH] {
        if let Some(value) = quoted.get_mut(key) {
            *value = shell::quote_arg(value);
        }
    }
    quoted
}

fn release_locks(locks: Vec<DeployLock<'_>>) {
    for lock in locks {
        let path = lock.path().to_string();
        if let Err(e) = lock.release() {
            log_status!("lock", "Could not release {}: {}", path, e.message);
        }
    }
}
