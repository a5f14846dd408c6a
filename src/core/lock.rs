//! Per-host deploy lock.
//!
//! The lock is the directory `<deploy_to>/deploy.lock`; `mkdir` either
//! creates it or fails, so two controllers can never both hold it. The
//! `owner` file inside identifies the holder. A guard only removes a lock
//! whose token it wrote.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{DeployInProgressDetails, Error, Result};
use crate::release::ReleaseLayout;
use crate::ssh::{self, RemoteExecutor};
use crate::utils::shell;

const LOCK_HELD: i32 = 75;
const ROOT_MISSING: i32 = 76;

pub struct DeployLock<'a> {
    exec: &'a dyn RemoteExecutor,
    path: String,
    token: String,
    released: bool,
}

impl<'a> DeployLock<'a> {
    pub fn acquire(exec: &'a dyn RemoteExecutor, layout: &ReleaseLayout, environment: &str) -> Result<Self> {
        let path = layout.lock_dir();
        let token = Uuid::new_v4().to_string();
        let owner = format!("{} {} {}", token, environment, Utc::now().to_rfc3339());
        let path_q = shell::quote_path(&path);

        let command = format!(
            "[ -d {root} ] || exit {missing}\n\
             if ! mkdir {lock} 2>/dev/null; then cat {lock}/owner 2>/dev/null; exit {held}; fi\n\
             printf '%s\\n' {owner} > {lock}/owner",
            root = shell::quote_path(layout.root()),
            missing = ROOT_MISSING,
            lock = path_q,
            held = LOCK_HELD,
            owner = shell::quote_path(&owner),
        );

        let output = exec.execute(&command)?;
        match output.exit_code {
            0 => {}
            LOCK_HELD => {
                let owner = output.stdout.trim();
                return Err(Error::deploy_in_progress(DeployInProgressDetails {
                    host: exec.host().to_string(),
                    lock_path: path,
                    owner: (!owner.is_empty()).then(|| owner.to_string()),
                }));
            }
            ROOT_MISSING => {
                return Err(Error::release_not_found(
                    exec.host(),
                    format!("Deploy root {} does not exist", layout.root()),
                )
                .with_hint("Run 'shipwright setup <env>' first"));
            }
            _ => return Err(ssh::command_failed(exec.host(), &command, output)),
        }

        log_status!("lock", "Acquired {} on {}", path, exec.host());

        Ok(Self {
            exec,
            path,
            token,
            released: false,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Remove the lock if it still carries this guard's token.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.remove()
    }

    fn remove(&self) -> Result<()> {
        let path_q = shell::quote_path(&self.path);
        let command = format!(
            "if [ \"$(cut -d' ' -f1 {lock}/owner 2>/dev/null)\" = {token} ]; then rm -rf {lock}; fi",
            lock = path_q,
            token = shell::quote_path(&self.token),
        );
        self.exec.execute_checked(&command)?;
        log_status!("lock", "Released {} on {}", self.path, self.exec.host());
        Ok(())
    }
}

impl Drop for DeployLock<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.remove() {
            log_status!("lock", "Could not release {}: {}", self.path, e.message);
        }
    }
}

/// Remove the lock regardless of owner. Returns the previous owner line when
/// a lock was present.
pub fn force_unlock(exec: &dyn RemoteExecutor, layout: &ReleaseLayout) -> Result<Option<String>> {
    let path_q = shell::quote_path(&layout.lock_dir());
    let output = exec.execute_checked(&format!(
        "if [ -d {lock} ]; then echo \"held $(cat {lock}/owner 2>/dev/null)\"; rm -rf {lock}; fi",
        lock = path_q
    ))?;

    Ok(output
        .stdout
        .trim()
        .strip_prefix("held")
        .map(|owner| owner.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::ssh::SshClient;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ReleaseLayout::new(dir.path().to_str().unwrap());
        let exec = SshClient::local();

        let lock = DeployLock::acquire(&exec, &layout, "staging").unwrap();
        let err = DeployLock::acquire(&exec, &layout, "staging").err().unwrap();
        assert_eq!(err.code, ErrorCode::DeployInProgress);
        assert!(err.details["owner"].as_str().unwrap().contains("staging"));

        lock.release().unwrap();
        assert!(!dir.path().join("deploy.lock").exists());
        DeployLock::acquire(&exec, &layout, "staging").unwrap();
    }

    #[test]
    fn drop_releases_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ReleaseLayout::new(dir.path().to_str().unwrap());
        let exec = SshClient::local();

        {
            let _lock = DeployLock::acquire(&exec, &layout, "staging").unwrap();
            assert!(dir.path().join("deploy.lock/owner").is_file());
        }
        assert!(!dir.path().join("deploy.lock").exists());
    }

    #[test]
    fn release_leaves_a_foreign_lock_alone() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ReleaseLayout::new(dir.path().to_str().unwrap());
        let exec = SshClient::local();

        let lock = DeployLock::acquire(&exec, &layout, "staging").unwrap();
        std::fs::write(dir.path().join("deploy.lock/owner"), "other-token staging now\n").unwrap();
        lock.release().unwrap();
        assert!(dir.path().join("deploy.lock").exists());

        let previous = force_unlock(&exec, &layout).unwrap();
        assert_eq!(previous.as_deref(), Some("other-token staging now"));
        assert!(!dir.path().join("deploy.lock").exists());
        assert_eq!(force_unlock(&exec, &layout).unwrap(), None);
    }

    #[test]
    fn missing_root_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ReleaseLayout::new(dir.path().join("absent").to_str().unwrap());
        let err = DeployLock::acquire(&SshClient::local(), &layout, "staging").err().unwrap();
        assert_eq!(err.code, ErrorCode::ReleaseNotFound);
        assert!(!dir.path().join("absent").exists());
    }
}
