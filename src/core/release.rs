//! Release directories on a host.
//!
//! Layout under the deploy root:
//!
//! ```text
//! <deploy_to>/
//!   releases/<id>/     one checkout per deploy
//!   meta/<id>.json     release record (ref and lifecycle timestamps)
//!   shared/            persistent files linked into every release
//!   current            symlink to the live release
//!   deploy.lock/       held while a deploy mutates the host
//!   .release_seq       last issued release id
//! ```
//!
//! A release's status is derived, never stored: `active` when `current`
//! points at it, `retired` when it has been active before, `staging`
//! otherwise.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ReleaseFailureDetails, Result};
use crate::ssh::RemoteExecutor;
use crate::utils::shell;

// ============================================================================
// Layout
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLayout {
    root: String,
}

impl ReleaseLayout {
    pub fn new(root: &str) -> Self {
        let trimmed = root.trim_end_matches('/');
        Self {
            root: if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() },
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn releases(&self) -> String {
        shell::join_path(&self.root, "releases")
    }

    pub fn release(&self, id: u64) -> String {
        shell::join_path(&self.releases(), &id.to_string())
    }

    pub fn current(&self) -> String {
        shell::join_path(&self.root, "current")
    }

    pub fn shared(&self) -> String {
        shell::join_path(&self.root, "shared")
    }

    pub fn meta(&self) -> String {
        shell::join_path(&self.root, "meta")
    }

    pub fn meta_file(&self, id: u64) -> String {
        shell::join_path(&self.meta(), &format!("{}.json", id))
    }

    pub fn lock_dir(&self) -> String {
        shell::join_path(&self.root, "deploy.lock")
    }
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStatus {
    Staging,
    Active,
    Retired,
}

/// Persisted form of a release in `meta/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRecord {
    pub id: u64,
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: u64,
    pub path: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub status: ReleaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepared_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

impl Release {
    fn from_record(layout: &ReleaseLayout, record: ReleaseRecord, current: Option<u64>) -> Self {
        let status = if current == Some(record.id) {
            ReleaseStatus::Active
        } else if record.activated_at.is_some() {
            ReleaseStatus::Retired
        } else {
            ReleaseStatus::Staging
        };

        Self {
            id: record.id,
            path: layout.release(record.id),
            git_ref: record.git_ref,
            status,
            created_at: record.created_at,
            prepared_at: record.prepared_at,
            activated_at: record.activated_at,
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Allocate the next release id and create its empty directory.
///
/// The counter read, increment and `mkdir` happen in one remote command. The
/// counter falls back to the highest existing release id when
/// `.release_seq` is missing.
pub fn begin_release(exec: &dyn RemoteExecutor, layout: &ReleaseLayout, git_ref: &str) -> Result<Release> {
    let created_at = Utc::now();
    let ref_json = serde_json::to_string(git_ref)
        .map_err(|e| Error::internal_json(e.to_string(), Some("encode ref".to_string())))?;

    let command = shell::script(&[
        format!("cd {}", shell::quote_path(layout.root())),
        "mkdir -p releases meta".to_string(),
        "if [ -f .release_seq ]; then n=$(cat .release_seq); else n=0; for d in releases/*; do i=${d#releases/}; case \"$i\" in ''|*[!0-9]*) continue ;; esac; if [ \"$i\" -gt \"$n\" ]; then n=$i; fi; done; fi".to_string(),
        "n=$((n + 1))".to_string(),
        "mkdir \"releases/$n\"".to_string(),
        "echo \"$n\" > .release_seq".to_string(),
        format!(
            "printf '{{\"id\":%s,\"ref\":%s,\"createdAt\":\"%s\"}}\\n' \"$n\" {} {} > \"meta/$n.json\"",
            shell::quote_path(&ref_json),
            shell::quote_path(&created_at.to_rfc3339()),
        ),
        "echo \"$n\"".to_string(),
    ]);

    let create_failed = |error: String| {
        Error::release_create_failed(ReleaseFailureDetails {
            host: exec.host().to_string(),
            path: layout.releases(),
            release_id: None,
            error,
        })
    };

    let output = exec.execute(&command)?;
    if !output.success {
        return Err(create_failed(output.stderr.trim().to_string()));
    }

    let id = output
        .stdout
        .lines()
        .last()
        .and_then(|line| line.trim().parse::<u64>().ok())
        .ok_or_else(|| create_failed(format!("unexpected output: {}", output.stdout.trim())))?;

    log_status!("release", "Created release {} on {}", id, exec.host());

    Ok(Release {
        id,
        path: layout.release(id),
        git_ref: git_ref.to_string(),
        status: ReleaseStatus::Staging,
        created_at: Some(created_at),
        prepared_at: None,
        activated_at: None,
    })
}

/// Record that every preparation step of `release` succeeded.
pub fn mark_prepared(exec: &dyn RemoteExecutor, layout: &ReleaseLayout, release: &mut Release) -> Result<()> {
    let mut record = read_record(exec, layout, release.id)?.ok_or_else(|| {
        Error::release_not_found(exec.host(), format!("Release {} has no record", release.id))
    })?;
    let now = Utc::now();
    record.prepared_at = Some(now);
    write_record(exec, layout, &record)?;
    release.prepared_at = Some(now);
    Ok(())
}

/// Point `current` at `id`.
///
/// The new link is created beside `current` and renamed over it, so a reader
/// resolving `current` sees either the old or the new release.
pub fn activate(exec: &dyn RemoteExecutor, layout: &ReleaseLayout, id: u64) -> Result<Release> {
    let path = layout.release(id);
    let activation_failed = |error: String| {
        Error::release_activation_failed(ReleaseFailureDetails {
            host: exec.host().to_string(),
            path: path.clone(),
            release_id: Some(id),
            error,
        })
    };

    let exists = exec.execute(&format!("[ -d {} ]", shell::quote_path(&path)))?;
    if !exists.success {
        return Err(activation_failed(format!("{} does not exist", path)));
    }

    let mut record = read_record(exec, layout, id)?
        .ok_or_else(|| activation_failed(format!("release {} has no record", id)))?;
    if record.prepared_at.is_none() {
        return Err(activation_failed(format!(
            "release {} did not finish preparing",
            id
        )));
    }

    let command = shell::in_dir(
        layout.root(),
        &format!(
            "ln -sfn {} current.tmp && mv -Tf current.tmp current",
            shell::quote_path(&format!("releases/{}", id))
        ),
    );
    let output = exec.execute(&command)?;
    if !output.success {
        return Err(activation_failed(output.stderr.trim().to_string()));
    }

    log_status!("release", "Activated release {} on {}", id, exec.host());

    record.activated_at = Some(Utc::now());
    if let Err(e) = write_record(exec, layout, &record) {
        log_status!(
            "release",
            "Release {} is live on {} but its record was not updated: {}",
            id,
            exec.host(),
            e.message
        );
    }

    Ok(Release::from_record(layout, record, Some(id)))
}

/// Id of the release `current` points at, if any.
pub fn current_release(exec: &dyn RemoteExecutor, layout: &ReleaseLayout) -> Result<Option<u64>> {
    let output = exec.execute(&format!(
        "readlink {} 2>/dev/null || true",
        shell::quote_path(&layout.current())
    ))?;
    Ok(parse_release_id(output.stdout.trim()))
}

/// Every release with a directory, sorted by id, with derived status.
pub fn list_releases(exec: &dyn RemoteExecutor, layout: &ReleaseLayout) -> Result<Vec<Release>> {
    let command = format!(
        "cd {} 2>/dev/null || exit 0\n\
         printf 'current=%s\\n' \"$(readlink current 2>/dev/null)\"\n\
         for d in releases/*; do\n\
           [ -d \"$d\" ] || continue\n\
           id=${{d#releases/}}\n\
           case \"$id\" in ''|*[!0-9]*) continue ;; esac\n\
           if [ -f \"meta/$id.json\" ]; then cat \"meta/$id.json\"; echo; else echo \"{{\\\"id\\\":$id}}\"; fi\n\
         done",
        shell::quote_path(layout.root())
    );
    let output = exec.execute_checked(&command)?;
    parse_listing(layout, &output.stdout)
}

pub(crate) fn parse_listing(layout: &ReleaseLayout, stdout: &str) -> Result<Vec<Release>> {
    let mut current = None;
    let mut records = Vec::new();

    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(target) = line.strip_prefix("current=") {
            current = parse_release_id(target);
            continue;
        }
        let record: ReleaseRecord = serde_json::from_str(line)
            .map_err(|e| Error::internal_json(e.to_string(), Some(format!("release record: {}", line))))?;
        records.push(record);
    }

    let mut releases: Vec<Release> = records
        .into_iter()
        .map(|r| Release::from_record(layout, r, current))
        .collect();
    releases.sort_by_key(|r| r.id);
    releases.dedup_by_key(|r| r.id);
    Ok(releases)
}

fn parse_release_id(target: &str) -> Option<u64> {
    let target = target.trim().trim_end_matches('/');
    let (parent, id) = target.rsplit_once('/')?;
    if !(parent == "releases" || parent.ends_with("/releases")) {
        return None;
    }
    id.parse().ok()
}

fn read_record(exec: &dyn RemoteExecutor, layout: &ReleaseLayout, id: u64) -> Result<Option<ReleaseRecord>> {
    let path = layout.meta_file(id);
    let output = exec.execute_checked(&format!(
        "if [ -f {p} ]; then cat {p}; fi",
        p = shell::quote_path(&path)
    ))?;

    let content = output.stdout.trim();
    if content.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(content)
        .map(Some)
        .map_err(|e| Error::internal_json(e.to_string(), Some(format!("parse {}", path))))
}

fn write_record(exec: &dyn RemoteExecutor, layout: &ReleaseLayout, record: &ReleaseRecord) -> Result<()> {
    let path = layout.meta_file(record.id);
    let json = serde_json::to_string(record)
        .map_err(|e| Error::internal_json(e.to_string(), Some("encode release record".to_string())))?;
    let tmp = format!("{}.tmp", path);
    exec.execute_checked(&format!(
        "printf '%s\\n' {} > {} && mv -f {} {}",
        shell::quote_path(&json),
        shell::quote_path(&tmp),
        shell::quote_path(&tmp),
        shell::quote_path(&path)
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::SshClient;

    fn layout_in(dir: &tempfile::TempDir) -> ReleaseLayout {
        ReleaseLayout::new(dir.path().to_str().unwrap())
    }

    #[test]
    fn layout_paths() {
        let layout = ReleaseLayout::new("/www/peerly-backend/");
        assert_eq!(layout.release(7), "/www/peerly-backend/releases/7");
        assert_eq!(layout.current(), "/www/peerly-backend/current");
        assert_eq!(layout.meta_file(7), "/www/peerly-backend/meta/7.json");
        assert_eq!(layout.lock_dir(), "/www/peerly-backend/deploy.lock");
    }

    #[test]
    fn parse_release_id_accepts_relative_and_absolute_targets() {
        assert_eq!(parse_release_id("releases/12"), Some(12));
        assert_eq!(parse_release_id("/www/app/releases/3/"), Some(3));
        assert_eq!(parse_release_id(""), None);
        assert_eq!(parse_release_id("/opt/elsewhere/3"), None);
    }

    #[test]
    fn begin_release_issues_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(&dir);
        let exec = SshClient::local();

        let first = begin_release(&exec, &layout, "r1").unwrap();
        let second = begin_release(&exec, &layout, "r2").unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.status, ReleaseStatus::Staging);
        assert!(dir.path().join("releases/2").is_dir());

        let releases = list_releases(&exec, &layout).unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[1].git_ref, "r2");
        assert!(releases.iter().all(|r| r.status == ReleaseStatus::Staging));
    }

    #[test]
    fn begin_release_does_not_reuse_ids_after_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(&dir);
        let exec = SshClient::local();

        begin_release(&exec, &layout, "r1").unwrap();
        std::fs::remove_dir(dir.path().join("releases/1")).unwrap();
        assert_eq!(begin_release(&exec, &layout, "r2").unwrap().id, 2);
    }

    #[test]
    fn begin_release_fails_when_directory_exists() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(&dir);
        std::fs::create_dir_all(dir.path().join("releases/1")).unwrap();
        std::fs::write(dir.path().join(".release_seq"), "0\n").unwrap();

        let err = begin_release(&SshClient::local(), &layout, "r1").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ReleaseCreateFailed);
    }

    #[test]
    fn refs_with_quotes_survive_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(&dir);
        let exec = SshClient::local();

        begin_release(&exec, &layout, "feature/it's \"odd\" 100%").unwrap();
        let releases = list_releases(&exec, &layout).unwrap();
        assert_eq!(releases[0].git_ref, "feature/it's \"odd\" 100%");
    }

    #[test]
    fn activate_requires_prepared_release() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(&dir);
        let exec = SshClient::local();

        let mut release = begin_release(&exec, &layout, "r1").unwrap();
        let err = activate(&exec, &layout, release.id).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ReleaseActivationFailed);
        assert!(!dir.path().join("current").exists());

        mark_prepared(&exec, &layout, &mut release).unwrap();
        let active = activate(&exec, &layout, release.id).unwrap();
        assert_eq!(active.status, ReleaseStatus::Active);
        assert_eq!(
            std::fs::read_link(dir.path().join("current")).unwrap(),
            std::path::PathBuf::from("releases/1")
        );
        assert_eq!(current_release(&exec, &layout).unwrap(), Some(1));
    }

    #[test]
    fn activate_missing_release_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = activate(&SshClient::local(), &layout_in(&dir), 9).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ReleaseActivationFailed);
    }

    #[test]
    fn previous_release_becomes_retired() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout_in(&dir);
        let exec = SshClient::local();

        for git_ref in ["r1", "r2"] {
            let mut release = begin_release(&exec, &layout, git_ref).unwrap();
            mark_prepared(&exec, &layout, &mut release).unwrap();
            activate(&exec, &layout, release.id).unwrap();
        }
        begin_release(&exec, &layout, "r3").unwrap();

        let statuses: Vec<ReleaseStatus> = list_releases(&exec, &layout)
            .unwrap()
            .into_iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(
            statuses,
            vec![ReleaseStatus::Retired, ReleaseStatus::Active, ReleaseStatus::Staging]
        );
    }

    #[test]
    fn listing_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ReleaseLayout::new(dir.path().join("absent").to_str().unwrap());
        assert!(list_releases(&SshClient::local(), &layout).unwrap().is_empty());
        assert_eq!(current_release(&SshClient::local(), &layout).unwrap(), None);
    }

    #[test]
    fn parse_listing_includes_directories_without_records() {
        let layout = ReleaseLayout::new("/www/app");
        let releases = parse_listing(
            &layout,
            "current=releases/2\n{\"id\":1}\n\n{\"id\":2,\"ref\":\"main\",\"activatedAt\":\"2026-01-02T03:04:05Z\"}\n",
        )
        .unwrap();
        assert_eq!(releases.len(), 2);
        assert_eq!(releases[0].status, ReleaseStatus::Staging);
        assert_eq!(releases[1].status, ReleaseStatus::Active);
        assert_eq!(releases[1].path, "/www/app/releases/2");
    }
}
