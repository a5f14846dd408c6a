use serde::Serialize;

use crate::error::Result;
use crate::release::{self, Release, ReleaseLayout, ReleaseStatus};
use crate::ssh::RemoteExecutor;
use crate::utils::shell;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub host: String,
    pub kept: Vec<u64>,
    pub removed: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<PruneFailure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneFailure {
    pub id: u64,
    pub error: String,
}

/// Release ids to delete so that at most `keep` retired releases remain.
///
/// Staging releases older than the active one are abandoned deploys and go
/// too. The active release and staging releases newer than it are never
/// selected.
pub fn plan(releases: &[Release], keep: usize) -> Vec<u64> {
    let active = releases
        .iter()
        .find(|r| r.status == ReleaseStatus::Active)
        .map(|r| r.id);

    let mut retired: Vec<u64> = releases
        .iter()
        .filter(|r| r.status == ReleaseStatus::Retired)
        .map(|r| r.id)
        .collect();
    retired.sort_unstable_by(|a, b| b.cmp(a));

    let mut doomed: Vec<u64> = retired.into_iter().skip(keep).collect();

    if let Some(active) = active {
        doomed.extend(
            releases
                .iter()
                .filter(|r| r.status == ReleaseStatus::Staging && r.id < active)
                .map(|r| r.id),
        );
    }

    doomed.sort_unstable();
    doomed
}

/// Delete releases selected by `plan`. A failed deletion is logged and
/// recorded; the pass continues with the next release.
pub fn prune(exec: &dyn RemoteExecutor, layout: &ReleaseLayout, keep: usize) -> Result<PruneReport> {
    let releases = release::list_releases(exec, layout)?;
    let doomed = plan(&releases, keep);

    let mut report = PruneReport {
        host: exec.host().to_string(),
        ..Default::default()
    };

    for release in &releases {
        if !doomed.contains(&release.id) {
            report.kept.push(release.id);
            continue;
        }

        let command = format!(
            "rm -rf {} && rm -f {}",
            shell::quote_path(&layout.release(release.id)),
            shell::quote_path(&layout.meta_file(release.id))
        );
        match exec.execute_checked(&command) {
            Ok(_) => {
                log_status!("prune", "Removed release {} on {}", release.id, exec.host());
                report.removed.push(release.id);
            }
            Err(e) => {
                log_status!(
                    "prune",
                    "Could not remove release {} on {}: {}",
                    release.id,
                    exec.host(),
                    e.message
                );
                report.failed.push(PruneFailure {
                    id: release.id,
                    error: e.message,
                });
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(id: u64, status: ReleaseStatus) -> Release {
        Release {
            id,
            path: format!("/www/app/releases/{}", id),
            git_ref: format!("r{}", id),
            status,
            created_at: None,
            prepared_at: None,
            activated_at: None,
        }
    }

    #[test]
    fn keeps_newest_retired() {
        use ReleaseStatus::*;
        let releases = vec![
            release(1, Retired),
            release(2, Retired),
            release(3, Retired),
            release(4, Active),
        ];
        assert_eq!(plan(&releases, 2), vec![1]);
        assert_eq!(plan(&releases, 0), vec![1, 2, 3]);
        assert!(plan(&releases, 10).is_empty());
    }

    #[test]
    fn never_selects_active_even_when_oldest() {
        use ReleaseStatus::*;
        let releases = vec![release(1, Active), release(2, Staging), release(3, Staging)];
        assert!(plan(&releases, 0).is_empty());
    }

    #[test]
    fn removes_abandoned_staging_below_active() {
        use ReleaseStatus::*;
        let releases = vec![
            release(1, Retired),
            release(2, Staging),
            release(3, Active),
            release(4, Staging),
        ];
        assert_eq!(plan(&releases, 5), vec![2]);
    }

    #[test]
    fn retired_newer_than_active_counts_toward_window() {
        use ReleaseStatus::*;
        // After a rollback from 3 to 2.
        let releases = vec![release(1, Retired), release(2, Active), release(3, Retired)];
        assert_eq!(plan(&releases, 1), vec![1]);
    }

    #[test]
    fn prune_deletes_directory_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let layout = ReleaseLayout::new(root.to_str().unwrap());
        std::fs::create_dir_all(root.join("meta")).unwrap();
        for id in 1..=3u64 {
            std::fs::create_dir_all(root.join(format!("releases/{}", id))).unwrap();
            std::fs::write(
                root.join(format!("meta/{}.json", id)),
                format!(
                    "{{\"id\":{},\"ref\":\"r{}\",\"activatedAt\":\"2026-01-0{}T00:00:00Z\"}}\n",
                    id, id, id
                ),
            )
            .unwrap();
        }
        std::os::unix::fs::symlink("releases/3", root.join("current")).unwrap();

        let report = prune(&crate::ssh::SshClient::local(), &layout, 1).unwrap();

        assert_eq!(report.removed, vec![1]);
        assert_eq!(report.kept, vec![2, 3]);
        assert!(report.failed.is_empty());
        assert!(!root.join("releases/1").exists());
        assert!(!root.join("meta/1.json").exists());
        assert!(root.join("releases/2").exists());
    }
}
