use serde::Serialize;

use crate::error::{Error, Result, SharedPathMissingDetails};
use crate::release::ReleaseLayout;
use crate::ssh::{self, RemoteExecutor};
use crate::utils::shell;

/// Exit status the link script uses for a shared file that was never seeded.
const MISSING_SHARED_FILE: i32 = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedKind {
    File,
    Dir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Linked,
    AlreadyLinked,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOutcome {
    pub path: String,
    pub kind: SharedKind,
    pub link: String,
    pub target: String,
    pub status: LinkStatus,
}

/// Shared paths of one environment.
#[derive(Debug, Clone, Default)]
pub struct SharedPaths<'a> {
    pub files: &'a [String],
    pub dirs: &'a [String],
}

/// Link every shared path into `release_path`.
///
/// Directories are created under `shared/` when missing; files must already
/// exist there. Any copy of a shared path that came with the checkout is
/// replaced by the link.
pub fn link(
    exec: &dyn RemoteExecutor,
    layout: &ReleaseLayout,
    release_path: &str,
    shared: &SharedPaths<'_>,
) -> Result<Vec<LinkOutcome>> {
    let mut outcomes = Vec::with_capacity(shared.files.len() + shared.dirs.len());

    let entries = shared
        .dirs
        .iter()
        .map(|p| (p, SharedKind::Dir))
        .chain(shared.files.iter().map(|p| (p, SharedKind::File)));

    for (path, kind) in entries {
        let target = shell::join_path(&layout.shared(), path);
        let link = shell::join_path(release_path, path);
        let command = link_script(&target, &link, kind);

        let output = exec.execute(&command)?;
        if output.exit_code == MISSING_SHARED_FILE {
            return Err(Error::shared_path_missing(SharedPathMissingDetails {
                host: exec.host().to_string(),
                path: path.clone(),
                canonical_path: target,
            }));
        }
        if !output.success {
            return Err(ssh::command_failed(exec.host(), &command, output));
        }

        let status = if output.stdout.trim() == "already_linked" {
            LinkStatus::AlreadyLinked
        } else {
            LinkStatus::Linked
        };
        log_status!("shared", "{} -> {} ({:?})", link, target, status);

        outcomes.push(LinkOutcome {
            path: path.clone(),
            kind,
            link,
            target,
            status,
        });
    }

    Ok(outcomes)
}

/// Shared files that do not exist yet under `shared/`.
pub fn missing_files(exec: &dyn RemoteExecutor, layout: &ReleaseLayout, files: &[String]) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for file in files {
        let target = shell::join_path(&layout.shared(), file);
        let output = exec.execute(&format!("[ -e {} ]", shell::quote_path(&target)))?;
        if !output.success {
            missing.push(file.clone());
        }
    }
    Ok(missing)
}

fn link_script(target: &str, link: &str, kind: SharedKind) -> String {
    let target_q = shell::quote_path(target);
    let link_q = shell::quote_path(link);

    let ensure_target = match kind {
        SharedKind::Dir => format!("mkdir -p {}", target_q),
        SharedKind::File => format!("[ -e {} ] || exit {}", target_q, MISSING_SHARED_FILE),
    };

    shell::script(&[
        ensure_target,
        format!("mkdir -p \"$(dirname {})\"", link_q),
        format!(
            "if [ -L {l} ] && [ \"$(readlink {l})\" = {t} ]; then echo already_linked; exit 0; fi",
            l = link_q,
            t = target_q
        ),
        format!("rm -rf {}", link_q),
        format!("ln -s {} {}", target_q, link_q),
        "echo linked".to_string(),
    ])
}
