use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file names, in lookup order.
pub const PROJECT_CONFIG_FILES: &[&str] = &["shipwright.json", "shipwright.toml"];

/// Base shipwright config directory (universal ~/.config/shipwright/ on all platforms)
pub fn shipwright() -> Result<PathBuf> {
    if let Ok(dir) = env::var("SHIPWRIGHT_CONFIG_DIR") {
        return Ok(PathBuf::from(dir));
    }

    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("shipwright"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("shipwright"))
    }
}

/// Global shipwright.json defaults file path
pub fn shipwright_json() -> Result<PathBuf> {
    Ok(shipwright()?.join("shipwright.json"))
}

/// Locate the project configuration: an explicit path wins, otherwise the
/// first known file name present in `dir`.
pub fn project_config(explicit: Option<&Path>, dir: &Path) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::config_not_found(vec![path.display().to_string()]));
    }

    let candidates: Vec<PathBuf> = PROJECT_CONFIG_FILES.iter().map(|f| dir.join(f)).collect();
    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| {
            Error::config_not_found(candidates.iter().map(|p| p.display().to_string()).collect())
        })
}
