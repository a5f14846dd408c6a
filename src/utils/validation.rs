//! Input validation primitives.
//!
//! Provides ergonomic helpers for common validation patterns:
//! - Validating non-empty strings and collections
//! - Validating task and environment names
//! - Validating shared paths relative to the deploy root

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:-]*$").expect("name pattern is valid")
});

/// Require a string to be non-empty after trimming.
///
/// Returns a reference to the trimmed string on success.
pub fn require_non_empty<'a>(value: &'a str, field: &str, message: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(trimmed)
    }
}

/// Require a collection to be non-empty.
pub fn require_non_empty_vec<'a, T>(vec: &'a [T], field: &str, message: &str) -> Result<&'a [T]> {
    if vec.is_empty() {
        Err(Error::validation_invalid_argument(field, message, None, None))
    } else {
        Ok(vec)
    }
}

/// Validate an identifier used for tasks, hook points and environments.
///
/// Names may contain letters, digits, `_`, `.`, `:` and `-` and must start
/// with a letter or digit (`deploy:launch`, `loadData`, `staging`).
pub fn require_name(value: &str, field: &str) -> Result<()> {
    if NAME_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(Error::validation_invalid_argument(
            field,
            format!("'{}' is not a valid name", value),
            Some(value.to_string()),
            None,
        ))
    }
}

/// Validate a path that must stay inside the directory it is joined to.
pub fn require_relative_path(value: &str, field: &str) -> Result<()> {
    let trimmed = value.trim();
    let problem = if trimmed.is_empty() {
        Some("path is empty")
    } else if trimmed.starts_with('/') {
        Some("path must be relative")
    } else if trimmed.split('/').any(|segment| segment == "..") {
        Some("path must not contain '..'")
    } else {
        None
    };

    match problem {
        Some(problem) => Err(Error::config_invalid_value(
            field,
            Some(value.to_string()),
            problem,
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_non_empty_trims_whitespace() {
        let result = require_non_empty("  hello  ", "field", "msg");
        assert_eq!(result.unwrap(), "hello");
    }

    #[test]
    fn require_non_empty_fails_for_whitespace() {
        assert!(require_non_empty("   ", "field", "msg").is_err());
    }

    #[test]
    fn require_non_empty_vec_fails_for_empty() {
        let vec: Vec<String> = vec![];
        assert!(require_non_empty_vec(&vec, "hosts", "msg").is_err());
    }

    #[test]
    fn require_name_accepts_task_names() {
        for name in ["build", "deploy:launch", "loadData", "git.clone", "v2-setup"] {
            assert!(require_name(name, "task").is_ok(), "{}", name);
        }
    }

    #[test]
    fn require_name_rejects_shell_metacharacters() {
        for name in ["", ":launch", "rm -rf", "a;b", "$(x)"] {
            assert!(require_name(name, "task").is_err(), "{}", name);
        }
    }

    #[test]
    fn require_relative_path_rejects_escapes() {
        assert!(require_relative_path(".env", "sharedFiles").is_ok());
        assert!(require_relative_path("config/credentials.json", "sharedFiles").is_ok());
        assert!(require_relative_path("/etc/passwd", "sharedFiles").is_err());
        assert!(require_relative_path("../other/.env", "sharedFiles").is_err());
        assert!(require_relative_path("", "sharedFiles").is_err());
    }
}
