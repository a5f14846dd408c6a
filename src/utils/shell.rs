//! Shell escaping and quoting utilities.
//!
//! Every path and value interpolated into a remote command goes through
//! these helpers; the remote side always runs `sh`.

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a single argument for shell execution.
/// - Empty strings become `''`
/// - Strings with shell metacharacters are wrapped in single quotes
/// - Embedded single quotes are escaped
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }

    const SHELL_META: &[char] = &[
        ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}',
        '<', '>', '|', '&', ';', '#', '~',
    ];

    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }

    format!("'{}'", escape_single_quote_content(arg))
}

/// Quote a path for shell execution (always quotes).
pub fn quote_path(path: &str) -> String {
    format!("'{}'", escape_single_quote_content(path))
}

/// Prefix a command with a `cd` into `dir`, aborting if the directory is gone.
pub fn in_dir(dir: &str, command: &str) -> String {
    format!("cd {} && {}", quote_path(dir), command)
}

/// Join script lines into one `sh -c` payload that stops at the first failure.
pub fn script(lines: &[String]) -> String {
    let mut out = String::from("set -e");
    for line in lines {
        out.push('\n');
        out.push_str(line);
    }
    out
}

/// Join a base path and a relative path with exactly one slash.
pub fn join_path(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    if rel.is_empty() {
        return base.to_string();
    }
    if base.is_empty() {
        return format!("/{}", rel);
    }
    format!("{}/{}", base, rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_arg_simple() {
        assert_eq!(quote_arg("Deployment"), "Deployment");
        assert_eq!(quote_arg("r1"), "r1");
    }

    #[test]
    fn quote_arg_with_spaces() {
        assert_eq!(quote_arg("hello world"), "'hello world'");
    }

    #[test]
    fn quote_arg_with_single_quote() {
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
    }

    #[test]
    fn quote_arg_empty() {
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn quote_path_simple() {
        assert_eq!(quote_path("/www/peerly"), "'/www/peerly'");
    }

    #[test]
    fn quote_path_with_quote() {
        assert_eq!(quote_path("/var/www/it's"), "'/var/www/it'\\''s'");
    }

    #[test]
    fn in_dir_quotes_directory() {
        assert_eq!(
            in_dir("/www/app/releases/3", "make migrate"),
            "cd '/www/app/releases/3' && make migrate"
        );
    }

    #[test]
    fn script_starts_with_set_e() {
        let s = script(&["echo a".to_string(), "echo b".to_string()]);
        assert_eq!(s, "set -e\necho a\necho b");
    }

    #[test]
    fn join_path_normalizes_slashes() {
        assert_eq!(join_path("/www/app/", "/shared"), "/www/app/shared");
        assert_eq!(join_path("/www/app", ""), "/www/app");
        assert_eq!(join_path("", "x"), "/x");
    }
}
