use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod codes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigNotFound,
    ConfigMissingKey,
    ConfigInvalidJson,
    ConfigInvalidToml,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    EnvironmentNotFound,
    TaskNotFound,
    TaskCyclicDependency,
    ReleaseNotFound,

    SshIdentityFileNotFound,
    SshConnectFailed,

    RemoteCommandFailed,
    LocalCommandFailed,

    ReleaseCreateFailed,
    ReleaseActivationFailed,
    SharedPathMissing,
    DeployInProgress,
    DeployCancelled,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigNotFound => "config.not_found",
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidToml => "config.invalid_toml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::EnvironmentNotFound => "environment.not_found",
            ErrorCode::TaskNotFound => "task.not_found",
            ErrorCode::TaskCyclicDependency => "task.cyclic_dependency",
            ErrorCode::ReleaseNotFound => "release.not_found",

            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",
            ErrorCode::SshConnectFailed => "ssh.connect_failed",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",
            ErrorCode::LocalCommandFailed => "local.command_failed",

            ErrorCode::ReleaseCreateFailed => "release.create_failed",
            ErrorCode::ReleaseActivationFailed => "release.activation_failed",
            ErrorCode::SharedPathMissing => "shared.path_missing",
            ErrorCode::DeployInProgress => "deploy.in_progress",
            ErrorCode::DeployCancelled => "deploy.cancelled",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

// ============================================================================
// Detail payloads
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotFoundDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigParseDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub target: TargetDetails,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectFailedDetails {
    pub host: String,
    pub attempts: u32,
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshIdentityFileNotFoundDetails {
    pub host: String,
    pub identity_file: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseFailureDetails {
    pub host: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_id: Option<u64>,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedPathMissingDetails {
    pub host: String,
    pub path: String,
    pub canonical_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CyclicDependencyDetails {
    pub task: String,
    pub cycle: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownTaskDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_by: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployInProgressDetails {
    pub host: String,
    pub lock_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

fn to_details<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            format!("Invalid argument: {}", problem),
            details,
        )
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    pub fn config_not_found(tried: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ConfigNotFound,
            "No shipwright configuration file found",
            serde_json::json!({ "tried": tried }),
        )
        .with_hint("Create shipwright.json (or shipwright.toml) or pass --config <path>")
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let key = key.into();
        Self::new(
            ErrorCode::ConfigMissingKey,
            format!("Missing required configuration key '{}'", key),
            to_details(ConfigMissingKeyDetails { key, path }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            to_details(ConfigParseDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_toml(path: impl Into<String>, err: toml::de::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidToml,
            "Invalid TOML in configuration",
            to_details(ConfigParseDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let key = key.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value for '{}': {}", key, problem),
            to_details(ConfigInvalidValueDetails {
                key,
                value,
                problem,
            }),
        )
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub fn environment_not_found(name: impl Into<String>, available: Vec<String>) -> Self {
        let name = name.into();
        let hint = if available.is_empty() {
            "No environments are configured; add one under \"environments\"".to_string()
        } else {
            format!("Available environments: {}", available.join(", "))
        };

        Self::new(
            ErrorCode::EnvironmentNotFound,
            format!("Unknown environment '{}'", name),
            to_details(NotFoundDetails {
                id: name,
                available,
            }),
        )
        .with_hint(hint)
    }

    pub fn task_not_found(name: impl Into<String>, referenced_by: Option<String>) -> Self {
        let name = name.into();
        let message = match &referenced_by {
            Some(parent) => format!("Task '{}' depends on unknown task '{}'", parent, name),
            None => format!("Unknown task '{}'", name),
        };

        Self::new(
            ErrorCode::TaskNotFound,
            message,
            to_details(UnknownTaskDetails {
                id: name,
                referenced_by,
            }),
        )
        .with_hint("Run 'shipwright tasks' to see registered tasks")
    }

    pub fn task_cyclic_dependency(task: impl Into<String>, cycle: Vec<String>) -> Self {
        let task = task.into();
        Self::new(
            ErrorCode::TaskCyclicDependency,
            format!("Task '{}' introduces a dependency cycle: {}", task, cycle.join(" -> ")),
            to_details(CyclicDependencyDetails { task, cycle }),
        )
    }

    pub fn release_not_found(host: impl Into<String>, problem: impl Into<String>) -> Self {
        let host = host.into();
        let problem = problem.into();
        Self::new(
            ErrorCode::ReleaseNotFound,
            format!("{} on {}", problem, host),
            serde_json::json!({ "host": host, "problem": problem }),
        )
    }

    // ------------------------------------------------------------------------
    // Transport and commands
    // ------------------------------------------------------------------------

    pub fn ssh_identity_file_not_found(
        host: impl Into<String>,
        identity_file: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            "SSH identity file not found",
            to_details(SshIdentityFileNotFoundDetails {
                host: host.into(),
                identity_file: identity_file.into(),
            }),
        )
    }

    pub fn ssh_connect_failed(host: impl Into<String>, attempts: u32, stderr: impl Into<String>) -> Self {
        let host = host.into();
        let mut err = Self::new(
            ErrorCode::SshConnectFailed,
            format!("Could not connect to {}", host),
            to_details(ConnectFailedDetails {
                host,
                attempts,
                stderr: stderr.into(),
            }),
        )
        .with_hint("Set ssh.reconnectAttempts in ~/.config/shipwright/shipwright.json to retry transport failures");
        err.retryable = Some(true);
        err
    }

    pub fn remote_command_failed(details: CommandFailedDetails) -> Self {
        let message = format!(
            "Remote command failed (exit {}): {}",
            details.exit_code, details.command
        );
        Self::new(ErrorCode::RemoteCommandFailed, message, to_details(details))
    }

    pub fn local_command_failed(details: CommandFailedDetails) -> Self {
        let message = format!(
            "Local command failed (exit {}): {}",
            details.exit_code, details.command
        );
        Self::new(ErrorCode::LocalCommandFailed, message, to_details(details))
    }

    // ------------------------------------------------------------------------
    // Releases
    // ------------------------------------------------------------------------

    pub fn release_create_failed(details: ReleaseFailureDetails) -> Self {
        Self::new(
            ErrorCode::ReleaseCreateFailed,
            format!("Could not create release directory on {}", details.host),
            to_details(details),
        )
        .with_hint("Check free disk space and permissions under the deploy root, or run 'shipwright setup <env>'")
    }

    pub fn release_activation_failed(details: ReleaseFailureDetails) -> Self {
        let current = format!(
            "Verify which release is serving: readlink {}/current",
            details
                .path
                .rsplit_once("/releases/")
                .map(|(root, _)| root)
                .unwrap_or(&details.path)
        );
        Self::new(
            ErrorCode::ReleaseActivationFailed,
            format!("Could not activate release on {}", details.host),
            to_details(details),
        )
        .with_hint("Activation may be incomplete; the serving release must be verified manually")
        .with_hint(current)
    }

    pub fn shared_path_missing(details: SharedPathMissingDetails) -> Self {
        let hint = format!(
            "Seed '{}' on {} before deploying (shared files are not created automatically)",
            details.canonical_path, details.host
        );
        Self::new(
            ErrorCode::SharedPathMissing,
            format!("Shared path '{}' is missing on {}", details.path, details.host),
            to_details(details),
        )
        .with_hint(hint)
    }

    pub fn deploy_in_progress(details: DeployInProgressDetails) -> Self {
        let hint = format!(
            "If no deploy is running, remove the stale lock with 'shipwright unlock <env>' ({})",
            details.lock_path
        );
        Self::new(
            ErrorCode::DeployInProgress,
            format!("Another deploy holds the lock on {}", details.host),
            to_details(details),
        )
        .with_hint(hint)
    }

    pub fn deploy_cancelled(phase: impl Into<String>) -> Self {
        let phase = phase.into();
        Self::new(
            ErrorCode::DeployCancelled,
            format!("Deploy cancelled by operator during {}", phase),
            serde_json::json!({ "phase": phase }),
        )
    }

    // ------------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------------

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Attach a detail field, turning non-object details into an object.
    pub fn with_detail(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        let mut map = match std::mem::take(&mut self.details) {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("cause".to_string(), other);
                map
            }
        };
        map.insert(key.to_string(), value);
        self.details = Value::Object(map);
        self
    }
}
