use super::ErrorCode;

pub fn all_codes() -> &'static [ErrorCode] {
    &[
        ErrorCode::ConfigNotFound,
        ErrorCode::ConfigMissingKey,
        ErrorCode::ConfigInvalidJson,
        ErrorCode::ConfigInvalidToml,
        ErrorCode::ConfigInvalidValue,
        ErrorCode::ValidationInvalidArgument,
        ErrorCode::EnvironmentNotFound,
        ErrorCode::TaskNotFound,
        ErrorCode::TaskCyclicDependency,
        ErrorCode::ReleaseNotFound,
        ErrorCode::SshIdentityFileNotFound,
        ErrorCode::SshConnectFailed,
        ErrorCode::RemoteCommandFailed,
        ErrorCode::LocalCommandFailed,
        ErrorCode::ReleaseCreateFailed,
        ErrorCode::ReleaseActivationFailed,
        ErrorCode::SharedPathMissing,
        ErrorCode::DeployInProgress,
        ErrorCode::DeployCancelled,
        ErrorCode::InternalIoError,
        ErrorCode::InternalJsonError,
        ErrorCode::InternalUnexpected,
    ]
}

pub fn parse_code(code: &str) -> Option<ErrorCode> {
    all_codes()
        .iter()
        .copied()
        .find(|candidate| candidate.as_str() == code)
}
