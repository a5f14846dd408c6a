// Public modules
pub mod config;
pub mod deploy;
pub mod environment;
pub mod error;
pub mod lock;
pub mod release;
pub mod retention;
pub mod shared;
pub mod ssh;
pub mod tasks;

// Public modules for CLI access
pub mod defaults;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use config::{ActivationMode, ProjectConfig};
pub use deploy::{CancelFlag, DeployPhase, DeployReport, Deployer};
pub use environment::Environment;
pub use error::{Error, ErrorCode, Result};
pub use release::{Release, ReleaseLayout, ReleaseStatus};
pub use tasks::{Step, StepRunner, TaskGraph};
