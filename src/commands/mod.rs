//! CLI command implementations

mod boot;
mod build;
mod show;
mod verify;

pub use boot::run_boot;
pub use build::run_build;
pub use show::run_show;
pub use verify::run_verify;

/// CLI-level errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("profile error: {0}")]
    Profile(String),

    #[error("{0}")]
    Engine(#[from] pfr_core::Error),

    #[error("verification failed at {0}")]
    Auth(pfr_core::auth::AuthFailure),

    #[error("{0}")]
    Usage(String),
}
