use thiserror::Error;

/// Errors related to framework construction and the worker pool.
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("worker thread setup failed: {0}")]
    ThreadSetup(String),
    #[error("internal runtime error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Errors related to registering actors in the mailbox directory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("an actor is already registered under the name {0:?}")]
    NameTaken(String),
    #[error("mailbox directory exhausted")]
    DirectoryFull,
}
