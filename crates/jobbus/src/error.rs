use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobBusError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Deposit error: {0}")]
    Deposit(#[from] DepositError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid deposit root '{path}': {reason}")]
    InvalidDepositRoot { path: PathBuf, reason: String },

    #[error("Invalid job file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Raised when a work item is constructed with a missing or malformed field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} can't be null")]
    MissingField(&'static str),

    #[error("applicationName can't be empty")]
    EmptyApplicationName,

    #[error("Invalid application name: {0}")]
    InvalidApplicationName(String),
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Corrupt archive: {reason}")]
    Corrupt { reason: String },

    #[error("Archive I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid entry name '{0}'")]
    InvalidEntryName(String),
}

impl ArchiveError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::Corrupt {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum DepositError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove file '{path}': {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File already staged: {0}")]
    AlreadyStaged(PathBuf),

    #[error("No application registered for deposit root '{0}'")]
    UnknownRoot(PathBuf),

    #[error("Not a deposit inbox file: {0}")]
    NotAnInboxFile(PathBuf),

    #[error("Result is missing routing metadata '{0}'")]
    MissingMeta(&'static str),

    #[error("Failed to package result: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Invalid work item: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to start watcher for '{root}': {source}")]
    SpawnWatcher {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatcher channel closed")]
    ChannelClosed,

    #[error("Job rejected: {0}")]
    Rejected(String),

    #[error("Job execution failed: {0}")]
    Execution(String),

    #[error("Job timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("Failed to spawn dispatcher worker: {0}")]
    SpawnFailed(String),
}

pub type Result<T> = std::result::Result<T, JobBusError>;
