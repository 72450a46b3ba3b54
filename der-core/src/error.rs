//! Error types for the orchestrator's load/select/run/merge/persist stages.

use std::path::PathBuf;
use thiserror::Error;

pub type MemoryResult<T> = Result<T, MemoryError>;
pub type TaskResult<T> = Result<T, TaskError>;
pub type RunnerResult<T> = Result<T, RunnerError>;
pub type ChairmanResult<T> = Result<T, ChairmanError>;
pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("io error reading/writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write memory after retry: {path}")]
    WriteFailed { path: PathBuf },
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("io error reading/writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write task after retry: {path}")]
    WriteFailed { path: PathBuf },
    #[error("non-interactive mode requires task fields but none were supplied")]
    MissingTaskFields,
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("agent call timed out after {timeout_s}s")]
    Timeout { timeout_s: u64 },
    #[error("provider error: {0}")]
    Provider(String),
}

#[derive(Error, Debug)]
pub enum ChairmanError {
    #[error("chairman call timed out after {timeout_s}s")]
    Timeout { timeout_s: u64 },
    #[error("provider error: {0}")]
    Provider(String),
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("io error persisting {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to rotate {path} atomically: {source}")]
    Rotate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
