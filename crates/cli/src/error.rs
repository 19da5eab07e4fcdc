#![forbid(unsafe_code)]

use cf_core::{BuildError, ExecError, ForestError, IdError, PersistError};
use cf_storage::StoreError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error("persistence: {0}")]
    Persist(#[from] PersistError),
    #[error("forest: {0}")]
    Forest(#[from] ForestError),
    #[error("edit rejected: {0}")]
    Build(#[from] BuildError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {message}")]
    Script { path: PathBuf, message: String },
    #[error("step {index} ({op}): {source}")]
    Step {
        index: usize,
        op: &'static str,
        source: Box<CliError>,
    },
    #[error("template not found: {0}")]
    UnknownTemplate(String),
    #[error("{0} persistence job(s) failed")]
    PersistFailed(usize),
}
