use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("cluster spec not found at {}", .0.display())]
    SpecNotFound(PathBuf),
    #[error("cluster spec at {} is invalid: {reason}", .path.display())]
    SpecInvalid { path: PathBuf, reason: String },
    #[error("node {node_id} (name: {node_name}) not found in spec")]
    SelfNodeNotFound { node_id: String, node_name: String },
    #[error("database {0} not initialized, something went wrong! Please restart the node.")]
    MissingProgress(String),
    #[error("progress store: {0}")]
    Progress(String),
    #[error("{0}")]
    NotReady(String),
    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: sqlx::Error,
    },
}

impl BootstrapError {
    pub fn database(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            context: context.into(),
            source,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database { .. } | Self::NotReady(_))
    }
}

impl From<String> for BootstrapError {
    fn from(message: String) -> Self {
        Self::Config(message)
    }
}

pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;
