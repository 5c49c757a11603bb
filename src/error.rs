use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CloneError {
    #[error("no KG identifier (UUID) found in: {0}")]
    InvalidIdentifier(String),

    #[error("invalid depth {0}: must be a positive integer")]
    InvalidDepth(i64),

    #[error("no dataset or dataset version with ID {0} in the knowledge graph")]
    NotFound(String),

    #[error("dataset {0} has no versions")]
    NoVersions(String),

    #[error("unrecognized file repository pointer {address}")]
    UnsupportedBackend { address: String },

    #[error("unsupported checksum algorithm {algorithm} for {address} (only MD5 is understood)")]
    UnsupportedChecksum { algorithm: String, address: String },

    #[error("cannot create dataset: {0}")]
    DatasetShellCreation(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("malformed knowledge graph record: {0}")]
    MalformedRecord(String),

    #[error("circular revision chain at {0}")]
    CircularRevisionChain(String),

    #[error("KG request failed: {0}")]
    KgHttp(String),

    #[error("KG returned status {status}: {message}")]
    KgStatus { status: u16, message: String },

    #[error("data-proxy request failed: {0}")]
    DataProxyHttp(String),

    #[error("data-proxy returned status {status}: {message}")]
    DataProxyStatus { status: u16, message: String },

    #[error("missing access token: set {0} (e.g. with the output of an EBRAINS authentication)")]
    MissingToken(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("dataset engine failure: {0}")]
    Engine(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
