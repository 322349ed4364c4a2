use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AtlasError {
    #[error("version {version} of dataset {dataset} not found in manifest")]
    ManifestNotFound { dataset: String, version: String },

    #[error("dataset not found in manifest: {0}")]
    DatasetNotFound(String),

    #[error("dataset {0} has no versions to choose from")]
    #[diagnostic(help("pass an explicit version with --dataset-version"))]
    NoVersionAvailable(String),

    #[error("could not extract a dataset path from url: {0}")]
    UrlExtraction(String),

    #[error("transfer of {url} failed: {message}")]
    Transfer { url: String, message: String },

    #[error("transfer of {url} returned status {status}")]
    TransferStatus { url: String, status: u16 },

    #[error("repository access failed: {0}")]
    RepositoryAccess(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("no manifest file found at {0}")]
    #[diagnostic(help("run `atlas-fetch update` to download the published manifest"))]
    ManifestMissing(PathBuf),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid relative path in manifest: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    MissingSelection(String),
}
