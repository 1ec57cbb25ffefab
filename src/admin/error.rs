use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::StoreError;

/// Failures of administrative commands.
#[derive(Debug, Error)]
pub enum AdminError {
    /// The directory holds no decision log, so no database was ever created there.
    #[error("no quadstore database in {}", .0.display())]
    MissingDatabase(PathBuf),
    /// Opening, recovering or reading the database failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Reading the database directory failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias for administrative commands.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_database(dir: impl AsRef<Path>) -> Self {
        AdminError::MissingDatabase(dir.as_ref().to_path_buf())
    }
}
