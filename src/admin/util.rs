use crate::db::Database;

use crate::admin::error::{AdminError, Result};
use crate::admin::options::AdminOpenOptions;

/// Opens the database described by `opts`.
///
/// # Errors
///
/// Returns [`AdminError::MissingDatabase`] when the directory holds no decision log and
/// `create_if_missing` is false, or any error raised by recovery.
pub fn open_database(opts: &AdminOpenOptions) -> Result<Database> {
    let log = opts.config.decision_log_path();
    if !log.exists() && !opts.create_if_missing {
        return Err(AdminError::missing_database(&opts.config.directory));
    }
    Ok(Database::open(opts.config.clone())?)
}
