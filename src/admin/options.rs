use crate::db::DatabaseConfig;

/// Options used when opening a database for administrative commands.
#[derive(Clone, Debug, Default)]
pub struct AdminOpenOptions {
    /// Database configuration.
    pub config: DatabaseConfig,
    /// Whether to create the database if its directory holds no decision log.
    pub create_if_missing: bool,
}

impl AdminOpenOptions {
    /// Options for an existing database described by `config`.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            create_if_missing: false,
        }
    }

    /// Allows creating a new database.
    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }
}
