use std::env;

/// Database configuration.
///
/// Reads from the `QUESTPATH_DATABASE_URL` environment variable, falling back
/// to `postgresql://localhost:5432/questpath` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/questpath";

    /// Pool size used when none is configured.
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

    /// Build a config from the environment.
    ///
    /// Priority: `QUESTPATH_DATABASE_URL` env var, then the compile-time default.
    pub fn from_env() -> Self {
        let database_url = env::var("QUESTPATH_DATABASE_URL")
            .unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self::new(database_url)
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Override the pool size.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Extract the database name from the URL.
    ///
    /// Returns `None` if the URL has no path component. Query parameters
    /// (`?sslmode=...`) are stripped.
    pub fn database_name(&self) -> Option<&str> {
        let without_query = self
            .database_url
            .split_once('?')
            .map_or(self.database_url.as_str(), |(head, _)| head);
        without_query
            .rsplit_once('/')
            .map(|(_, name)| name)
            .filter(|s| !s.is_empty() && !s.contains(':'))
    }

    /// Return a URL pointing at the `postgres` maintenance database on the
    /// same host. Used to issue `CREATE DATABASE` when the target DB does not
    /// yet exist.
    pub fn maintenance_url(&self) -> String {
        match self.database_url.rfind('/') {
            Some(pos) => {
                let mut url = self.database_url[..pos].to_owned();
                url.push_str("/postgres");
                url
            }
            None => self.database_url.clone(),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
