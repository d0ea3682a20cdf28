//! SurrealDB Handle - Connection setup
//!
//! Supports in-memory (`mem://`), local (`surrealkv://`) and remote
//! (`ws://`, `wss://`) endpoints. Schema initialization runs on every
//! connect and is idempotent.

use crate::error::StateError;
use crate::migrations;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

/// Connection settings for the frag database
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Endpoint URL (e.g., "mem://", "surrealkv://.frag/db", "wss://db.example.org")
    pub endpoint: String,
    /// Namespace (default: "frag")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Credentials; no sign-in is attempted when absent
    pub credentials: Option<(String, String)>,
    /// Whether the credentials belong to a root user (true) or database user (false)
    pub is_root: bool,
}

impl ConnectionConfig {
    /// Create a configuration for the given endpoint with default namespace/database
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: "frag".to_string(),
            database: "main".to_string(),
            credentials: None,
            is_root: false,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Sign in with the given user
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }
}

/// SurrealDB connection handle for frag
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

impl SurrealHandle {
    /// Connect to a fresh in-memory database and set up the schema
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&ConnectionConfig::new("mem://")).await
    }

    /// Connect using the given configuration and set up the schema
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        if let Some(path) = config.endpoint.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(config.endpoint.as_str())
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        if let Some((username, password)) = &config.credentials {
            if config.is_root {
                db.signin(Root {
                    username: username.as_str(),
                    password: password.as_str(),
                })
                .await
                .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;
            } else {
                db.signin(Database {
                    namespace: config.namespace.as_str(),
                    database: config.database.as_str(),
                    username: username.as_str(),
                    password: password.as_str(),
                })
                .await
                .map_err(|e| StateError::Connection(format!("DB auth failed: {e}")))?;
            }
        }

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealDB connected and schema initialized");
        Ok(Self { db })
    }

    /// The underlying client
    pub fn db(&self) -> &Surreal<Any> {
        &self.db
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_config_defaults() {
        let config = ConnectionConfig::new("mem://");
        assert_eq!(config.namespace, "frag");
        assert_eq!(config.database, "main");
        assert!(config.credentials.is_none());
        assert!(!config.is_root);
    }

    #[test]
    fn connection_config_builder() {
        let config = ConnectionConfig::new("wss://db.example.org")
            .with_namespace("course")
            .with_database("pb161")
            .with_credentials("poller", "secret")
            .with_root(true);
        assert_eq!(config.namespace, "course");
        assert_eq!(config.database, "pb161");
        assert_eq!(
            config.credentials,
            Some(("poller".to_string(), "secret".to_string()))
        );
        assert!(config.is_root);
    }

    #[tokio::test]
    async fn in_memory_connects_and_initializes_schema() {
        let handle = SurrealHandle::in_memory().await.unwrap();
        // Second initialization must be a no-op.
        migrations::init_schema(handle.db()).await.unwrap();
    }
}
