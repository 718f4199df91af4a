//! Storage configuration types.

use serde::Deserialize;

/// Storage type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Sqlite,
}

/// Storage configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type discriminator.
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// SQLite-specific configuration.
    pub sqlite: SqliteConfig,
}

/// SQLite-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file, created if missing.
    pub path: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: "data/shelterhub.db".to_string(),
        }
    }
}

impl SqliteConfig {
    /// sqlx connection URL for this database.
    pub fn url(&self) -> String {
        if self.path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", self.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default() {
        let storage = StorageConfig::default();
        assert_eq!(storage.storage_type, StorageType::Sqlite);
        assert_eq!(storage.sqlite.path, "data/shelterhub.db");
    }

    #[test]
    fn test_sqlite_url() {
        let file = SqliteConfig {
            path: "/tmp/x.db".to_string(),
        };
        assert_eq!(file.url(), "sqlite:///tmp/x.db?mode=rwc");

        let memory = SqliteConfig {
            path: ":memory:".to_string(),
        };
        assert_eq!(memory.url(), "sqlite::memory:");
    }
}
