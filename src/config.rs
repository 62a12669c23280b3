use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use sqlx::mysql::MySqlConnectOptions;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Failed to read config file {}: {}", path, source))]
    FileRead {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse YAML config: {}", source))]
    YamlParse { source: serde_yaml::Error },
}

type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// Top-level settings, loaded from YAML and overridden from the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Database used when the caller omits `--database` or passes `default`
    pub database: Option<String>,
    pub connection: ConnectionConfig,
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            username: "root".to_string(),
            password: None,
        }
    }
}

/// Retry, timeout and uniqueness policy for deferred runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub spool_dir: PathBuf,
    pub tries: u32,
    pub timeout_secs: u64,
    pub unique_for_secs: u64,
    pub backoff_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from(".mysql-optimizer/queue"),
            tries: 3,
            // OPTIMIZE TABLE on a large InnoDB table can run for a long time
            timeout_secs: 3600,
            unique_for_secs: 3600,
            backoff_secs: 3600,
        }
    }
}

impl QueueConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn unique_for(&self) -> Duration {
        Duration::from_secs(self.unique_for_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Settings the catalog resolver needs, handed over at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Only consulted when the caller asks for the default database
    pub default_database: Option<String>,
}

impl ResolverConfig {
    pub fn new(default_database: impl Into<String>) -> Self {
        Self {
            default_database: Some(default_database.into()),
        }
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub spool_dir: Option<PathBuf>,
}

impl OptimizerConfig {
    pub fn from_config_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).context(FileReadSnafu { path })?;
        let config: OptimizerConfig = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        Ok(config)
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(database) = overrides.database {
            self.database = Some(database);
        }
        if let Some(host) = overrides.host {
            self.connection.host = host;
        }
        if let Some(port) = overrides.port {
            self.connection.port = port;
        }
        if let Some(username) = overrides.username {
            self.connection.username = username;
        }
        if let Some(password) = overrides.password {
            self.connection.password = Some(password);
        }
        if let Some(spool_dir) = overrides.spool_dir {
            self.queue.spool_dir = spool_dir;
        }
        self
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            default_database: self.database.clone().filter(|db| !db.is_empty()),
        }
    }

    pub fn connect_options(&self) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&self.connection.host)
            .port(self.connection.port)
            .username(&self.connection.username);

        if let Some(password) = &self.connection.password {
            options = options.password(password);
        }
        if let Some(database) = self.database.as_deref().filter(|db| !db.is_empty()) {
            options = options.database(database);
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_file_parsing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "database: shop\nconnection:\n  host: db.internal\n  port: 3307\n  username: maint\nqueue:\n  tries: 5\n  spool_dir: /var/spool/optimizer"
        )
        .unwrap();

        let config = OptimizerConfig::from_config_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.database.as_deref(), Some("shop"));
        assert_eq!(config.connection.host, "db.internal");
        assert_eq!(config.connection.port, 3307);
        assert_eq!(config.connection.username, "maint");
        assert_eq!(config.connection.password, None);
        assert_eq!(config.queue.tries, 5);
        assert_eq!(config.queue.spool_dir, PathBuf::from("/var/spool/optimizer"));
        // Unset keys keep their defaults
        assert_eq!(config.queue.timeout_secs, 3600);
    }

    #[test]
    fn test_missing_config_file() {
        let err = OptimizerConfig::from_config_file("/nonexistent/optimizer.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_queue_defaults() {
        let queue = QueueConfig::default();
        assert_eq!(queue.tries, 3);
        assert_eq!(queue.timeout(), Duration::from_secs(3600));
        assert_eq!(queue.unique_for(), Duration::from_secs(3600));
        assert_eq!(queue.backoff(), Duration::from_secs(3600));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let config = OptimizerConfig {
            database: Some("shop".into()),
            ..Default::default()
        }
        .with_overrides(ConfigOverrides {
            database: Some("custom_database".into()),
            port: Some(3310),
            password: Some("secret".into()),
            ..Default::default()
        });

        assert_eq!(config.database.as_deref(), Some("custom_database"));
        assert_eq!(config.connection.port, 3310);
        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_resolver_config_carries_default_database() {
        assert_eq!(
            OptimizerConfig::default().resolver_config(),
            ResolverConfig::default()
        );

        let blank = OptimizerConfig {
            database: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(blank.resolver_config().default_database, None);

        let config = OptimizerConfig {
            database: Some("shop".into()),
            ..Default::default()
        };
        assert_eq!(config.resolver_config(), ResolverConfig::new("shop"));
    }
}
