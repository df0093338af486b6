//! Configuration management for the WebSQL server
//!
//! Sources, lowest precedence first: `conf/application.yml`, `WEBSQL_*`
//! environment variables, command line flags.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment};
use websql_data::AuthSettings;
use websql_persistence::PoolSettings;

use crate::startup::LoggingConfig;

pub const DEFAULT_SERVER_PORT: u16 = 1103;
pub const DEFAULT_BACKOFF_SECONDS: u64 = 5;

/// Command line arguments for the server
#[derive(Debug, Default, Parser)]
#[command(name = "websql-server", about = "WebSQL server node")]
pub struct Cli {
    /// Node id announced to the master
    #[arg(long = "id", env = "WEBSQL_NODE_ID")]
    pub id: Option<String>,
    /// Master address (host:port). Empty runs this node as the master.
    #[arg(long = "master")]
    pub master: Option<String>,
    /// Shared secret for the command channel and replication
    #[arg(long = "secret", env = "WEBSQL_SECRET")]
    pub secret: Option<String>,
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,
    /// Snapshot file of the master
    #[arg(long = "data-file")]
    pub data_file: Option<String>,
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
    /// Alternate configuration file
    #[arg(short = 'c', long = "config", default_value = "conf/application.yml")]
    pub config_file: String,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

fn home_dir() -> String {
    std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string())
}

impl Configuration {
    pub fn new() -> anyhow::Result<Self> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(args: Cli) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(config::File::with_name(&args.config_file).required(false))
            .add_source(
                Environment::with_prefix("WEBSQL")
                    .prefix_separator("_")
                    .separator(".")
                    .try_parsing(true),
            );

        if let Some(v) = args.id {
            builder = builder.set_override("websql.node.id", v)?;
        }
        if let Some(v) = args.master {
            builder = builder.set_override("websql.master", v)?;
        }
        if let Some(v) = args.secret {
            builder = builder.set_override("websql.secret", v)?;
        }
        if let Some(v) = args.port {
            builder = builder.set_override("server.port", v)?;
        }
        if let Some(v) = args.data_file {
            builder = builder.set_override("websql.data-file", v)?;
        }
        if let Some(v) = args.log_level {
            builder = builder.set_override("logs.level", v)?;
        }

        Ok(Configuration {
            config: builder.build()?,
        })
    }

    /// Configuration from an in-memory YAML document
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?;
        Ok(Configuration { config })
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.config.get_string(key).unwrap_or_else(|_| default.to_string())
    }

    fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    }

    // Server

    pub fn server_address(&self) -> String {
        self.string_or("server.address", "0.0.0.0")
    }

    pub fn server_port(&self) -> u16 {
        self.config
            .get_int("server.port")
            .ok()
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    // Node and replication

    pub fn node_id(&self) -> String {
        self.config
            .get_string("websql.node.id")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| hostname::get().ok().map(|h| h.to_string_lossy().to_string()))
            .unwrap_or_else(websql_common::new_id)
    }

    pub fn master(&self) -> String {
        self.string_or("websql.master", "").trim().to_string()
    }

    pub fn is_master(&self) -> bool {
        self.master().is_empty()
    }

    pub fn master_scheme(&self) -> String {
        self.string_or("websql.master-scheme", "ws")
    }

    /// Base url of the master's HTTP surface
    pub fn master_http_url(&self) -> String {
        let scheme = if self.master_scheme() == "wss" { "https" } else { "http" };
        format!("{}://{}", scheme, self.master())
    }

    pub fn secret(&self) -> String {
        self.string_or("websql.secret", "")
    }

    pub fn data_file(&self) -> PathBuf {
        self.config
            .get_string("websql.data-file")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(home_dir()).join(".websql").join("websql_master.json"))
    }

    /// Configured script roots, empty when the defaults apply
    pub fn script_roots(&self) -> Vec<PathBuf> {
        self.config
            .get_array("websql.script.roots")
            .map(|values| {
                values
                    .into_iter()
                    .filter_map(|v| v.into_string().ok())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn replication_backoff(&self) -> Duration {
        Duration::from_secs(self.u64_or("websql.replication.backoff-seconds", DEFAULT_BACKOFF_SECONDS))
    }

    // Tenants

    pub fn pool_settings(&self) -> PoolSettings {
        let defaults = PoolSettings::default();
        PoolSettings {
            max_connections: self.u64_or("websql.tenant.max-connections", defaults.max_connections.into()) as u32,
            min_connections: self.u64_or("websql.tenant.min-connections", defaults.min_connections.into()) as u32,
            connect_timeout: Duration::from_secs(self.u64_or(
                "websql.tenant.connect-timeout-seconds",
                defaults.connect_timeout.as_secs(),
            )),
            cache_idle_timeout: Duration::from_secs(self.u64_or(
                "websql.tenant.idle-timeout-seconds",
                defaults.cache_idle_timeout.as_secs(),
            )),
            max_cached: self.u64_or("websql.tenant.max-cached", defaults.max_cached),
            ..defaults
        }
    }

    /// When false, apps are registered without creating their database
    pub fn provision_tenants(&self) -> bool {
        self.config.get_bool("websql.tenant.provision").unwrap_or(true)
    }

    // Auth

    pub fn auth_settings(&self) -> AuthSettings {
        let defaults = AuthSettings::default();
        AuthSettings {
            secret: self
                .config
                .get_string("websql.auth.jwt-secret")
                .unwrap_or_else(|_| self.secret()),
            require_user_token: self
                .config
                .get_bool("websql.auth.require-user-token")
                .unwrap_or(defaults.require_user_token),
            token_expire_hours: self
                .config
                .get_int("websql.auth.token-expire-hours")
                .unwrap_or(defaults.token_expire_hours),
            webhook_timeout: Duration::from_secs(self.u64_or(
                "websql.auth.webhook-timeout-seconds",
                defaults.webhook_timeout.as_secs(),
            )),
            webhook_max_response_bytes: self.u64_or(
                "websql.auth.webhook-max-response-bytes",
                defaults.webhook_max_response_bytes as u64,
            ) as usize,
        }
    }

    pub fn mail_from(&self) -> String {
        self.string_or("mail.from", "")
    }

    // Logging

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string("logs.path").ok().filter(|p| !p.trim().is_empty()),
            self.config.get_bool("logs.console").unwrap_or(true),
            self.config.get_bool("logs.file").unwrap_or(true),
            self.string_or("logs.level", "info"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let configuration = Configuration::from_yaml("server: {}").unwrap();
        assert_eq!(configuration.server_address(), "0.0.0.0");
        assert_eq!(configuration.server_port(), DEFAULT_SERVER_PORT);
        assert!(configuration.is_master());
        assert_eq!(configuration.master_scheme(), "ws");
        assert_eq!(configuration.replication_backoff(), Duration::from_secs(5));
        assert!(configuration.data_file().ends_with(".websql/websql_master.json"));

        let auth = configuration.auth_settings();
        assert!(auth.require_user_token);
        assert_eq!(auth.token_expire_hours, 72);
        assert_eq!(auth.webhook_timeout, Duration::from_secs(30));
        assert_eq!(auth.webhook_max_response_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn test_yaml_values() {
        let configuration = Configuration::from_yaml(
            r#"
server:
  port: 8080
websql:
  master: "10.0.0.1:1103"
  master-scheme: wss
  secret: s3
  tenant:
    max-connections: 4
    max-cached: 12
  auth:
    require-user-token: false
    webhook-timeout-seconds: 0
    webhook-max-response-bytes: 1024
  script:
    roots: ["/srv/scripts"]
"#,
        )
        .unwrap();

        assert_eq!(configuration.server_port(), 8080);
        assert!(!configuration.is_master());
        assert_eq!(configuration.master_http_url(), "https://10.0.0.1:1103");
        assert_eq!(configuration.auth_settings().secret, "s3");
        assert!(!configuration.auth_settings().require_user_token);
        assert!(configuration.auth_settings().webhook_timeout.is_zero());
        assert_eq!(configuration.auth_settings().webhook_max_response_bytes, 1024);

        let pool = configuration.pool_settings();
        assert_eq!(pool.max_connections, 4);
        assert_eq!(pool.max_cached, 12);
        assert_eq!(pool.min_connections, 1);
        assert_eq!(configuration.script_roots(), vec![PathBuf::from("/srv/scripts")]);
    }

    #[test]
    fn test_cli_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("application.yml");
        std::fs::write(&file, "server:\n  port: 9000\nwebsql:\n  secret: from-file\n").unwrap();

        let configuration = Configuration::from_cli(Cli {
            secret: Some("from-cli".to_string()),
            master: Some("m:1103".to_string()),
            config_file: file.display().to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(configuration.secret(), "from-cli");
        assert_eq!(configuration.server_port(), 9000);
        assert_eq!(configuration.master(), "m:1103");
    }
}
