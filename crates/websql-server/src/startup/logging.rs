//! Multi-file logging.
//!
//! Every event goes to the console and to `websql.log`. Component events are
//! additionally routed by tracing target to their own daily rolling file:
//!
//! | Log File         | Component                  | Target Prefixes            |
//! |------------------|----------------------------|----------------------------|
//! | websql.log       | Root logger                | (all)                      |
//! | data.log         | Data operator and hooks    | websql_data                |
//! | replication.log  | Master/slave replication   | websql_core::replication   |
//! | jobs.log         | Job scheduler              | websql_jobs                |
//! | config.log       | Config store mutations     | websql_core::store         |
//!
//! Log files are stored in `~/websql/logs` unless `logs.path` is set.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

pub const ROOT_LOG_FILE: &str = "websql.log";

struct ComponentLogDef {
    file_name: &'static str,
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "data.log",
        targets: &["websql_data"],
    },
    ComponentLogDef {
        file_name: "replication.log",
        targets: &["websql_core::replication", "websql_server::api::ws"],
    },
    ComponentLogDef {
        file_name: "jobs.log",
        targets: &["websql_jobs"],
    },
    ComponentLogDef {
        file_name: "config.log",
        targets: &["websql_core::store", "websql_server::service::command"],
    },
];

/// Log rotation policy
#[derive(Debug, Clone, Copy)]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{}/websql/logs", home))
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub console_level: Level,
    pub file_logging: bool,
    pub file_level: Level,
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            console_level: Level::INFO,
            file_logging: true,
            file_level: Level::INFO,
            rotation: LogRotation::Daily,
        }
    }
}

impl LoggingConfig {
    pub fn from_config(log_dir: Option<String>, console_output: bool, file_logging: bool, level: String) -> Self {
        let level = level.parse().unwrap_or(Level::INFO);
        Self {
            log_dir: log_dir.map(PathBuf::from).unwrap_or_else(default_log_dir),
            console_output,
            console_level: level,
            file_logging,
            file_level: level,
            rotation: LogRotation::Daily,
        }
    }

    /// Files this configuration writes, root first
    pub fn file_names(&self) -> Vec<&'static str> {
        if !self.file_logging {
            return Vec::new();
        }
        std::iter::once(ROOT_LOG_FILE)
            .chain(COMPONENT_LOGS.iter().map(|c| c.file_name))
            .collect()
    }
}

/// Keeps the non-blocking writers alive. Dropping it flushes buffered output.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

fn file_layer(
    config: &LoggingConfig,
    file_name: &str,
    guards: &mut Vec<WorkerGuard>,
) -> fmt::Layer<Registry, fmt::format::DefaultFields, fmt::format::Format, tracing_appender::non_blocking::NonBlocking>
{
    let appender = RollingFileAppender::new(config.rotation.into(), &config.log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    guards.push(guard);
    fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(false)
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the configured level on the console and root file.
/// Component files take every level from their own targets.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.console_level.to_string()));
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .with_filter(filter);
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.file_level.to_string()));
        layers.push(Box::new(file_layer(config, ROOT_LOG_FILE, &mut guards).with_filter(root_filter)));

        for component in COMPONENT_LOGS {
            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }
            layers.push(Box::new(
                file_layer(config, component.file_name, &mut guards).with_filter(targets),
            ));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if config.file_logging {
        tracing::info!(log_dir = %config.log_dir.display(), "File logging initialized");
    }

    Ok(LoggingGuard { _file_guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_level_fallback() {
        let config = LoggingConfig::from_config(Some("/var/log/websql".to_string()), false, true, "bogus".to_string());
        assert_eq!(config.console_level, Level::INFO);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/websql"));

        let config = LoggingConfig::from_config(None, true, true, "debug".to_string());
        assert_eq!(config.file_level, Level::DEBUG);
        assert!(config.log_dir.ends_with("websql/logs"));
    }

    #[test]
    fn test_file_names() {
        let config = LoggingConfig::default();
        assert_eq!(
            config.file_names(),
            vec!["websql.log", "data.log", "replication.log", "jobs.log", "config.log"]
        );

        let config = LoggingConfig {
            file_logging: false,
            ..Default::default()
        };
        assert!(config.file_names().is_empty());
    }
}
