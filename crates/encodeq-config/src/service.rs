//! Service configuration parsing.

use crate::variables::Variables;
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_INTERPRETER: &str = "/bin/bash";
const DEFAULT_PORT: u16 = 3334;
const DEFAULT_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Service-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub paths: PathsConfig,
    pub execution: ExecutionConfig,
    pub dispatcher: DispatcherConfig,
    /// Purging of finished jobs. `None` keeps them forever.
    pub retention: Option<RetentionConfig>,
    pub server: ServerConfig,
}

/// Directories used by the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where job records are persisted.
    pub queue_dir: PathBuf,
    /// Where input artifacts are read from.
    pub incoming_dir: PathBuf,
    /// Where output artifacts are written to.
    pub outgoing_dir: PathBuf,
}

impl PathsConfig {
    /// Directories laid out under a single data directory.
    pub fn under(data_dir: &Path) -> Self {
        Self {
            queue_dir: data_dir.join("jobqueue"),
            incoming_dir: data_dir.join("videos").join("in"),
            outgoing_dir: data_dir.join("videos").join("out"),
        }
    }

    /// Create every directory that does not exist yet.
    pub fn create_all(&self) -> ConfigResult<()> {
        for dir in [&self.queue_dir, &self.incoming_dir, &self.outgoing_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// How the external processing step is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Interpreter that runs the script.
    pub interpreter: PathBuf,
    /// Script receiving `<input> <output>` as arguments.
    pub script: PathBuf,
    /// Maximum run time per job.
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Number of concurrent worker loops.
    pub workers: usize,
    /// Longest an idle worker sleeps before polling the queue again.
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Finished jobs older than this are purged.
    pub max_age: Duration,
    /// How often the purge runs.
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a file, interpolating the process environment.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        parse_service_config_with(&content, &Variables::from_process_env())
    }
}

/// Parse service configuration from KDL text, interpolating the process environment.
pub fn parse_service_config(kdl: &str) -> ConfigResult<ServiceConfig> {
    parse_service_config_with(kdl, &Variables::from_process_env())
}

/// Parse service configuration from KDL text with an explicit variable set.
pub fn parse_service_config_with(kdl: &str, vars: &Variables) -> ConfigResult<ServiceConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut data_dir: Option<PathBuf> = None;
    let mut queue_dir = None;
    let mut incoming_dir = None;
    let mut outgoing_dir = None;
    let mut interpreter = None;
    let mut script = None;
    let mut timeout_secs = None;
    let mut dispatcher = DispatcherConfig::default();
    let mut retention = None;
    let mut server = ServerConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "data-dir" => {
                data_dir = Some(required_path(node, vars)?);
            }
            "paths" => {
                for child in children(node) {
                    match child.name().value() {
                        "queue-dir" => queue_dir = Some(required_path(child, vars)?),
                        "incoming-dir" => incoming_dir = Some(required_path(child, vars)?),
                        "outgoing-dir" => outgoing_dir = Some(required_path(child, vars)?),
                        _ => {}
                    }
                }
            }
            "execution" => {
                for child in children(node) {
                    match child.name().value() {
                        "interpreter" => interpreter = Some(required_path(child, vars)?),
                        "script" => script = Some(required_path(child, vars)?),
                        "timeout-secs" => timeout_secs = Some(positive_int(child)?),
                        _ => {}
                    }
                }
            }
            "dispatcher" => {
                for child in children(node) {
                    match child.name().value() {
                        "workers" => dispatcher.workers = positive_int(child)? as usize,
                        "poll-interval-ms" => {
                            dispatcher.poll_interval = Duration::from_millis(positive_int(child)?)
                        }
                        _ => {}
                    }
                }
            }
            "retention" => {
                let mut max_age = None;
                let mut sweep_interval = Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS);
                for child in children(node) {
                    match child.name().value() {
                        "max-age-secs" => max_age = Some(Duration::from_secs(positive_int(child)?)),
                        "sweep-interval-secs" => {
                            sweep_interval = Duration::from_secs(positive_int(child)?)
                        }
                        _ => {}
                    }
                }
                let max_age = max_age
                    .ok_or_else(|| ConfigError::MissingField("retention max-age-secs".to_string()))?;
                retention = Some(RetentionConfig {
                    max_age,
                    sweep_interval,
                });
            }
            "server" => {
                for child in children(node) {
                    if child.name().value() == "bind" {
                        let raw = required_string(child, vars)?;
                        server.bind = raw
                            .parse()
                            .map_err(|e| ConfigError::invalid("bind", format!("{raw}: {e}")))?;
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    let defaults = PathsConfig::under(&data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)));
    let paths = PathsConfig {
        queue_dir: queue_dir.unwrap_or(defaults.queue_dir),
        incoming_dir: incoming_dir.unwrap_or(defaults.incoming_dir),
        outgoing_dir: outgoing_dir.unwrap_or(defaults.outgoing_dir),
    };

    let script = script.ok_or_else(|| ConfigError::MissingField("execution script".to_string()))?;

    Ok(ServiceConfig {
        paths,
        execution: ExecutionConfig {
            interpreter: interpreter.unwrap_or_else(|| PathBuf::from(DEFAULT_INTERPRETER)),
            script,
            timeout: Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        },
        dispatcher,
        retention,
        server,
    })
}

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_int_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn required_string(node: &KdlNode, vars: &Variables) -> ConfigResult<String> {
    let field = node.name().value();
    let raw = get_first_string_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    let value = vars.interpolate(&raw);
    if value.is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    Ok(value)
}

fn required_path(node: &KdlNode, vars: &Variables) -> ConfigResult<PathBuf> {
    required_string(node, vars).map(PathBuf::from)
}

fn positive_int(node: &KdlNode) -> ConfigResult<u64> {
    let field = node.name().value();
    let value = get_first_int_arg(node).ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    if value < 1 || value > i128::from(u32::MAX) {
        return Err(ConfigError::invalid(
            field,
            format!("expected a positive integer, got {value}"),
        ));
    }
    Ok(value as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(kdl: &str) -> ConfigResult<ServiceConfig> {
        parse_service_config_with(kdl, &Variables::new().with_env("ROOT", "/srv/encodeq"))
    }

    #[test]
    fn test_parse_minimal_config() {
        let kdl = r#"
            execution {
                script "/opt/tile/tile.sh"
            }
        "#;

        let config = parse(kdl).unwrap();
        assert_eq!(config.paths.queue_dir, PathBuf::from("data/jobqueue"));
        assert_eq!(config.paths.incoming_dir, PathBuf::from("data/videos/in"));
        assert_eq!(config.paths.outgoing_dir, PathBuf::from("data/videos/out"));
        assert_eq!(config.execution.interpreter, PathBuf::from("/bin/bash"));
        assert_eq!(config.execution.timeout, Duration::from_secs(3600));
        assert_eq!(config.dispatcher.workers, 1);
        assert!(config.retention.is_none());
        assert_eq!(config.server.bind.port(), 3334);
    }

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            data-dir "${env.ROOT}"

            paths {
                outgoing-dir "/mnt/out"
            }

            execution {
                interpreter "/bin/sh"
                script "${env.ROOT}/scripts/tile.sh"
                timeout-secs 900
            }

            dispatcher {
                workers 4
                poll-interval-ms 250
            }

            retention {
                max-age-secs 86400
                sweep-interval-secs 600
            }

            server {
                bind "127.0.0.1:8080"
            }
        "#;

        let config = parse(kdl).unwrap();
        assert_eq!(config.paths.queue_dir, PathBuf::from("/srv/encodeq/jobqueue"));
        assert_eq!(config.paths.incoming_dir, PathBuf::from("/srv/encodeq/videos/in"));
        assert_eq!(config.paths.outgoing_dir, PathBuf::from("/mnt/out"));
        assert_eq!(
            config.execution.script,
            PathBuf::from("/srv/encodeq/scripts/tile.sh")
        );
        assert_eq!(config.execution.timeout, Duration::from_secs(900));
        assert_eq!(config.dispatcher.workers, 4);
        assert_eq!(config.dispatcher.poll_interval, Duration::from_millis(250));
        let retention = config.retention.unwrap();
        assert_eq!(retention.max_age, Duration::from_secs(86400));
        assert_eq!(retention.sweep_interval, Duration::from_secs(600));
        assert_eq!(config.server.bind.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn test_missing_script() {
        let result = parse("dispatcher { workers 2; }");
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let kdl = r#"
            execution { script "tile.sh"; }
            dispatcher { workers 0; }
        "#;
        assert!(matches!(
            parse(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_retention_requires_max_age() {
        let kdl = r#"
            execution { script "tile.sh"; }
            retention { sweep-interval-secs 60; }
        "#;
        assert!(matches!(parse(kdl), Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_bad_bind_address() {
        let kdl = r#"
            execution { script "tile.sh"; }
            server { bind "not-an-address"; }
        "#;
        assert!(matches!(
            parse(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_kdl() {
        assert!(matches!(parse("execution {"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_create_all_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = PathsConfig::under(tmp.path());
        paths.create_all().unwrap();
        assert!(paths.queue_dir.is_dir());
        assert!(paths.incoming_dir.is_dir());
        assert!(paths.outgoing_dir.is_dir());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("encodeq.kdl");
        std::fs::write(&path, "execution { script \"tile.sh\"; }").unwrap();
        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.execution.script, PathBuf::from("tile.sh"));
    }
}
