//! KDL configuration parsing for the encodeq service.
//!
//! This crate handles parsing of:
//! - Service configuration (encodeq.kdl)
//! - `${env.NAME}` interpolation inside string values

pub mod error;
pub mod service;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use service::{
    DispatcherConfig, ExecutionConfig, PathsConfig, RetentionConfig, ServerConfig, ServiceConfig,
    parse_service_config,
};
pub use variables::Variables;
