//! KDL configuration parsing for appgen.
//!
//! This crate handles parsing of:
//! - Generator configuration (appgen.kdl)
//! - `KEY=VALUE` environment arguments

pub mod environment;
pub mod error;
pub mod generator;

pub use environment::parse_environment;
pub use error::{ConfigError, ConfigResult};
pub use generator::{GeneratorConfig, ResolverSettings, parse_generator_config};
