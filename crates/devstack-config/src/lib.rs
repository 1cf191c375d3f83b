//! # Devstack Configuration
//!
//! Parsers for the files a devstack project is made of:
//!
//! - per-module descriptors (`module.yaml`), see [`descriptor`]
//! - optional companion hook files (`module.hooks.yaml`)
//! - project-wide [`Settings`] (`devstack.yaml` plus `DEVSTACK_*` overrides)
//!
//! Literal values may reference environment variables as `${VAR}` or
//! `${VAR:-default}`; see [`resolver`].

#![warn(missing_docs)]

use std::path::PathBuf;
use thiserror::Error;

pub mod descriptor;
pub mod resolver;
pub mod settings;

pub use descriptor::{
    ContainerBuild, DependencySpec, EnvValue, HealthCheckSpec, ModuleDescriptor,
    PipelineDescriptor, PortSpec, Question, RunnableSpec, RuntimeKind, ServiceDescriptor,
    StateFlag, StepSpec, SubServiceDescriptor, TaskDescriptor, load_descriptor, load_hooks,
    parse_descriptor,
};
pub use settings::Settings;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Failed to parse or map JSON
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Environment variable referenced without a default is not set
    #[error("environment variable not found: {0}")]
    EnvVarNotFound(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;
