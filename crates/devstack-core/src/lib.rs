//! # Devstack Core
//!
//! Runs a local development environment assembled from independently
//! described modules.
//!
//! A project is a directory tree whose root and immediate children may hold
//! a module descriptor. [`Project::discover`] scans the tree, resolves every
//! declared dependency into a [`ModuleGraph`] and loads each module's
//! persisted [`ModuleState`]. The [`Engine`] then runs pipelines, tasks and
//! migrations in dependency order, skipping work that the state already
//! records, and starts services through the [`LifecycleManager`], which
//! delegates to a runtime [`lifecycle::Backend`] and an external process
//! [`lifecycle::Supervisor`].
//!
//! ## Example
//!
//! ```no_run
//! use devstack_config::Settings;
//! use devstack_core::{Engine, FunctionRegistry, LifecycleManager, Project};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> devstack_core::Result<()> {
//! let root = Path::new(".");
//! let settings = Settings::load(root)?;
//! let lifecycle = Arc::new(LifecycleManager::from_settings(root, &settings));
//! let project = Project::discover(root, settings, &FunctionRegistry::new()).await?;
//!
//! let mut engine = Engine::new(project, lifecycle);
//! engine.run_pipeline("node", "build").await?;
//! engine.start_module("node").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod context;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod graph;
pub mod hooks;
pub mod interrupt;
pub mod lifecycle;
pub mod model;
pub mod prompt;
pub mod runner;
pub mod scanner;
pub mod state;

pub use context::{TaskContext, TaskOutputs, answer_var};
pub use discovery::Project;
pub use engine::{Engine, RunOptions, ServiceStatusRow};
pub use error::{Error, ErrorKind, Result};
pub use graph::ModuleGraph;
pub use hooks::Hook;
pub use interrupt::{Interrupt, run_until_interrupted};
pub use lifecycle::LifecycleManager;
pub use model::{
    Dependency, EntityKind, EntityRef, EnvBinding, Module, Pipeline, Service, ServiceStatus, Step,
    Task,
};
pub use prompt::{Prompter, StaticPrompter};
pub use runner::{FunctionRegistry, Runnable, Runner};
pub use scanner::{ScannedModule, Scanner};
pub use state::{ModuleState, StateStore, not_applied_migrations};
