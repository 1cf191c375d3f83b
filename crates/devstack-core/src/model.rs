//! Resolved module graph entities

use crate::runner::Runnable;
use devstack_config::{
    ContainerBuild, DependencySpec, HealthCheckSpec, PortSpec, Question, RuntimeKind, StateFlag,
    SubServiceDescriptor,
};
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Kind of entity a dependency can point at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A service
    Service,
    /// A task
    Task,
    /// A pipeline
    Pipeline,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Service => write!(f, "service"),
            EntityKind::Task => write!(f, "task"),
            EntityKind::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Identity of a service, task or pipeline across the module graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityRef {
    /// Owning module
    pub module: String,
    /// Entity kind
    pub kind: EntityKind,
    /// Name within the module
    pub name: String,
}

impl EntityRef {
    /// Reference to a service
    pub fn service(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(module, EntityKind::Service, name)
    }

    /// Reference to a task
    pub fn task(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(module, EntityKind::Task, name)
    }

    /// Reference to a pipeline
    pub fn pipeline(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(module, EntityKind::Pipeline, name)
    }

    fn new(module: impl Into<String>, kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.kind, self.module, self.name)
    }
}

/// A resolved dependency edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// The entity that declared the dependency
    pub origin: EntityRef,
    /// The entity it resolved to
    pub target: EntityRef,
    /// The dependency as written, kept for diagnostics
    pub spec: DependencySpec,
}

/// Environment value bound at service start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvBinding {
    /// Literal value, subject to `${VAR}` substitution
    Literal(String),
    /// Return value of a task, or one field of it
    TaskOutput {
        /// Owning module of the task
        module: String,
        /// Task name
        task: String,
        /// Field of an object return value
        field: Option<String>,
    },
}

/// A long-running process definition
#[derive(Debug, Clone)]
pub struct Service {
    /// Name, unique within the module
    pub name: String,
    /// Owning module name
    pub module: String,
    /// Start command
    pub start: Option<String>,
    /// Exposed ports
    pub ports: Vec<PortSpec>,
    /// Service environment, layered over the module environment
    pub env: IndexMap<String, EnvBinding>,
    /// Resources to wait for after start
    pub health_check: Option<HealthCheckSpec>,
    /// Nested named port groups
    pub subservices: IndexMap<String, SubServiceDescriptor>,
    /// Resolved dependencies
    pub dependencies: Vec<Dependency>,
}

impl Service {
    /// Name the process supervisor knows this service by
    pub fn process_name(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    /// Ports of the service followed by those of its sub-services
    pub fn all_ports(&self) -> Vec<PortSpec> {
        self.ports
            .iter()
            .chain(self.subservices.values().flat_map(|sub| sub.ports.iter()))
            .copied()
            .collect()
    }

    /// Reference to this service
    pub fn entity(&self) -> EntityRef {
        EntityRef::service(&self.module, &self.name)
    }
}

/// A named unit of executable work
#[derive(Debug, Clone)]
pub struct Task {
    /// Name, unique within the module
    pub name: String,
    /// Owning module name
    pub module: String,
    /// Body
    pub runnable: Runnable,
    /// Resolved dependencies
    pub dependencies: Vec<Dependency>,
    /// Recorded in the module state and skipped once applied
    pub once: bool,
    /// Flag set on success
    pub marks: Option<StateFlag>,
    /// Questions asked before the task runs
    pub questions: Vec<Question>,
}

/// One step of a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Step key as declared
    pub key: String,
    /// The task it runs
    pub task: EntityRef,
}

/// An ordered sequence of steps
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Name, unique within the module
    pub name: String,
    /// Owning module name
    pub module: String,
    /// Steps in declaration order
    pub steps: Vec<Step>,
    /// Resolved dependencies
    pub dependencies: Vec<Dependency>,
    /// Flag set on success
    pub marks: Option<StateFlag>,
}

/// A discovered unit of deployable code
#[derive(Debug, Clone)]
pub struct Module {
    /// Unique name
    pub name: String,
    /// Absolute directory of the module
    pub root: PathBuf,
    /// Directory relative to the project root
    pub relative_path: PathBuf,
    /// The descriptor file it was loaded from
    pub descriptor_path: PathBuf,
    /// Runtimes the module can run under, in preference order
    pub available_runtimes: Vec<RuntimeKind>,
    /// Selected runtime
    pub runtime: RuntimeKind,
    /// Container build information
    pub container: Option<ContainerBuild>,
    /// Module-wide environment
    pub env: IndexMap<String, EnvBinding>,
    /// Opaque author object
    pub spec: serde_json::Value,
    /// Services keyed by name
    pub services: IndexMap<String, Service>,
    /// Tasks keyed by name
    pub tasks: IndexMap<String, Task>,
    /// Pipelines keyed by name
    pub pipelines: IndexMap<String, Pipeline>,
    /// Migrations keyed by id
    pub migrations: IndexMap<String, Runnable>,
    /// Lifecycle hooks keyed by hook name
    pub hooks: IndexMap<String, Runnable>,
}

impl Module {
    /// Whether any runtime is available to run services
    pub fn has_runtime(&self) -> bool {
        !self.available_runtimes.is_empty()
    }

    /// Compose service name used by the container runtime
    pub fn container_service(&self) -> &str {
        self.container
            .as_ref()
            .and_then(|c| c.service.as_deref())
            .unwrap_or(&self.name)
    }

    /// Literal module environment entries
    pub fn literal_env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|(key, value)| match value {
            EnvBinding::Literal(value) => Some((key.as_str(), value.as_str())),
            EnvBinding::TaskOutput { .. } => None,
        })
    }
}

/// Runtime status of a service as reported by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceStatus {
    /// Status could not be determined
    Unknown,
    /// Launching or waiting to restart
    Starting,
    /// Up
    Running,
    /// Shutting down
    Stopping,
    /// Stopped, errored, or unknown to the supervisor
    NotRunning,
}

impl ServiceStatus {
    /// Map the supervisor's native status vocabulary
    pub fn from_supervisor(status: &str) -> Self {
        match status {
            "online" => ServiceStatus::Running,
            "launching" | "waiting restart" => ServiceStatus::Starting,
            "stopping" => ServiceStatus::Stopping,
            "stopped" | "errored" | "one-launch-status" => ServiceStatus::NotRunning,
            _ => ServiceStatus::Unknown,
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ServiceStatus::Unknown => "unknown",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::NotRunning => "not running",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceStatus::from_supervisor("online"), ServiceStatus::Running);
        assert_eq!(ServiceStatus::from_supervisor("launching"), ServiceStatus::Starting);
        assert_eq!(
            ServiceStatus::from_supervisor("waiting restart"),
            ServiceStatus::Starting
        );
        assert_eq!(ServiceStatus::from_supervisor("stopping"), ServiceStatus::Stopping);
        assert_eq!(ServiceStatus::from_supervisor("errored"), ServiceStatus::NotRunning);
        assert_eq!(
            ServiceStatus::from_supervisor("one-launch-status"),
            ServiceStatus::NotRunning
        );
        assert_eq!(ServiceStatus::from_supervisor("weird"), ServiceStatus::Unknown);
    }

    #[test]
    fn test_service_ports_include_subservices() {
        let mut subservices = IndexMap::new();
        subservices.insert(
            "https".to_string(),
            SubServiceDescriptor {
                start: None,
                ports: vec![PortSpec::Mapping {
                    host: 8443,
                    container: 443,
                }],
            },
        );
        let service = Service {
            name: "web".to_string(),
            module: "shop".to_string(),
            start: Some("serve".to_string()),
            ports: vec![PortSpec::Same(8080)],
            env: IndexMap::new(),
            health_check: None,
            subservices,
            dependencies: Vec::new(),
        };

        assert_eq!(service.process_name(), "shop.web");
        assert_eq!(service.all_ports().len(), 2);
        assert_eq!(service.all_ports()[1].host(), 8443);
    }
}
