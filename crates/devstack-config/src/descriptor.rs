//! Module descriptor schema and loading
//!
//! A descriptor is parsed in two steps: the file is read into a generic
//! [`serde_json::Value`] (from YAML, or JSON when the file name ends in
//! `.json`), an optional `default:` wrapper is peeled off, and the value is
//! then mapped onto [`ModuleDescriptor`].

use crate::{ConfigError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// Root of a `module.yaml` file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleDescriptor {
    /// Module name, unique across the project
    pub name: String,

    /// Runtime the module runs under, if the author pins one
    #[serde(default)]
    pub runtime: Option<RuntimeKind>,

    /// Container build information; its presence enables the container runtime
    #[serde(default)]
    pub container: Option<ContainerBuild>,

    /// Module-wide environment
    #[serde(default)]
    pub env: IndexMap<String, EnvValue>,

    /// Opaque author-supplied object, carried verbatim
    #[serde(default)]
    pub spec: Value,

    /// Services keyed by name
    #[serde(default)]
    pub services: IndexMap<String, ServiceDescriptor>,

    /// Tasks keyed by name
    #[serde(default)]
    pub tasks: IndexMap<String, TaskDescriptor>,

    /// Pipelines keyed by name
    #[serde(default)]
    pub pipelines: IndexMap<String, PipelineDescriptor>,

    /// Migrations keyed by id
    #[serde(default)]
    pub migrations: IndexMap<String, RunnableSpec>,

    /// Lifecycle hooks keyed by hook name
    #[serde(default)]
    pub hooks: IndexMap<String, RunnableSpec>,
}

/// Runtime backend a module can run under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Containerized through the compose runtime
    Container,
    /// Bare local process
    Local,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeKind::Container => write!(f, "container"),
            RuntimeKind::Local => write!(f, "local"),
        }
    }
}

/// Container build information
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContainerBuild {
    /// Compose service name; defaults to the module name
    #[serde(default)]
    pub service: Option<String>,
    /// Dockerfile path relative to the module root
    #[serde(default)]
    pub dockerfile: Option<String>,
    /// Build context relative to the module root
    #[serde(default)]
    pub context: Option<String>,
}

/// A long-running process definition
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServiceDescriptor {
    /// Explicit name; defaults to the map key
    #[serde(default)]
    pub name: Option<String>,

    /// Start command
    #[serde(default)]
    pub start: Option<String>,

    /// Exposed ports
    #[serde(default)]
    pub ports: Vec<PortSpec>,

    /// Service environment, layered over the module environment
    #[serde(default)]
    pub env: IndexMap<String, EnvValue>,

    /// Resources to wait for after start
    #[serde(default)]
    pub health_check: Option<HealthCheckSpec>,

    /// Nested named port groups of the same process
    #[serde(default)]
    pub subservices: IndexMap<String, SubServiceDescriptor>,

    /// Declared dependencies
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

/// A named port/command group nested inside a service
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubServiceDescriptor {
    /// Optional command of its own
    #[serde(default)]
    pub start: Option<String>,
    /// Ports exposed by the group
    #[serde(default)]
    pub ports: Vec<PortSpec>,
}

/// Port exposure, either the same port on both sides or an explicit mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    /// Same port on host and container
    Same(u16),
    /// Host port mapped onto a container port
    Mapping {
        /// Port on the host
        host: u16,
        /// Port inside the container
        container: u16,
    },
}

impl PortSpec {
    /// Port on the host side
    pub fn host(&self) -> u16 {
        match *self {
            PortSpec::Same(port) => port,
            PortSpec::Mapping { host, .. } => host,
        }
    }

    /// Port on the container side
    pub fn container(&self) -> u16 {
        match *self {
            PortSpec::Same(port) => port,
            PortSpec::Mapping { container, .. } => container,
        }
    }
}

/// Health check: resources polled by the external wait utility
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HealthCheckSpec {
    /// Resources such as `tcp:localhost:3000` or `http://localhost:3000/health`
    #[serde(default)]
    pub resources: Vec<String>,
    /// Timeout in milliseconds; falls back to the project setting
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// An environment value: a literal, or the output of a task bound at start time
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum EnvValue {
    /// Literal string (numbers and booleans are rendered as text)
    Literal(String),
    /// Return value of a task, optionally a single field of it
    TaskOutput {
        /// Owning module; defaults to the module declaring the value
        module: Option<String>,
        /// Task name
        task: String,
        /// Field of an object return value
        field: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskOutputFields {
    #[serde(default)]
    module: Option<String>,
    task: String,
    #[serde(default)]
    field: Option<String>,
}

impl TryFrom<Value> for EnvValue {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::String(s) => Ok(EnvValue::Literal(s)),
            Value::Number(n) => Ok(EnvValue::Literal(n.to_string())),
            Value::Bool(b) => Ok(EnvValue::Literal(b.to_string())),
            Value::Null => Ok(EnvValue::Literal(String::new())),
            Value::Object(map) if map.contains_key("task") => {
                let fields: TaskOutputFields =
                    serde_json::from_value(Value::Object(map)).map_err(|e| e.to_string())?;
                Ok(EnvValue::TaskOutput {
                    module: fields.module,
                    task: fields.task,
                    field: fields.field,
                })
            }
            other => Err(format!(
                "unsupported env value {other}; expected a scalar or {{task, module?, field?}}"
            )),
        }
    }
}

/// A unit of executable work
///
/// May be written as a bare runnable (`build: "npm run build"`) or as an
/// object with a `run` key and further options.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct TaskDescriptor {
    /// Body of the task
    pub run: RunnableSpec,
    /// Declared dependencies
    pub dependencies: Vec<DependencySpec>,
    /// Record completion and skip the task on later runs
    pub once: bool,
    /// Coarse state flag set on success
    pub marks: Option<StateFlag>,
    /// Operator-supplied parameters asked before the task runs
    pub questions: Vec<Question>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TaskFields {
    run: RunnableSpec,
    #[serde(default)]
    dependencies: Vec<DependencySpec>,
    #[serde(default)]
    once: bool,
    #[serde(default)]
    marks: Option<StateFlag>,
    #[serde(default)]
    questions: Vec<Question>,
}

impl TryFrom<Value> for TaskDescriptor {
    type Error = String;

    fn try_from(value: Value) -> std::result::Result<Self, Self::Error> {
        match value {
            Value::Object(ref map) if map.contains_key("run") => {
                let fields: TaskFields = serde_json::from_value(value).map_err(|e| e.to_string())?;
                Ok(TaskDescriptor {
                    run: fields.run,
                    dependencies: fields.dependencies,
                    once: fields.once,
                    marks: fields.marks,
                    questions: fields.questions,
                })
            }
            other => Ok(TaskDescriptor {
                run: RunnableSpec(other),
                ..TaskDescriptor::default()
            }),
        }
    }
}

/// An ordered sequence of task-invoking steps
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PipelineDescriptor {
    /// Steps in declaration order
    #[serde(default)]
    pub steps: IndexMap<String, StepSpec>,
    /// Declared dependencies
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    /// Coarse state flag set on success; `build` and `configure` imply one
    #[serde(default)]
    pub marks: Option<StateFlag>,
}

/// The task a pipeline step invokes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum StepSpec {
    /// Task of the pipeline's own module
    Name(String),
    /// Task of an explicit module
    Ref {
        /// Owning module; defaults to the pipeline's module
        #[serde(default)]
        module: Option<String>,
        /// Task name
        task: String,
    },
}

impl StepSpec {
    /// Name of the referenced task
    pub fn task(&self) -> &str {
        match self {
            StepSpec::Name(task) => task,
            StepSpec::Ref { task, .. } => task,
        }
    }

    /// Explicit module, if any
    pub fn module(&self) -> Option<&str> {
        match self {
            StepSpec::Name(_) => None,
            StepSpec::Ref { module, .. } => module.as_deref(),
        }
    }
}

/// A dependency as written by the module author
///
/// Exactly one of `service`, `task` or `pipeline` should be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencySpec {
    /// Module owning the target
    #[serde(default)]
    pub module: Option<String>,
    /// Target service
    #[serde(default)]
    pub service: Option<String>,
    /// Target task
    #[serde(default)]
    pub task: Option<String>,
    /// Target pipeline
    #[serde(default)]
    pub pipeline: Option<String>,
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("module", &self.module),
            ("service", &self.service),
            ("task", &self.task),
            ("pipeline", &self.pipeline),
        ];
        let parts: Vec<String> = fields
            .iter()
            .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}: {v}")))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Coarse completion flags kept in the module state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFlag {
    /// The module has been built
    Built,
    /// The module has been configured
    Configured,
}

impl fmt::Display for StateFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateFlag::Built => write!(f, "built"),
            StateFlag::Configured => write!(f, "configured"),
        }
    }
}

/// Interactive question asked before a task runs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Question {
    /// Answer name; exported to shell commands upper-cased
    pub name: String,
    /// Prompt text
    #[serde(default)]
    pub message: Option<String>,
    /// Answer used when the operator supplies none
    #[serde(default)]
    pub default: Option<String>,
}

/// A runnable body as written in a descriptor
///
/// Kept untyped here; the engine turns it into its runnable type during
/// resolution, when registered functions are known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunnableSpec(pub Value);

impl From<&str> for RunnableSpec {
    fn from(command: &str) -> Self {
        RunnableSpec(Value::String(command.to_string()))
    }
}

/// Parse descriptor text, as YAML or, when `json` is set, as JSON
///
/// Map order survives the intermediate `Value` because the workspace builds
/// `serde_json` with `preserve_order`.
pub fn parse_descriptor(content: &str, json: bool) -> Result<ModuleDescriptor> {
    let value = unwrap_default(parse_value(content, json)?);
    let descriptor: ModuleDescriptor = serde_json::from_value(value)?;

    if descriptor.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "module name must not be empty".to_string(),
        ));
    }

    Ok(descriptor)
}

/// Load a descriptor file
pub fn load_descriptor(path: &Path) -> Result<ModuleDescriptor> {
    let content = read(path)?;
    parse_descriptor(&content, is_json(path))
}

/// Load a companion hook file
///
/// A missing file yields no hooks.
pub fn load_hooks(path: &Path) -> Result<IndexMap<String, RunnableSpec>> {
    if !path.exists() {
        return Ok(IndexMap::new());
    }

    let content = read(path)?;
    match unwrap_default(parse_value(&content, is_json(path))?) {
        Value::Null => Ok(IndexMap::new()),
        value => Ok(serde_json::from_value(value)?),
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

fn parse_value(content: &str, json: bool) -> Result<Value> {
    if json {
        Ok(serde_json::from_str(content)?)
    } else {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Peel off a `default:` wrapper when it is the only top-level key
fn unwrap_default(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("default") => {
            map.remove("default").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: &str = r#"
name: node
container:
  dockerfile: Dockerfile
env:
  NODE_ENV: development
  WORKERS: 4
services:
  js-app:
    start: node server.js
    ports: [3000, {host: 8443, container: 443}]
    env:
      DB_URL: { module: db, task: provision, field: url }
    health_check: { resources: ["tcp:localhost:3000"], timeout: 30000 }
    subservices: { https: { ports: [8443] } }
    dependencies: [{ pipeline: build }, { pipeline: configure }]
tasks:
  build: npm run build
  seed:
    run: ["npm run seed", { fn: seed-users }]
    once: true
    questions: [{ name: admin, message: "Admin email?", default: admin@example.com }]
pipelines:
  build: { steps: { 10-install: install, 20-build: build } }
migrations: { 0001-init: "psql -f init.sql" }
hooks: { on_init: "echo ready" }
"#;

    #[test]
    fn test_parse_full_descriptor() {
        let module = parse_descriptor(NODE, false).unwrap();

        assert_eq!(module.name, "node");
        assert!(module.container.is_some());
        assert_eq!(
            module.env.get("WORKERS"),
            Some(&EnvValue::Literal("4".to_string()))
        );

        let app = &module.services["js-app"];
        assert_eq!(app.start.as_deref(), Some("node server.js"));
        assert_eq!(app.ports[1].host(), 8443);
        assert_eq!(app.ports[1].container(), 443);
        assert_eq!(
            app.env["DB_URL"],
            EnvValue::TaskOutput {
                module: Some("db".to_string()),
                task: "provision".to_string(),
                field: Some("url".to_string()),
            }
        );
        assert_eq!(app.subservices["https"].ports, vec![PortSpec::Same(8443)]);
        assert_eq!(app.dependencies[0].pipeline.as_deref(), Some("build"));

        assert_eq!(module.tasks["build"].run, RunnableSpec::from("npm run build"));
        assert!(module.tasks["seed"].once);
        assert_eq!(module.tasks["seed"].questions[0].name, "admin");

        let steps: Vec<_> = module.pipelines["build"].steps.keys().cloned().collect();
        assert_eq!(steps, vec!["10-install", "20-build"]);
        assert_eq!(module.migrations.len(), 1);
        assert!(module.hooks.contains_key("on_init"));
    }

    #[test]
    fn test_declaration_order_is_kept() {
        let yaml = r#"
name: app
env: { ZETA: "1", ALPHA: "2" }
services:
  worker: { start: work }
  api: { start: serve }
pipelines:
  build:
    steps:
      fetch: fetch
      compile: compile
"#;
        let module = parse_descriptor(yaml, false).unwrap();

        let steps: Vec<_> = module.pipelines["build"].steps.keys().cloned().collect();
        assert_eq!(steps, vec!["fetch", "compile"]);
        let services: Vec<_> = module.services.keys().cloned().collect();
        assert_eq!(services, vec!["worker", "api"]);
        let env: Vec<_> = module.env.keys().cloned().collect();
        assert_eq!(env, vec!["ZETA", "ALPHA"]);
    }

    #[test]
    fn test_default_wrapper_is_unwrapped() {
        let yaml = "default:\n  name: wrapped\n  tasks:\n    hello: echo hi\n";
        let module = parse_descriptor(yaml, false).unwrap();
        assert_eq!(module.name, "wrapped");
        assert!(module.tasks.contains_key("hello"));
    }

    #[test]
    fn test_json_descriptor() {
        let json = r#"{"name": "api", "runtime": "local", "services": {"web": {"start": "serve"}}}"#;
        let module = parse_descriptor(json, true).unwrap();
        assert_eq!(module.runtime, Some(RuntimeKind::Local));
        assert!(module.services.contains_key("web"));
    }

    #[test]
    fn test_step_reference_to_other_module() {
        let yaml = "name: a\npipelines:\n  configure:\n    steps:\n      10-db: { module: db, task: migrate }\n";
        let module = parse_descriptor(yaml, false).unwrap();
        let step = &module.pipelines["configure"].steps["10-db"];
        assert_eq!(step.module(), Some("db"));
        assert_eq!(step.task(), "migrate");
    }

    #[test]
    fn test_invalid_env_value_is_rejected() {
        let yaml = "name: a\nenv:\n  BAD: [1, 2]\n";
        let err = parse_descriptor(yaml, false).unwrap_err();
        assert!(err.to_string().contains("unsupported env value"));
    }

    #[test]
    fn test_missing_name_is_rejected() {
        assert!(parse_descriptor("services: {}\n", false).is_err());
        assert!(matches!(
            parse_descriptor("name: ''\n", false),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_dependency_display_lists_set_fields() {
        let dep = DependencySpec {
            module: Some("db".to_string()),
            task: Some("migrate".to_string()),
            ..DependencySpec::default()
        };
        assert_eq!(dep.to_string(), "{module: db, task: migrate}");
    }

    #[test]
    fn test_load_hooks_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = load_hooks(&dir.path().join("module.hooks.yaml")).unwrap();
        assert!(hooks.is_empty());
    }

    #[test]
    fn test_load_hooks_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("module.hooks.yaml");
        std::fs::write(&path, "before_start: echo starting\n").unwrap();

        let hooks = load_hooks(&path).unwrap();
        assert_eq!(hooks["before_start"], RunnableSpec::from("echo starting"));
    }

    #[test]
    fn test_load_descriptor_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_descriptor(&dir.path().join("module.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
        assert!(err.to_string().contains("module.yaml"));
    }
}
