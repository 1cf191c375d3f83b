//! Runtime backends
//!
//! A backend turns a service (or a one-off command) into the command line
//! the supervisor or the runner actually executes.

use crate::model::{Module, Service};
use crate::{Error, Result};
use command_executor::shell::{assignment, quote};
use devstack_config::RuntimeKind;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A command ready to be handed to the supervisor or run once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Supervisor process name (`<module>.<service>`), or a label for one-off runs
    pub name: String,
    /// Shell command line
    pub command_line: String,
    /// Working directory
    pub cwd: PathBuf,
    /// Environment added to the inherited one
    pub env: BTreeMap<String, String>,
}

/// Builds backend-specific command lines
pub trait Backend: Send + Sync {
    /// The runtime this backend implements
    fn kind(&self) -> RuntimeKind;

    /// Command that runs `service` under this backend
    fn service_process(
        &self,
        module: &Module,
        service: &Service,
        env: &BTreeMap<String, String>,
    ) -> Result<ProcessSpec>;

    /// Command that runs `line` once in the context of `module`
    fn one_off(&self, module: &Module, line: &str, env: &BTreeMap<String, String>) -> ProcessSpec;
}

/// Runs services as bare local processes
#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl Backend for LocalBackend {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Local
    }

    fn service_process(
        &self,
        module: &Module,
        service: &Service,
        env: &BTreeMap<String, String>,
    ) -> Result<ProcessSpec> {
        let start = service.start.as_deref().ok_or_else(|| {
            Error::runnable(format!(
                "service {} has no start command",
                service.process_name()
            ))
        })?;

        Ok(ProcessSpec {
            name: service.process_name(),
            command_line: devstack_config::resolver::substitute_env(start)?,
            cwd: module.root.clone(),
            env: env.clone(),
        })
    }

    fn one_off(&self, module: &Module, line: &str, env: &BTreeMap<String, String>) -> ProcessSpec {
        ProcessSpec {
            name: module.name.clone(),
            command_line: line.to_string(),
            cwd: module.root.clone(),
            env: env.clone(),
        }
    }
}

/// Runs services through `docker compose run`
#[derive(Debug, Clone)]
pub struct ComposeBackend {
    program: String,
    project: String,
    compose_file: PathBuf,
    project_root: PathBuf,
}

impl ComposeBackend {
    /// Create a compose backend
    ///
    /// `compose_file` is resolved against `project_root` when relative.
    pub fn new(
        program: impl Into<String>,
        project: impl Into<String>,
        compose_file: impl Into<PathBuf>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        let project_root = project_root.into();
        let compose_file = compose_file.into();
        Self {
            program: program.into(),
            project: project.into(),
            compose_file: if compose_file.is_absolute() {
                compose_file
            } else {
                project_root.join(compose_file)
            },
            project_root,
        }
    }

    fn run_prefix(&self, env: &BTreeMap<String, String>) -> Vec<String> {
        let mut parts = vec![
            self.program.clone(),
            "-p".to_string(),
            quote(&self.project).into_owned(),
            "-f".to_string(),
            quote(&self.compose_file.to_string_lossy()).into_owned(),
            "run".to_string(),
            "--rm".to_string(),
        ];
        for (key, value) in env {
            parts.push("-e".to_string());
            parts.push(assignment(key, value));
        }
        parts
    }
}

impl Backend for ComposeBackend {
    fn kind(&self) -> RuntimeKind {
        RuntimeKind::Container
    }

    fn service_process(
        &self,
        module: &Module,
        service: &Service,
        env: &BTreeMap<String, String>,
    ) -> Result<ProcessSpec> {
        let mut parts = self.run_prefix(env);
        for port in service.all_ports() {
            parts.push("-p".to_string());
            parts.push(format!("{}:{}", port.host(), port.container()));
        }
        parts.push(quote(module.container_service()).into_owned());
        if let Some(start) = &service.start {
            parts.push(devstack_config::resolver::substitute_env(start)?);
        }

        Ok(ProcessSpec {
            name: service.process_name(),
            command_line: parts.join(" "),
            cwd: self.project_root.clone(),
            env: BTreeMap::new(),
        })
    }

    fn one_off(&self, module: &Module, line: &str, env: &BTreeMap<String, String>) -> ProcessSpec {
        let mut parts = self.run_prefix(env);
        parts.push(quote(module.container_service()).into_owned());
        parts.push("sh".to_string());
        parts.push("-c".to_string());
        parts.push(quote(line).into_owned());

        ProcessSpec {
            name: module.name.clone(),
            command_line: parts.join(" "),
            cwd: self.project_root.clone(),
            env: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Service;
    use devstack_config::{ContainerBuild, PortSpec, SubServiceDescriptor};
    use indexmap::IndexMap;

    fn module() -> Module {
        Module {
            name: "shop".to_string(),
            root: PathBuf::from("/work/shop"),
            relative_path: PathBuf::from("shop"),
            descriptor_path: PathBuf::from("/work/shop/module.yaml"),
            available_runtimes: vec![RuntimeKind::Container, RuntimeKind::Local],
            runtime: RuntimeKind::Container,
            container: Some(ContainerBuild {
                service: Some("shop-app".to_string()),
                ..ContainerBuild::default()
            }),
            env: IndexMap::new(),
            spec: serde_json::Value::Null,
            services: IndexMap::new(),
            tasks: IndexMap::new(),
            pipelines: IndexMap::new(),
            migrations: IndexMap::new(),
            hooks: IndexMap::new(),
        }
    }

    fn service() -> Service {
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
        Service {
            name: "web".to_string(),
            module: "shop".to_string(),
            start: Some("npm start".to_string()),
            ports: vec![PortSpec::Same(3000)],
            env: IndexMap::new(),
            health_check: None,
            subservices,
            dependencies: Vec::new(),
        }
    }

    fn env() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("HOSTS".to_string(), "a:1,b:2".to_string()),
            ("GREETING".to_string(), "hello world".to_string()),
        ])
    }

    #[test]
    fn test_local_backend_runs_in_module_root() {
        let spec = LocalBackend
            .service_process(&module(), &service(), &env())
            .unwrap();

        assert_eq!(spec.name, "shop.web");
        assert_eq!(spec.command_line, "npm start");
        assert_eq!(spec.cwd, PathBuf::from("/work/shop"));
        assert_eq!(spec.env["GREETING"], "hello world");
    }

    #[test]
    fn test_local_backend_requires_start() {
        let mut service = service();
        service.start = None;
        let err = LocalBackend
            .service_process(&module(), &service, &env())
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Runnable);
    }

    #[test]
    fn test_compose_backend_command_line() {
        let backend = ComposeBackend::new(
            "docker compose",
            "work",
            ".devstack/docker-compose.yml",
            "/work",
        );
        let spec = backend
            .service_process(&module(), &service(), &env())
            .unwrap();

        assert_eq!(
            spec.command_line,
            "docker compose -p work -f /work/.devstack/docker-compose.yml run --rm \
             -e GREETING='hello world' -e HOSTS=a:1,b:2 \
             -p 3000:3000 -p 8443:443 shop-app npm start"
        );
        assert!(spec.env.is_empty());
        assert_eq!(spec.cwd, PathBuf::from("/work"));
    }

    #[test]
    fn test_compose_one_off_quotes_line() {
        let backend = ComposeBackend::new("docker compose", "work", "/tmp/c.yml", "/work");
        let spec = backend.one_off(&module(), "echo $HOME", &BTreeMap::new());
        assert_eq!(
            spec.command_line,
            "docker compose -p work -f /tmp/c.yml run --rm shop-app sh -c 'echo $HOME'"
        );
    }
}
