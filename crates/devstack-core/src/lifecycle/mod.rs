//! Process lifecycle management
//!
//! Starts, stops, restarts and health-checks services through a runtime
//! [`Backend`] and the external process [`Supervisor`].

mod backend;
mod health;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod pm2;
mod supervisor;

pub use backend::{Backend, ComposeBackend, LocalBackend, ProcessSpec};
pub use health::HealthChecker;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemorySupervisor;
pub use pm2::Pm2Supervisor;
pub use supervisor::{ProcessInfo, Supervisor, SupervisorHandle};

use crate::model::{Module, Service, ServiceStatus};
use crate::{Error, Result};
use command_executor::{Command, Launcher, LocalLauncher, LogSource};
use devstack_config::{RuntimeKind, Settings};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Status of a supervised process, mapped to [`ServiceStatus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    /// Supervisor process name
    pub name: String,
    /// Mapped status
    pub status: ServiceStatus,
    /// Status as the supervisor reported it
    pub native: String,
}

/// Starts, stops and observes services
pub struct LifecycleManager {
    backends: HashMap<RuntimeKind, Arc<dyn Backend>>,
    supervisor: SupervisorHandle,
    health: HealthChecker,
    shell: String,
    poll_interval: Duration,
    launcher: LocalLauncher,
}

impl LifecycleManager {
    /// Create a manager from explicit parts
    pub fn new(
        supervisor: Arc<dyn Supervisor>,
        backends: HashMap<RuntimeKind, Arc<dyn Backend>>,
        health: HealthChecker,
        shell: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backends,
            supervisor: SupervisorHandle::new(supervisor),
            health,
            shell: shell.into(),
            poll_interval,
            launcher: LocalLauncher,
        }
    }

    /// Standard backends for the project at `root`
    pub fn default_backends(
        root: &Path,
        settings: &Settings,
    ) -> HashMap<RuntimeKind, Arc<dyn Backend>> {
        let compose = ComposeBackend::new(
            settings.compose_program.clone(),
            settings.compose_project_name(root),
            settings.compose_file.clone(),
            root,
        );
        let mut backends: HashMap<RuntimeKind, Arc<dyn Backend>> = HashMap::new();
        backends.insert(RuntimeKind::Local, Arc::new(LocalBackend));
        backends.insert(RuntimeKind::Container, Arc::new(compose));
        backends
    }

    /// Manager for the project at `root` using `supervisor`
    pub fn with_supervisor(
        root: &Path,
        settings: &Settings,
        supervisor: Arc<dyn Supervisor>,
    ) -> Self {
        Self::new(
            supervisor,
            Self::default_backends(root, settings),
            HealthChecker::new(&settings.health_check_command, settings.health_check_timeout_ms),
            settings.shell.clone(),
            settings.poll_interval(),
        )
    }

    /// Manager for the project at `root` driving pm2
    pub fn from_settings(root: &Path, settings: &Settings) -> Self {
        let pm2 = Pm2Supervisor::new(settings.supervisor_program.clone(), settings.shell.clone());
        Self::with_supervisor(root, settings, Arc::new(pm2))
    }

    fn backend(&self, runtime: RuntimeKind) -> Result<&Arc<dyn Backend>> {
        self.backends
            .get(&runtime)
            .ok_or_else(|| Error::resolution(format!("no backend registered for runtime {runtime}")))
    }

    /// Start `service` and wait for its health check
    ///
    /// A module without any available runtime is skipped with a warning.
    pub async fn start(
        &self,
        module: &Module,
        service: &Service,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        if !module.has_runtime() {
            warn!(
                "Module {} has no available runtime, not starting {}",
                module.name, service.name
            );
            return Ok(());
        }

        let process = self.backend(module.runtime)?.service_process(module, service, env)?;
        info!("Starting service: {}", process.name);
        self.supervisor.get().await?.start(&process).await?;

        if let Some(health_check) = &service.health_check {
            self.health.wait_until_healthy(health_check).await?;
        }
        Ok(())
    }

    /// Stop `service`; an unknown process is not an error
    pub async fn stop(&self, service: &Service) -> Result<()> {
        let name = service.process_name();
        if self.supervisor.get().await?.stop(&name).await? {
            info!("Stopped service: {}", name);
        } else {
            info!("Service {} already not running", name);
        }
        Ok(())
    }

    /// Restart `service`; an unknown process is not an error
    pub async fn restart(&self, service: &Service) -> Result<()> {
        let name = service.process_name();
        if self.supervisor.get().await?.restart(&name).await? {
            info!("Restarted service: {}", name);
        } else {
            info!("Service {} is not running, nothing to restart", name);
        }
        Ok(())
    }

    /// Current status of `service`
    pub async fn find_service_process(&self, service: &Service) -> Result<ServiceStatus> {
        let name = service.process_name();
        let processes = self.supervisor.get().await?.list().await?;
        Ok(processes
            .iter()
            .find(|p| p.name == name)
            .map(|p| ServiceStatus::from_supervisor(&p.status))
            .unwrap_or(ServiceStatus::NotRunning))
    }

    /// Start `service` and poll until the supervisor reports it running
    ///
    /// The loop has no timeout of its own; cancel it by dropping the future.
    pub async fn start_and_wait_until_started(
        &self,
        module: &Module,
        service: &Service,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        if !module.has_runtime() {
            return self.start(module, service, env).await;
        }
        self.start(module, service, env).await?;
        self.wait_for_status(service, ServiceStatus::Running).await
    }

    /// Stop `service` and poll until the supervisor reports it not running
    pub async fn stop_and_wait_until_stopped(&self, service: &Service) -> Result<()> {
        self.stop(service).await?;
        self.wait_for_status(service, ServiceStatus::NotRunning).await
    }

    async fn wait_for_status(&self, service: &Service, expected: ServiceStatus) -> Result<()> {
        loop {
            let status = self.find_service_process(service).await?;
            if status == expected {
                return Ok(());
            }
            info!(
                "Waiting for {} to be {} (currently {})",
                service.process_name(),
                expected,
                status
            );
            smol::Timer::after(self.poll_interval).await;
        }
    }

    /// Every process the supervisor knows
    pub async fn get_process_list(&self) -> Result<Vec<ProcessStatus>> {
        let processes = self.supervisor.get().await?.list().await?;
        Ok(processes
            .into_iter()
            .map(|p| ProcessStatus {
                status: ServiceStatus::from_supervisor(&p.status),
                name: p.name,
                native: p.status,
            })
            .collect())
    }

    /// Run `line` once against `module` and return its combined output
    pub async fn run(
        &self,
        module: &Module,
        line: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<String> {
        self.run_one_off(module, line, env, false).await
    }

    /// Like [`LifecycleManager::run`], echoing output lines as they arrive
    pub async fn run_interactive(
        &self,
        module: &Module,
        line: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<String> {
        self.run_one_off(module, line, env, true).await
    }

    async fn run_one_off(
        &self,
        module: &Module,
        line: &str,
        env: &BTreeMap<String, String>,
        echo: bool,
    ) -> Result<String> {
        let process = self.backend(module.runtime)?.one_off(module, line, env);

        let mut command = Command::shell(&self.shell, &process.command_line);
        command.current_dir(&process.cwd).envs(&process.env);

        let result = self
            .launcher
            .execute_with(command, |source, text| {
                if echo {
                    match source {
                        LogSource::Stdout => println!("{text}"),
                        LogSource::Stderr => eprintln!("{text}"),
                    }
                }
            })
            .await?;

        if !result.success() {
            return Err(Error::spawn(process.command_line, result.status, result.output));
        }
        Ok(result.output)
    }

    /// Disconnect from the supervisor
    ///
    /// Safe to call more than once; a later operation reconnects.
    pub async fn shutdown(&self) -> Result<()> {
        self.supervisor.shutdown().await
    }

    /// Whether the supervisor connection is open
    pub async fn is_connected(&self) -> bool {
        self.supervisor.is_connected().await
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("runtimes", &self.backends.keys().collect::<Vec<_>>())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devstack_config::HealthCheckSpec;
    use indexmap::IndexMap;
    use std::path::PathBuf;

    fn module(runtimes: Vec<RuntimeKind>) -> Module {
        Module {
            name: "shop".to_string(),
            root: std::env::temp_dir(),
            relative_path: PathBuf::from("shop"),
            descriptor_path: PathBuf::from("module.yaml"),
            available_runtimes: runtimes,
            runtime: RuntimeKind::Local,
            container: None,
            env: IndexMap::new(),
            spec: serde_json::Value::Null,
            services: IndexMap::new(),
            tasks: IndexMap::new(),
            pipelines: IndexMap::new(),
            migrations: IndexMap::new(),
            hooks: IndexMap::new(),
        }
    }

    fn service(health_check: Option<HealthCheckSpec>) -> Service {
        Service {
            name: "web".to_string(),
            module: "shop".to_string(),
            start: Some("serve".to_string()),
            ports: Vec::new(),
            env: IndexMap::new(),
            health_check,
            subservices: IndexMap::new(),
            dependencies: Vec::new(),
        }
    }

    fn manager(supervisor: Arc<MemorySupervisor>, health: &str) -> LifecycleManager {
        let settings = Settings {
            health_check_command: health.to_string(),
            poll_interval_ms: 10,
            ..Settings::default()
        };
        LifecycleManager::with_supervisor(Path::new("/work"), &settings, supervisor)
    }

    #[smol_potat::test]
    async fn test_start_connects_lazily_and_starts() {
        let supervisor = Arc::new(MemorySupervisor::new());
        let lifecycle = manager(supervisor.clone(), "true");
        assert_eq!(supervisor.connect_count(), 0);

        lifecycle
            .start_and_wait_until_started(&module(vec![RuntimeKind::Local]), &service(None), &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(supervisor.connect_count(), 1);
        let started = supervisor.started().await;
        assert_eq!(started[0].name, "shop.web");
        assert_eq!(started[0].command_line, "serve");
    }

    #[smol_potat::test]
    async fn test_start_without_runtime_is_noop() {
        let supervisor = Arc::new(MemorySupervisor::new());
        let lifecycle = manager(supervisor.clone(), "true");

        lifecycle
            .start_and_wait_until_started(&module(Vec::new()), &service(None), &BTreeMap::new())
            .await
            .unwrap();

        assert!(supervisor.started().await.is_empty());
        assert_eq!(supervisor.connect_count(), 0);
    }

    #[smol_potat::test]
    async fn test_stop_unknown_service_is_not_an_error() {
        let supervisor = Arc::new(MemorySupervisor::new());
        let lifecycle = manager(supervisor, "true");

        lifecycle.stop_and_wait_until_stopped(&service(None)).await.unwrap();
    }

    #[smol_potat::test]
    async fn test_status_and_process_list() {
        let supervisor = Arc::new(MemorySupervisor::new());
        let lifecycle = manager(supervisor.clone(), "true");
        let service = service(None);

        assert_eq!(
            lifecycle.find_service_process(&service).await.unwrap(),
            ServiceStatus::NotRunning
        );

        lifecycle
            .start(&module(vec![RuntimeKind::Local]), &service, &BTreeMap::new())
            .await
            .unwrap();
        supervisor.set_status("shop.web", "waiting restart").await;

        assert_eq!(
            lifecycle.find_service_process(&service).await.unwrap(),
            ServiceStatus::Starting
        );
        let list = lifecycle.get_process_list().await.unwrap();
        assert_eq!(list[0].native, "waiting restart");
    }

    #[smol_potat::test]
    async fn test_wait_polls_until_running() {
        let supervisor = Arc::new(MemorySupervisor::new());
        supervisor.set_start_status("launching").await;
        let lifecycle = manager(supervisor.clone(), "true");
        let module = module(vec![RuntimeKind::Local]);
        let service = service(None);
        let env = BTreeMap::new();

        let flip = async {
            smol::Timer::after(Duration::from_millis(50)).await;
            supervisor.set_status("shop.web", "online").await;
        };
        let (started, ()) = futures::join!(
            lifecycle.start_and_wait_until_started(&module, &service, &env),
            flip
        );

        started.unwrap();
    }

    #[smol_potat::test]
    async fn test_failing_health_check_fails_start() {
        let supervisor = Arc::new(MemorySupervisor::new());
        let lifecycle = manager(supervisor, "false");
        let health = HealthCheckSpec {
            resources: vec!["tcp:localhost:1".to_string()],
            timeout: Some(10),
        };

        let err = lifecycle
            .start(&module(vec![RuntimeKind::Local]), &service(Some(health)), &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Spawn);
    }

    #[smol_potat::test]
    async fn test_supervisor_connection_failure_is_fatal() {
        let supervisor = Arc::new(MemorySupervisor::new());
        supervisor.fail_connect(true);
        let lifecycle = manager(supervisor, "true");

        let err = lifecycle
            .start(&module(vec![RuntimeKind::Local]), &service(None), &BTreeMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Supervisor);
    }

    #[smol_potat::test]
    async fn test_run_captures_output() {
        let supervisor = Arc::new(MemorySupervisor::new());
        let lifecycle = manager(supervisor, "true");
        let env = BTreeMap::from([("NAME".to_string(), "devstack".to_string())]);

        let output = lifecycle
            .run(&module(vec![RuntimeKind::Local]), "echo hello $NAME", &env)
            .await
            .unwrap();
        assert_eq!(output, "hello devstack\n");

        let err = lifecycle
            .run(&module(vec![RuntimeKind::Local]), "echo broken >&2; exit 4", &env)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit code 4"));
        assert!(err.to_string().contains("broken"));
    }

    #[smol_potat::test]
    async fn test_shutdown_then_reconnect() {
        let supervisor = Arc::new(MemorySupervisor::new());
        let lifecycle = manager(supervisor.clone(), "true");
        let service = service(None);

        lifecycle.find_service_process(&service).await.unwrap();
        lifecycle.shutdown().await.unwrap();
        lifecycle.shutdown().await.unwrap();
        assert_eq!(supervisor.disconnect_count(), 1);
        assert!(!lifecycle.is_connected().await);

        lifecycle.find_service_process(&service).await.unwrap();
        assert_eq!(supervisor.connect_count(), 2);
    }
}
