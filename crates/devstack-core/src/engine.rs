//! Pipeline and task execution
//!
//! The engine is a dependency-ordered, idempotent step runner. Every
//! operation walks the target's dependency closure depth-first, running
//! dependencies before dependents. A per-operation visited set keyed by
//! `(entity, operation)` makes a node reachable through several paths run
//! once. Completed idempotent work is recorded in the module state and
//! persisted before the next step starts; a failure stops the walk without
//! touching state.

use crate::context::{TaskContext, TaskOutputs};
use crate::discovery::Project;
use crate::graph::ModuleGraph;
use crate::hooks::Hook;
use crate::lifecycle::LifecycleManager;
use crate::model::{EntityKind, EntityRef, EnvBinding, Module, Service, ServiceStatus, Task};
use crate::prompt::{Prompter, StaticPrompter};
use crate::runner::Runner;
use crate::state::{ModuleState, StateStore};
use crate::{Error, Result};
use devstack_config::StateFlag;
use devstack_config::resolver::substitute_env;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Options for a single operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Run idempotent steps even when already recorded
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Operation {
    Run,
    Start,
}

impl Operation {
    fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Service => Operation::Start,
            EntityKind::Task | EntityKind::Pipeline => Operation::Run,
        }
    }
}

type Visited = HashSet<(EntityRef, Operation)>;

/// One line of a status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatusRow {
    /// Module name
    pub module: String,
    /// Service name
    pub service: String,
    /// Current status
    pub status: ServiceStatus,
}

/// Drives operations over a discovered project
pub struct Engine {
    graph: Arc<ModuleGraph>,
    store: StateStore,
    runner: Runner,
    lifecycle: Arc<LifecycleManager>,
    prompter: Arc<dyn Prompter>,
    outputs: TaskOutputs,
    options: RunOptions,
    before_start_ran: HashSet<String>,
}

impl Engine {
    /// Create an engine for `project`
    pub fn new(project: Project, lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            runner: Runner::new(project.settings.shell.clone()),
            graph: project.graph,
            store: project.store,
            lifecycle,
            prompter: Arc::new(StaticPrompter::new()),
            outputs: TaskOutputs::new(),
            options: RunOptions::default(),
            before_start_ran: HashSet::new(),
        }
    }

    /// Use `prompter` to answer task questions
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    /// Use `options` for every operation
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// The module graph
    pub fn graph(&self) -> &Arc<ModuleGraph> {
        &self.graph
    }

    /// The lifecycle manager
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Return values of tasks executed so far
    pub fn outputs(&self) -> &TaskOutputs {
        &self.outputs
    }

    /// Run a pipeline and its dependency closure
    pub async fn run_pipeline(&mut self, module: &str, pipeline: &str) -> Result<()> {
        self.graph.pipeline(module, pipeline)?;
        let mut visited = Visited::new();
        self.visit(EntityRef::pipeline(module, pipeline), Operation::Run, &mut visited)
            .await
    }

    /// Run a task and its dependency closure, returning its value
    pub async fn run_task(&mut self, module: &str, task: &str) -> Result<Option<Value>> {
        self.graph.task(module, task)?;
        let mut visited = Visited::new();
        self.visit(EntityRef::task(module, task), Operation::Run, &mut visited)
            .await?;
        Ok(self.outputs.get(module, task).await)
    }

    /// Declared migrations of `module` not applied yet, sorted
    pub fn not_applied_migrations(&self, module: &str) -> Result<Vec<String>> {
        let module = self.graph.module(module)?;
        Ok(crate::state::not_applied_migrations(
            module.migrations.keys().map(String::as_str),
            &self.store.get(&module.name),
        ))
    }

    /// Apply pending migrations in order, persisting after each one
    ///
    /// Returns the ids that were applied.
    pub async fn run_migrations(&mut self, module: &str) -> Result<Vec<String>> {
        let module = Arc::clone(self.graph.module(module)?);
        let pending = self.not_applied_migrations(&module.name)?;
        if pending.is_empty() {
            info!("No pending migrations for {}", module.name);
        }

        for id in &pending {
            let runnable = module
                .migrations
                .get(id)
                .ok_or_else(|| Error::not_found("migration", id))?;
            info!("Applying migration {}:{}", module.name, id);
            let ctx = self.context(&module, BTreeMap::new());
            self.runner.run(runnable, &ctx).await?;
            self.store.update(&module.name, |state| {
                state.migrations.insert(id.clone());
            })?;
        }

        Ok(pending)
    }

    /// Start one service after its dependencies
    pub async fn start_service(&mut self, module: &str, service: &str) -> Result<()> {
        self.graph.service(module, service)?;
        let mut visited = Visited::new();
        self.visit(EntityRef::service(module, service), Operation::Start, &mut visited)
            .await
    }

    /// Start every service of a module
    ///
    /// Runs the module's `before_start` hook first, once per engine.
    pub async fn start_module(&mut self, module: &str) -> Result<()> {
        let module = Arc::clone(self.graph.module(module)?);
        if self.before_start_ran.insert(module.name.clone()) {
            self.run_hook(&module.name, Hook::BeforeStart).await?;
        }

        let mut visited = Visited::new();
        for service in module.services.values() {
            self.visit(service.entity(), Operation::Start, &mut visited)
                .await?;
        }
        Ok(())
    }

    /// Stop one service and wait until it is down
    pub async fn stop_service(&self, module: &str, service: &str) -> Result<()> {
        let service = self.graph.service(module, service)?;
        self.lifecycle.stop_and_wait_until_stopped(service).await
    }

    /// Stop every service of a module, last declared first
    pub async fn stop_module(&self, module: &str) -> Result<()> {
        let module = self.graph.module(module)?;
        for service in module.services.values().rev() {
            self.lifecycle.stop_and_wait_until_stopped(service).await?;
        }
        Ok(())
    }

    /// Restart one service
    pub async fn restart_service(&self, module: &str, service: &str) -> Result<()> {
        let service = self.graph.service(module, service)?;
        self.lifecycle.restart(service).await
    }

    /// Status of every service, or of one module's services
    pub async fn status(&self, module: Option<&str>) -> Result<Vec<ServiceStatusRow>> {
        let modules: Vec<&Arc<Module>> = match module {
            Some(name) => vec![self.graph.module(name)?],
            None => self.graph.modules().collect(),
        };

        let processes: HashMap<String, ServiceStatus> = self
            .lifecycle
            .get_process_list()
            .await?
            .into_iter()
            .map(|p| (p.name, p.status))
            .collect();

        Ok(modules
            .into_iter()
            .flat_map(|module| module.services.values())
            .map(|service| ServiceStatusRow {
                module: service.module.clone(),
                service: service.name.clone(),
                status: processes
                    .get(&service.process_name())
                    .copied()
                    .unwrap_or(ServiceStatus::NotRunning),
            })
            .collect())
    }

    /// Run a module's hook; `false` when the module does not declare it
    pub async fn run_hook(&self, module: &str, hook: Hook) -> Result<bool> {
        let module = Arc::clone(self.graph.module(module)?);
        let Some(runnable) = module.hooks.get(hook.key()) else {
            debug!("Module {} declares no {} hook", module.name, hook);
            return Ok(false);
        };

        info!("Running {} hook of {}", hook, module.name);
        let ctx = self.context(&module, BTreeMap::new());
        self.runner.run(runnable, &ctx).await?;
        Ok(true)
    }

    /// Clear a module's recorded state
    pub fn reset(&mut self, module: &str) -> Result<()> {
        let module = self.graph.module(module)?;
        info!("Resetting state of {}", module.name);
        self.store.reset(&module.name)
    }

    /// Recorded state of a module
    pub fn state(&self, module: &str) -> Result<ModuleState> {
        let module = self.graph.module(module)?;
        Ok(self.store.get(&module.name))
    }

    fn visit<'a>(
        &'a mut self,
        target: EntityRef,
        operation: Operation,
        visited: &'a mut Visited,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if !visited.insert((target.clone(), operation)) {
                debug!("Already handled {} in this run", target);
                return Ok(());
            }

            match target.kind {
                EntityKind::Task => self.execute_task(&target, visited).await,
                EntityKind::Pipeline => self.execute_pipeline(&target, visited).await,
                EntityKind::Service => self.start_service_node(&target, visited).await,
            }
        })
    }

    async fn visit_dependencies(
        &mut self,
        dependencies: &[crate::model::Dependency],
        visited: &mut Visited,
    ) -> Result<()> {
        for dependency in dependencies {
            let target = dependency.target.clone();
            let operation = Operation::for_kind(target.kind);
            self.visit(target, operation, visited).await?;
        }
        Ok(())
    }

    async fn execute_task(&mut self, target: &EntityRef, visited: &mut Visited) -> Result<()> {
        let module = Arc::clone(self.graph.module(&target.module)?);
        let task = module
            .tasks
            .get(&target.name)
            .ok_or_else(|| Error::not_found("task", &target.name))?;

        if self.task_is_done(task) {
            info!("Skipping {} (already applied)", target);
            let recorded = self.store.get(&module.name).outputs.get(&task.name).cloned();
            if let Some(value) = recorded {
                self.outputs.insert(&module.name, &task.name, value).await;
            }
            return Ok(());
        }

        self.visit_dependencies(&task.dependencies, visited).await?;
        let value = self.run_task_body(&module, task).await?;
        self.record_task(&module.name, task, value)
    }

    async fn execute_pipeline(&mut self, target: &EntityRef, visited: &mut Visited) -> Result<()> {
        let module = Arc::clone(self.graph.module(&target.module)?);
        let pipeline = module
            .pipelines
            .get(&target.name)
            .ok_or_else(|| Error::not_found("pipeline", &target.name))?;

        if self.flag_is_set(&module.name, pipeline.marks) {
            info!("Skipping {} (already applied)", target);
            return Ok(());
        }

        self.visit_dependencies(&pipeline.dependencies, visited).await?;
        info!("Running pipeline {}:{}", module.name, pipeline.name);
        for step in &pipeline.steps {
            debug!("Step {} -> {}", step.key, step.task);
            self.visit(step.task.clone(), Operation::Run, visited).await?;
        }
        self.record_flag(&module.name, pipeline.marks)
    }

    async fn start_service_node(&mut self, target: &EntityRef, visited: &mut Visited) -> Result<()> {
        let module = Arc::clone(self.graph.module(&target.module)?);
        let service = module
            .services
            .get(&target.name)
            .ok_or_else(|| Error::not_found("service", &target.name))?;

        self.visit_dependencies(&service.dependencies, visited).await?;
        let env = self.resolve_env(&module, service, visited).await?;
        self.lifecycle
            .start_and_wait_until_started(&module, service, &env)
            .await
    }

    /// Environment of a service: module bindings, then service bindings
    async fn resolve_env(
        &mut self,
        module: &Module,
        service: &Service,
        visited: &mut Visited,
    ) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        for (key, binding) in module.env.iter().chain(service.env.iter()) {
            let value = match binding {
                EnvBinding::Literal(value) => substitute_env(value)?,
                EnvBinding::TaskOutput {
                    module: owner,
                    task,
                    field,
                } => {
                    let value = self.task_output(owner, task, visited).await?;
                    render_output(value, field.as_deref(), owner, task)?
                }
            };
            env.insert(key.clone(), value);
        }
        Ok(env)
    }

    /// Return value of a task, visiting it when this invocation has none yet
    ///
    /// A visited or applied task is never run a second time; when it left no
    /// value behind the binding cannot be satisfied.
    async fn task_output(&mut self, module: &str, task: &str, visited: &mut Visited) -> Result<Value> {
        if self.outputs.get(module, task).await.is_none() {
            self.visit(EntityRef::task(module, task), Operation::Run, visited)
                .await?;
        }
        self.outputs.get(module, task).await.ok_or_else(|| {
            Error::runnable(format!(
                "task {module}:{task} returned no value in this run or any recorded one"
            ))
        })
    }

    async fn run_task_body(&mut self, module: &Arc<Module>, task: &Task) -> Result<Option<Value>> {
        let mut answers = BTreeMap::new();
        for question in &task.questions {
            let answer = self.prompter.ask(question).await?;
            answers.insert(question.name.clone(), answer);
        }

        info!("Running task {}:{}", module.name, task.name);
        let ctx = self.context(module, answers);
        let value = self.runner.run(&task.runnable, &ctx).await?;
        if let Some(value) = &value {
            self.outputs
                .insert(&module.name, &task.name, value.clone())
                .await;
        }
        Ok(value)
    }

    fn context(&self, module: &Arc<Module>, answers: BTreeMap<String, String>) -> TaskContext {
        TaskContext {
            module: Arc::clone(module),
            graph: Arc::clone(&self.graph),
            outputs: self.outputs.clone(),
            answers,
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    fn flag_is_set(&self, module: &str, flag: Option<StateFlag>) -> bool {
        !self.options.force && flag.is_some_and(|flag| self.store.get(module).flag(flag))
    }

    fn task_is_done(&self, task: &Task) -> bool {
        if self.options.force {
            return false;
        }
        let state = self.store.get(&task.module);
        (task.once && state.tasks.contains(&task.name))
            || task.marks.is_some_and(|flag| state.flag(flag))
    }

    /// Record a finished task; the value is kept only for recorded tasks
    fn record_task(&mut self, module: &str, task: &Task, value: Option<Value>) -> Result<()> {
        if !task.once && task.marks.is_none() {
            return Ok(());
        }
        self.store.update(module, |state| {
            if task.once {
                state.tasks.insert(task.name.clone());
            }
            if let Some(flag) = task.marks {
                state.set_flag(flag, true);
            }
            match value {
                Some(value) => state.outputs.insert(task.name.clone(), value),
                None => state.outputs.shift_remove(&task.name),
            };
        })
    }

    fn record_flag(&mut self, module: &str, flag: Option<StateFlag>) -> Result<()> {
        match flag {
            Some(flag) => self.store.update(module, |state| state.set_flag(flag, true)),
            None => Ok(()),
        }
    }
}

/// Render a task's return value (or one field of it) as an env value
fn render_output(value: Value, field: Option<&str>, module: &str, task: &str) -> Result<String> {
    let value = match (field, value) {
        (None, value) => value,
        (Some(field), Value::Object(mut map)) => map
            .remove(field)
            .ok_or_else(|| Error::not_found("output field", format!("{module}:{task}.{field}")))?,
        (Some(field), _) => {
            return Err(Error::runnable(format!(
                "output of task {module}:{task} is not an object, cannot read field '{field}'"
            )));
        }
    };

    Ok(match value {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("modules", &self.graph.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
