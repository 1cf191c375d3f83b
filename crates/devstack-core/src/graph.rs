//! Dependency graph resolution
//!
//! Resolution runs in two phases. The first indexes every module and the
//! names of its services, tasks and pipelines; the second materializes the
//! entities and binds each declared dependency against that index. Forward
//! references across modules therefore resolve regardless of scan order.

use crate::model::{
    Dependency, EntityKind, EntityRef, EnvBinding, Module, Pipeline, Service, Step, Task,
};
use crate::runner::{FunctionRegistry, Runnable};
use crate::scanner::ScannedModule;
use crate::{Error, Result};
use devstack_config::{DependencySpec, EnvValue, RuntimeKind, StateFlag};
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Every discovered module, keyed by name
#[derive(Debug, Clone, Default)]
pub struct ModuleGraph {
    modules: IndexMap<String, Arc<Module>>,
}

impl ModuleGraph {
    /// Look up a module
    pub fn module(&self, name: &str) -> Result<&Arc<Module>> {
        self.modules
            .get(name)
            .ok_or_else(|| Error::not_found("module", name))
    }

    /// All modules in discovery order
    pub fn modules(&self) -> impl Iterator<Item = &Arc<Module>> {
        self.modules.values()
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module was discovered
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Look up a service
    pub fn service(&self, module: &str, name: &str) -> Result<&Service> {
        self.module(module)?
            .services
            .get(name)
            .ok_or_else(|| Error::not_found("service", name))
    }

    /// Look up a task
    pub fn task(&self, module: &str, name: &str) -> Result<&Task> {
        self.module(module)?
            .tasks
            .get(name)
            .ok_or_else(|| Error::not_found("task", name))
    }

    /// Look up a pipeline
    pub fn pipeline(&self, module: &str, name: &str) -> Result<&Pipeline> {
        self.module(module)?
            .pipelines
            .get(name)
            .ok_or_else(|| Error::not_found("pipeline", name))
    }

    /// Resolve scanned modules into a graph
    pub fn resolve(scanned: Vec<ScannedModule>, registry: &FunctionRegistry) -> Result<Self> {
        let index = NameIndex::build(&scanned)?;

        let mut modules = IndexMap::with_capacity(scanned.len());
        for module in scanned {
            let module = build_module(module, &index, registry)?;
            modules.insert(module.name.clone(), Arc::new(module));
        }

        Ok(Self { modules })
    }
}

#[derive(Default)]
struct ModuleNames {
    services: IndexSet<String>,
    tasks: IndexSet<String>,
    pipelines: IndexSet<String>,
}

/// Names of every entity, built before any dependency is bound
struct NameIndex {
    modules: IndexMap<String, ModuleNames>,
}

impl NameIndex {
    fn build(scanned: &[ScannedModule]) -> Result<Self> {
        let mut modules: IndexMap<String, ModuleNames> = IndexMap::new();

        for module in scanned {
            let descriptor = &module.descriptor;
            if modules.contains_key(&descriptor.name) {
                return Err(Error::resolution(format!(
                    "duplicate module name '{}' in {}",
                    descriptor.name,
                    module.descriptor_path.display()
                )));
            }

            let mut names = ModuleNames::default();
            for (key, service) in &descriptor.services {
                let name = service.name.clone().unwrap_or_else(|| key.clone());
                if !names.services.insert(name.clone()) {
                    return Err(Error::resolution(format!(
                        "duplicate service name '{}' in module '{}'",
                        name, descriptor.name
                    )));
                }
            }
            names.tasks.extend(descriptor.tasks.keys().cloned());
            names.pipelines.extend(descriptor.pipelines.keys().cloned());
            modules.insert(descriptor.name.clone(), names);
        }

        Ok(Self { modules })
    }

    fn names(&self, module: &str) -> Result<&ModuleNames> {
        self.modules
            .get(module)
            .ok_or_else(|| Error::not_found("module", module))
    }

    fn lookup(&self, module: &str, kind: EntityKind, name: &str) -> Result<EntityRef> {
        let names = self.names(module)?;
        let (set, what) = match kind {
            EntityKind::Service => (&names.services, "service"),
            EntityKind::Task => (&names.tasks, "task"),
            EntityKind::Pipeline => (&names.pipelines, "pipeline"),
        };
        if !set.contains(name) {
            return Err(Error::not_found(what, name));
        }
        Ok(EntityRef {
            module: module.to_string(),
            kind,
            name: name.to_string(),
        })
    }

    /// Find a service by name when no module is given
    fn find_service(&self, name: &str) -> Result<EntityRef> {
        let owners: Vec<&String> = self
            .modules
            .iter()
            .filter(|(_, names)| names.services.contains(name))
            .map(|(module, _)| module)
            .collect();

        match owners.as_slice() {
            [] => Err(Error::not_found("service", name)),
            [module] => Ok(EntityRef::service(module.as_str(), name)),
            many => Err(Error::resolution(format!(
                "service '{}' is ambiguous; it exists in modules {}",
                name,
                many.iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    fn resolve(&self, origin: &EntityRef, spec: &DependencySpec) -> Result<Dependency> {
        let module = match (&spec.module, &spec.service) {
            (None, None) => Some(origin.module.as_str()),
            (module, _) => module.as_deref(),
        };

        let target = if let Some(service) = &spec.service {
            match module {
                Some(module) => self.lookup(module, EntityKind::Service, service)?,
                None => self.find_service(service)?,
            }
        } else {
            // Without a service the module always defaults to the origin's.
            let module = module.unwrap_or(origin.module.as_str());
            if let Some(task) = &spec.task {
                self.lookup(module, EntityKind::Task, task)?
            } else if let Some(pipeline) = &spec.pipeline {
                self.lookup(module, EntityKind::Pipeline, pipeline)?
            } else {
                return Err(Error::resolution(format!(
                    "dependency {spec} of {origin} names no service, task or pipeline"
                )));
            }
        };

        debug!("Resolved {} -> {}", origin, target);
        Ok(Dependency {
            origin: origin.clone(),
            target,
            spec: spec.clone(),
        })
    }

    fn resolve_all(&self, origin: &EntityRef, specs: &[DependencySpec]) -> Result<Vec<Dependency>> {
        specs.iter().map(|spec| self.resolve(origin, spec)).collect()
    }

    fn resolve_env(
        &self,
        module: &str,
        env: &IndexMap<String, EnvValue>,
    ) -> Result<IndexMap<String, EnvBinding>> {
        env.iter()
            .map(|(key, value)| {
                let binding = match value {
                    EnvValue::Literal(value) => EnvBinding::Literal(value.clone()),
                    EnvValue::TaskOutput {
                        module: owner,
                        task,
                        field,
                    } => {
                        let owner = owner.as_deref().unwrap_or(module);
                        let target = self.lookup(owner, EntityKind::Task, task)?;
                        EnvBinding::TaskOutput {
                            module: target.module,
                            task: target.name,
                            field: field.clone(),
                        }
                    }
                };
                Ok((key.clone(), binding))
            })
            .collect()
    }
}

fn build_module(
    scanned: ScannedModule,
    index: &NameIndex,
    registry: &FunctionRegistry,
) -> Result<Module> {
    let ScannedModule {
        descriptor,
        root,
        relative_path,
        descriptor_path,
        hooks,
    } = scanned;
    let name = descriptor.name.clone();

    let mut services = IndexMap::new();
    for (key, spec) in &descriptor.services {
        let service_name = spec.name.clone().unwrap_or_else(|| key.clone());
        let origin = EntityRef::service(&name, &service_name);
        let service = Service {
            dependencies: index.resolve_all(&origin, &spec.dependencies)?,
            env: index.resolve_env(&name, &spec.env)?,
            name: service_name.clone(),
            module: name.clone(),
            start: spec.start.clone(),
            ports: spec.ports.clone(),
            health_check: spec.health_check.clone(),
            subservices: spec.subservices.clone(),
        };
        services.insert(service_name, service);
    }

    let mut tasks = IndexMap::new();
    for (task_name, spec) in &descriptor.tasks {
        let origin = EntityRef::task(&name, task_name);
        let task = Task {
            runnable: Runnable::from_spec(&spec.run, registry, &origin.to_string())?,
            dependencies: index.resolve_all(&origin, &spec.dependencies)?,
            name: task_name.clone(),
            module: name.clone(),
            once: spec.once,
            marks: spec.marks,
            questions: spec.questions.clone(),
        };
        tasks.insert(task_name.clone(), task);
    }

    let mut pipelines = IndexMap::new();
    for (pipeline_name, spec) in &descriptor.pipelines {
        let origin = EntityRef::pipeline(&name, pipeline_name);
        let steps = spec
            .steps
            .iter()
            .map(|(key, step)| {
                let module = step.module().unwrap_or(name.as_str());
                Ok(Step {
                    key: key.clone(),
                    task: index.lookup(module, EntityKind::Task, step.task())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let pipeline = Pipeline {
            dependencies: index.resolve_all(&origin, &spec.dependencies)?,
            marks: spec.marks.or_else(|| default_marks(pipeline_name)),
            name: pipeline_name.clone(),
            module: name.clone(),
            steps,
        };
        pipelines.insert(pipeline_name.clone(), pipeline);
    }

    let migrations = descriptor
        .migrations
        .iter()
        .map(|(id, spec)| {
            let owner = format!("migration {name}:{id}");
            Ok((id.clone(), Runnable::from_spec(spec, registry, &owner)?))
        })
        .collect::<Result<IndexMap<_, _>>>()?;

    let hooks = hooks
        .iter()
        .map(|(hook, spec)| {
            let owner = format!("hook {name}:{hook}");
            Ok((hook.clone(), Runnable::from_spec(spec, registry, &owner)?))
        })
        .collect::<Result<IndexMap<_, _>>>()?;

    let mut available_runtimes = Vec::new();
    if descriptor.container.is_some() {
        available_runtimes.push(RuntimeKind::Container);
    }
    if descriptor.services.values().any(|s| s.start.is_some()) {
        available_runtimes.push(RuntimeKind::Local);
    }
    if available_runtimes.is_empty() {
        warn!(
            "Module {} declares neither a container build nor a service start command",
            name
        );
    }
    let runtime = descriptor
        .runtime
        .or_else(|| available_runtimes.first().copied())
        .unwrap_or(RuntimeKind::Local);

    Ok(Module {
        env: index.resolve_env(&name, &descriptor.env)?,
        name,
        root,
        relative_path,
        descriptor_path,
        available_runtimes,
        runtime,
        container: descriptor.container,
        spec: descriptor.spec,
        services,
        tasks,
        pipelines,
        migrations,
        hooks,
    })
}

/// Pipelines named after a coarse flag mark it unless told otherwise
fn default_marks(pipeline: &str) -> Option<StateFlag> {
    match pipeline {
        "build" => Some(StateFlag::Built),
        "configure" => Some(StateFlag::Configured),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use devstack_config::parse_descriptor;
    use std::path::PathBuf;

    fn scanned(yaml: &str) -> ScannedModule {
        let descriptor = parse_descriptor(yaml, false).unwrap();
        let root = PathBuf::from("/project").join(&descriptor.name);
        ScannedModule {
            hooks: descriptor.hooks.clone(),
            descriptor_path: root.join("module.yaml"),
            relative_path: PathBuf::from(&descriptor.name),
            root,
            descriptor,
        }
    }

    fn resolve(yamls: &[&str]) -> Result<ModuleGraph> {
        let modules = yamls.iter().map(|yaml| scanned(yaml)).collect();
        ModuleGraph::resolve(modules, &FunctionRegistry::new())
    }

    #[test]
    fn test_dependency_defaults_to_own_module() {
        let graph = resolve(&[
            "name: m\ntasks:\n  x: echo m\n  y:\n    run: echo y\n    dependencies: [{task: x}]\n",
            "name: other\ntasks:\n  x: echo other\n",
        ])
        .unwrap();

        let task = graph.task("m", "y").unwrap();
        assert_eq!(task.dependencies[0].target, EntityRef::task("m", "x"));
    }

    #[test]
    fn test_forward_reference_across_modules() {
        let graph = resolve(&[
            "name: api\nservices:\n  web:\n    start: serve\n    dependencies: [{module: db, service: postgres}]\n",
            "name: db\nservices:\n  postgres:\n    start: postgres\n",
        ])
        .unwrap();

        let web = graph.service("api", "web").unwrap();
        assert_eq!(web.dependencies[0].target, EntityRef::service("db", "postgres"));
    }

    #[test]
    fn test_service_without_module_is_searched_globally() {
        let graph = resolve(&[
            "name: api\ntasks:\n  migrate:\n    run: echo\n    dependencies: [{service: postgres}]\n",
            "name: db\nservices:\n  postgres:\n    start: postgres\n",
        ])
        .unwrap();

        let task = graph.task("api", "migrate").unwrap();
        assert_eq!(task.dependencies[0].target.module, "db");
    }

    #[test]
    fn test_missing_service_names_key() {
        let err = resolve(&[
            "name: api\ntasks:\n  t:\n    run: echo\n    dependencies: [{service: ghost}]\n",
        ])
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_ambiguous_service_is_resolution_error() {
        let err = resolve(&[
            "name: a\nservices:\n  web: { start: a }\n",
            "name: b\nservices:\n  web: { start: b }\n",
            "name: c\ntasks:\n  t:\n    run: echo\n    dependencies: [{service: web}]\n",
        ])
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_duplicate_module_name() {
        let err = resolve(&["name: a\n", "name: a\n"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn test_empty_dependency_spec() {
        let err = resolve(&["name: a\ntasks:\n  t:\n    run: echo\n    dependencies: [{}]\n"])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Resolution);
    }

    #[test]
    fn test_removing_unrelated_module_keeps_resolution() {
        let db = "name: db\nservices:\n  postgres: { start: postgres }\n";
        let api = "name: api\nservices:\n  web:\n    start: serve\n    dependencies: [{module: db, service: postgres}]\n";
        let leaf = "name: docs\ntasks:\n  build: echo docs\n";

        let with_leaf = resolve(&[db, api, leaf]).unwrap();
        let without_leaf = resolve(&[db, api]).unwrap();

        assert_eq!(
            with_leaf.service("api", "web").unwrap().dependencies,
            without_leaf.service("api", "web").unwrap().dependencies
        );
    }

    #[test]
    fn test_runtime_selection() {
        let graph = resolve(&[
            "name: both\ncontainer: {}\nservices:\n  web: { start: serve }\n",
            "name: local\nservices:\n  web: { start: serve }\n",
            "name: pinned\nruntime: local\ncontainer: {}\n",
            "name: bare\ntasks:\n  t: echo\n",
        ])
        .unwrap();

        let both = graph.module("both").unwrap();
        assert_eq!(
            both.available_runtimes,
            vec![RuntimeKind::Container, RuntimeKind::Local]
        );
        assert_eq!(both.runtime, RuntimeKind::Container);
        assert_eq!(graph.module("local").unwrap().runtime, RuntimeKind::Local);
        assert_eq!(graph.module("pinned").unwrap().runtime, RuntimeKind::Local);

        let bare = graph.module("bare").unwrap();
        assert!(!bare.has_runtime());
        assert_eq!(bare.runtime, RuntimeKind::Local);
    }

    #[test]
    fn test_pipeline_steps_and_marks() {
        let graph = resolve(&[
            "name: node\ntasks:\n  install: npm ci\n  build: npm run build\npipelines:\n  build:\n    steps:\n      20-build: build\n      10-install: install\n  lint:\n    steps: { 10-lint: { module: tools, task: lint } }\n    marks: configured\n",
            "name: tools\ntasks:\n  lint: eslint .\n",
        ])
        .unwrap();

        let build = graph.pipeline("node", "build").unwrap();
        let keys: Vec<_> = build.steps.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["20-build", "10-install"]);
        assert_eq!(build.marks, Some(StateFlag::Built));

        let lint = graph.pipeline("node", "lint").unwrap();
        assert_eq!(lint.steps[0].task, EntityRef::task("tools", "lint"));
        assert_eq!(lint.marks, Some(StateFlag::Configured));
    }

    #[test]
    fn test_env_task_output_binding_is_checked() {
        let err = resolve(&[
            "name: api\nservices:\n  web:\n    start: serve\n    env:\n      URL: { task: nope }\n",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("nope"));
    }
}
