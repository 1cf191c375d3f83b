//! Execution of a single runnable
//!
//! A [`Runnable`] is a shell command, an in-process function, or a list of
//! either. Lists are flattened and executed in order; the first failure stops
//! the list.

use crate::context::TaskContext;
use crate::{Error, Result};
use command_executor::{Command, Launcher, LocalLauncher, LogSource};
use devstack_config::RunnableSpec;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Future returned by registered functions
pub type FunctionFuture = BoxFuture<'static, Result<Option<Value>>>;

/// Signature of a registered function
pub type TaskFn = Arc<dyn Fn(TaskContext) -> FunctionFuture + Send + Sync>;

/// An in-process function together with the name it was registered under
#[derive(Clone)]
pub struct NamedFn {
    /// Registered name
    pub name: String,
    func: TaskFn,
}

impl fmt::Debug for NamedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}", self.name)
    }
}

/// Executable body of a task, migration or hook
#[derive(Debug, Clone)]
pub enum Runnable {
    /// Shell command line
    Command(String),
    /// Registered in-process function
    Function(NamedFn),
    /// Runnables executed in order
    List(Vec<Runnable>),
}

impl Runnable {
    /// Build a runnable from its descriptor form
    ///
    /// `owner` names the task, migration or hook in error messages.
    pub fn from_spec(spec: &RunnableSpec, registry: &FunctionRegistry, owner: &str) -> Result<Self> {
        Self::from_value(&spec.0, registry, owner)
    }

    fn from_value(value: &Value, registry: &FunctionRegistry, owner: &str) -> Result<Self> {
        match value {
            Value::String(command) => Ok(Runnable::Command(command.clone())),
            Value::Array(items) => {
                let mut flat = Vec::with_capacity(items.len());
                for item in items {
                    match Self::from_value(item, registry, owner)? {
                        Runnable::List(nested) => flat.extend(nested),
                        other => flat.push(other),
                    }
                }
                Ok(Runnable::List(flat))
            }
            Value::Object(map) if map.len() == 1 => match map.get("fn") {
                Some(Value::String(name)) => registry
                    .get(name)
                    .map(Runnable::Function)
                    .ok_or_else(|| {
                        Error::runnable(format!("{owner}: function '{name}' is not registered"))
                    }),
                _ => Err(unsupported(owner, value)),
            },
            other => Err(unsupported(owner, other)),
        }
    }

    /// Leaves of this runnable in execution order
    pub fn leaves(&self) -> Vec<&Runnable> {
        match self {
            Runnable::List(items) => items.iter().flat_map(|item| item.leaves()).collect(),
            leaf => vec![leaf],
        }
    }
}

fn unsupported(owner: &str, value: &Value) -> Error {
    Error::runnable(format!(
        "{owner}: unsupported runnable {value}; expected a command string, {{fn: name}} or a list"
    ))
}

/// Functions that descriptors can reference as `{fn: name}`
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, TaskFn>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` under `name`, replacing any earlier registration
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>>> + Send + 'static,
    {
        let func: TaskFn = Arc::new(move |ctx| Box::pin(func(ctx)));
        self.functions.insert(name.into(), func);
        self
    }

    /// Look up a function by name
    pub fn get(&self, name: &str) -> Option<NamedFn> {
        self.functions.get(name).map(|func| NamedFn {
            name: name.to_string(),
            func: Arc::clone(func),
        })
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

/// Executes runnables against a module
#[derive(Debug, Clone)]
pub struct Runner {
    shell: String,
    launcher: LocalLauncher,
}

impl Runner {
    /// Create a runner that executes command strings through `shell -c`
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            launcher: LocalLauncher,
        }
    }

    /// Run `runnable`, returning the last non-empty return value
    pub async fn run(&self, runnable: &Runnable, ctx: &TaskContext) -> Result<Option<Value>> {
        let mut last = None;
        for leaf in runnable.leaves() {
            let value = match leaf {
                Runnable::Command(line) => self.run_command(line, ctx).await?,
                Runnable::Function(named) => {
                    debug!("Calling function {}", named.name);
                    (named.func)(ctx.clone()).await?
                }
                Runnable::List(_) => None,
            };
            if value.as_ref().is_some_and(|v| !is_empty(v)) {
                last = value;
            }
        }
        Ok(last)
    }

    async fn run_command(&self, line: &str, ctx: &TaskContext) -> Result<Option<Value>> {
        info!("[{}] $ {}", ctx.module.name, line);

        let mut command = Command::shell(&self.shell, line);
        command.current_dir(&ctx.module.root).envs(ctx.shell_env()?);

        let module = ctx.module.name.as_str();
        let result = self
            .launcher
            .execute_with(command, |source, text| match source {
                LogSource::Stdout => debug!("[{}] {}", module, text),
                LogSource::Stderr => debug!("[{}] stderr: {}", module, text),
            })
            .await?;

        if !result.success() {
            return Err(Error::spawn(line, result.status, result.stderr));
        }

        Ok(parse_return(&result.stdout))
    }
}

/// Interpret captured stdout as a return value
///
/// Trimmed output that parses as JSON is returned parsed; anything else is
/// returned as a string. Empty output yields no value.
pub fn parse_return(stdout: &str) -> Option<Value> {
    let text = stdout.trim();
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.register("seed", |_ctx| async { Ok(Some(json!({"users": 3}))) });
        registry
    }

    #[test]
    fn test_parse_string_runnable() {
        let runnable = Runnable::from_spec(&RunnableSpec::from("make"), &registry(), "t").unwrap();
        assert!(matches!(runnable, Runnable::Command(ref c) if c == "make"));
    }

    #[test]
    fn test_nested_lists_are_flattened() {
        let spec = RunnableSpec(json!(["a", ["b", ["c"]], {"fn": "seed"}]));
        let runnable = Runnable::from_spec(&spec, &registry(), "t").unwrap();

        let Runnable::List(items) = &runnable else {
            panic!("expected a list");
        };
        assert_eq!(items.len(), 4);
        assert!(matches!(&items[2], Runnable::Command(c) if c == "c"));
        assert!(matches!(&items[3], Runnable::Function(f) if f.name == "seed"));
    }

    #[test]
    fn test_unknown_function_is_runnable_error() {
        let spec = RunnableSpec(json!({"fn": "missing"}));
        let err = Runnable::from_spec(&spec, &registry(), "task api:seed").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Runnable);
        assert!(err.to_string().contains("missing"));
        assert!(err.to_string().contains("task api:seed"));
    }

    #[test]
    fn test_unsupported_shapes() {
        for value in [json!(42), json!(null), json!({"cmd": "x"}), json!({"fn": 1})] {
            let err = Runnable::from_spec(&RunnableSpec(value), &registry(), "t").unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::Runnable);
        }
    }

    #[test]
    fn test_parse_return() {
        assert_eq!(parse_return("  \n"), None);
        assert_eq!(parse_return("hello\n"), Some(json!("hello")));
        assert_eq!(parse_return("{\"url\": \"x\"}\n"), Some(json!({"url": "x"})));
        assert_eq!(parse_return("42"), Some(json!(42)));
    }
}
