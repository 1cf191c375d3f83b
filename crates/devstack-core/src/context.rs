//! Context handed to runnables

use crate::graph::ModuleGraph;
use crate::lifecycle::LifecycleManager;
use crate::model::Module;
use futures::lock::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Last return value of every task executed in the current invocation
#[derive(Debug, Clone, Default)]
pub struct TaskOutputs {
    values: Arc<Mutex<HashMap<(String, String), Value>>>,
}

impl TaskOutputs {
    /// Create an empty set of outputs
    pub fn new() -> Self {
        Self::default()
    }

    /// Return value of `module`'s task `task`, if it produced one
    pub async fn get(&self, module: &str, task: &str) -> Option<Value> {
        self.values
            .lock()
            .await
            .get(&(module.to_string(), task.to_string()))
            .cloned()
    }

    /// Record the return value of a task, replacing any earlier one
    pub async fn insert(&self, module: &str, task: &str, value: Value) {
        self.values
            .lock()
            .await
            .insert((module.to_string(), task.to_string()), value);
    }
}

/// Everything a runnable gets to see while it executes
#[derive(Clone)]
pub struct TaskContext {
    /// The module the runnable belongs to
    pub module: Arc<Module>,
    /// Every discovered module
    pub graph: Arc<ModuleGraph>,
    /// Return values of tasks executed so far
    pub outputs: TaskOutputs,
    /// Answers to the task's questions
    pub answers: BTreeMap<String, String>,
    /// Process lifecycle access, for provisioning other modules
    pub lifecycle: Arc<LifecycleManager>,
}

impl TaskContext {
    /// Return value of a task of this module
    pub async fn output(&self, task: &str) -> Option<Value> {
        self.outputs.get(&self.module.name, task).await
    }

    /// Return value of a task of any module
    pub async fn output_of(&self, module: &str, task: &str) -> Option<Value> {
        self.outputs.get(module, task).await
    }

    /// Answer to a question by name
    pub fn answer(&self, name: &str) -> Option<&str> {
        self.answers.get(name).map(String::as_str)
    }

    /// Environment handed to shell commands: module literals, then answers
    pub fn shell_env(&self) -> crate::Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        for (key, value) in self.module.literal_env() {
            env.insert(
                key.to_string(),
                devstack_config::resolver::substitute_env(value)?,
            );
        }
        for (name, answer) in &self.answers {
            env.insert(answer_var(name), answer.clone());
        }
        Ok(env)
    }
}

/// Environment variable name an answer is exported under
pub fn answer_var(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_var() {
        assert_eq!(answer_var("admin"), "ADMIN");
        assert_eq!(answer_var("admin-email"), "ADMIN_EMAIL");
    }

    #[smol_potat::test]
    async fn test_outputs_replace_earlier_values() {
        let outputs = TaskOutputs::new();
        assert!(outputs.get("db", "provision").await.is_none());

        outputs.insert("db", "provision", Value::from(1)).await;
        outputs.insert("db", "provision", Value::from(2)).await;
        assert_eq!(outputs.get("db", "provision").await, Some(Value::from(2)));
    }
}
