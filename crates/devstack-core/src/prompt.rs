//! Answers to task questions

use crate::context::answer_var;
use crate::{Error, Result};
use async_trait::async_trait;
use devstack_config::Question;
use std::collections::HashMap;

/// Supplies answers to the questions a task declares
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Answer `question`
    async fn ask(&self, question: &Question) -> Result<String>;
}

/// Non-interactive prompter
///
/// Answers come from, in order: preset answers, `DEVSTACK_ANSWER_<NAME>`
/// environment variables, the question's default.
#[derive(Debug, Clone, Default)]
pub struct StaticPrompter {
    answers: HashMap<String, String>,
    read_env: bool,
}

impl StaticPrompter {
    /// Prompter that also consults the environment
    pub fn new() -> Self {
        Self {
            answers: HashMap::new(),
            read_env: true,
        }
    }

    /// Prompter that only uses preset answers and defaults
    pub fn without_env() -> Self {
        Self::default()
    }

    /// Preset the answer to `name`
    pub fn with_answer(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.answers.insert(name.into(), value.into());
        self
    }

    /// Environment variable consulted for `name`
    pub fn env_var(name: &str) -> String {
        format!("DEVSTACK_ANSWER_{}", answer_var(name))
    }
}

#[async_trait]
impl Prompter for StaticPrompter {
    async fn ask(&self, question: &Question) -> Result<String> {
        if let Some(answer) = self.answers.get(&question.name) {
            return Ok(answer.clone());
        }
        if self.read_env {
            if let Ok(answer) = std::env::var(Self::env_var(&question.name)) {
                return Ok(answer);
            }
        }
        question.default.clone().ok_or_else(|| {
            Error::runnable(format!(
                "no answer for question '{}'{}; set {}",
                question.name,
                question
                    .message
                    .as_deref()
                    .map(|m| format!(" ({m})"))
                    .unwrap_or_default(),
                Self::env_var(&question.name)
            ))
        })
    }
}
