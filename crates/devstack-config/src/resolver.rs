//! Environment variable substitution
//!
//! Resolves `${VAR}` and `${VAR:-default}` inside literal descriptor values.

use crate::{ConfigError, Result};
use regex::{Captures, Regex};
use std::sync::LazyLock;

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid pattern")
});

/// Substitute variables from the process environment
pub fn substitute_env(input: &str) -> Result<String> {
    substitute(input, |name| std::env::var(name).ok())
}

/// Substitute variables using `lookup`
///
/// Every unset variable without a default is reported at once in a single
/// [`ConfigError::EnvVarNotFound`].
pub fn substitute<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut missing = Vec::new();
    let result = VAR_PATTERN.replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match (lookup(name), caps.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                missing.push(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(ConfigError::EnvVarNotFound(missing.join(", ")));
    }

    Ok(result.into_owned())
}

/// Names of all variables referenced in `input`
pub fn references(input: &str) -> Vec<String> {
    VAR_PATTERN
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .collect()
}
