//! Description of a process to launch

use crate::shell::quote;
use async_process::Command as AsyncCommand;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};

/// Program, arguments, extra environment and working directory of a process
///
/// Unlike `async_process::Command` this is plain data: it can be cloned,
/// compared and rendered for logs, and is only turned into a spawnable
/// command by the launcher. The child inherits the caller's environment
/// with `env` entries layered on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    program: OsString,
    args: Vec<OsString>,
    env: BTreeMap<OsString, OsString>,
    cwd: Option<PathBuf>,
}

impl Command {
    /// Command running `program` with no arguments
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    /// Command running `line` through `<shell> -c`
    pub fn shell(shell: impl AsRef<OsStr>, line: impl AsRef<OsStr>) -> Self {
        let mut command = Self::new(shell);
        command.arg("-c").arg(line);
        command
    }

    /// Append one argument
    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|arg| arg.as_ref().to_owned()));
        self
    }

    /// Set an environment variable, replacing an earlier value
    pub fn env(&mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> &mut Self {
        self.env
            .insert(key.as_ref().to_owned(), value.as_ref().to_owned());
        self
    }

    /// Set several environment variables
    pub fn envs<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, value) in vars {
            self.env(key, value);
        }
        self
    }

    /// Run the process in `dir`
    pub fn current_dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        self.cwd = Some(dir.as_ref().to_owned());
        self
    }

    /// Program to run
    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Arguments, in order
    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Environment set on top of the inherited one
    pub fn environment(&self) -> &BTreeMap<OsString, OsString> {
        &self.env
    }

    /// Working directory, when one was set
    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub(crate) fn to_async(&self) -> AsyncCommand {
        let mut command = AsyncCommand::new(&self.program);
        command.args(&self.args).envs(&self.env);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        command
    }
}

/// Renders the command line with each word shell-quoted as needed
impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            write!(f, " {}", quote(&arg.to_string_lossy()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_command_renders_quoted() {
        let command = Command::shell("sh", "npm run build && echo done");
        assert_eq!(command.program(), "sh");
        assert_eq!(command.arguments(), &["-c", "npm run build && echo done"]);
        assert_eq!(command.to_string(), "sh -c 'npm run build && echo done'");
    }

    #[test]
    fn test_plain_words_render_unquoted() {
        let mut command = Command::new("npx");
        command.args(["--yes", "wait-on", "-t", "500", "tcp:localhost:3000"]);
        assert_eq!(
            command.to_string(),
            "npx --yes wait-on -t 500 tcp:localhost:3000"
        );
    }

    #[test]
    fn test_later_env_wins() {
        let mut command = Command::new("env");
        command
            .env("KEY", "first")
            .envs([("KEY", "second"), ("OTHER", "x")])
            .current_dir("/tmp");

        assert_eq!(command.environment().len(), 2);
        assert_eq!(
            command.environment().get(OsStr::new("KEY")),
            Some(&OsString::from("second"))
        );
        assert_eq!(command.working_dir(), Some(Path::new("/tmp")));
    }
}
