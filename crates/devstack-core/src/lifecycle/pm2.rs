//! pm2 supervisor client
//!
//! Drives the `pm2` command line: `ping` to connect, `start`, `stop`,
//! `restart`, and `jlist` for the JSON process listing.

use crate::lifecycle::backend::ProcessSpec;
use crate::lifecycle::supervisor::{ProcessInfo, Supervisor};
use crate::{Error, Result};
use async_trait::async_trait;
use command_executor::{Command, ExitResult, Launcher, LocalLauncher};
use serde::Deserialize;
use tracing::{debug, info};

/// Supervisor backed by the pm2 CLI
#[derive(Debug, Clone)]
pub struct Pm2Supervisor {
    program: String,
    shell: String,
    launcher: LocalLauncher,
}

#[derive(Deserialize)]
struct Pm2Process {
    name: String,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    pm2_env: Pm2Env,
}

#[derive(Deserialize, Default)]
struct Pm2Env {
    #[serde(default)]
    status: String,
}

impl Pm2Supervisor {
    /// Create a client for `program`, starting services through `shell -c`
    pub fn new(program: impl Into<String>, shell: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            shell: shell.into(),
            launcher: LocalLauncher,
        }
    }

    async fn pm2(&self, command: Command) -> Result<ExitResult> {
        let display = command.to_string();
        let result = self
            .launcher
            .execute(command)
            .await
            .map_err(|e| Error::supervisor(format!("{display}: {e}")))?;

        if !result.success() {
            return Err(Error::supervisor(format!(
                "`{}` failed with {}: {}",
                display,
                result.status,
                result.stderr.trim()
            )));
        }
        Ok(result)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command.args(args);
        command
    }

    /// Run a verb on a named process; `false` when pm2 does not know it
    async fn control(&self, verb: &str, name: &str) -> Result<bool> {
        let command = self.command(&[verb, name]);
        let display = command.to_string();
        let result = self
            .launcher
            .execute(command)
            .await
            .map_err(|e| Error::supervisor(format!("{display}: {e}")))?;

        if result.success() {
            return Ok(true);
        }
        if is_unknown_process(&result.output) {
            return Ok(false);
        }
        Err(Error::supervisor(format!(
            "`{}` failed with {}: {}",
            display,
            result.status,
            result.stderr.trim()
        )))
    }
}

/// pm2 reports "Process or Namespace <name> not found" for unknown names
fn is_unknown_process(output: &str) -> bool {
    output
        .lines()
        .any(|line| line.contains("Process or Namespace") && line.contains("not found"))
}

/// Parse `pm2 jlist` output, tolerating banner lines before the JSON
///
/// Banners such as `[PM2] Spawning PM2 daemon` also start with `[`, so every
/// line starting with one is tried until the rest of the output parses.
pub(crate) fn parse_jlist(stdout: &str) -> Result<Vec<ProcessInfo>> {
    let mut first_error = None;
    let mut processes = None;
    for (offset, _) in stdout.match_indices('[') {
        let line_start = offset == 0 || stdout[..offset].ends_with('\n');
        if !line_start {
            continue;
        }
        match serde_json::from_str::<Vec<Pm2Process>>(stdout[offset..].trim()) {
            Ok(parsed) => {
                processes = Some(parsed);
                break;
            }
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    let processes = match (processes, first_error) {
        (Some(processes), _) => processes,
        (None, Some(e)) => {
            return Err(Error::supervisor(format!("unreadable process list: {e}")));
        }
        (None, None) => Vec::new(),
    };

    Ok(processes
        .into_iter()
        .map(|p| ProcessInfo {
            name: p.name,
            status: p.pm2_env.status,
            pid: p.pid.filter(|pid| *pid != 0),
        })
        .collect())
}

#[async_trait]
impl Supervisor for Pm2Supervisor {
    async fn connect(&self) -> Result<()> {
        self.pm2(self.command(&["ping"])).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // Each CLI call is its own connection; nothing stays open.
        debug!("pm2 client holds no open connection");
        Ok(())
    }

    async fn start(&self, process: &ProcessSpec) -> Result<()> {
        info!("Starting {} under pm2", process.name);
        let mut command = Command::new(&self.program);
        command
            .arg("start")
            .arg(&self.shell)
            .arg("--name")
            .arg(&process.name)
            .arg("--cwd")
            .arg(&process.cwd)
            .arg("--")
            .arg("-c")
            .arg(&process.command_line)
            .envs(&process.env);
        self.pm2(command).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<bool> {
        self.control("stop", name).await
    }

    async fn restart(&self, name: &str) -> Result<bool> {
        self.control("restart", name).await
    }

    async fn list(&self) -> Result<Vec<ProcessInfo>> {
        let result = self.pm2(self.command(&["jlist"])).await?;
        parse_jlist(&result.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jlist() {
        let stdout = r#"[PM2] Spawning PM2 daemon
[{"name":"shop.web","pid":4242,"pm2_env":{"status":"online"}},{"name":"db.postgres","pid":0,"pm2_env":{"status":"stopped"}}]
"#;
        let processes = parse_jlist(stdout).unwrap();

        assert_eq!(processes.len(), 2);
        assert_eq!(processes[0].name, "shop.web");
        assert_eq!(processes[0].pid, Some(4242));
        assert_eq!(processes[1].status, "stopped");
        assert_eq!(processes[1].pid, None);
    }

    #[test]
    fn test_parse_jlist_after_several_banners() {
        let stdout = "[PM2] Spawning PM2 daemon with pm2_home=/root/.pm2\n\
                      [PM2] PM2 Successfully daemonized\n\
                      []\n";
        assert!(parse_jlist(stdout).unwrap().is_empty());
    }

    #[test]
    fn test_parse_empty_jlist() {
        assert!(parse_jlist("").unwrap().is_empty());
        assert!(parse_jlist("[]\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_garbage_is_supervisor_error() {
        let err = parse_jlist("[oops").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Supervisor);
    }

    /// A stand-in `pm2` that logs its arguments and knows only `shop.web`
    fn fake_pm2(dir: &std::path::Path) -> String {
        let script = dir.join("pm2");
        let log = dir.join("calls.log");
        std::fs::write(
            &script,
            format!(
                r#"#!/bin/sh
echo "$*" >> '{log}'
case "$1" in
  jlist)
    echo '[PM2] Spawning PM2 daemon'
    echo '[{{"name":"shop.web","pid":7,"pm2_env":{{"status":"online"}}}}]'
    ;;
  stop|restart)
    if [ "$2" != shop.web ]; then
      echo "[PM2][ERROR] Process or Namespace $2 not found" >&2
      exit 1
    fi
    ;;
  *)
    echo "unsupported" >&2
    exit 2
    ;;
esac
"#,
                log = log.display()
            ),
        )
        .unwrap();

        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.display().to_string()
    }

    #[smol_potat::test]
    async fn test_list_skips_daemon_banner() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Pm2Supervisor::new(fake_pm2(dir.path()), "sh");

        let processes = supervisor.list().await.unwrap();
        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].name, "shop.web");
        assert_eq!(processes[0].status, "online");
        assert_eq!(processes[0].pid, Some(7));
    }

    #[smol_potat::test]
    async fn test_stop_and_restart_take_one_call_each() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Pm2Supervisor::new(fake_pm2(dir.path()), "sh");

        assert!(supervisor.stop("shop.web").await.unwrap());
        assert!(!supervisor.stop("shop.ghost").await.unwrap());
        assert!(supervisor.restart("shop.web").await.unwrap());
        assert!(!supervisor.restart("shop.ghost").await.unwrap());

        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert_eq!(
            calls,
            "stop shop.web\nstop shop.ghost\nrestart shop.web\nrestart shop.ghost\n"
        );
    }

    #[smol_potat::test]
    async fn test_other_failures_are_supervisor_errors() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = Pm2Supervisor::new(fake_pm2(dir.path()), "sh");

        let err = supervisor.connect().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Supervisor);
        assert!(err.to_string().contains("unsupported"));
    }

    #[test]
    fn test_unknown_process_message() {
        assert!(is_unknown_process(
            "[PM2][ERROR] Process or Namespace shop.ghost not found\n"
        ));
        assert!(!is_unknown_process("[PM2][ERROR] Permission denied\n"));
    }

    #[smol_potat::test]
    async fn test_connect_fails_without_pm2() {
        let supervisor = Pm2Supervisor::new("definitely-not-pm2-xyz", "sh");
        let err = supervisor.connect().await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Supervisor);
    }
}
