//! External command execution with a dry-run mode.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command as Process;

use thiserror::Error;
use tracing::{debug, error};

/// A command to run: program, arguments, extra environment and an optional
/// file receiving stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
    /// Added to the inherited environment. Never logged.
    pub env: BTreeMap<String, String>,
    /// Write stdout here instead of returning it.
    pub stdout_to: Option<PathBuf>,
}

impl Command {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdout_to: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn stdout_to(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout_to = Some(path.as_ref().to_path_buf());
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if let Some(path) = &self.stdout_to {
            write!(f, " > {}", path.display())?;
        }
        Ok(())
    }
}

/// Errors from running a command.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The program could not be started.
    #[error("failed to execute '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("running command '{command}' failed ({}): {}", describe_exit(.exit_code), .output.trim())]
    Failed {
        command: String,
        exit_code: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },

    /// Stdout could not be written to its target file.
    #[error("failed to write output of '{command}' to {}: {source}", .path.display())]
    Output {
        command: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "killed by signal".to_string(),
    }
}

impl CommandError {
    /// Exit code of a command that ran and failed.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Combined output of a command that ran and failed.
    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Failed { output, .. } => output,
            _ => "",
        }
    }
}

/// Executes commands on behalf of the daemon and the snapshot store.
pub trait CommandRunner: Send + Sync {
    /// Run one command and return its stdout.
    ///
    /// # Errors
    /// Returns an error if the command cannot be started or exits non-zero.
    fn run(&self, command: &Command) -> Result<String, CommandError>;

    /// Whether commands are only logged. Dry runners yield empty output.
    fn is_dry(&self) -> bool {
        false
    }

    /// Run commands in order, stopping at the first failure.
    ///
    /// # Errors
    /// Returns the first command's error.
    fn run_all(&self, commands: &[Command]) -> Result<(), CommandError> {
        for command in commands {
            self.run(command)?;
        }
        Ok(())
    }
}

/// Runs commands as child processes. In dry mode commands are only logged
/// and yield empty output.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner {
    dry: bool,
}

impl SystemRunner {
    #[must_use]
    pub fn new(dry: bool) -> Self {
        Self { dry }
    }

}

impl CommandRunner for SystemRunner {
    fn is_dry(&self) -> bool {
        self.dry
    }

    fn run(&self, command: &Command) -> Result<String, CommandError> {
        debug!(command = %command, "Running command");
        if self.dry {
            debug!(command = %command, "Dry run, not executing");
            return Ok(String::new());
        }

        let output = Process::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .output()
            .map_err(|source| CommandError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let combined = format!("{stdout}{}", String::from_utf8_lossy(&output.stderr));
            error!(command = %command, output = %combined.trim(), "Command failed");
            return Err(CommandError::Failed {
                command: command.to_string(),
                exit_code: output.status.code(),
                output: combined,
            });
        }

        match &command.stdout_to {
            Some(path) => {
                std::fs::write(path, &output.stdout).map_err(|source| CommandError::Output {
                    command: command.to_string(),
                    path: path.clone(),
                    source,
                })?;
                Ok(String::new())
            }
            None => Ok(stdout),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        Command::new("sh").args(["-c", script])
    }

    #[test]
    fn test_display_hides_env() {
        let cmd = Command::new("restic")
            .args(["--json", "snapshots"])
            .envs([("RESTIC_PASSWORD", "secret")]);
        assert_eq!(cmd.to_string(), "restic --json snapshots");
    }

    #[test]
    fn test_run_returns_stdout() {
        let out = SystemRunner::new(false).run(&sh("echo hello")).unwrap();
        assert_eq!(out, "hello\n");
    }

    #[test]
    fn test_run_passes_env() {
        let cmd = sh("echo $HK_TEST_VAR").envs([("HK_TEST_VAR", "value")]);
        assert_eq!(SystemRunner::new(false).run(&cmd).unwrap(), "value\n");
    }

    #[test]
    fn test_failure_carries_exit_code_and_output() {
        let err = SystemRunner::new(false)
            .run(&sh("echo out; echo err >&2; exit 2"))
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(2));
        assert!(err.output().contains("out"));
        assert!(err.output().contains("err"));
    }

    #[test]
    fn test_spawn_failure() {
        let err = SystemRunner::new(false)
            .run(&Command::new("/nonexistent/hcloud-k3os-binary"))
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
        assert_eq!(err.exit_code(), None);
    }

    #[test]
    fn test_dry_run_does_not_execute() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("touched");
        let cmd = Command::new("touch").arg(marker.display().to_string());

        let out = SystemRunner::new(true).run(&cmd).unwrap();
        assert!(out.is_empty());
        assert!(!marker.exists());
    }

    #[test]
    fn test_stdout_redirect() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("out.yaml");

        let out = SystemRunner::new(false)
            .run(&sh("echo 'kind: Secret'").stdout_to(&target))
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "kind: Secret\n");
    }

    #[test]
    fn test_run_all_stops_at_first_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("never");
        let commands = [
            sh("exit 0"),
            sh("exit 3"),
            Command::new("touch").arg(marker.display().to_string()),
        ];

        let err = SystemRunner::new(false).run_all(&commands).unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
        assert!(!marker.exists());
    }
}
