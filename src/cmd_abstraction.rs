//! Subprocess execution behind a trait, so the nft engine can be tested
//! without running nft.

use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Output, Stdio};

#[cfg(test)]
use mockall::automock;

/// Captured result of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code 0
    pub success: bool,
    /// None when the process was killed by a signal
    pub code: Option<i32>,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// Runs external programs.
///
/// `Err` means the program could not be run at all; a program that ran and
/// failed is reported through `CommandOutput::success`.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    /// Run a program with its standard input closed.
    ///
    /// # Arguments
    /// * `cmd` - Program path or name looked up in `PATH` (e.g. "/usr/sbin/nft")
    /// * `args` - Arguments passed as-is, without a shell
    ///
    /// # Returns
    /// Captured stdout, stderr and exit status once the program has exited
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput>;

    /// Run a program and feed it a script on standard input.
    ///
    /// # Arguments
    /// * `cmd` - Program path or name looked up in `PATH`
    /// * `args` - Arguments passed as-is, without a shell (e.g. `-f -`)
    /// * `stdin` - Text written to the program's stdin, which is then closed
    ///
    /// # Returns
    /// Captured stdout, stderr and exit status once the program has exited
    fn execute_with_stdin(&self, cmd: &str, args: &[String], stdin: &str) -> Result<CommandOutput>;
}

/// Executor spawning real processes
#[derive(Debug, Clone, Default)]
pub struct RealCommandExecutor;

impl RealCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute {}", cmd))?;
        Ok(output.into())
    }

    fn execute_with_stdin(
        &self,
        cmd: &str,
        args: &[String],
        stdin_data: &str,
    ) -> Result<CommandOutput> {
        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", cmd))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(stdin_data.as_bytes())
                .with_context(|| format!("Failed to write to {} stdin", cmd))?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for {}", cmd))?;
        Ok(output.into())
    }
}

/// mockall cannot express `&[&str]` arguments, so the trait takes `&[String]`
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
