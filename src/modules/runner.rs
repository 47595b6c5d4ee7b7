//! Process runner: the seam every execution module shells out through.
//!
//! Handlers never spawn processes themselves. They build a [`CommandLine`]
//! and hand it to a [`CommandRunner`]; production code uses
//! [`SystemRunner`], tests inject scripted output.

use std::fmt;
use std::process::{Command, Stdio};

use serde::Serialize;

use crate::capabilities::HandlerError;

/// Captured result of one process run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub retcode: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            retcode: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(retcode: i32, stderr: impl Into<String>) -> Self {
        Self {
            retcode,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.retcode == 0
    }

    /// Turn a non-zero exit into [`HandlerError::Command`].
    pub fn checked(self, command: &CommandLine) -> Result<Self, HandlerError> {
        if self.success() {
            return Ok(self);
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(HandlerError::Command {
            command: command.to_string(),
            retcode: self.retcode,
            stderr: detail,
        })
    }
}

/// A program plus arguments, with secrets masked when displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    secret: Vec<bool>,
    runas: Option<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            secret: Vec::new(),
            runas: None,
        }
    }

    /// `sh -c <cmdline>`.
    pub fn shell(cmdline: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(cmdline)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self.secret.push(false);
        self
    }

    /// An argument that is masked in logs and error messages.
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self.secret.push(true);
        self
    }

    /// Run as another user (`sudo -u <user>`).
    pub fn runas(mut self, user: Option<String>) -> Self {
        self.runas = user;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn user(&self) -> Option<&str> {
        self.runas.as_deref()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.runas {
            write!(f, "sudo -u {} ", user)?;
        }
        f.write_str(&self.program)?;
        for (arg, secret) in self.args.iter().zip(&self.secret) {
            if *secret {
                f.write_str(" ******")?;
            } else if arg.contains(char::is_whitespace) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Executes command lines on the host.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &CommandLine) -> Result<CommandOutput, HandlerError>;
}

/// Runs commands with `std::process::Command`, blocking until they exit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, command: &CommandLine) -> Result<CommandOutput, HandlerError> {
        let mut process = match command.user() {
            Some(user) => {
                let mut sudo = Command::new("sudo");
                sudo.arg("-u").arg(user).arg(command.program());
                sudo
            }
            None => Command::new(command.program()),
        };
        process
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        log::debug!("Running: {}", command);
        let output = process.output().map_err(|e| {
            HandlerError::Failed(format!("Failed to start '{}': {}", command.program(), e))
        })?;

        let result = CommandOutput {
            // Killed by a signal.
            retcode: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.success() {
            log::debug!("'{}' exited with {}", command, result.retcode);
        }
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner for handler tests.

    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// Replays canned outputs in order and records every command it was given.
    #[derive(Default)]
    pub struct ScriptedRunner {
        outputs: Mutex<VecDeque<CommandOutput>>,
        calls: Mutex<Vec<CommandLine>>,
    }

    impl ScriptedRunner {
        pub fn new(outputs: Vec<CommandOutput>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<CommandLine> {
            self.calls.lock().clone()
        }

        pub fn rendered(&self) -> Vec<String> {
            self.calls.lock().iter().map(|c| c.to_string()).collect()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, command: &CommandLine) -> Result<CommandOutput, HandlerError> {
            self.calls.lock().push(command.clone());
            self.outputs
                .lock()
                .pop_front()
                .ok_or_else(|| HandlerError::Failed(format!("no scripted output for {}", command)))
        }
    }
}
