/// Device bridge: run adb and host commands one at a time and capture
/// their exit status and output.
use crate::config::DeviceConfig;
use std::process::Command;
use std::time::Duration;

/// A command issued by the measure stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// Arguments passed to adb (after any `-s <serial>` prefix).
    Adb(Vec<String>),
    /// A host program and its arguments.
    Host(Vec<String>),
}

impl BridgeCommand {
    pub fn adb<S: AsRef<str>>(args: &[S]) -> Self {
        BridgeCommand::Adb(args.iter().map(|a| a.as_ref().to_string()).collect())
    }

    pub fn shell(command: &str) -> Self {
        BridgeCommand::Adb(vec!["shell".to_string(), command.to_string()])
    }
}

impl std::fmt::Display for BridgeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeCommand::Adb(args) => write!(f, "adb {}", args.join(" ")),
            BridgeCommand::Host(args) => write!(f, "{}", args.join(" ")),
        }
    }
}

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None if killed by signal).
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Errors from device commands. All of them end the run.
#[derive(Debug)]
pub enum BridgeError {
    Spawn {
        command: String,
        source: std::io::Error,
    },
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// A remote process did not exit in time.
    Timeout { what: String, waited: Duration },
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Spawn { command, source } => {
                write!(f, "failed to run `{command}`: {source}")
            }
            BridgeError::CommandFailed {
                command,
                status,
                stdout,
                stderr,
            } => {
                let status = status.map_or("signal".to_string(), |c| c.to_string());
                write!(
                    f,
                    "command `{command}` failed with status {status}\nstdout: {}\nstderr: {}",
                    stdout.trim(),
                    stderr.trim()
                )
            }
            BridgeError::Timeout { what, waited } => {
                write!(f, "timed out after {}s waiting for {what}", waited.as_secs())
            }
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Executes commands against the device and host.
pub trait Bridge {
    /// Run a command and return its output whatever the exit status.
    fn run(&mut self, command: &BridgeCommand) -> Result<CommandOutput, BridgeError>;

    /// Block between polls.
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Run a command; a non-zero exit status is an error.
    fn exec(&mut self, command: &BridgeCommand) -> Result<CommandOutput, BridgeError> {
        let output = self.run(command)?;
        if !output.success() {
            return Err(BridgeError::CommandFailed {
                command: command.to_string(),
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// `adb shell <command>`, failing on non-zero status.
    fn shell(&mut self, command: &str) -> Result<CommandOutput, BridgeError> {
        self.exec(&BridgeCommand::shell(command))
    }

    fn push(&mut self, local: &str, remote: &str) -> Result<CommandOutput, BridgeError> {
        self.exec(&BridgeCommand::adb(&["push", local, remote]))
    }

    fn pull(&mut self, remote: &str, local: &str) -> Result<CommandOutput, BridgeError> {
        self.exec(&BridgeCommand::adb(&["pull", remote, local]))
    }

    /// Whether `adb shell <command>` prints anything. Exit status is ignored.
    fn has_output(&mut self, command: &str) -> Result<bool, BridgeError> {
        let output = self.run(&BridgeCommand::shell(command))?;
        Ok(!output.stdout.trim().is_empty())
    }

    /// Pid of a running device process, if any.
    fn pidof(&mut self, name: &str) -> Result<Option<String>, BridgeError> {
        let output = self.run(&BridgeCommand::shell(&format!("pidof {name}")))?;
        let pid = output.stdout.trim();
        if output.success() && !pid.is_empty() {
            Ok(Some(pid.to_string()))
        } else {
            Ok(None)
        }
    }
}

/// The real adb binary.
#[derive(Debug, Clone)]
pub struct Adb {
    program: String,
    serial: Option<String>,
}

impl Adb {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            program: config.adb.clone(),
            serial: config.serial.clone(),
        }
    }

    fn argv(&self, command: &BridgeCommand) -> Vec<String> {
        match command {
            BridgeCommand::Adb(args) => {
                let mut argv = vec![self.program.clone()];
                if let Some(serial) = &self.serial {
                    argv.push("-s".to_string());
                    argv.push(serial.clone());
                }
                argv.extend(args.iter().cloned());
                argv
            }
            BridgeCommand::Host(args) => args.clone(),
        }
    }
}

impl Bridge for Adb {
    fn run(&mut self, command: &BridgeCommand) -> Result<CommandOutput, BridgeError> {
        let argv = self.argv(command);
        let Some((program, args)) = argv.split_first() else {
            return Err(BridgeError::Spawn {
                command: command.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
            });
        };

        tracing::debug!(command = %command, "running");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| BridgeError::Spawn {
                command: command.to_string(),
                source: e,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


/// Scripted bridge for tests: records every command and answers from a
/// table of substring matches. Unmatched commands succeed with no output.
#[cfg(test)]
pub(crate) mod fake {
    use super::{Bridge, BridgeCommand, BridgeError, CommandOutput};
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Default)]
    pub struct FakeBridge {
        pub log: Vec<String>,
        pub slept: Vec<Duration>,
        responses: Vec<(String, VecDeque<CommandOutput>)>,
    }

    impl FakeBridge {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a reply for commands containing `pattern`. The last queued
        /// reply for a pattern repeats.
        pub fn respond(&mut self, pattern: &str, stdout: &str, status: i32) -> &mut Self {
            let output = CommandOutput {
                status: Some(status),
                stdout: stdout.to_string(),
                stderr: String::new(),
            };
            match self.responses.iter_mut().find(|(p, _)| p == pattern) {
                Some((_, queue)) => queue.push_back(output),
                None => self
                    .responses
                    .push((pattern.to_string(), VecDeque::from([output]))),
            }
            self
        }

        pub fn ran(&self, needle: &str) -> bool {
            self.position(needle).is_some()
        }

        pub fn position(&self, needle: &str) -> Option<usize> {
            self.log.iter().position(|c| c.contains(needle))
        }

        pub fn count(&self, needle: &str) -> usize {
            self.log.iter().filter(|c| c.contains(needle)).count()
        }
    }

    impl Bridge for FakeBridge {
        fn run(&mut self, command: &BridgeCommand) -> Result<CommandOutput, BridgeError> {
            let rendered = command.to_string();
            self.log.push(rendered.clone());
            let reply = self
                .responses
                .iter_mut()
                .find(|(pattern, _)| rendered.contains(pattern.as_str()))
                .map(|(_, queue)| {
                    if queue.len() > 1 {
                        queue.pop_front().unwrap_or_default()
                    } else {
                        queue.front().cloned().unwrap_or_default()
                    }
                });
            Ok(reply.unwrap_or(CommandOutput {
                status: Some(0),
                ..Default::default()
            }))
        }

        fn sleep(&mut self, duration: Duration) {
            self.slept.push(duration);
        }
    }
}
