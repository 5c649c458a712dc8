//! Command execution engine for rendering code blocks.
//!
//! Input and output routing is decided from the unexpanded templates,
//! before any substitution happens:
//! - a command that mentions `{{input}}` receives the code block through
//!   that placeholder and gets no stdin; otherwise the code block is piped
//!   to its stdin.
//! - a command that mentions `{{output}}` writes its result to the output
//!   path, which is read back after it exits; otherwise its stdout is the
//!   result.
//!
//! The child's stderr is streamed to our stderr and kept for error reports.

use crate::cancel::{Cancellation, StopReason};
use crate::config::{CommandTemplate, Rule};
use crate::shell;
use crate::template::{self, TemplateVars};
use regex::Regex;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::LazyLock;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A string command that is a single bare word runs without a shell.
static STANDALONE_COMMAND_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-_.+a-zA-Z0-9]+$").unwrap());

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Error during command execution.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The command expanded to nothing runnable.
    #[error("command is empty")]
    EmptyCommand,

    /// The program could not be started.
    #[error("failed to spawn '{program}'")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("command '{program}' failed ({status}){}", stderr_suffix(.stderr))]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// The program exited but its output file could not be read.
    #[error("failed to read output file {}", path.display())]
    OutputFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// I/O error while talking to the child process.
    #[error("I/O error while running '{program}'")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Cancelled by the caller; the child was killed.
    #[error("command '{program}' was cancelled")]
    Cancelled { program: String },

    /// The deadline passed; the child was killed.
    #[error("command '{program}' timed out")]
    TimedOut { program: String },
}

impl ExecutorError {
    /// Whether the command was stopped from outside rather than failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::TimedOut { .. })
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// How the code block reaches the child and how its result comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Routing {
    /// Pipe the code block to the child's stdin
    pub pipe_input: bool,
    /// Read the result from the output file rather than stdout
    pub read_output_file: bool,
}

impl Routing {
    pub fn for_command(command: &CommandTemplate) -> Self {
        let templates = command.templates();
        let mentions = |name: &str| templates.iter().any(|t| template::contains_variable(t, name));
        Self {
            pipe_input: !mentions(template::INPUT),
            read_output_file: mentions(template::OUTPUT),
        }
    }
}

/// Runs a rule's command for one code block.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    /// Configuration-wide shell
    config_shell: Option<String>,
    /// Value of `$SHELL` captured at construction
    env_shell: Option<String>,
}

impl Executor {
    pub fn new(config_shell: Option<String>, env_shell: Option<String>) -> Self {
        Self {
            config_shell,
            env_shell,
        }
    }

    /// Create an executor that falls back to `$SHELL` for string commands.
    pub fn from_env(config_shell: Option<String>) -> Self {
        Self::new(config_shell, std::env::var(shell::SHELL_ENV).ok())
    }

    /// Expand the rule's command into an argument vector.
    ///
    /// Array commands expand token by token and never pass through a shell.
    /// String commands run as `<shell> -c <line>` unless they are a single
    /// bare word.
    pub fn build_argv(&self, rule: &Rule, vars: &TemplateVars) -> Result<Vec<String>, ExecutorError> {
        let argv: Vec<String> = match &rule.run {
            CommandTemplate::Argv(tokens) => tokens.iter().map(|t| template::expand(t, vars)).collect(),
            CommandTemplate::Shell(line) => {
                let expanded = template::expand(line, vars);
                if STANDALONE_COMMAND_REGEX.is_match(&expanded) {
                    vec![expanded]
                } else {
                    let sh = shell::resolve_shell(
                        rule.shell.as_deref(),
                        self.config_shell.as_deref(),
                        self.env_shell.as_deref(),
                        shell::which_lookup,
                    );
                    let flag = shell::command_flag(&sh).to_string();
                    vec![sh, flag, expanded]
                }
            }
        };

        if argv.first().is_none_or(|program| program.is_empty()) {
            return Err(ExecutorError::EmptyCommand);
        }
        Ok(argv)
    }

    /// Run `rule` for `input` and return the bytes it produced.
    ///
    /// `output_path` must be a writable location the caller cleans up; it
    /// is only read when the command mentions `{{output}}`. Blocks until
    /// the child exits and its pipes close, or until `cancel` fires, in which
    /// case the child's process group is killed.
    pub fn execute(
        &self,
        rule: &Rule,
        lang: &str,
        input: &str,
        output_path: &Path,
        cancel: &Cancellation,
    ) -> Result<Vec<u8>, ExecutorError> {
        let vars = TemplateVars::new(input, &output_path.to_string_lossy(), lang);
        let argv = self.build_argv(rule, &vars)?;
        let routing = Routing::for_command(&rule.run);
        let program = argv[0].clone();

        log::debug!(
            "Running {argv:?} (stdin: {}, output file: {})",
            routing.pipe_input,
            routing.read_output_file
        );

        let mut cmd = Command::new(&program);
        cmd.args(&argv[1..]);
        cmd.stdin(if routing.pipe_input { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so a stop reaches everything the command started.
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| ExecutorError::Spawn {
            program: program.clone(),
            source,
        })?;

        // Stdout is forwarded as diagnostics when the result comes from the file.
        let stdout_sink = if routing.read_output_file {
            PipeSink::Forward
        } else {
            PipeSink::Capture
        };
        let stdout_handle = child.stdout.take().map(|pipe| spawn_reader(pipe, stdout_sink));
        let stderr_handle = child.stderr.take().map(|pipe| spawn_reader(pipe, PipeSink::Tee));
        let stdin_handle = child.stdin.take().map(|pipe| {
            let data = input.as_bytes().to_vec();
            thread::spawn(move || write_input(pipe, &data))
        });

        // The command is done once it has exited and every pipe is drained;
        // a background process may keep the pipes open after the child exits.
        // On a stop the whole group is killed and the workers are left
        // detached.
        let mut exited = None;
        let status = loop {
            if exited.is_none() {
                match child.try_wait() {
                    Ok(status) => exited = status,
                    Err(source) => {
                        terminate(&mut child);
                        return Err(ExecutorError::Io { program, source });
                    }
                }
            }
            if let Some(status) = exited
                && is_finished(&stdout_handle)
                && is_finished(&stderr_handle)
                && is_finished(&stdin_handle)
            {
                break status;
            }
            if let Some(reason) = cancel.stop_reason() {
                terminate(&mut child);
                log::debug!("Stopped '{program}': {reason:?}");
                return Err(match reason {
                    StopReason::Cancelled => ExecutorError::Cancelled { program },
                    StopReason::DeadlineExceeded => ExecutorError::TimedOut { program },
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let io_err = |source: io::Error| ExecutorError::Io {
            program: program.clone(),
            source,
        };
        let stdout = join_worker(stdout_handle).map_err(io_err)?;
        let stderr = join_worker(stderr_handle).map_err(io_err)?;
        join_worker(stdin_handle).map_err(io_err)?;

        if !status.success() {
            return Err(ExecutorError::Failed {
                program,
                status,
                stderr: String::from_utf8_lossy(&stderr).trim_end().to_string(),
            });
        }

        if routing.read_output_file {
            fs::read(output_path).map_err(|source| ExecutorError::OutputFile {
                path: output_path.to_path_buf(),
                source,
            })
        } else {
            Ok(stdout)
        }
    }
}

/// Where bytes read from a child pipe go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipeSink {
    /// Keep them in memory
    Capture,
    /// Copy them to our stderr
    Forward,
    /// Both
    Tee,
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R, sink: PipeSink) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut captured = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if sink != PipeSink::Capture {
                // A closed stderr on our side must not fail the command.
                let _ = io::stderr().write_all(&chunk[..n]);
            }
            if sink != PipeSink::Forward {
                captured.extend_from_slice(&chunk[..n]);
            }
        }
        Ok(captured)
    })
}

fn write_input<W: Write>(mut pipe: W, data: &[u8]) -> io::Result<()> {
    // A child that exits without reading its stdin is not an error here;
    // its exit status decides.
    match pipe.write_all(data) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

fn join_worker<T: Default>(handle: Option<JoinHandle<io::Result<T>>>) -> io::Result<T> {
    match handle {
        Some(handle) => match handle.join() {
            Ok(result) => result,
            Err(_) => Err(io::Error::other("pipe worker thread panicked")),
        },
        None => Ok(T::default()),
    }
}

fn is_finished<T>(handle: &Option<JoinHandle<T>>) -> bool {
    handle.as_ref().is_none_or(JoinHandle::is_finished)
}

/// Kill the child's process group, then reap the child.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        let _ = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}
