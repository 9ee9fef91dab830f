//! Running external commands (package manager install, build and test
//! scripts) with cancellation support.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    /// The last few lines of stderr (or stdout when stderr is empty), for
    /// error messages.
    pub fn tail(&self, lines: usize) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let all: Vec<&str> = source.lines().collect();
        all[all.len().saturating_sub(lines)..].join("\n")
    }
}

fn shell(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.args(["/C", command_line]);
        command
    } else {
        let mut command = Command::new("sh");
        command.args(["-c", command_line]);
        // Own process group, so cancellation reaches everything the
        // shell starts.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        command
    }
}

/// Kill `child` and every process it started.
fn kill_tree(child: &mut Child, command_line: &str) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        // The shell leads its own group, so its pid is the group id.
        if let Err(e) = killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
            debug!("Group kill failed for `{}`: {}", command_line, e);
        }
    }
    #[cfg(windows)]
    {
        let _ = Command::new("taskkill")
            .args(["/T", "/F", "/PID", &child.id().to_string()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    if let Err(e) = child.kill()
        && e.kind() != ErrorKind::InvalidInput
    {
        warn!("Failed to terminate `{}`: {}", command_line, e);
    }
    let _ = child.wait();
}

/// Run `command_line` through the shell in `cwd`.
///
/// A non-zero exit is not an error; inspect `CommandOutput::success`. When
/// `cancel` fires while the command runs, the child and everything it
/// started are killed and `Error::Cancelled` is returned.
pub fn run_shell(command_line: &str, cwd: &Path, cancel: &CancelToken) -> Result<CommandOutput> {
    debug!("Running `{}` in {}", command_line, cwd.display());
    let started = Instant::now();

    let mut child = shell(command_line)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Command {
            command: command_line.to_string(),
            message: e.to_string(),
        })?;

    // Drain both pipes so a chatty child never blocks on a full buffer.
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let collect = |handle: Option<thread::JoinHandle<String>>| {
        handle
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    };

    let status = loop {
        if cancel.is_cancelled() {
            kill_tree(&mut child, command_line);
            collect(stdout);
            collect(stderr);
            return Err(Error::Cancelled {
                step: command_line.to_string(),
            });
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                kill_tree(&mut child, command_line);
                collect(stdout);
                collect(stderr);
                return Err(e.into());
            }
        }
    };

    Ok(CommandOutput {
        success: status.success(),
        code: status.code(),
        stdout: collect(stdout),
        stderr: collect(stderr),
        duration: started.elapsed(),
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = reader.read_to_end(&mut buffer);
        String::from_utf8_lossy(&buffer).into_owned()
    })
}
