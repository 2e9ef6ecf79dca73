use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::error::ProcessError;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessCommand {
    /// Program and arguments joined for display
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

pub type OutputPipe = Box<dyn AsyncRead + Send + Unpin>;

/// A started child process with its output pipes.
///
/// The pipes are handed out once through [`RunningProcess::take_stdout`] and
/// [`RunningProcess::take_stderr`] so they can be read while the process
/// itself is being waited on.
pub struct RunningProcess {
    child: tokio::process::Child,
    stdout: Option<OutputPipe>,
    stderr: Option<OutputPipe>,
    own_process_group: bool,
}

impl RunningProcess {
    pub fn new(
        child: tokio::process::Child,
        stdout: Option<OutputPipe>,
        stderr: Option<OutputPipe>,
        own_process_group: bool,
    ) -> Self {
        Self {
            child,
            stdout,
            stderr,
            own_process_group,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn take_stdout(&mut self) -> Option<OutputPipe> {
        self.stdout.take()
    }

    pub fn take_stderr(&mut self) -> Option<OutputPipe> {
        self.stderr.take()
    }

    /// Wait until the process exits and return its exit code
    pub async fn wait(&mut self) -> Result<i32, ProcessError> {
        let status = self.child.wait().await?;
        Ok(exit_code(status))
    }

    /// Forcibly terminate the process, then wait for it to exit
    pub async fn kill(&mut self) -> Result<i32, ProcessError> {
        if !self.signal_process_group() {
            if let Err(e) = self.child.start_kill() {
                // Already reaped processes report InvalidInput
                tracing::debug!("start_kill failed: {}", e);
            }
        }
        self.wait().await
    }

    #[cfg(unix)]
    fn signal_process_group(&self) -> bool {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if !self.own_process_group {
            return false;
        }
        let Some(pid) = self.child.id() else {
            return false;
        };
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => {
                tracing::debug!("Sent SIGKILL to process group {}", pid);
                true
            }
            Err(e) => {
                tracing::debug!("killpg({}) failed: {}", pid, e);
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_process_group(&self) -> bool {
        false
    }
}

/// Convert a process exit status to a plain exit code
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => signal_exit_code(status),
    }
}

#[cfg(unix)]
fn signal_exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|signal| 128 + signal).unwrap_or(-1)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: std::process::ExitStatus) -> i32 {
    -1
}

/// Creates child processes on behalf of the supervisor
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start `command` and resolve once the process is running
    async fn launch(&self, command: &ProcessCommand) -> Result<RunningProcess, ProcessError>;
}

pub struct TokioProcessLauncher;

impl TokioProcessLauncher {
    fn log_command_start(command: &ProcessCommand) {
        tracing::debug!("Executing subprocess: {}", command.command_line());
    }

    fn configure_command(command: &ProcessCommand) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&command.program);

        // Own process group so a forced quit can take down the whole tree
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        cmd.args(&command.args);

        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    fn map_spawn_error(error: std::io::Error, command: &ProcessCommand) -> ProcessError {
        tracing::error!(
            "Failed to spawn '{}': {:?} (kind: {:?})",
            command.program,
            error,
            error.kind()
        );
        if error.kind() == std::io::ErrorKind::NotFound {
            ProcessError::CommandNotFound(command.program.clone())
        } else {
            ProcessError::SpawnFailed {
                command: command.command_line(),
                source: error,
            }
        }
    }

    /// Extract a stream from a child process, converting None to error
    fn extract_stream<T>(stream: Option<T>, stream_name: &str) -> Result<T, ProcessError> {
        stream.ok_or_else(|| ProcessError::InternalError {
            message: format!("Failed to capture {}", stream_name),
        })
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn launch(&self, command: &ProcessCommand) -> Result<RunningProcess, ProcessError> {
        Self::log_command_start(command);

        let mut child = Self::configure_command(command)
            .spawn()
            .map_err(|e| Self::map_spawn_error(e, command))?;

        let stdout = Self::extract_stream(child.stdout.take(), "stdout")?;
        let stderr = Self::extract_stream(child.stderr.take(), "stderr")?;

        Ok(RunningProcess::new(
            child,
            Some(Box::new(stdout)),
            Some(Box::new(stderr)),
            cfg!(unix),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::ProcessCommandBuilder;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_extract_stream_with_none() {
        let value: Option<i32> = None;
        let result = TokioProcessLauncher::extract_stream(value, "test_stream");
        match result.unwrap_err() {
            ProcessError::InternalError { message } => {
                assert_eq!(message, "Failed to capture test_stream");
            }
            _ => panic!("Expected InternalError"),
        }
    }

    #[test]
    fn test_command_line() {
        let command = ProcessCommandBuilder::new("echo").args(["a", "b"]).build();
        assert_eq!(command.command_line(), "echo a b");
        assert_eq!(ProcessCommandBuilder::new("true").build().command_line(), "true");
    }

    #[tokio::test]
    async fn test_launch_and_read_stdout() {
        let command = ProcessCommandBuilder::new("sh")
            .args(["-c", "printf hello; exit 3"])
            .build();

        let mut process = TokioProcessLauncher.launch(&command).await.unwrap();
        assert!(process.id().is_some());

        let mut stdout = process.take_stdout().unwrap();
        let mut output = String::new();
        stdout.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "hello");
        assert!(process.take_stdout().is_none());

        assert_eq!(process.wait().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_launch_nonexistent() {
        let command = ProcessCommandBuilder::new("nonexistent_command_12345").build();
        let result = TokioProcessLauncher.launch(&command).await;
        assert!(matches!(result, Err(ProcessError::CommandNotFound(_))));
    }

    #[tokio::test]
    async fn test_kill_reports_signal_exit_code() {
        let command = ProcessCommandBuilder::new("sleep").arg("30").build();
        let mut process = TokioProcessLauncher.launch(&command).await.unwrap();

        let code = process.kill().await.unwrap();
        // SIGKILL
        assert_eq!(code, 128 + 9);
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_conversion() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(exit_code(std::process::ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(256)), 1);
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(15)), 128 + 15);
    }
}
