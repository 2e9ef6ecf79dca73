//! Process supervisor and reactive capture loop
//!
//! The supervisor owns every piece of pipeline state (tokenizer buffers,
//! formatter, log writer) and mutates it only from the task driving
//! [`Supervisor::run`]. Readiness from the child's pipes, the input capturer
//! and quit requests is turned into an [`Event`] and handled by a single
//! dispatcher.

use std::fs::File;
use std::io::{self, Write};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::Instant;

use super::encoding::TextEncoding;
use super::filter::FilterRule;
use super::format::Formatter;
use super::input::{CaptureEvent, InputCapturer};
use super::quit::QuitHandle;
use super::tokenizer::Tokenizer;
use super::types::{Channel, LogFormat, ProcessState};
use super::writer::LogWriter;
use crate::error::{Error, Result};
use crate::subprocess::{OutputPipe, ProcessCommand, ProcessError, ProcessLauncher, RunningProcess};

const PIPE_CHUNK_SIZE: usize = 4096;

/// How long to wait for an aborted input capturer before detaching it
pub const DEFAULT_ABORT_TIMEOUT: Duration = Duration::from_secs(5);

/// After exit, stop draining a pipe once it has been idle this long
const DRAIN_IDLE_TIMEOUT: Duration = Duration::from_millis(250);
/// Upper bound on the whole post-exit drain
const DRAIN_TOTAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Validated pipeline settings
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub format: LogFormat,
    pub filter: FilterRule,
    pub simplify: bool,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
    pub output_encoding: TextEncoding,
    pub input_encoding: TextEncoding,
    pub passthrough_input: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            format: LogFormat::Verbose,
            filter: FilterRule::default(),
            simplify: false,
            capture_stdout: true,
            capture_stderr: true,
            output_encoding: TextEncoding::Utf8,
            input_encoding: TextEncoding::Utf8,
            passthrough_input: true,
        }
    }
}

/// Local console streams that captured output is mirrored to
pub struct Console {
    stdout: Box<dyn Write + Send>,
    stderr: Box<dyn Write + Send>,
}

impl Console {
    pub fn new(stdout: Box<dyn Write + Send>, stderr: Box<dyn Write + Send>) -> Self {
        Self { stdout, stderr }
    }

    pub fn inherit() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    fn write(&mut self, channel: Channel, bytes: &[u8]) {
        let out = match channel {
            Channel::ChildStderr => &mut self.stderr,
            _ => &mut self.stdout,
        };
        if let Err(e) = out.write_all(bytes).and_then(|_| out.flush()) {
            tracing::debug!("Console passthrough failed for {:?}: {}", channel, e);
        }
    }
}

enum Source {
    Process(RunningProcess),
    Input {
        capturer: InputCapturer,
        events: UnboundedReceiver<CaptureEvent>,
    },
}

#[derive(Debug)]
enum Event {
    Output(Channel, Vec<u8>),
    OutputClosed(Channel),
    Exited(std::result::Result<i32, ProcessError>),
    Input(CaptureEvent),
    Quit { silent: bool },
    AbortTimeout,
}

pub struct Supervisor<W: Write = File> {
    options: CaptureOptions,
    tokenizer: Tokenizer,
    formatter: Formatter,
    writer: LogWriter<W>,
    console: Console,
    state: ProcessState,
    source: Option<Source>,
    quit: QuitHandle,
    abort_timeout: Duration,
}

impl<W: Write> Supervisor<W> {
    pub fn new(options: CaptureOptions, writer: LogWriter<W>, console: Console) -> Self {
        let tokenizer = Tokenizer::new(
            options.output_encoding,
            options.input_encoding,
            options.simplify,
        );
        let formatter = Formatter::new(options.format, options.filter.clone());
        Self {
            options,
            tokenizer,
            formatter,
            writer,
            console,
            state: ProcessState::Idle,
            source: None,
            quit: QuitHandle::new(),
            abort_timeout: DEFAULT_ABORT_TIMEOUT,
        }
    }

    pub fn with_abort_timeout(mut self, timeout: Duration) -> Self {
        self.abort_timeout = timeout;
        self
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Handle that can request a forced quit from any thread
    pub fn quit_handle(&self) -> QuitHandle {
        self.quit.clone()
    }

    pub fn force_quit(&self, silent: bool) {
        self.quit.force_quit(silent);
    }

    pub fn into_writer(self) -> LogWriter<W> {
        self.writer
    }

    /// Launch `command`; on failure the error is logged and returned
    pub async fn start_child_process(
        &mut self,
        launcher: &dyn ProcessLauncher,
        command: &ProcessCommand,
    ) -> Result<()> {
        self.ensure_idle()?;
        self.transition(ProcessState::Starting);
        self.initialize_log();
        self.system_message(&format!("Creating process: {}", command.command_line()));

        match launcher.launch(command).await {
            Ok(process) => {
                let pid = process
                    .id()
                    .map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
                self.system_message(&format!("Process created successfully (PID: {})", pid));
                self.source = Some(Source::Process(process));
                self.transition(ProcessState::Running);
                Ok(())
            }
            Err(e) => {
                self.system_message(&format!("Failed to create process: {}", e));
                self.transition(ProcessState::FailedToStart);
                Err(e.into())
            }
        }
    }

    /// Capture from an external input instead of a child process
    pub fn start_input_capture(&mut self, mut capturer: InputCapturer) -> Result<()> {
        self.ensure_idle()?;
        self.transition(ProcessState::Starting);
        self.initialize_log();

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = capturer.start(tx) {
            self.system_message(&format!("Failed to start reading input: {}", e));
            self.transition(ProcessState::FailedToStart);
            return Err(e.into());
        }

        self.system_message("Reading from standard input, waiting for data...");
        self.source = Some(Source::Input {
            capturer,
            events: rx,
        });
        self.transition(ProcessState::Running);
        Ok(())
    }

    /// Drive the capture until the source is exhausted or a quit is
    /// requested, then flush and write the footer. Yields the child's exit
    /// code, or 0 for input capture.
    pub async fn run(&mut self) -> Result<i32> {
        let source = self.source.take().ok_or(Error::NotStarted)?;
        let exit_code = match source {
            Source::Process(process) => self.run_process(process).await,
            Source::Input { capturer, events } => self.run_input(capturer, events).await,
        };
        Ok(exit_code)
    }

    async fn run_process(&mut self, mut process: RunningProcess) -> i32 {
        let quit = self.quit.clone();
        let mut stdout = process.take_stdout();
        let mut stderr = process.take_stderr();
        let mut stdout_buf = vec![0u8; PIPE_CHUNK_SIZE];
        let mut stderr_buf = vec![0u8; PIPE_CHUNK_SIZE];
        let mut quit_seen = false;

        let exit_code = loop {
            let event = tokio::select! {
                silent = quit.requested(), if !quit_seen => Event::Quit { silent },
                read = read_pipe(stdout.as_mut(), &mut stdout_buf), if stdout.is_some() => {
                    pipe_event(Channel::ChildStdout, read, &stdout_buf)
                }
                read = read_pipe(stderr.as_mut(), &mut stderr_buf), if stderr.is_some() => {
                    pipe_event(Channel::ChildStderr, read, &stderr_buf)
                }
                status = process.wait() => Event::Exited(status),
            };

            match event {
                Event::Output(channel, bytes) => self.handle_output(channel, &bytes),
                Event::OutputClosed(Channel::ChildStdout) => stdout = None,
                Event::OutputClosed(_) => stderr = None,
                Event::Exited(status) => break self.exit_code(status),
                Event::Quit { silent } => {
                    quit_seen = true;
                    if !silent {
                        self.system_message("Process aborted by user");
                    }
                    let status = process.kill().await;
                    break self.exit_code(status);
                }
                Event::Input(_) | Event::AbortTimeout => {}
            }
        };

        self.transition(ProcessState::Draining);
        self.drain_pipe(Channel::ChildStdout, stdout.as_mut()).await;
        self.drain_pipe(Channel::ChildStderr, stderr.as_mut()).await;
        self.flush_channels();
        self.system_message(&format!(
            "Process terminated with exit code {}",
            exit_code
        ));
        self.finish_log();
        self.transition(ProcessState::Finished);
        exit_code
    }

    async fn run_input(
        &mut self,
        mut capturer: InputCapturer,
        mut events: UnboundedReceiver<CaptureEvent>,
    ) -> i32 {
        let quit = self.quit.clone();
        let mut quit_seen = false;
        let mut abort_deadline: Option<Instant> = None;

        loop {
            let event = tokio::select! {
                silent = quit.requested(), if !quit_seen => Event::Quit { silent },
                received = events.recv() => {
                    Event::Input(received.unwrap_or(CaptureEvent::Finished))
                }
                _ = tokio::time::sleep_until(abort_deadline.unwrap_or_else(Instant::now)),
                    if abort_deadline.is_some() => Event::AbortTimeout,
            };

            match event {
                Event::Input(CaptureEvent::DataAvailable(_)) => {
                    let data = capturer.read_all_data();
                    self.handle_input(&data);
                }
                Event::Input(CaptureEvent::Finished) => break,
                Event::Quit { silent } => {
                    quit_seen = true;
                    if !silent {
                        self.system_message("Input capture aborted by user");
                    }
                    if !capturer.supports_cancellation() {
                        tracing::debug!(
                            "Input source cannot be interrupted, waiting up to {:?}",
                            self.abort_timeout
                        );
                    }
                    capturer.abort();
                    abort_deadline = Some(Instant::now() + self.abort_timeout);
                }
                Event::AbortTimeout => {
                    capturer.terminate();
                    break;
                }
                Event::Output(..) | Event::OutputClosed(_) | Event::Exited(_) => {}
            }
        }

        self.transition(ProcessState::Draining);
        let remaining = capturer.read_all_data();
        self.handle_input(&remaining);
        capturer.join();
        self.flush_channels();
        self.system_message("No more input available, exiting");
        self.finish_log();
        self.transition(ProcessState::Finished);
        0
    }

    fn handle_output(&mut self, channel: Channel, bytes: &[u8]) {
        tracing::trace!("Read {} bytes from {:?}", bytes.len(), channel);
        self.console.write(channel, bytes);
        if self.captures(channel) {
            self.process_data(channel, bytes);
        }
    }

    fn handle_input(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if self.options.passthrough_input {
            self.console.write(Channel::ExternalInput, bytes);
        }
        self.process_data(Channel::ExternalInput, bytes);
    }

    fn process_data(&mut self, channel: Channel, bytes: &[u8]) {
        for line in self.tokenizer.feed(channel, bytes) {
            self.log_line(channel, &line);
        }
    }

    fn captures(&self, channel: Channel) -> bool {
        match channel {
            Channel::ChildStdout => self.options.capture_stdout,
            Channel::ChildStderr => self.options.capture_stderr,
            Channel::ExternalInput | Channel::SystemMessage => true,
        }
    }

    /// Read whatever the pipe still delivers after the process is gone
    async fn drain_pipe(&mut self, channel: Channel, pipe: Option<&mut OutputPipe>) {
        let Some(pipe) = pipe else {
            return;
        };
        let deadline = Instant::now() + DRAIN_TOTAL_TIMEOUT;
        let mut buf = vec![0u8; PIPE_CHUNK_SIZE];

        while Instant::now() < deadline {
            match tokio::time::timeout(DRAIN_IDLE_TIMEOUT, pipe.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => self.handle_output(channel, &buf[..n]),
                Ok(Ok(_)) => return,
                Ok(Err(e)) => {
                    tracing::debug!("Read from {:?} failed while draining: {}", channel, e);
                    return;
                }
                Err(_) => {
                    tracing::debug!("{:?} still open after exit, stop draining", channel);
                    return;
                }
            }
        }
    }

    fn flush_channels(&mut self) {
        for channel in [
            Channel::ChildStdout,
            Channel::ChildStderr,
            Channel::ExternalInput,
        ] {
            if let Some(line) = self.tokenizer.flush(channel) {
                if self.captures(channel) {
                    self.log_line(channel, &line);
                }
            }
        }
    }

    fn exit_code(&mut self, status: std::result::Result<i32, ProcessError>) -> i32 {
        match status {
            Ok(code) => code,
            Err(e) => {
                self.system_message(&format!("Failed to wait for process: {}", e));
                -1
            }
        }
    }

    fn system_message(&mut self, message: &str) {
        tracing::debug!("{}", message);
        self.log_line(Channel::SystemMessage, message);
    }

    fn log_line(&mut self, channel: Channel, line: &str) {
        if let Some(rendered) = self.formatter.emit(channel, line) {
            if let Err(e) = self.writer.append(&rendered) {
                tracing::warn!("Failed to write log record: {}", e);
            }
        }
    }

    fn initialize_log(&mut self) {
        if let Err(e) = self.writer.initialize() {
            tracing::warn!("Failed to initialize log file: {}", e);
        }
    }

    fn finish_log(&mut self) {
        if let Err(e) = self.writer.finish() {
            tracing::warn!("Failed to finish log file: {}", e);
        }
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state == ProcessState::Idle {
            Ok(())
        } else {
            Err(Error::AlreadyStarted)
        }
    }

    fn transition(&mut self, next: ProcessState) {
        tracing::debug!("State: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

async fn read_pipe(pipe: Option<&mut OutputPipe>, buf: &mut [u8]) -> io::Result<usize> {
    match pipe {
        Some(pipe) => pipe.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Transient read failures end that pipe like EOF does
fn pipe_event(channel: Channel, read: io::Result<usize>, buf: &[u8]) -> Event {
    match read {
        Ok(0) => Event::OutputClosed(channel),
        Ok(n) => Event::Output(channel, buf[..n].to_vec()),
        Err(e) => {
            tracing::debug!("Read from {:?} failed: {}", channel, e);
            Event::OutputClosed(channel)
        }
    }
}
