//! Background reader for an external input source (usually stdin)
//!
//! Reads block, so they run on a dedicated thread. Bytes are appended to a
//! mutex-guarded accumulator and the supervisor is told through an unbounded
//! channel that data is available. The accumulator is the only state shared
//! with the supervisor.
//!
//! On Unix a source that exposes a pollable descriptor can be interrupted:
//! the worker waits on the source and on a wake-up pipe, and
//! [`InputCapturer::abort`] writes to that pipe. Sources without a descriptor
//! only notice the abort flag once their current read returns, so callers
//! that need a hard bound wait with a timeout and then call
//! [`InputCapturer::terminate`].

use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

#[cfg(unix)]
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use tokio::sync::mpsc::UnboundedSender;

pub const INPUT_CHUNK_SIZE: usize = 1024;

/// Notifications sent from the worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureEvent {
    /// A read returned this many new bytes
    DataAvailable(usize),
    /// The worker stopped; sent exactly once
    Finished,
}

/// A blocking byte source
pub trait InputSource: Send + 'static {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Descriptor that can be polled for readability, if the source has one
    #[cfg(unix)]
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}

/// Unbuffered file-descriptor source; interruptible on Unix
pub struct FdInput(File);

impl FdInput {
    pub fn new(file: File) -> Self {
        Self(file)
    }

    /// Duplicate of the process' standard input.
    ///
    /// The std `Stdin` handle buffers internally, which would hide data from
    /// `poll`, so reads go straight to the descriptor instead.
    #[cfg(unix)]
    pub fn stdin() -> io::Result<Self> {
        let fd: OwnedFd = io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self(File::from(fd)))
    }
}

impl InputSource for FdInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }

    #[cfg(unix)]
    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.0.as_fd())
    }
}

/// Any `Read` implementation, without cancellation support
pub struct ReaderInput<R>(pub R);

impl<R: Read + Send + 'static> InputSource for ReaderInput<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

fn source_is_cancellable(source: &dyn InputSource) -> bool {
    #[cfg(unix)]
    {
        source.poll_fd().is_some()
    }
    #[cfg(not(unix))]
    {
        let _ = source;
        false
    }
}

struct Shared {
    data: Mutex<Vec<u8>>,
    aborted: AtomicBool,
    finished: AtomicBool,
    events: UnboundedSender<CaptureEvent>,
}

impl Shared {
    fn append(&self, bytes: &[u8]) {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(bytes);
        // The receiver may already be gone during shutdown
        let _ = self.events.send(CaptureEvent::DataAvailable(bytes.len()));
    }

    fn signal_finished(&self) -> bool {
        if self.finished.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.events.send(CaptureEvent::Finished);
        true
    }
}

pub struct InputCapturer {
    source: Option<Box<dyn InputSource>>,
    cancellable: bool,
    shared: Option<Arc<Shared>>,
    waker: Option<File>,
    worker: Option<JoinHandle<()>>,
}

impl InputCapturer {
    pub fn new(source: impl InputSource) -> Self {
        let cancellable = source_is_cancellable(&source);
        Self {
            source: Some(Box::new(source)),
            cancellable,
            shared: None,
            waker: None,
            worker: None,
        }
    }

    /// Capturer for the process' standard input
    pub fn stdin() -> io::Result<Self> {
        #[cfg(unix)]
        {
            Ok(Self::new(FdInput::stdin()?))
        }
        #[cfg(not(unix))]
        {
            Ok(Self::new(ReaderInput(io::stdin())))
        }
    }

    /// Whether an in-flight read can be interrupted by [`Self::abort`]
    pub fn supports_cancellation(&self) -> bool {
        self.cancellable
    }

    /// Spawn the worker thread; events are delivered on `events`
    pub fn start(&mut self, events: UnboundedSender<CaptureEvent>) -> io::Result<()> {
        let source = self.source.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AlreadyExists, "input capture already started")
        })?;

        let shared = Arc::new(Shared {
            data: Mutex::new(Vec::new()),
            aborted: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            events,
        });

        let wake = self.create_wake_pipe()?;

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("input-capture".to_string())
            .spawn(move || run_worker(source, &worker_shared, wake))?;

        tracing::debug!(
            "Input capture started (cancellable: {})",
            self.cancellable
        );
        self.shared = Some(shared);
        self.worker = Some(worker);
        Ok(())
    }

    #[cfg(unix)]
    fn create_wake_pipe(&mut self) -> io::Result<Option<File>> {
        if !self.cancellable {
            return Ok(None);
        }
        let (read_end, write_end) = nix::unistd::pipe().map_err(io::Error::from)?;
        self.waker = Some(File::from(write_end));
        Ok(Some(File::from(read_end)))
    }

    #[cfg(not(unix))]
    fn create_wake_pipe(&mut self) -> io::Result<Option<File>> {
        Ok(None)
    }

    /// Ask the worker to stop, interrupting a blocked read where possible
    pub fn abort(&mut self) {
        let Some(shared) = &self.shared else {
            return;
        };
        shared.aborted.store(true, Ordering::Release);

        if let Some(waker) = self.waker.as_mut() {
            if let Err(e) = waker.write_all(&[1]) {
                tracing::debug!("Failed to wake input worker: {}", e);
            }
        }
    }

    /// Swap out everything read so far; never blocks on the source
    pub fn read_all_data(&self) -> Vec<u8> {
        match &self.shared {
            Some(shared) => std::mem::take(
                &mut *shared.data.lock().unwrap_or_else(PoisonError::into_inner),
            ),
            None => Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .as_ref()
            .is_some_and(|shared| !shared.finished.load(Ordering::Acquire))
    }

    /// Give up on a worker that did not stop after [`Self::abort`].
    ///
    /// Threads cannot be killed, so the worker is detached; it exits on its
    /// own when its read finally returns. `Finished` is still reported only
    /// once.
    pub fn terminate(&mut self) {
        if !self.is_running() {
            self.worker.take();
            return;
        }
        self.abort();
        if let Some(shared) = &self.shared {
            if shared.signal_finished() {
                tracing::warn!("Input worker did not stop in time, detaching it");
            }
        }
        self.worker.take();
    }

    /// Join the worker if it has already finished
    pub fn join(&mut self) {
        if self.is_running() {
            return;
        }
        if let Some(worker) = self.worker.take() {
            if worker.is_finished() {
                let _ = worker.join();
            }
        }
    }
}

impl Drop for InputCapturer {
    fn drop(&mut self) {
        if self.is_running() {
            self.abort();
        }
        self.join();
    }
}

fn run_worker(mut source: Box<dyn InputSource>, shared: &Shared, wake: Option<File>) {
    let mut buffer = [0u8; INPUT_CHUNK_SIZE];

    while !shared.aborted.load(Ordering::Acquire) {
        if !wait_readable(source.as_ref(), wake.as_ref()) {
            break;
        }
        match source.read(&mut buffer) {
            Ok(0) => {
                tracing::debug!("Input reached end of stream");
                break;
            }
            Ok(n) => {
                tracing::trace!("Read {} bytes of input", n);
                shared.append(&buffer[..n]);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Read failures end the capture like end of input does
                tracing::debug!("Input read failed: {}", e);
                break;
            }
        }
    }

    shared.signal_finished();
}

/// Block until the source is readable; false if woken for abort
#[cfg(unix)]
fn wait_readable(source: &dyn InputSource, wake: Option<&File>) -> bool {
    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

    let (Some(source_fd), Some(wake)) = (source.poll_fd(), wake) else {
        return true;
    };

    loop {
        let mut fds = [
            PollFd::new(source_fd, PollFlags::POLLIN),
            PollFd::new(wake.as_fd(), PollFlags::POLLIN),
        ];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(e) => {
                tracing::debug!("poll on input failed: {}", e);
                // Let the read itself report the problem
                return true;
            }
        }
        let woken = fds[1].revents().is_some_and(|events| !events.is_empty());
        return !woken;
    }
}

#[cfg(not(unix))]
fn wait_readable(_source: &dyn InputSource, _wake: Option<&File>) -> bool {
    true
}
