//! Test doubles shared by the capture test modules

use std::io::{self, Read};
use std::sync::mpsc;

#[cfg(unix)]
use std::fs::File;

/// Read and write ends of an anonymous pipe
#[cfg(unix)]
pub fn pipe_files() -> (File, File) {
    let (read_end, write_end) = nix::unistd::pipe().unwrap();
    (File::from(read_end), File::from(write_end))
}

/// Reader whose `read` blocks until data is sent or the sender is dropped
pub struct BlockingReader(pub mpsc::Receiver<Vec<u8>>);

impl BlockingReader {
    pub fn channel() -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self(rx))
    }
}

impl Read for BlockingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.recv() {
            Ok(bytes) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Err(_) => Ok(0),
        }
    }
}
