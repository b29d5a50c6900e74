// src/chardev.rs

use crate::constants::{MAX_RESPONSE_SIZE, POLL_INTERVAL, READ_CHUNK_SIZE};
use crate::error::InverterError;
use crate::transport::{Link, Transport, truncate_at_terminator};
use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, warn};

/// A hidraw (or tty) node, opened non-blocking for each attempt.
#[derive(Debug, Clone)]
pub struct CharDevice {
    path: PathBuf,
    poll_interval: Duration,
}

impl CharDevice {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for CharDevice {
    type Link = CharDeviceLink;

    async fn open(&self) -> Result<CharDeviceLink, InverterError> {
        let mut options = OpenOptions::new();
        options.read(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.custom_flags(libc::O_NONBLOCK);
        }
        let file = options.open(&self.path).map_err(|source| InverterError::Open {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "Opened character device");
        Ok(CharDeviceLink {
            file,
            poll_interval: self.poll_interval,
        })
    }
}

/// An open descriptor; closed when dropped.
#[derive(Debug)]
pub struct CharDeviceLink {
    file: File,
    poll_interval: Duration,
}

impl Link for CharDeviceLink {
    async fn write(&mut self, frame: &[u8]) -> Result<(), InverterError> {
        debug!(bytes = hex::encode(frame), "Device write");
        self.file.write_all(frame)?;
        Ok(())
    }

    async fn read_until(&mut self, terminator: u8, timeout: Duration) -> Result<BytesMut, InverterError> {
        let mut response = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let poll = self.poll_interval.max(Duration::from_millis(1));
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            match self.file.read(&mut chunk) {
                Ok(n) if n > 0 => {
                    response.extend_from_slice(&chunk[..n]);
                    if truncate_at_terminator(&mut response, terminator) {
                        break;
                    }
                    if response.len() >= MAX_RESPONSE_SIZE {
                        warn!("No terminator within {} bytes, giving up", response.len());
                        break;
                    }
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    // Keep whatever arrived; an empty buffer is handled upstream
                    error!("Error reading from device: {}", e);
                    break;
                }
            }
            sleep(poll.min(deadline.saturating_duration_since(Instant::now()))).await;
        }

        debug!(bytes = hex::encode(&response), "Device read");
        Ok(response)
    }
}
