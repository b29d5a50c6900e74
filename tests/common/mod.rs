//! Scripted in-memory transport shared by the integration tests.
//!
//! Every call to `open()` consumes the next [`Step`], so a script describes
//! what each command attempt sees. Frames written, open/close instants and
//! the peak number of simultaneously open links are recorded for assertions.

// Not every test file uses every helper
#![allow(dead_code)]

use axpert_rs::checksum::checksum;
use axpert_rs::config::Timing;
use axpert_rs::device::Inverter;
use axpert_rs::error::InverterError;
use axpert_rs::transport::{Link, Transport};
use bytes::BytesMut;
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Live status payload captured from an inverter running on battery.
pub const STATUS_PAYLOAD: &[u8] =
    b"(000.0 00.0 230.0 50.0 0046 0002 000 371 53.20 001 080 0026 0001 089.9 53.13 00000 00110110";

/// What a single attempt observes.
#[derive(Debug, Clone)]
pub enum Step {
    /// The device answers with these bytes
    Respond(Vec<u8>),
    /// The device stays quiet until the read times out
    Silent,
    /// The node cannot be opened
    FailOpen,
    /// The write fails after a successful open
    FailWrite,
}

#[derive(Debug, Default)]
pub struct Record {
    steps: VecDeque<Step>,
    pub frames: Vec<Vec<u8>>,
    pub opens: Vec<Instant>,
    pub closes: Vec<Instant>,
    live: usize,
    pub max_live: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    record: Arc<Mutex<Record>>,
    reply_delay: Duration,
}

impl MockTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        let record = Record {
            steps: steps.into_iter().collect(),
            ..Record::default()
        };
        Self {
            record: Arc::new(Mutex::new(record)),
            reply_delay: Duration::ZERO,
        }
    }

    /// Make every answer take this long to arrive.
    pub fn with_reply_delay(mut self, reply_delay: Duration) -> Self {
        self.reply_delay = reply_delay;
        self
    }

    pub fn push(&self, step: Step) {
        self.record.lock().unwrap().steps.push_back(step);
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.record.lock().unwrap().frames.clone()
    }

    pub fn opens(&self) -> Vec<Instant> {
        self.record.lock().unwrap().opens.clone()
    }

    pub fn closes(&self) -> Vec<Instant> {
        self.record.lock().unwrap().closes.clone()
    }

    pub fn max_live(&self) -> usize {
        self.record.lock().unwrap().max_live
    }

    pub fn remaining_steps(&self) -> usize {
        self.record.lock().unwrap().steps.len()
    }
}

impl Transport for MockTransport {
    type Link = MockLink;

    async fn open(&self) -> Result<MockLink, InverterError> {
        let mut record = self.record.lock().unwrap();
        record.opens.push(Instant::now());
        let step = record.steps.pop_front().unwrap_or(Step::Silent);
        if let Step::FailOpen = step {
            return Err(InverterError::Open {
                path: PathBuf::from("/dev/mock"),
                source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
            });
        }
        record.live += 1;
        record.max_live = record.max_live.max(record.live);
        Ok(MockLink {
            step,
            record: self.record.clone(),
            reply_delay: self.reply_delay,
        })
    }
}

#[derive(Debug)]
pub struct MockLink {
    step: Step,
    record: Arc<Mutex<Record>>,
    reply_delay: Duration,
}

impl Link for MockLink {
    async fn write(&mut self, frame: &[u8]) -> Result<(), InverterError> {
        self.record.lock().unwrap().frames.push(frame.to_vec());
        if let Step::FailWrite = self.step {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device went away").into());
        }
        Ok(())
    }

    async fn read_until(&mut self, terminator: u8, timeout: Duration) -> Result<BytesMut, InverterError> {
        match &self.step {
            Step::Respond(bytes) if self.reply_delay < timeout => {
                sleep(self.reply_delay).await;
                let end = bytes
                    .iter()
                    .position(|&b| b == terminator)
                    .map_or(bytes.len(), |pos| pos + 1);
                Ok(BytesMut::from(&bytes[..end]))
            }
            _ => {
                sleep(timeout).await;
                Ok(BytesMut::new())
            }
        }
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        let mut record = self.record.lock().unwrap();
        record.live -= 1;
        record.closes.push(Instant::now());
    }
}

/// `data`, its checksum and CR.
pub fn framed(data: &[u8]) -> Vec<u8> {
    framed_with_trailer(data, b"")
}

/// `data`, its checksum, `trailer` and CR.
pub fn framed_with_trailer(data: &[u8], trailer: &[u8]) -> Vec<u8> {
    let mut frame = data.to_vec();
    frame.extend_from_slice(&checksum(data));
    frame.extend_from_slice(trailer);
    frame.push(b'\r');
    frame
}

pub fn inverter(steps: impl IntoIterator<Item = Step>) -> (Inverter<MockTransport>, MockTransport) {
    let transport = MockTransport::new(steps);
    (Inverter::with_transport(transport.clone(), Timing::default()), transport)
}
