//! Channel pair that decouples a shell backend task from its readers and writers.
//!
//! The backend (an SSH channel pump or a scripted device) owns a [`PipeEnd`];
//! callers hold the matching [`ShellPipe`].

use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{
    Mutex,
    mpsc::{self, error::TryRecvError},
};

use crate::transport::{ShellTransport, TransportError};

/// Backend to caller.
#[derive(Debug)]
pub(crate) enum Inbound {
    Data(Vec<u8>),
    Closed,
    Failed(String),
}

/// Caller to backend.
#[derive(Debug)]
pub(crate) enum Outbound {
    Data(Vec<u8>),
    Close,
}

/// Backend side of a pipe.
pub(crate) struct PipeEnd {
    pub(crate) outbound: mpsc::UnboundedReceiver<Outbound>,
    pub(crate) inbound: mpsc::UnboundedSender<Inbound>,
}

struct ReadHalf {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    buffer: Vec<u8>,
    ended: Option<TransportError>,
}

impl ReadHalf {
    fn absorb(&mut self, msg: Option<Inbound>) {
        match msg {
            Some(Inbound::Data(bytes)) => self.buffer.extend_from_slice(&bytes),
            Some(Inbound::Failed(reason)) => {
                self.ended.get_or_insert(TransportError::Io(reason));
            }
            Some(Inbound::Closed) | None => {
                self.ended.get_or_insert(TransportError::Closed);
            }
        }
    }
}

/// Caller side of a pipe, usable as a [`ShellTransport`].
pub struct ShellPipe {
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: Mutex<ReadHalf>,
    open: AtomicBool,
    poll_interval: Duration,
}

impl ShellPipe {
    pub(crate) fn new(poll_interval: Duration) -> (Self, PipeEnd) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let pipe = Self {
            outbound: out_tx,
            reader: Mutex::new(ReadHalf {
                inbound: in_rx,
                buffer: Vec::new(),
                ended: None,
            }),
            open: AtomicBool::new(true),
            poll_interval,
        };
        let end = PipeEnd {
            outbound: out_rx,
            inbound: in_tx,
        };
        (pipe, end)
    }
}

#[async_trait]
impl ShellTransport for ShellPipe {
    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(Outbound::Data(bytes.to_vec()))
            .map_err(|_| TransportError::Closed)
    }

    async fn read_available(&self, max_bytes: usize) -> Result<Vec<u8>, TransportError> {
        let mut reader = self.reader.lock().await;

        if reader.buffer.is_empty() && reader.ended.is_none() {
            match tokio::time::timeout(self.poll_interval, reader.inbound.recv()).await {
                Ok(msg) => reader.absorb(msg),
                Err(_) => return Ok(Vec::new()),
            }
            while reader.buffer.len() < max_bytes && reader.ended.is_none() {
                match reader.inbound.try_recv() {
                    Ok(msg) => reader.absorb(Some(msg)),
                    Err(TryRecvError::Disconnected) => reader.absorb(None),
                    Err(TryRecvError::Empty) => break,
                }
            }
        }

        if reader.buffer.is_empty() {
            if let Some(err) = reader.ended.clone() {
                self.open.store(false, Ordering::SeqCst);
                return Err(err);
            }
            return Ok(Vec::new());
        }

        let n = max_bytes.min(reader.buffer.len());
        Ok(reader.buffer.drain(..n).collect())
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
