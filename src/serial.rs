// src/serial.rs - Device serial console access
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{timeout_at, Instant};

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("failed to open {port} at {baud} baud: {source}")]
    Open {
        port: String,
        baud: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("serial read error: {0}")]
    Read(#[from] std::io::Error),
    #[error("serial port already closed")]
    Closed,
}

/// Opens console sessions on a serial device.
#[async_trait]
pub trait SerialInterface: Send + Sync {
    async fn open(
        &self,
        port: &str,
        baud: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn SerialSession>, SerialError>;

    fn available_ports(&self) -> Vec<String>;
}

/// An open console connection.
///
/// `read_line` returns one newline-terminated line, or whatever arrived
/// before the read timeout expired. An empty string means the device said
/// nothing for the whole timeout.
#[async_trait]
pub trait SerialSession: Send {
    async fn read_line(&mut self) -> Result<String, SerialError>;
    async fn close(&mut self);
}

/// serial2-tokio backed implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSerial;

#[async_trait]
impl SerialInterface for SystemSerial {
    async fn open(
        &self,
        port: &str,
        baud: u32,
        read_timeout: Duration,
    ) -> Result<Box<dyn SerialSession>, SerialError> {
        let serial = SerialPort::open(port, baud).map_err(|source| SerialError::Open {
            port: port.to_string(),
            baud,
            source,
        })?;
        tracing::info!("Opened {} at {} baud", port, baud);
        Ok(Box::new(PortSession {
            port: Some(serial),
            name: port.to_string(),
            pending: Vec::new(),
            read_timeout,
        }))
    }

    fn available_ports(&self) -> Vec<String> {
        match SerialPort::available_ports() {
            Ok(paths) => paths.iter().map(|p| p.display().to_string()).collect(),
            Err(_) => vec![],
        }
    }
}

struct PortSession {
    port: Option<SerialPort>,
    name: String,
    /// Bytes received past the last returned newline.
    pending: Vec<u8>,
    read_timeout: Duration,
}

/// Deadline for one `read_line` call; `None` when it cannot be represented.
fn read_deadline(now: Instant, read_timeout: Duration) -> Option<Instant> {
    now.checked_add(read_timeout)
}

fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let end = pending.iter().position(|b| *b == b'\n')?;
    let line: Vec<u8> = pending.drain(..=end).collect();
    Some(String::from_utf8_lossy(&line).into_owned())
}

#[async_trait]
impl SerialSession for PortSession {
    async fn read_line(&mut self) -> Result<String, SerialError> {
        if let Some(line) = take_line(&mut self.pending) {
            return Ok(line);
        }
        let port = self.port.as_ref().ok_or(SerialError::Closed)?;
        let deadline = read_deadline(Instant::now(), self.read_timeout);
        let mut chunk = [0u8; 256];

        loop {
            let read = port.read(&mut chunk);
            let result = match deadline {
                Some(deadline) => timeout_at(deadline, read).await,
                None => Ok(read.await),
            };
            match result {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => {
                    tracing::trace!("Read {} bytes from {}", n, self.name);
                    self.pending.extend_from_slice(&chunk[..n]);
                    if let Some(line) = take_line(&mut self.pending) {
                        return Ok(line);
                    }
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Ok(Err(e)) => return Err(SerialError::Read(e)),
                Err(_) => break,
            }
        }

        let partial = std::mem::take(&mut self.pending);
        Ok(String::from_utf8_lossy(&partial).into_owned())
    }

    async fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::debug!("Closed serial port {}", self.name);
        }
    }
}
