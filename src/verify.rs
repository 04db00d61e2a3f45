//! Boot verification over the device's serial console.
//!
//! After flashing, the firmware prints its boot log on the console. The
//! verifier reads it line by line until a line contains the success marker
//! (the firmware announcing it synchronised its clock) or until one read
//! returns nothing within the read timeout.
//!
//! A device that keeps printing without ever reaching the marker keeps the
//! loop going. `max_lines` and `max_duration` bound that case and report
//! [`FailureReason::MarkerNotFound`]; both are unset by default.

use crate::config::Config;
use crate::serial::{SerialError, SerialInterface, SerialSession};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Serial(#[from] SerialError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// A read returned no data within the read timeout.
    TimeoutOrSilence,
    /// Output kept arriving but a configured cap ran out first.
    MarkerNotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    Success,
    Failure(FailureReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationReport {
    pub outcome: VerificationOutcome,
    pub lines_read: usize,
}

#[derive(Debug, Clone)]
pub struct BootVerifier {
    port: String,
    baud: u32,
    read_timeout: Duration,
    marker: String,
    max_lines: Option<usize>,
    max_duration: Option<Duration>,
}

impl BootVerifier {
    pub fn new(port: impl Into<String>, baud: u32, read_timeout: Duration, marker: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud,
            read_timeout,
            marker: marker.into(),
            max_lines: None,
            max_duration: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.device.serial.clone(),
            config.device.baud,
            config.verify.read_timeout(),
            config.verify.marker.clone(),
        )
        .with_max_lines(config.verify.max_lines)
        .with_max_duration(config.verify.max_duration())
    }

    pub fn with_max_lines(mut self, max_lines: Option<usize>) -> Self {
        self.max_lines = max_lines;
        self
    }

    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Open the console, watch it, and close it again whatever happens.
    pub async fn verify(&self, serial: &dyn SerialInterface) -> Result<VerificationReport, VerifyError> {
        let mut session = match serial.open(&self.port, self.baud, self.read_timeout).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(
                    "Cannot open {} (available: {:?})",
                    self.port,
                    serial.available_ports()
                );
                return Err(e.into());
            }
        };

        let result = self.watch(session.as_mut()).await;
        session.close().await;
        result
    }

    /// Run the read loop on an already open session. Does not close it.
    pub async fn watch(&self, session: &mut dyn SerialSession) -> Result<VerificationReport, VerifyError> {
        let mut lines_read = 0;
        let scan = self.scan(session, &mut lines_read);

        let outcome = match self.max_duration {
            Some(limit) => match tokio::time::timeout(limit, scan).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    tracing::error!("Error - no boot marker within {}s", limit.as_secs());
                    VerificationOutcome::Failure(FailureReason::MarkerNotFound)
                }
            },
            None => scan.await?,
        };

        Ok(VerificationReport { outcome, lines_read })
    }

    async fn scan(
        &self,
        session: &mut dyn SerialSession,
        lines_read: &mut usize,
    ) -> Result<VerificationOutcome, VerifyError> {
        loop {
            if self.max_lines.is_some_and(|max| *lines_read >= max) {
                tracing::error!("Error - no boot marker within {} lines", *lines_read);
                return Ok(VerificationOutcome::Failure(FailureReason::MarkerNotFound));
            }

            let line = session.read_line().await?;
            *lines_read += 1;

            if line.is_empty() {
                tracing::error!("Error - did not get to time setting");
                return Ok(VerificationOutcome::Failure(FailureReason::TimeoutOrSilence));
            }

            tracing::info!("{}", line.trim_end());

            if line.contains(&self.marker) {
                tracing::info!("Success!");
                return Ok(VerificationOutcome::Success);
            }
        }
    }
}
