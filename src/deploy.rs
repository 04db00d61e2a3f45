// src/deploy.rs - Fetch, flash, verify
use crate::artifact::{ArtifactFetcher, DownloadReport, FetchError};
use crate::config::Config;
use crate::event::{DeployEvent, EventError};
use crate::flash::{FlashCommand, FlashError, FlashOutcome, Flasher};
use crate::serial::{SerialInterface, SystemSerial};
use crate::verify::{BootVerifier, VerificationOutcome, VerificationReport, VerifyError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Flash(#[from] FlashError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
}

#[derive(Debug, Clone)]
pub struct DeployReport {
    pub event: DeployEvent,
    pub download: DownloadReport,
    pub flash: FlashOutcome,
    pub verification: VerificationReport,
    pub finished_at: DateTime<Utc>,
}

impl DeployReport {
    pub fn succeeded(&self) -> bool {
        self.verification.outcome == VerificationOutcome::Success
    }
}

/// Runs one deployment end to end. Steps run strictly in sequence and are
/// not retried.
pub struct Deployer {
    fetcher: ArtifactFetcher,
    flasher: Arc<dyn Flasher>,
    serial: Arc<dyn SerialInterface>,
    verifier: BootVerifier,
}

impl Deployer {
    pub fn new(
        fetcher: ArtifactFetcher,
        flasher: Arc<dyn Flasher>,
        serial: Arc<dyn SerialInterface>,
        verifier: BootVerifier,
    ) -> Self {
        Self {
            fetcher,
            flasher,
            serial,
            verifier,
        }
    }

    /// Real tool, real serial port.
    pub fn from_config(config: &Config) -> Result<Self, DeployError> {
        Ok(Self::new(
            ArtifactFetcher::new(&config.artifact)?,
            Arc::new(FlashCommand::from_config(config)),
            Arc::new(SystemSerial),
            BootVerifier::from_config(config),
        ))
    }

    /// Handle a raw deploy-event payload.
    pub async fn handle(&self, payload: &str) -> Result<DeployReport, DeployError> {
        let event = DeployEvent::decode(payload)?;
        self.deploy(event).await
    }

    pub async fn deploy(&self, event: DeployEvent) -> Result<DeployReport, DeployError> {
        tracing::info!(
            "Deploying {} {}",
            event.package_name,
            event.version_name
        );

        let download = self.fetcher.fetch(&event).await?;

        let flash = self.flasher.flash().await?;
        if !flash.success() {
            tracing::warn!("Flash tool exited with {:?}, verifying anyway", flash.code);
        }

        let verification = self.verifier.verify(self.serial.as_ref()).await?;
        match verification.outcome {
            VerificationOutcome::Success => tracing::info!(
                "{} {} booted after {} lines",
                event.package_name,
                event.version_name,
                verification.lines_read
            ),
            VerificationOutcome::Failure(reason) => tracing::error!(
                "{} {} failed boot verification: {:?}",
                event.package_name,
                event.version_name,
                reason
            ),
        }

        tracing::info!("Done with CI");
        Ok(DeployReport {
            event,
            download,
            flash,
            verification,
            finished_at: Utc::now(),
        })
    }
}
