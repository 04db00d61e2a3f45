// src/flash.rs - External flashing tool invocation
use crate::config::Config;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum FlashError {
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Exit status of the flashing tool. `code` is `None` when the tool was
/// killed by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashOutcome {
    pub code: Option<i32>,
}

impl FlashOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Writes the downloaded image onto the device.
#[async_trait]
pub trait Flasher: Send + Sync {
    async fn flash(&self) -> Result<FlashOutcome, FlashError>;
}

/// Fixed command line of the flashing tool. Built once at startup; nothing
/// varies between deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl FlashCommand {
    /// `esptool -vv -cd nodemcu -cb 921600 -cp /dev/ttyUSB0 -ca 0x00000 -cf <image>`
    pub fn from_config(config: &Config) -> Self {
        let flash = &config.flash;
        let mut args = Vec::with_capacity(11);
        if !flash.verbosity.is_empty() {
            args.push(flash.verbosity.clone());
        }
        args.extend([
            "-cd".to_string(),
            flash.board.clone(),
            "-cb".to_string(),
            flash.upload_baud.to_string(),
            "-cp".to_string(),
            config.device.serial.clone(),
            "-ca".to_string(),
            flash.address.clone(),
            "-cf".to_string(),
            config.artifact.local_path().display().to_string(),
        ]);
        Self {
            program: flash.tool.clone(),
            args,
        }
    }
}

impl fmt::Display for FlashCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Flasher for FlashCommand {
    async fn flash(&self) -> Result<FlashOutcome, FlashError> {
        tracing::info!("Flashing: {}", self);
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .await
            .map_err(|source| FlashError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let outcome = FlashOutcome { code: status.code() };
        tracing::debug!("Flash tool exited with {:?}", outcome.code);
        Ok(outcome)
    }
}
