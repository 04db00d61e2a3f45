// src/artifact.rs - Firmware image download
use crate::config::ArtifactConfig;
use crate::event::DeployEvent;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("IO error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("request for {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} failed with status {status}")]
    Status { url: String, status: reqwest::StatusCode },
}

/// Where a deployment's image comes from and where it lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub url: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub target: DownloadTarget,
    pub bytes: u64,
}

/// Downloads firmware images to a single fixed local path.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
    base_url: String,
    file_name: String,
    local_path: PathBuf,
    propagation_delay: Duration,
}

impl ArtifactFetcher {
    pub fn new(config: &ArtifactConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("firmware-ci/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| FetchError::Http {
                url: config.base_url.clone(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            file_name: config.file_name.clone(),
            local_path: config.local_path(),
            propagation_delay: config.propagation_delay(),
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Build the download target for an event. The URL is a plain join of
    /// base, package, version and file name.
    pub fn target(&self, event: &DeployEvent) -> DownloadTarget {
        DownloadTarget {
            url: format!(
                "{}/{}/{}/{}",
                self.base_url, event.package_name, event.version_name, self.file_name
            ),
            local_path: self.local_path.clone(),
        }
    }

    /// Remove the previous image, wait for the host to publish the new one,
    /// then download it. A failed download leaves no stale image behind.
    pub async fn fetch(&self, event: &DeployEvent) -> Result<DownloadReport, FetchError> {
        let target = self.target(event);

        self.remove_stale(&target.local_path).await?;

        if !self.propagation_delay.is_zero() {
            tracing::info!(
                "Pausing {}s for the artifact host to propagate access rights",
                self.propagation_delay.as_secs()
            );
            tokio::time::sleep(self.propagation_delay).await;
        }

        tracing::info!("Downloading {}", target.url);
        let bytes = self.download(&target).await?;
        tracing::info!("Downloaded {} bytes to {}", bytes, target.local_path.display());

        Ok(DownloadReport { target, bytes })
    }

    async fn remove_stale(&self, path: &Path) -> Result<(), FetchError> {
        match fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!("Removed stale artifact {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(FetchError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    async fn download(&self, target: &DownloadTarget) -> Result<u64, FetchError> {
        let http_err = |source| FetchError::Http {
            url: target.url.clone(),
            source,
        };
        let io_err = |source| FetchError::Io {
            path: target.local_path.clone(),
            source,
        };

        let response = self.client.get(&target.url).send().await.map_err(http_err)?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: target.url.clone(),
                status: response.status(),
            });
        }

        let body = response.bytes().await.map_err(http_err)?;
        let mut file = fs::File::create(&target.local_path).await.map_err(io_err)?;
        file.write_all(&body).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        Ok(body.len() as u64)
    }
}
