//! Event loop tying the notification transport to the deploy pipeline.
//!
//! Setup happens in two phases: the transport connects on its own, and only
//! when it reports `ConnectionEstablished` does the orchestrator subscribe to
//! the deploy channel. Each reconnect repeats the subscription.

use crate::deploy::Deployer;
use crate::notify::{NotificationSource, NotifyError, TransportEvent};
use std::future::Future;

/// Why [`Orchestrator::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    TransportClosed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub connections: u64,
    pub deployments: u64,
    pub succeeded: u64,
    pub failed: u64,
}

pub struct Orchestrator<S> {
    source: S,
    deployer: Deployer,
    channel: String,
    event: String,
    stats: RunStats,
}

impl<S: NotificationSource> Orchestrator<S> {
    pub fn new(source: S, deployer: Deployer, channel: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            source,
            deployer,
            channel: channel.into(),
            event: event.into(),
            stats: RunStats::default(),
        }
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Process transport events until `shutdown` resolves or the transport
    /// closes. A deployment in progress always runs to completion first.
    pub async fn run<F>(&mut self, shutdown: F) -> RunExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let event = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    return RunExit::Shutdown;
                }
                event = self.source.next_event() => event,
            };

            match event {
                Some(event) => self.dispatch(event).await,
                None => {
                    tracing::warn!("Notification transport closed");
                    return RunExit::TransportClosed;
                }
            }
        }
    }

    async fn dispatch(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionEstablished { socket_id } => {
                self.stats.connections += 1;
                tracing::debug!("Connection {} established", socket_id);
                match self.source.subscribe(&self.channel).await {
                    Ok(()) => tracing::info!(
                        "Subscribed to '{}', waiting for '{}'",
                        self.channel,
                        self.event
                    ),
                    Err(NotifyError::NotConnected) => {
                        tracing::warn!("Connection dropped before subscribing to '{}'", self.channel)
                    }
                    Err(e) => tracing::error!("Subscribe to '{}' failed: {}", self.channel, e),
                }
            }
            TransportEvent::SubscriptionSucceeded { channel } => {
                tracing::debug!("Subscription to '{}' confirmed", channel);
            }
            TransportEvent::ChannelEvent { channel, event, data } => {
                if channel != self.channel || event != self.event {
                    tracing::debug!("Ignoring '{}' on '{}'", event, channel);
                    return;
                }
                self.stats.deployments += 1;
                match self.deployer.handle(&data).await {
                    Ok(report) if report.succeeded() => self.stats.succeeded += 1,
                    Ok(_) => self.stats.failed += 1,
                    Err(e) => {
                        self.stats.failed += 1;
                        tracing::error!("Deployment aborted: {}", e);
                    }
                }
            }
            TransportEvent::Disconnected => {
                tracing::info!("Disconnected from notification service");
            }
        }
    }
}
