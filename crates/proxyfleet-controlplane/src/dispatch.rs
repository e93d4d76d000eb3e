//! Per-delivery dispatch: decode, act on the fleet, acknowledge.
//!
//! A delivery is acknowledged only when its endpoint belongs to the fleet and
//! the worker restarted successfully. Everything else is left unacknowledged
//! and stays with the broker.

use crate::error::{ControlPlaneError, Result};
use crate::message::{DecodeError, decode};
use async_trait::async_trait;
use lapin::message::Delivery;
use lapin::options::BasicAckOptions;
use proxyfleet_config::MessageFormat;
use proxyfleet_container::WorkerRuntime;
use proxyfleet_core::{FleetController, FleetError};
use std::fmt;
use tracing::{debug, info, warn};

/// An inbound message that can be acknowledged.
#[async_trait]
pub trait Inbound: Send + Sync {
    fn body(&self) -> &[u8];

    async fn acknowledge(&self) -> Result<()>;
}

#[async_trait]
impl Inbound for Delivery {
    fn body(&self) -> &[u8] {
        &self.data
    }

    async fn acknowledge(&self) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(ControlPlaneError::Ack)
    }
}

/// Why a delivery was left unacknowledged.
#[derive(Debug)]
pub enum Unacked {
    Malformed(DecodeError),
    UnknownAction(String),
    UnknownEndpoint(String),
    RestartFailed(FleetError),
    AckFailed(ControlPlaneError),
}

impl fmt::Display for Unacked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unacked::Malformed(e) => write!(f, "malformed message: {}", e),
            Unacked::UnknownAction(action) => write!(f, "unknown action '{}'", action),
            Unacked::UnknownEndpoint(endpoint) => write!(f, "unknown endpoint {}", endpoint),
            Unacked::RestartFailed(e) => write!(f, "{}", e),
            Unacked::AckFailed(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Acked { endpoint: String },
    Unacked(Unacked),
}

impl DispatchOutcome {
    pub fn is_acked(&self) -> bool {
        matches!(self, DispatchOutcome::Acked { .. })
    }
}

/// Running totals, reported when the listener stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub acked: u64,
    pub unacked: u64,
}

/// Handles deliveries one at a time.
#[derive(Debug)]
pub struct Dispatcher {
    format: MessageFormat,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(format: MessageFormat) -> Self {
        Self {
            format,
            stats: DispatchStats::default(),
        }
    }

    pub fn format(&self) -> MessageFormat {
        self.format
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Runs one delivery to completion. Never fails: every problem ends up
    /// as an [`Unacked`] reason.
    pub async fn dispatch<R, M>(
        &mut self,
        controller: &mut FleetController<R>,
        message: &M,
    ) -> DispatchOutcome
    where
        R: WorkerRuntime,
        M: Inbound + ?Sized,
    {
        let outcome = self.act(controller, message).await;
        match &outcome {
            DispatchOutcome::Acked { endpoint } => {
                self.stats.acked += 1;
                info!(endpoint = %endpoint, "Restart acknowledged");
            }
            DispatchOutcome::Unacked(reason) => {
                self.stats.unacked += 1;
                match reason {
                    Unacked::UnknownEndpoint(_) => debug!("Message left unacknowledged: {}", reason),
                    _ => warn!("Message left unacknowledged: {}", reason),
                }
            }
        }
        outcome
    }

    async fn act<R, M>(&self, controller: &mut FleetController<R>, message: &M) -> DispatchOutcome
    where
        R: WorkerRuntime,
        M: Inbound + ?Sized,
    {
        let decoded = match decode(message.body(), self.format) {
            Ok(decoded) => decoded,
            Err(e) => return DispatchOutcome::Unacked(Unacked::Malformed(e)),
        };
        debug!(action = %decoded.action, endpoint = %decoded.endpoint, "Message received");

        if !decoded.is_restart() {
            return DispatchOutcome::Unacked(Unacked::UnknownAction(decoded.action));
        }

        match controller.restart(&decoded.endpoint).await {
            Ok(true) => {}
            Ok(false) => return DispatchOutcome::Unacked(Unacked::UnknownEndpoint(decoded.endpoint)),
            Err(e) => return DispatchOutcome::Unacked(Unacked::RestartFailed(e)),
        }

        match message.acknowledge().await {
            Ok(()) => DispatchOutcome::Acked {
                endpoint: decoded.endpoint,
            },
            Err(e) => DispatchOutcome::Unacked(Unacked::AckFailed(e)),
        }
    }
}
