//! Process-wide shutdown coordination.
//!
//! A [`Lifecycle`] owns the shutdown flag. OS signals only flip the flag;
//! [`Lifecycle::finish`] performs the actual teardown and runs at most once,
//! whichever exit path reaches it first.

use crate::controller::FleetController;
use crate::error::Result;
use crate::signals::ShutdownSignals;
use async_trait::async_trait;
use proxyfleet_container::WorkerRuntime;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A connection that must be closed after the fleet is torn down.
#[async_trait]
pub trait Disconnect: Send {
    async fn disconnect(&mut self) -> anyhow::Result<()>;
}

/// Cheap, cloneable view of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once shutdown has been requested.
    pub async fn requested(&mut self) {
        if self.rx.wait_for(|requested| *requested).await.is_err() {
            // Lifecycle が破棄された場合は要求が来ることはない
            std::future::pending::<()>().await;
        }
    }
}

/// Outcome of the single teardown pass.
#[derive(Debug)]
pub struct ShutdownReport {
    pub teardown: Result<usize>,
    pub disconnect: Option<anyhow::Result<()>>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.teardown.is_ok() && !matches!(self.disconnect, Some(Err(_)))
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    tx: watch::Sender<bool>,
    finished: AtomicBool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx,
            finished: AtomicBool::new(false),
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn request_shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Installs the signal handlers and spawns a task that requests shutdown
    /// on the first termination signal.
    ///
    /// The task keeps running afterwards so that repeated signals during a
    /// slow teardown are reported instead of silently absorbed. Abort the
    /// returned handle once teardown is over.
    pub fn listen_for_signals(self: &Arc<Self>) -> JoinHandle<()> {
        let lifecycle = Arc::clone(self);
        let installed = ShutdownSignals::install();

        tokio::spawn(async move {
            let mut signals = match installed {
                Ok(signals) => signals,
                Err(e) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

            loop {
                match signals.recv().await {
                    Ok(signal) if lifecycle.is_shutdown_requested() => {
                        warn!(signal, "Teardown in progress, please wait");
                    }
                    Ok(signal) => {
                        info!(signal, "Closing gracefully, please wait");
                        lifecycle.request_shutdown();
                    }
                    Err(e) => {
                        error!("Failed to receive signal: {}", e);
                        return;
                    }
                }
            }
        })
    }

    /// Tears the fleet down, then closes `connection`.
    ///
    /// Only the first call does any work; later calls return `None`.
    pub async fn finish<R: WorkerRuntime>(
        &self,
        controller: &mut FleetController<R>,
        connection: Option<&mut dyn Disconnect>,
    ) -> Option<ShutdownReport> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return None;
        }
        self.request_shutdown();

        let teardown = controller.terminate_all().await;
        if let Err(e) = &teardown {
            error!("{}", e);
        }

        let disconnect = match connection {
            Some(connection) => {
                let result = connection.disconnect().await;
                if let Err(e) = &result {
                    warn!("Failed to close control-plane connection: {:#}", e);
                }
                Some(result)
            }
            None => None,
        };

        Some(ShutdownReport {
            teardown,
            disconnect,
        })
    }
}
