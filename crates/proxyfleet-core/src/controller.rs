//! Fleet controller: provisioning, single-flight restart and teardown.

use crate::endpoint::Endpoint;
use crate::error::{FleetError, Result, TeardownFailure};
use crate::lifecycle::ShutdownToken;
use crate::registry::FleetRegistry;
use proxyfleet_container::{DEFAULT_CONTAINER_PORT, WorkerRuntime, WorkerSpec};
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEFAULT_IMAGE: &str = "dockage/tor-privoxy:latest";
pub const DEFAULT_NAME_PREFIX: &str = "tor-proxy";
pub const DEFAULT_SEPARATOR: &str = ",";

/// How every worker of the fleet is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTemplate {
    pub image: String,
    pub container_port: u16,
    /// Container names are `{name_prefix}-{host_port}`.
    pub name_prefix: String,
}

impl Default for WorkerTemplate {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            container_port: DEFAULT_CONTAINER_PORT,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

impl WorkerTemplate {
    pub fn spec(&self, host_port: u16) -> WorkerSpec {
        WorkerSpec {
            image: self.image.clone(),
            host_port,
            container_port: self.container_port,
            name: format!("{}-{}", self.name_prefix, host_port),
        }
    }
}

/// A validated request for `replicas` workers on consecutive ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPlan {
    replicas: u16,
    start_port: u16,
    expected_address: String,
}

impl ProvisionPlan {
    pub fn new(replicas: u32, start_port: u16, expected_address: impl Into<String>) -> Result<Self> {
        let expected_address = expected_address.into();

        if replicas == 0 {
            return Err(FleetError::InvalidPlan(
                "replicas は 1 以上である必要があります".to_string(),
            ));
        }
        if start_port == 0 {
            return Err(FleetError::InvalidPlan(
                "start-port は 1 以上である必要があります".to_string(),
            ));
        }
        let last_port = u64::from(start_port) + u64::from(replicas) - 1;
        if last_port > u64::from(u16::MAX) {
            return Err(FleetError::InvalidPlan(format!(
                "ポート範囲 {} - {} が 65535 を超えています",
                start_port, last_port
            )));
        }
        if expected_address.trim().is_empty() {
            return Err(FleetError::InvalidPlan(
                "expected-address が空です".to_string(),
            ));
        }

        Ok(Self {
            // last_port <= u16::MAX なので replicas も u16 に収まる
            replicas: replicas as u16,
            start_port,
            expected_address,
        })
    }

    pub fn replicas(&self) -> u16 {
        self.replicas
    }

    pub fn start_port(&self) -> u16 {
        self.start_port
    }

    pub fn last_port(&self) -> u16 {
        self.start_port + (self.replicas - 1)
    }

    pub fn expected_address(&self) -> &str {
        &self.expected_address
    }

    /// Endpoints of the plan in ascending port order.
    pub fn endpoints(&self) -> impl Iterator<Item = Endpoint> + '_ {
        (self.start_port..=self.last_port()).map(|port| Endpoint::new(&self.expected_address, port))
    }
}

pub struct FleetController<R: WorkerRuntime> {
    runtime: R,
    template: WorkerTemplate,
    registry: FleetRegistry<R::Handle>,
}

impl<R: WorkerRuntime> FleetController<R> {
    pub fn new(runtime: R, template: WorkerTemplate) -> Self {
        Self {
            runtime,
            template,
            registry: FleetRegistry::new(),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn registry(&self) -> &FleetRegistry<R::Handle> {
        &self.registry
    }

    /// Brings up every worker of `plan`, one at a time in ascending port order.
    ///
    /// Stops at the first failure. Workers created before the failure stay
    /// registered; the caller decides whether to tear them down or to call
    /// `provision` again, in which case already registered endpoints are
    /// skipped. A shutdown request is observed between workers.
    pub async fn provision(&mut self, plan: &ProvisionPlan, shutdown: &ShutdownToken) -> Result<()> {
        if self.registry.is_terminated() {
            return Err(FleetError::Terminated);
        }
        if self.registry.is_sealed() {
            return Err(FleetError::AlreadyProvisioned {
                count: self.registry.len(),
            });
        }

        info!(
            "Provisioning {} proxies [{} - {}]",
            plan.replicas(),
            plan.start_port(),
            plan.last_port()
        );

        for endpoint in plan.endpoints() {
            if shutdown.is_requested() {
                warn!(
                    created = self.registry.len(),
                    "Shutdown requested, provisioning stopped"
                );
                return Err(FleetError::ProvisionInterrupted {
                    created: self.registry.len(),
                });
            }

            if self.registry.contains(endpoint.as_str()) {
                debug!(endpoint = %endpoint, "Already provisioned, skipping");
                continue;
            }
            self.registry.check_insert(&endpoint)?;

            let spec = self.template.spec(endpoint.port());
            info!(endpoint = %endpoint, container = %spec.name, "Starting proxy");

            let handle = match self.runtime.create(&spec).await {
                Ok(handle) => handle,
                Err(source) => return Err(FleetError::Provision { endpoint, source }),
            };
            self.registry.insert(endpoint, handle)?;
        }

        self.registry.seal();
        info!(count = self.registry.len(), "All proxies are up and running");
        Ok(())
    }

    /// Restarts the worker behind `endpoint`.
    ///
    /// Returns `Ok(false)` without touching the runtime when the endpoint is
    /// not part of the fleet.
    pub async fn restart(&mut self, endpoint: &str) -> Result<bool> {
        let Some((endpoint, handle)) = self.registry.get(endpoint) else {
            debug!(endpoint, "Restart requested for unknown endpoint");
            return Ok(false);
        };

        info!(endpoint = %endpoint, "Restarting proxy");
        match self.runtime.restart(handle).await {
            Ok(()) => Ok(true),
            Err(source) => Err(FleetError::Restart {
                endpoint: endpoint.clone(),
                source,
            }),
        }
    }

    /// Stops and removes every worker in ascending port order.
    ///
    /// Every worker is attempted; failures are collected into
    /// [`FleetError::TeardownIncomplete`]. The registry is empty and
    /// terminated afterwards, so a second call is a no-op and the fleet can
    /// not be provisioned again. Returns the number of workers torn down.
    pub async fn terminate_all(&mut self) -> Result<usize> {
        let entries = self.registry.drain();
        if entries.is_empty() {
            debug!("No proxies to terminate");
            return Ok(0);
        }
        let total = entries.len();
        info!(count = total, "Terminating proxies");

        let mut failures = Vec::new();
        for (endpoint, handle) in entries {
            info!(endpoint = %endpoint, "Terminating proxy");

            let stopped = self.runtime.stop(&handle).await;
            // 停止に失敗しても削除は試みる
            let removed = self.runtime.remove(&handle).await;

            if let Err(error) = stopped {
                warn!(endpoint = %endpoint, "Failed to stop proxy: {}", error);
                failures.push(TeardownFailure {
                    endpoint: endpoint.clone(),
                    operation: "stop",
                    error,
                });
            }
            if let Err(error) = removed {
                warn!(endpoint = %endpoint, "Failed to remove proxy: {}", error);
                failures.push(TeardownFailure {
                    endpoint,
                    operation: "remove",
                    error,
                });
            }
        }

        if failures.is_empty() {
            info!("Proxies terminated");
            Ok(total)
        } else {
            Err(FleetError::TeardownIncomplete { failures })
        }
    }

    /// Endpoints in registry order joined by `separator`.
    pub fn roster(&self, separator: &str) -> String {
        self.registry
            .endpoints()
            .map(Endpoint::as_str)
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Writes the roster to `path`. An empty path disables the export.
    ///
    /// Returns whether a file was written.
    pub fn export(&self, path: impl AsRef<Path>, separator: &str) -> Result<bool> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            debug!("Proxy file disabled");
            return Ok(false);
        }

        std::fs::write(path, self.roster(separator)).map_err(|source| FleetError::Export {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), count = self.registry.len(), "Proxy file written");
        Ok(true)
    }
}
