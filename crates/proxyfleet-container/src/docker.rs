//! Docker Engine 上のワーカーランタイム

use crate::converter::{
    parse_image_tag, worker_filter, worker_summaries, worker_to_container_config,
};
use crate::error::{RuntimeError, Result, classify, is_connection_error};
use crate::runtime::{WorkerRuntime, WorkerSpec, WorkerSummary};
use async_trait::async_trait;
use bollard::Docker;
use bollard::errors::Error as DockerError;
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

/// 起動済みコンテナへのハンドル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

/// bollard を使った [`WorkerRuntime`] 実装
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// ローカルのDockerに接続し、疎通を確認する
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        debug!("Docker engine reachable");
        Ok(Self { docker })
    }

    /// イメージをpull
    async fn pull_image(&self, spec: &WorkerSpec) -> Result<()> {
        let (image_name, tag) = parse_image_tag(&spec.image);
        info!(image = %spec.image, "Pulling worker image");

        #[allow(deprecated)]
        let options = bollard::image::CreateImageOptions {
            from_image: image_name,
            tag,
            ..Default::default()
        };

        #[allow(deprecated)]
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(info) = stream.next().await {
            match info {
                Ok(bollard::models::CreateImageInfo {
                    status: Some(status),
                    ..
                }) => {
                    debug!(image = %spec.image, "{}", status);
                }
                Err(e) => {
                    return Err(provision_error(
                        spec,
                        format!("イメージのpullに失敗しました: {}", e),
                        &e,
                    ));
                }
                _ => {}
            }
        }

        info!(image = %spec.image, "Image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &WorkerSpec) -> Result<String> {
        let (config, options) = worker_to_container_config(spec);

        match self
            .docker
            .create_container(Some(options.clone()), config.clone())
            .await
        {
            Ok(response) => Ok(response.id),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                // イメージがローカルに無い場合は一度だけpullして再作成
                self.pull_image(spec).await?;
                let response = self
                    .docker
                    .create_container(Some(options), config)
                    .await
                    .map_err(|e| provision_error(spec, e.to_string(), &e))?;
                Ok(response.id)
            }
            Err(e) => Err(provision_error(spec, e.to_string(), &e)),
        }
    }
}

fn provision_error(spec: &WorkerSpec, reason: String, cause: &DockerError) -> RuntimeError {
    if is_connection_error(cause) {
        RuntimeError::Unavailable(cause.to_string())
    } else {
        RuntimeError::ProvisionFailed {
            name: spec.name.clone(),
            image: spec.image.clone(),
            port: spec.host_port,
            reason,
        }
    }
}

#[async_trait]
impl WorkerRuntime for DockerRuntime {
    type Handle = ContainerHandle;

    async fn create(&self, spec: &WorkerSpec) -> Result<ContainerHandle> {
        let id = self.create_container(spec).await?;

        if let Err(e) = self
            .docker
            .start_container(
                &id,
                None::<bollard::query_parameters::StartContainerOptions>,
            )
            .await
        {
            // 起動できなかったコンテナは残さない
            let options = bollard::query_parameters::RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            if let Err(remove_err) = self.docker.remove_container(&id, Some(options)).await {
                warn!(
                    container = %spec.name,
                    "Failed to remove container that could not start: {}",
                    remove_err
                );
            }
            return Err(provision_error(spec, e.to_string(), &e));
        }

        debug!(container = %spec.name, id = %id, "Container started");
        Ok(ContainerHandle {
            id,
            name: spec.name.clone(),
        })
    }

    async fn restart(&self, handle: &ContainerHandle) -> Result<()> {
        self.docker
            .restart_container(
                &handle.id,
                None::<bollard::query_parameters::RestartContainerOptions>,
            )
            .await
            .map_err(|e| classify(e, "restart", &handle.name))
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        match self
            .docker
            .stop_container(
                &handle.id,
                None::<bollard::query_parameters::StopContainerOptions>,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => {
                debug!(container = %handle.name, "Container already stopped");
                Ok(())
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container = %handle.name, "Container already gone");
                Ok(())
            }
            Err(e) => Err(classify(e, "stop", &handle.name)),
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        match self
            .docker
            .remove_container(
                &handle.id,
                None::<bollard::query_parameters::RemoveContainerOptions>,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!(container = %handle.name, "Container already removed");
                Ok(())
            }
            Err(e) => Err(classify(e, "remove", &handle.name)),
        }
    }

    async fn list_workers(&self) -> Result<Vec<WorkerSummary>> {
        #[allow(deprecated)]
        let options = bollard::container::ListContainersOptions {
            all: true,
            filters: worker_filter(),
            ..Default::default()
        };

        #[allow(deprecated)]
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| classify(e, "list", "*"))?;

        Ok(worker_summaries(&containers))
    }
}
