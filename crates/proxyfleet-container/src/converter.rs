//! WorkerSpec から Docker API パラメータへの変換

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::runtime::{WorkerSpec, WorkerSummary};
use bollard::container::{Config, CreateContainerOptions};
use bollard::models::{ContainerSummary, HostConfig, PortBinding};
use std::collections::HashMap;

/// ワーカーに付与するラベルのキー
pub const LABEL_WORKER: &str = "proxyfleet.worker";
pub const LABEL_HOST_PORT: &str = "proxyfleet.host-port";

/// WorkerSpecをDockerのコンテナ設定に変換
///
/// コンテナポートは全インターフェース (`0.0.0.0`) のホストポートに公開する。
pub fn worker_to_container_config(
    spec: &WorkerSpec,
) -> (Config<String>, CreateContainerOptions<String>) {
    let container_port = format!("{}/tcp", spec.container_port);

    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(container_port.clone(), HashMap::new());

    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        container_port,
        Some(vec![PortBinding {
            host_ip: Some("0.0.0.0".to_string()),
            host_port: Some(spec.host_port.to_string()),
        }]),
    );

    let host_config = Some(HostConfig {
        port_bindings: Some(port_bindings),
        ..Default::default()
    });

    let mut labels = HashMap::new();
    labels.insert(LABEL_WORKER.to_string(), spec.name.clone());
    labels.insert(LABEL_HOST_PORT.to_string(), spec.host_port.to_string());

    let config = Config {
        image: Some(spec.image.clone()),
        exposed_ports: Some(exposed_ports),
        host_config,
        labels: Some(labels),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: spec.name.clone(),
        platform: None,
    };

    (config, options)
}

/// ワーカーラベルを持つコンテナに絞り込むフィルタ
pub fn worker_filter() -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), vec![LABEL_WORKER.to_string()])])
}

/// コンテナ一覧からワーカーを取り出す（ラベルの無いものは無視）
pub fn worker_summaries(containers: &[ContainerSummary]) -> Vec<WorkerSummary> {
    containers
        .iter()
        .filter_map(|c| {
            let labels = c.labels.as_ref()?;
            let name = labels.get(LABEL_WORKER)?;
            Some(WorkerSummary {
                name: name.clone(),
                host_port: labels.get(LABEL_HOST_PORT).and_then(|p| p.parse().ok()),
            })
        })
        .collect()
}

/// イメージ名とタグを分離
/// 例: "dockage/tor-privoxy:latest" -> ("dockage/tor-privoxy", "latest")
///     "localhost:5000/tor" -> ("localhost:5000/tor", "latest")
pub fn parse_image_tag(image: &str) -> (&str, &str) {
    match image.rsplit_once(':') {
        // ':' の後ろに '/' があればレジストリのポート番号
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (image, "latest"),
    }
}
