use crate::endpoint::Endpoint;
use proxyfleet_container::RuntimeError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("無効なプロビジョニング設定: {0}")]
    InvalidPlan(String),

    #[error("フリートは既にプロビジョニング済みです ({count} 台)")]
    AlreadyProvisioned { count: usize },

    #[error("フリートは既に停止済みです。再度プロビジョニングすることはできません")]
    Terminated,

    #[error("エンドポイント {endpoint} はポート順に並んでいません (直前のポート: {last_port})")]
    OutOfOrder { endpoint: Endpoint, last_port: u16 },

    #[error("プロキシ {endpoint} の作成に失敗しました: {source}")]
    Provision {
        endpoint: Endpoint,
        #[source]
        source: RuntimeError,
    },

    #[error("シャットダウン要求によりプロビジョニングを中断しました ({created} 台作成済み)")]
    ProvisionInterrupted { created: usize },

    #[error("プロキシ {endpoint} の再起動に失敗しました: {source}")]
    Restart {
        endpoint: Endpoint,
        #[source]
        source: RuntimeError,
    },

    #[error(
        "{} 台のプロキシを停止・削除できませんでした:\n{}\n\nヒント: 残ったコンテナは docker rm -f で手動削除してください",
        .failures.len(),
        format_failures(.failures)
    )]
    TeardownIncomplete { failures: Vec<TeardownFailure> },

    #[error("プロキシファイル '{path}' の書き込みに失敗しました: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FleetError {
    /// 関連するランタイムエラー（あれば）
    pub fn runtime_error(&self) -> Option<&RuntimeError> {
        match self {
            FleetError::Provision { source, .. } | FleetError::Restart { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

/// 停止・削除に失敗したワーカー
#[derive(Debug)]
pub struct TeardownFailure {
    pub endpoint: Endpoint,
    pub operation: &'static str,
    pub error: RuntimeError,
}

fn format_failures(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  • {} ({}): {}", f.endpoint, f.operation, f.error))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, FleetError>;
