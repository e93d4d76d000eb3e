use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • DOCKER_HOST の設定を確認してください"
    )]
    Unavailable(String),

    #[error("ワーカー '{name}' (image: {image}, port: {port}) の作成に失敗しました: {reason}")]
    ProvisionFailed {
        name: String,
        image: String,
        port: u16,
        reason: String,
    },

    #[error("ワーカー '{worker}' が見つかりません")]
    WorkerNotFound { worker: String },

    #[error("ワーカー '{worker}' の {operation} に失敗しました: {reason}")]
    OperationFailed {
        operation: &'static str,
        worker: String,
        reason: String,
    },
}

impl RuntimeError {
    /// コンテナエンジン自体に到達できないエラーかどうか
    pub fn is_unavailable(&self) -> bool {
        matches!(self, RuntimeError::Unavailable(_))
    }
}

/// bollardのエラーが接続エラーかどうかを判定
pub(crate) fn is_connection_error(err: &bollard::errors::Error) -> bool {
    if let bollard::errors::Error::DockerResponseServerError { .. } = err {
        return false;
    }
    let err_str = err.to_string();
    err_str.contains("Connection refused")
        || err_str.contains("No such file or directory")
        || err_str.contains("error trying to connect")
        || err_str.contains("Socket not found")
}

/// コンテナ操作のエラーを分類
pub(crate) fn classify(
    err: bollard::errors::Error,
    operation: &'static str,
    worker: &str,
) -> RuntimeError {
    match &err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::WorkerNotFound {
            worker: worker.to_string(),
        },
        _ if is_connection_error(&err) => RuntimeError::Unavailable(err.to_string()),
        _ => RuntimeError::OperationFailed {
            operation,
            worker: worker.to_string(),
            reason: err.to_string(),
        },
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
