use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("RabbitMQ に接続できません: {url} ({attempts} 回試行)\n理由: {source}")]
    ConnectionFailed {
        url: String,
        attempts: u32,
        #[source]
        source: lapin::Error,
    },

    #[error("シャットダウン要求により接続を中断しました")]
    Interrupted,

    #[error("{operation} に失敗しました: {name}\n理由: {source}")]
    Setup {
        operation: &'static str,
        name: String,
        #[source]
        source: lapin::Error,
    },

    #[error("メッセージの受信に失敗しました: {0}")]
    Consume(#[source] lapin::Error),

    #[error("コンシューマーが閉じられました: {queue}")]
    ConsumerClosed { queue: String },

    #[error("メッセージの確認応答に失敗しました: {0}")]
    Ack(#[source] lapin::Error),

    #[error("接続のクローズに失敗しました: {0}")]
    Close(#[source] lapin::Error),
}

impl ControlPlaneError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ControlPlaneError::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, ControlPlaneError>;
