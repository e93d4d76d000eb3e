use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// プロキシコンテナの公開ポート（tor-privoxy の HTTP プロキシ）
pub const DEFAULT_CONTAINER_PORT: u16 = 8118;

/// 起動するワーカーの定義
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub image: String,
    /// ホスト側に公開するポート
    pub host_port: u16,
    /// コンテナ内でプロキシが待ち受けるポート
    pub container_port: u16,
    pub name: String,
}

/// コンテナエンジン上に存在するワーカー（ラベルから復元）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub name: String,
    pub host_port: Option<u16>,
}

/// ワーカーランタイムのトレイト
///
/// `create` は失敗時に部分的なハンドルを返さない。
/// `stop` / `remove` は「既に停止・削除済み」を成功として扱う。
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// 起動中ワーカーへの所有権付き参照
    type Handle: Send + Sync + fmt::Debug;

    async fn create(&self, spec: &WorkerSpec) -> Result<Self::Handle>;
    async fn restart(&self, handle: &Self::Handle) -> Result<()>;
    async fn stop(&self, handle: &Self::Handle) -> Result<()>;
    async fn remove(&self, handle: &Self::Handle) -> Result<()>;

    /// このツールが作成したワーカーを停止中のものも含めて列挙する
    async fn list_workers(&self) -> Result<Vec<WorkerSummary>>;
}
