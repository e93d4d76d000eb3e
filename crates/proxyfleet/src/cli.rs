use clap::Parser;
use proxyfleet_config::{
    BrokerSettings, Credentials, DEFAULT_CONNECTION_ATTEMPTS, DEFAULT_PROXY_FILE, DEFAULT_QUEUE,
    DEFAULT_RABBIT_HOST, DEFAULT_RABBIT_PORT, DEFAULT_REPLICAS, DEFAULT_RETRY_DELAY_SECS,
    DEFAULT_START_PORT, DEFAULT_VHOST, ExchangeKind, FleetSettings, MessageFormat, RosterSettings,
    Settings,
};
use proxyfleet_container::DEFAULT_CONTAINER_PORT;
use proxyfleet_core::{DEFAULT_IMAGE, DEFAULT_NAME_PREFIX, DEFAULT_SEPARATOR};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "proxyfleet", version)]
#[command(
    about = "Tor プロキシのフリートを起動し、RabbitMQ からの再起動要求に応える",
    long_about = None
)]
pub struct Cli {
    /// RabbitMQ のホスト
    #[arg(long, env = "ADDRESS_RABBIT", default_value = DEFAULT_RABBIT_HOST)]
    pub rabbit_host: String,

    /// RabbitMQ のポート
    #[arg(long, env = "PORT_RABBIT", default_value_t = DEFAULT_RABBIT_PORT)]
    pub rabbit_port: u16,

    /// RabbitMQ のユーザー名
    #[arg(long, env = "USERNAME_RABBIT")]
    pub rabbit_user: Option<String>,

    /// RabbitMQ のパスワード
    #[arg(long, env = "PASSWORD_RABBIT", hide_env_values = true)]
    pub rabbit_pass: Option<String>,

    /// RabbitMQ の仮想ホスト
    #[arg(long, env = "VHOST_RABBIT", default_value = DEFAULT_VHOST)]
    pub rabbit_vhost: String,

    /// 認証情報ファイル (YAML / JSON)。ユーザー名・パスワードより優先
    #[arg(long, env = "CREDENTIALS_FILE")]
    pub credentials_file: Option<PathBuf>,

    /// Exchange 名。空の場合はデフォルト exchange を使う
    #[arg(long, env = "EXCHANGE_NAME", default_value = "")]
    pub exchange_name: String,

    /// Exchange の種類 (fanout, direct, topic, headers)
    #[arg(long, env = "EXCHANGE_KIND", default_value_t = ExchangeKind::Fanout)]
    pub exchange_kind: ExchangeKind,

    /// 再起動要求を受け取るキュー
    #[arg(long, env = "QUEUE_RABBIT", default_value = DEFAULT_QUEUE)]
    pub queue_name: String,

    /// メッセージ形式 (flat, envelope, auto)
    #[arg(long, env = "MESSAGE_FORMAT", default_value_t = MessageFormat::Auto)]
    pub message_format: MessageFormat,

    /// RabbitMQ への接続試行回数
    #[arg(long, env = "CONNECTION_ATTEMPTS", default_value_t = DEFAULT_CONNECTION_ATTEMPTS)]
    pub connection_attempts: u32,

    /// 接続試行の間隔（秒）
    #[arg(long, env = "RETRY_DELAY", default_value_t = DEFAULT_RETRY_DELAY_SECS)]
    pub retry_delay: u64,

    /// 起動するプロキシの数
    #[arg(long, env = "REPLICAS", default_value_t = DEFAULT_REPLICAS)]
    pub replicas: u32,

    /// エンドポイントに使うアドレス（省略時は RabbitMQ のホスト）
    #[arg(long, env = "EXPECTED_ADDRESS")]
    pub expected_address: Option<String>,

    /// 最初のプロキシのホストポート
    #[arg(long, env = "START_PORT", default_value_t = DEFAULT_START_PORT)]
    pub start_port: u16,

    /// エンドポイント一覧の出力先。空の場合は出力しない
    #[arg(long, env = "PROXY_PATH", default_value = DEFAULT_PROXY_FILE)]
    pub proxy_file: String,

    /// エンドポイント一覧の区切り文字
    #[arg(long, env = "PROXY_SEPARATOR", default_value = DEFAULT_SEPARATOR)]
    pub proxy_separator: String,

    /// プロキシのイメージ
    #[arg(long, env = "PROXY_IMAGE", default_value = DEFAULT_IMAGE)]
    pub image: String,

    /// コンテナ内のプロキシポート
    #[arg(long, env = "PROXY_CONTAINER_PORT", default_value_t = DEFAULT_CONTAINER_PORT)]
    pub container_port: u16,

    /// コンテナ名のプレフィックス
    #[arg(long, env = "PROXY_NAME_PREFIX", default_value = DEFAULT_NAME_PREFIX)]
    pub name_prefix: String,

    /// ログレベル (EnvFilter 形式)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// 引数から検証済みの設定を組み立てる
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let credentials = Credentials::resolve(
            self.credentials_file.as_deref(),
            self.rabbit_user.clone(),
            self.rabbit_pass.clone(),
        )?;

        let settings = Settings {
            broker: BrokerSettings {
                host: self.rabbit_host.clone(),
                port: self.rabbit_port,
                vhost: self.rabbit_vhost.clone(),
                credentials,
                exchange: self.exchange_name.clone(),
                exchange_kind: self.exchange_kind,
                queue: self.queue_name.clone(),
                message_format: self.message_format,
                connection_attempts: self.connection_attempts,
                retry_delay: Duration::from_secs(self.retry_delay),
            },
            fleet: FleetSettings {
                replicas: self.replicas,
                start_port: self.start_port,
                expected_address: self
                    .expected_address
                    .clone()
                    .unwrap_or_else(|| self.rabbit_host.clone()),
                image: self.image.clone(),
                container_port: self.container_port,
                name_prefix: self.name_prefix.clone(),
            },
            roster: RosterSettings {
                path: PathBuf::from(&self.proxy_file),
                separator: self.proxy_separator.clone(),
            },
        };

        settings.validate()?;
        Ok(settings)
    }
}
