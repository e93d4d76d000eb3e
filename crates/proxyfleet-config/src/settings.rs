//! Validated runtime settings.

use crate::credentials::Credentials;
use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RABBIT_HOST: &str = "localhost";
pub const DEFAULT_RABBIT_PORT: u16 = 5672;
pub const DEFAULT_VHOST: &str = "/";
pub const DEFAULT_QUEUE: &str = "tor-proxy";
pub const DEFAULT_CONNECTION_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_REPLICAS: u32 = 15;
pub const DEFAULT_START_PORT: u16 = 8000;
pub const DEFAULT_PROXY_FILE: &str = "proxy.txt";

/// 受信メッセージの形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// `{"action": ..., "endpoint": ...}`
    Flat,
    /// `{"message": {"action": ..., "endpoint": ...}}`
    Envelope,
    /// どちらの形式も受け付ける
    #[default]
    Auto,
}

impl MessageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Flat => "flat",
            MessageFormat::Envelope => "envelope",
            MessageFormat::Auto => "auto",
        }
    }
}

impl FromStr for MessageFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(MessageFormat::Flat),
            "envelope" => Ok(MessageFormat::Envelope),
            "auto" => Ok(MessageFormat::Auto),
            other => Err(format!(
                "unknown message format '{}' (expected flat, envelope or auto)",
                other
            )),
        }
    }
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exchange の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Fanout,
    Direct,
    Topic,
    Headers,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fanout" => Ok(ExchangeKind::Fanout),
            "direct" => Ok(ExchangeKind::Direct),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(format!(
                "unknown exchange kind '{}' (expected fanout, direct, topic or headers)",
                other
            )),
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RabbitMQ への接続とキューの設定
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub vhost: String,
    pub credentials: Credentials,
    /// 空の場合はデフォルト exchange を使い、宣言・バインドを行わない
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    pub queue: String,
    pub message_format: MessageFormat,
    pub connection_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_RABBIT_HOST.to_string(),
            port: DEFAULT_RABBIT_PORT,
            vhost: DEFAULT_VHOST.to_string(),
            credentials: Credentials::default(),
            exchange: String::new(),
            exchange_kind: ExchangeKind::default(),
            queue: DEFAULT_QUEUE.to_string(),
            message_format: MessageFormat::default(),
            connection_attempts: DEFAULT_CONNECTION_ATTEMPTS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
        }
    }
}

impl BrokerSettings {
    /// ログ表示用のURL（認証情報は含まない）
    pub fn display_url(&self) -> String {
        format!("amqp://{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(invalid("rabbit-host", "ホスト名が空です"));
        }
        if self.port == 0 {
            return Err(invalid("rabbit-port", "ポート番号は 1 以上である必要があります"));
        }
        if self.queue.trim().is_empty() {
            return Err(invalid("queue-name", "キュー名が空です"));
        }
        if self.connection_attempts == 0 {
            return Err(invalid(
                "connection-attempts",
                "接続試行回数は 1 以上である必要があります",
            ));
        }
        Ok(())
    }
}

/// プロキシワーカーの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSettings {
    pub replicas: u32,
    pub start_port: u16,
    pub expected_address: String,
    pub image: String,
    pub container_port: u16,
    pub name_prefix: String,
}

impl FleetSettings {
    pub fn validate(&self) -> Result<()> {
        if self.expected_address.trim().is_empty() {
            return Err(invalid("expected-address", "公開アドレスが空です"));
        }
        if self.image.trim().is_empty() {
            return Err(invalid("image", "イメージ名が空です"));
        }
        if self.container_port == 0 {
            return Err(invalid(
                "container-port",
                "ポート番号は 1 以上である必要があります",
            ));
        }
        if self.name_prefix.trim().is_empty() {
            return Err(invalid("name-prefix", "コンテナ名のプレフィックスが空です"));
        }
        Ok(())
    }
}

/// プロキシファイルの出力設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterSettings {
    /// 空のパスは出力しない
    pub path: PathBuf,
    pub separator: String,
}

impl RosterSettings {
    pub fn is_enabled(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_enabled() && self.separator.is_empty() {
            return Err(invalid("proxy-separator", "区切り文字が空です"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub fleet: FleetSettings,
    pub roster: RosterSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;
        self.fleet.validate()?;
        self.roster.validate()
    }
}

fn invalid(option: &'static str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        option,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            broker: BrokerSettings::default(),
            fleet: FleetSettings {
                replicas: 3,
                start_port: 8000,
                expected_address: "10.0.0.5".to_string(),
                image: "dockage/tor-privoxy:latest".to_string(),
                container_port: 8118,
                name_prefix: "tor-proxy".to_string(),
            },
            roster: RosterSettings {
                path: PathBuf::from(DEFAULT_PROXY_FILE),
                separator: ",".to_string(),
            },
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(settings().validate().is_ok());
    }

    #[test]
    fn test_message_format_parse() {
        assert_eq!("flat".parse::<MessageFormat>(), Ok(MessageFormat::Flat));
        assert_eq!("Envelope".parse::<MessageFormat>(), Ok(MessageFormat::Envelope));
        assert_eq!("auto".parse::<MessageFormat>(), Ok(MessageFormat::Auto));
        assert!("xml".parse::<MessageFormat>().is_err());
        assert_eq!(MessageFormat::default(), MessageFormat::Auto);
    }

    #[test]
    fn test_exchange_kind_parse() {
        assert_eq!("fanout".parse::<ExchangeKind>(), Ok(ExchangeKind::Fanout));
        assert_eq!("TOPIC".parse::<ExchangeKind>(), Ok(ExchangeKind::Topic));
        assert!("x-delayed".parse::<ExchangeKind>().is_err());
        assert_eq!(ExchangeKind::Headers.to_string(), "headers");
    }

    #[test]
    fn test_invalid_queue_name() {
        let mut settings = settings();
        settings.broker.queue = " ".to_string();

        let err = settings.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                option: "queue-name",
                ..
            }
        ));
    }

    #[test]
    fn test_empty_expected_address() {
        let mut settings = settings();
        settings.fleet.expected_address = String::new();

        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("expected-address"));
    }

    #[test]
    fn test_zero_connection_attempts() {
        let mut settings = settings();
        settings.broker.connection_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_roster_disabled_ignores_separator() {
        let mut settings = settings();
        settings.roster.path = PathBuf::new();
        settings.roster.separator = String::new();

        assert!(!settings.roster.is_enabled());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_display_url_hides_credentials() {
        let mut broker = BrokerSettings::default();
        broker.credentials = Credentials::new("svc", "s3cret");
        assert_eq!(broker.display_url(), "amqp://localhost:5672");
    }
}
