use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("認証情報ファイルを読み込めません: {path}\n理由: {source}")]
    CredentialsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "認証情報ファイルの形式が不正です: {path}\n理由: {source}\n\nヒント: username と password を持つ YAML または JSON で記述してください"
    )]
    CredentialsParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("無効な設定 '{option}': {message}")]
    Invalid {
        option: &'static str,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
