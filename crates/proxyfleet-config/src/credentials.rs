//! Broker credentials and their sources.

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_USERNAME: &str = "guest";
pub const DEFAULT_PASSWORD: &str = "guest";

const CREDENTIALS_FILE: &str = "credentials.yaml";

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(DEFAULT_USERNAME, DEFAULT_PASSWORD)
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// YAML または JSON の認証情報ファイルを読み込む
    ///
    /// ```yaml
    /// username: proxyfleet
    /// password: s3cret
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::CredentialsRead {
            path: path.to_path_buf(),
            source,
        })?;

        serde_yaml::from_str(&content).map_err(|source| ConfigError::CredentialsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 認証情報を決定する
    ///
    /// 優先順位:
    /// 1. `file` (明示的に指定された認証情報ファイル)
    /// 2. `username` / `password` (片方のみの場合、もう片方はデフォルト値)
    /// 3. ~/.config/proxyfleet/credentials.yaml
    /// 4. guest / guest
    pub fn resolve(
        file: Option<&Path>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        if let Some(path) = file {
            debug!(path = %path.display(), "Loading broker credentials from file");
            return Self::from_file(path);
        }

        if username.is_some() || password.is_some() {
            return Ok(Self {
                username: username.unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
                password: password.unwrap_or_else(|| DEFAULT_PASSWORD.to_string()),
            });
        }

        if let Some(path) = find_credentials_file() {
            debug!(path = %path.display(), "Loading broker credentials from config dir");
            return Self::from_file(&path);
        }

        Ok(Self::default())
    }
}

/// proxyfleet の設定ディレクトリ (~/.config/proxyfleet)
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("proxyfleet"))
}

/// 設定ディレクトリ内の認証情報ファイルを探す
pub fn find_credentials_file() -> Option<PathBuf> {
    get_config_dir()
        .map(|dir| dir.join(CREDENTIALS_FILE))
        .filter(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_debug_redacts_password() {
        let credentials = Credentials::new("proxyfleet", "s3cret");
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("proxyfleet"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rabbit.yaml");
        fs::write(&path, "username: proxyfleet\npassword: s3cret\n").unwrap();

        let credentials = Credentials::from_file(&path).unwrap();
        assert_eq!(credentials, Credentials::new("proxyfleet", "s3cret"));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rabbit.json");
        fs::write(&path, r#"{"username": "svc", "password": "pw"}"#).unwrap();

        let credentials = Credentials::from_file(&path).unwrap();
        assert_eq!(credentials, Credentials::new("svc", "pw"));
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            Credentials::from_file(&missing),
            Err(ConfigError::CredentialsRead { .. })
        ));

        let broken = dir.path().join("broken.yaml");
        fs::write(&broken, "username: only\n").unwrap();
        let err = Credentials::from_file(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::CredentialsParse { .. }));
        assert!(err.to_string().contains("broken.yaml"));
    }

    #[test]
    fn test_resolve_file_wins_over_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rabbit.yaml");
        fs::write(&path, "username: from-file\npassword: pw\n").unwrap();

        let credentials =
            Credentials::resolve(Some(&path), Some("flag".to_string()), None).unwrap();
        assert_eq!(credentials.username, "from-file");
    }

    #[test]
    fn test_resolve_partial_flags() {
        let credentials = Credentials::resolve(None, Some("svc".to_string()), None).unwrap();
        assert_eq!(credentials, Credentials::new("svc", DEFAULT_PASSWORD));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_resolve_config_dir_file() {
        let config_home = tempfile::tempdir().unwrap();
        let dir = config_home.path().join("proxyfleet");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CREDENTIALS_FILE), "username: home\npassword: pw\n").unwrap();

        temp_env::with_var("XDG_CONFIG_HOME", Some(config_home.path()), || {
            let credentials = Credentials::resolve(None, None, None).unwrap();
            assert_eq!(credentials, Credentials::new("home", "pw"));
        });
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_resolve_defaults_to_guest() {
        let config_home = tempfile::tempdir().unwrap();

        temp_env::with_var("XDG_CONFIG_HOME", Some(config_home.path()), || {
            let credentials = Credentials::resolve(None, None, None).unwrap();
            assert_eq!(credentials, Credentials::default());
        });
    }
}
