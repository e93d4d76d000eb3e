#![allow(deprecated)] // TODO: cargo_bin → cargo_bin_cmd! へ移行

use assert_cmd::Command;
use predicates::prelude::*;

fn proxyfleet() -> Command {
    let mut cmd = Command::cargo_bin("proxyfleet").unwrap();
    // 実行環境の設定に左右されないようにする
    cmd.env_remove("REPLICAS")
        .env_remove("START_PORT")
        .env_remove("CREDENTIALS_FILE")
        .env("USERNAME_RABBIT", "test")
        .env("PASSWORD_RABBIT", "test");
    cmd
}

/// CLIヘルプが正しく表示されることを確認
#[test]
fn test_cli_help() {
    proxyfleet()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--replicas"))
        .stdout(predicate::str::contains("--rabbit-host"))
        .stdout(predicate::str::contains("--message-format"))
        .stdout(predicate::str::contains("--proxy-file"));
}

/// パスワードの環境変数の値はヘルプに表示されない
#[test]
fn test_cli_help_hides_password() {
    proxyfleet()
        .env("PASSWORD_RABBIT", "s3cret-value")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("s3cret-value").not());
}

#[test]
fn test_cli_version() {
    proxyfleet()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("proxyfleet"));
}

/// replicas 0 は Docker に接続する前に設定エラーになる
#[test]
fn test_zero_replicas_is_config_error() {
    proxyfleet()
        .args(["--replicas", "0"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("replicas"));
}

/// ポート範囲が 65535 を超える場合は設定エラー
#[test]
fn test_port_range_overflow_is_config_error() {
    proxyfleet()
        .args(["--replicas", "10", "--start-port", "65530"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("65535"));
}

#[test]
fn test_unknown_exchange_kind_is_usage_error() {
    proxyfleet()
        .args(["--exchange-kind", "x-delayed"])
        .assert()
        .code(2);
}

/// 認証情報ファイルが読めない場合は設定エラー
#[test]
fn test_missing_credentials_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.yaml");

    proxyfleet()
        .arg("--credentials-file")
        .arg(&missing)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("missing.yaml"));
}
