//! OS signal handling
//!
//! Unix では SIGINT / SIGTERM / SIGQUIT を待ち受け、
//! それ以外のプラットフォームでは Ctrl-C のみを待ち受ける。

use std::io;

/// インストール済みの終了シグナルハンドラ
///
/// ハンドラは `install` の時点で登録されるため、その後に届いたシグナルは
/// `recv` を呼ぶ前でも取りこぼさない。
pub struct ShutdownSignals {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigquit: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    /// 次のシグナルを待ち、その名前を返す
    #[cfg(unix)]
    pub async fn recv(&mut self) -> io::Result<&'static str> {
        let name = tokio::select! {
            _ = self.sigint.recv() => "SIGINT",
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigquit.recv() => "SIGQUIT",
        };
        Ok(name)
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> io::Result<&'static str> {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl-C")
    }
}
