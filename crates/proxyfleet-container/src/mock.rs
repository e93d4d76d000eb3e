//! テスト用のインメモリランタイム
//!
//! 呼び出しを記録し、ポート単位で失敗を注入できる。

use crate::error::{Result, RuntimeError};
use crate::runtime::{WorkerRuntime, WorkerSpec, WorkerSummary};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockHandle {
    pub port: u16,
    pub name: String,
}

/// 記録された呼び出し
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(WorkerSpec),
    Restart(u16),
    Stop(u16),
    Remove(u16),
}

#[derive(Default)]
struct Failures {
    create: HashSet<u16>,
    restart: HashSet<u16>,
    restart_missing: HashSet<u16>,
    stop: HashSet<u16>,
    remove: HashSet<u16>,
    unavailable: bool,
}

#[derive(Default)]
pub struct MockRuntime {
    calls: Mutex<Vec<Call>>,
    failures: Mutex<Failures>,
    /// エンジン上に存在するワーカー
    workers: Mutex<Vec<WorkerSummary>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create_on(self, port: u16) -> Self {
        self.with_failures(|f| {
            f.create.insert(port);
        })
    }

    pub fn fail_restart_on(self, port: u16) -> Self {
        self.with_failures(|f| {
            f.restart.insert(port);
        })
    }

    /// restart時にコンテナが消えている状態を再現
    pub fn lose_worker_on(self, port: u16) -> Self {
        self.with_failures(|f| {
            f.restart_missing.insert(port);
        })
    }

    pub fn fail_stop_on(self, port: u16) -> Self {
        self.with_failures(|f| {
            f.stop.insert(port);
        })
    }

    pub fn fail_remove_on(self, port: u16) -> Self {
        self.with_failures(|f| {
            f.remove.insert(port);
        })
    }

    /// 前回の実行で残ったワーカーを置いておく
    pub fn with_leftover(self, name: &str, host_port: u16) -> Self {
        self.workers.lock().unwrap().push(WorkerSummary {
            name: name.to_string(),
            host_port: Some(host_port),
        });
        self
    }

    /// すべての呼び出しを接続エラーにする
    pub fn unavailable(self) -> Self {
        self.with_failures(|f| f.unavailable = true)
    }

    /// 注入した失敗をすべて解除
    pub fn heal(&self) {
        *self.failures.lock().unwrap() = Failures::default();
    }

    fn with_failures(self, apply: impl FnOnce(&mut Failures)) -> Self {
        apply(&mut self.failures.lock().unwrap());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn restarts(&self) -> Vec<u16> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                Call::Restart(port) => Some(*port),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) -> bool {
        self.calls.lock().unwrap().push(call);
        self.failures.lock().unwrap().unavailable
    }
}

#[async_trait]
impl WorkerRuntime for MockRuntime {
    type Handle = MockHandle;

    async fn create(&self, spec: &WorkerSpec) -> Result<MockHandle> {
        if self.record(Call::Create(spec.clone())) {
            return Err(RuntimeError::Unavailable("mock engine offline".to_string()));
        }
        if self.failures.lock().unwrap().create.contains(&spec.host_port) {
            return Err(RuntimeError::ProvisionFailed {
                name: spec.name.clone(),
                image: spec.image.clone(),
                port: spec.host_port,
                reason: "port is already allocated".to_string(),
            });
        }
        self.workers.lock().unwrap().push(WorkerSummary {
            name: spec.name.clone(),
            host_port: Some(spec.host_port),
        });
        Ok(MockHandle {
            port: spec.host_port,
            name: spec.name.clone(),
        })
    }

    async fn restart(&self, handle: &MockHandle) -> Result<()> {
        if self.record(Call::Restart(handle.port)) {
            return Err(RuntimeError::Unavailable("mock engine offline".to_string()));
        }
        let failures = self.failures.lock().unwrap();
        if failures.restart_missing.contains(&handle.port) {
            return Err(RuntimeError::WorkerNotFound {
                worker: handle.name.clone(),
            });
        }
        if failures.restart.contains(&handle.port) {
            return Err(operation_failed("restart", handle));
        }
        Ok(())
    }

    async fn stop(&self, handle: &MockHandle) -> Result<()> {
        if self.record(Call::Stop(handle.port)) {
            return Err(RuntimeError::Unavailable("mock engine offline".to_string()));
        }
        if self.failures.lock().unwrap().stop.contains(&handle.port) {
            return Err(operation_failed("stop", handle));
        }
        Ok(())
    }

    async fn remove(&self, handle: &MockHandle) -> Result<()> {
        if self.record(Call::Remove(handle.port)) {
            return Err(RuntimeError::Unavailable("mock engine offline".to_string()));
        }
        if self.failures.lock().unwrap().remove.contains(&handle.port) {
            return Err(operation_failed("remove", handle));
        }
        self.workers.lock().unwrap().retain(|w| w.name != handle.name);
        Ok(())
    }

    // 呼び出し記録には残さない
    async fn list_workers(&self) -> Result<Vec<WorkerSummary>> {
        if self.failures.lock().unwrap().unavailable {
            return Err(RuntimeError::Unavailable("mock engine offline".to_string()));
        }
        Ok(self.workers.lock().unwrap().clone())
    }
}

fn operation_failed(operation: &'static str, handle: &MockHandle) -> RuntimeError {
    RuntimeError::OperationFailed {
        operation,
        worker: handle.name.clone(),
        reason: "injected failure".to_string(),
    }
}
