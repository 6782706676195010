//! UseCase: 接続の死活監視
//!
//! 2 つの独立したタイマーでレジストリを監視します。
//!
//! - プローブ周期: 前回のプローブに応答しなかった接続を強制終了し、
//!   それ以外には新しいプローブ（WebSocket ping）を送る
//! - スイープ周期: 一定時間アクティビティのない接続を取り除く
//!
//! シャットダウン時はタイマーを止め、全接続を正常終了コードで閉じ、
//! 猶予期間を待ってから残りを強制終了します。

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle};

use crate::infrastructure::{ConnectionRegistry, ProbeReport, transport::NORMAL_CLOSURE};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Timer settings for [`LivenessMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    pub probe_interval: Duration,
    pub sweep_interval: Duration,
    pub inactivity_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5 * 60),
            inactivity_timeout: Duration::from_secs(5 * 60),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    config: LivenessConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, config: LivenessConfig) -> Arc<Self> {
        Arc::new(Self {
            registry,
            config,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the probe and sweep timers. Calling it twice is a no-op.
    ///
    /// A timer with a zero interval is not started.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        let monitor = Arc::clone(self);
        if let Some(task) = spawn_timer("probe", self.config.probe_interval, move || {
            let monitor = monitor.clone();
            async move {
                monitor.run_probe_cycle().await;
            }
        }) {
            tasks.push(task);
        }

        let monitor = Arc::clone(self);
        if let Some(task) = spawn_timer("sweep", self.config.sweep_interval, move || {
            let monitor = monitor.clone();
            async move {
                monitor.run_sweep_cycle().await;
            }
        }) {
            tasks.push(task);
        }

        tracing::info!(
            "Liveness monitor started (probe every {:?}, sweep every {:?}, timeout {:?})",
            self.config.probe_interval,
            self.config.sweep_interval,
            self.config.inactivity_timeout
        );
    }

    /// One probe pass over every open connection.
    pub async fn run_probe_cycle(&self) -> ProbeReport {
        let report = self.registry.probe_all().await;
        for id in &report.evicted {
            tracing::warn!("Connection {} missed its liveness probe, terminating", id);
        }
        tracing::debug!(
            probed = report.probed,
            evicted = report.evicted.len(),
            "liveness probe cycle"
        );
        report
    }

    /// One inactivity sweep.
    pub async fn run_sweep_cycle(&self) -> usize {
        let removed = self
            .registry
            .sweep_stale(self.config.inactivity_timeout)
            .await;
        if removed > 0 {
            tracing::info!("Removed {} inactive connection(s)", removed);
        }
        removed
    }

    /// Stop the timers and close every connection.
    ///
    /// Returns the number of connections that had to be force-terminated
    /// because they did not finish closing within the grace period.
    pub async fn shutdown(&self, reason: &str) -> usize {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        let closing = self.registry.close_all(NORMAL_CLOSURE, reason).await;
        tracing::info!("Closing {} connection(s): {}", closing, reason);

        let registry = &self.registry;
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while registry.count().await > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        let forced = self.registry.terminate_all().await;
        if !drained {
            tracing::warn!(
                "{} connection(s) still open after {:?}, terminated",
                forced,
                self.config.shutdown_grace
            );
        }
        forced
    }

    pub async fn is_running(&self) -> bool {
        self.tasks
            .lock()
            .await
            .iter()
            .any(|task| !task.is_finished())
    }
}

/// Run `cycle` every `period`, skipping the immediate first tick.
fn spawn_timer<F, Fut>(name: &str, period: Duration, cycle: F) -> Option<JoinHandle<()>>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    if period.is_zero() {
        tracing::error!("Liveness {} interval is zero, timer not started", name);
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cycle().await;
        }
    }))
}
