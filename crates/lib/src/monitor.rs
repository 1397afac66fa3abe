//! Health monitor: periodic status check plus per-model health checks.
//!
//! Rounds are strictly chained: the loop awaits a full round before waiting for the next
//! tick, so rounds never overlap. A round slower than the interval delays the next tick
//! instead of bunching ticks up.

use crate::gateway::{ModelGateway, StatusReport};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Background poller sharing one gateway with the rest of the client.
pub struct HealthMonitor {
    gateway: Arc<ModelGateway>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self {
            gateway,
            task: Mutex::new(None),
        }
    }

    /// Start polling every `interval`; the first round runs immediately.
    /// Returns false (and does nothing) when already running. Must be called within a tokio runtime.
    pub fn start(&self, interval: Duration) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            log::debug!("health monitor already running");
            return false;
        }
        let interval = interval.max(Duration::from_millis(1));
        log::info!("health monitor: starting, interval {:?}", interval);
        let gateway = Arc::clone(&self.gateway);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                run_round(&gateway).await;
            }
        }));
        true
    }

    /// Cancel the polling task. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            log::info!("health monitor: stopping");
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Run one round now, outside the timer.
    pub async fn check_now(&self) -> StatusReport {
        run_round(&self.gateway).await
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One round: status check, then (when connected) a health check per listed model, in order.
pub async fn run_round(gateway: &ModelGateway) -> StatusReport {
    let report = gateway.check_status().await;
    if report.connected {
        for model in &report.models {
            gateway.check_model_health(&model.name).await;
        }
    } else {
        log::debug!(
            "health monitor: service disconnected: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    report
}
