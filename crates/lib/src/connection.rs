//! Client-side connection and model-selection state.
//!
//! `disconnected → connecting → connected | error`. A connection-class failure increments
//! `retry_count` and schedules the same action again after `retry_delay * retry_count`;
//! once `retry_count` reaches `max_retries` the state stays `error` until the caller
//! invokes [`ConnectionManager::retry`]. Reaching `connected` clears the error and resets
//! the count.

use crate::config::ConnectionConfig;
use crate::error::ServiceError;
use crate::events::Emitter;
use crate::gateway::{ModelDescriptor, ModelGateway, ModelStatus};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Everything the UI needs to render connection and model state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub current_model: Option<String>,
    /// Models from the last successful status check.
    pub models: Vec<ModelDescriptor>,
    /// Delay before the pending automatic retry, if one is scheduled.
    pub next_retry_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&ConnectionConfig> for ConnectionOptions {
    fn from(c: &ConnectionConfig) -> Self {
        Self {
            max_retries: c.max_retries,
            retry_delay: Duration::from_millis(c.retry_delay_ms),
        }
    }
}

/// What an automatic or manual retry re-runs.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    CheckConnection,
    SelectModel(String),
}

struct Inner {
    snapshot: ConnectionSnapshot,
    /// Bumped by every caller-initiated action; scheduled retries from older generations are dropped.
    generation: u64,
    last_action: Action,
}

pub struct ConnectionManager {
    gateway: Arc<ModelGateway>,
    options: ConnectionOptions,
    inner: Mutex<Inner>,
    state_changes: Emitter<ConnectionSnapshot>,
}

impl ConnectionManager {
    pub fn new(gateway: Arc<ModelGateway>, options: ConnectionOptions) -> Arc<Self> {
        let snapshot = ConnectionSnapshot {
            max_retries: options.max_retries,
            ..ConnectionSnapshot::default()
        };
        Arc::new(Self {
            gateway,
            options,
            inner: Mutex::new(Inner {
                snapshot,
                generation: 0,
                last_action: Action::CheckConnection,
            }),
            state_changes: Emitter::new(),
        })
    }

    pub fn gateway(&self) -> &Arc<ModelGateway> {
        &self.gateway
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.lock().snapshot.clone()
    }

    /// Emitted on every state transition.
    pub fn state_changes(&self) -> &Emitter<ConnectionSnapshot> {
        &self.state_changes
    }

    /// Check service reachability. Returns the resulting snapshot; failures are recorded, not raised.
    pub async fn check_connection(self: &Arc<Self>) -> ConnectionSnapshot {
        let generation = self.begin(Action::CheckConnection, false);
        let _ = self.attempt(Action::CheckConnection, generation).await;
        self.snapshot()
    }

    /// Select a model after confirming it is ready.
    pub async fn set_current_model(self: &Arc<Self>, name: &str) -> Result<(), ServiceError> {
        let action = Action::SelectModel(name.to_string());
        let generation = self.begin(action.clone(), false);
        self.attempt(action, generation).await
    }

    /// Manual retry of the last action, e.g. after automatic retries ran out.
    /// Starts a fresh retry cycle (count reset to 0).
    pub async fn retry(self: &Arc<Self>) -> ConnectionSnapshot {
        let action = self.lock().last_action.clone();
        let generation = self.begin(action.clone(), true);
        let _ = self.attempt(action, generation).await;
        self.snapshot()
    }

    /// Check the connection, store the model list, and auto-select the first model when none
    /// is selected yet.
    pub async fn refresh_models(self: &Arc<Self>) -> Result<Vec<ModelDescriptor>, ServiceError> {
        let snapshot = self.check_connection().await;
        if snapshot.state != ConnectionState::Connected {
            return Err(ServiceError::ConnectionRefused(
                snapshot
                    .error
                    .unwrap_or_else(|| "model service not reachable".to_string()),
            ));
        }
        if snapshot.current_model.is_none() {
            if let Some(first) = snapshot.models.first() {
                log::info!("auto-selecting model {}", first.name);
                self.set_current_model(&first.name).await?;
            }
        }
        Ok(snapshot.models)
    }

    /// Pull a model, then refresh the model list.
    pub async fn pull_model(self: &Arc<Self>, name: &str) -> Result<(), ServiceError> {
        self.gateway.pull_model(name).await?;
        self.refresh_models().await?;
        Ok(())
    }

    /// Delete a model, clear it if it was selected, then refresh the model list.
    pub async fn delete_model(self: &Arc<Self>, name: &str) -> Result<(), ServiceError> {
        self.gateway.delete_model(name).await?;
        let cleared = {
            let mut inner = self.lock();
            if inner.snapshot.current_model.as_deref() == Some(name) {
                inner.snapshot.current_model = None;
                Some(inner.snapshot.clone())
            } else {
                None
            }
        };
        if let Some(snapshot) = cleared {
            self.state_changes.emit(&snapshot);
        }
        self.refresh_models().await?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a caller-initiated action: supersede pending retries and remember the action.
    fn begin(&self, action: Action, reset_retries: bool) -> u64 {
        let mut inner = self.lock();
        inner.generation += 1;
        inner.last_action = action;
        inner.snapshot.next_retry_ms = None;
        if reset_retries {
            inner.snapshot.retry_count = 0;
        }
        inner.generation
    }

    async fn attempt(self: &Arc<Self>, action: Action, generation: u64) -> Result<(), ServiceError> {
        if !self.update(generation, |s| {
            s.state = ConnectionState::Connecting;
            s.next_retry_ms = None;
        }) {
            return Ok(());
        }
        match action {
            Action::CheckConnection => {
                let report = self.gateway.check_status().await;
                if report.connected {
                    self.update(generation, |s| {
                        s.models = report.models;
                        mark_connected(s);
                    });
                    Ok(())
                } else {
                    let err = ServiceError::ConnectionRefused(
                        report
                            .error
                            .unwrap_or_else(|| "model service not reachable".to_string()),
                    );
                    self.fail(Action::CheckConnection, generation, &err, true);
                    Err(err)
                }
            }
            Action::SelectModel(name) => {
                let known = {
                    let inner = self.lock();
                    let models = &inner.snapshot.models;
                    models.is_empty() || models.iter().any(|m| m.name == name)
                };
                if !known {
                    let err = ServiceError::ModelNotFound(name.clone());
                    self.fail(Action::SelectModel(name), generation, &err, false);
                    return Err(err);
                }
                match self.gateway.get_model_info(&name).await {
                    Ok(info) => {
                        self.gateway
                            .record_model_status(&name, ModelStatus::available(&info));
                        self.update(generation, |s| {
                            s.current_model = Some(name.clone());
                            mark_connected(s);
                        });
                        log::info!("current model set to {}", name);
                        Ok(())
                    }
                    Err(err) => {
                        self.gateway
                            .record_model_status(&name, ModelStatus::unavailable(&err));
                        let connection_class = err.is_connection_class();
                        self.fail(Action::SelectModel(name), generation, &err, connection_class);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Enter `error`; for connection-class failures bump the count and schedule a retry
    /// while the budget lasts.
    fn fail(self: &Arc<Self>, action: Action, generation: u64, err: &ServiceError, connection_class: bool) {
        let max_retries = self.options.max_retries;
        let mut delay = None;
        let applied = self.update(generation, |s| {
            s.state = ConnectionState::Error;
            s.next_retry_ms = None;
            if !connection_class {
                s.error = Some(err.to_string());
                return;
            }
            if s.retry_count >= max_retries {
                s.error = Some(format!("max retries ({}) reached: {}", max_retries, err));
                return;
            }
            s.error = Some(err.to_string());
            s.retry_count += 1;
            if s.retry_count < max_retries {
                let d = self.options.retry_delay.saturating_mul(s.retry_count);
                s.next_retry_ms = Some(u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
                delay = Some(d);
            } else {
                s.error = Some(format!("max retries ({}) reached: {}", max_retries, err));
            }
        });
        if !applied {
            return;
        }
        log::warn!("connection error: {}", err);
        if let Some(delay) = delay {
            self.schedule_retry(action, generation, delay);
        }
    }

    fn schedule_retry(self: &Arc<Self>, action: Action, generation: u64, delay: Duration) {
        log::info!("retrying connection in {:?}", delay);
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = weak.upgrade() else {
                return;
            };
            if this.lock().generation != generation {
                log::debug!("dropping superseded connection retry");
                return;
            }
            let _ = this.attempt(action, generation).await;
        });
    }

    /// Apply `f` to the snapshot unless `generation` has been superseded; emit on change.
    fn update(&self, generation: u64, f: impl FnOnce(&mut ConnectionSnapshot)) -> bool {
        let snapshot = {
            let mut inner = self.lock();
            if inner.generation != generation {
                return false;
            }
            f(&mut inner.snapshot);
            inner.snapshot.clone()
        };
        self.state_changes.emit(&snapshot);
        true
    }
}

fn mark_connected(s: &mut ConnectionSnapshot) {
    s.state = ConnectionState::Connected;
    s.error = None;
    s.retry_count = 0;
    s.next_retry_ms = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayOptions;

    fn manager(max_retries: u32) -> Arc<ConnectionManager> {
        let gateway = Arc::new(ModelGateway::new(GatewayOptions::default()));
        ConnectionManager::new(
            gateway,
            ConnectionOptions {
                max_retries,
                retry_delay: Duration::from_millis(10),
            },
        )
    }

    #[test]
    fn starts_disconnected() {
        let m = manager(3);
        let s = m.snapshot();
        assert_eq!(s.state, ConnectionState::Disconnected);
        assert_eq!(s.retry_count, 0);
        assert_eq!(s.max_retries, 3);
        assert!(s.current_model.is_none());
    }

    #[test]
    fn stale_generation_updates_are_ignored() {
        let m = manager(3);
        let g1 = m.begin(Action::CheckConnection, false);
        let g2 = m.begin(Action::CheckConnection, false);
        assert!(!m.update(g1, |s| s.state = ConnectionState::Connected));
        assert!(m.update(g2, |s| s.state = ConnectionState::Connecting));
        assert_eq!(m.snapshot().state, ConnectionState::Connecting);
    }

    #[test]
    fn connected_resets_error_and_count() {
        let mut s = ConnectionSnapshot {
            state: ConnectionState::Error,
            error: Some("boom".into()),
            retry_count: 2,
            next_retry_ms: Some(2000),
            ..Default::default()
        };
        mark_connected(&mut s);
        assert_eq!(s.state, ConnectionState::Connected);
        assert!(s.error.is_none());
        assert_eq!(s.retry_count, 0);
        assert!(s.next_retry_ms.is_none());
    }

    #[tokio::test]
    async fn non_connection_failures_do_not_count() {
        let m = manager(3);
        let g = m.begin(Action::SelectModel("x".into()), false);
        m.fail(
            Action::SelectModel("x".into()),
            g,
            &ServiceError::ModelNotFound("x".into()),
            false,
        );
        let s = m.snapshot();
        assert_eq!(s.state, ConnectionState::Error);
        assert_eq!(s.retry_count, 0);
        assert!(s.next_retry_ms.is_none());
    }

    #[tokio::test]
    async fn exhausted_budget_keeps_max_retries_message() {
        let m = manager(1);
        let refused = ServiceError::ConnectionRefused("refused".into());
        let g = m.begin(Action::CheckConnection, false);
        m.fail(Action::CheckConnection, g, &refused, true);
        assert!(m.snapshot().error.unwrap().starts_with("max retries (1) reached"));

        let g = m.begin(Action::CheckConnection, false);
        m.fail(Action::CheckConnection, g, &refused, true);
        let s = m.snapshot();
        assert_eq!(s.retry_count, 1);
        assert!(s.error.unwrap().starts_with("max retries (1) reached"));
    }

    #[tokio::test]
    async fn huge_retry_delay_saturates() {
        let gateway = Arc::new(ModelGateway::new(GatewayOptions::default()));
        let m = ConnectionManager::new(
            gateway,
            ConnectionOptions {
                max_retries: 5,
                retry_delay: Duration::MAX,
            },
        );
        let g = m.begin(Action::CheckConnection, false);
        m.fail(
            Action::CheckConnection,
            g,
            &ServiceError::ConnectionRefused("refused".into()),
            true,
        );
        let s = m.snapshot();
        assert_eq!(s.retry_count, 1);
        assert_eq!(s.next_retry_ms, Some(u64::MAX));
        // Supersede the scheduled retry so the sleeping task is dropped.
        m.begin(Action::CheckConnection, false);
    }

    #[test]
    fn snapshot_serializes_lowercase_state() {
        let v = serde_json::to_value(ConnectionSnapshot::default()).unwrap();
        assert_eq!(v["state"], "disconnected");
        assert_eq!(v["retryCount"], 0);
    }
}
