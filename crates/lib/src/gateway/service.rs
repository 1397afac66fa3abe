//! Model service gateway: typed operations over the request queue and stream decoder.

use crate::config::{self, Config};
use crate::endpoint::{Endpoint, DEFAULT_BASE_URL, DEFAULT_MAX_CONCURRENT, DEFAULT_TIMEOUT};
use crate::error::ServiceError;
use crate::events::Emitter;
use crate::gateway::protocol::{
    ModelDescriptor, ModelStatus, ModelStatusChanged, ResponseChunk, StatusReport,
};
use crate::llm::{GenerateOptions, GenerateRequest, ModelInfo, OllamaClient, PullResponse};
use crate::queue::{RequestQueue, DEFAULT_RETRIES};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Construction parameters for [`ModelGateway`].
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub base_url: String,
    /// Per-request timeout for non-streaming calls.
    pub timeout: Duration,
    /// Timeout for the lightweight status check.
    pub status_timeout: Duration,
    pub max_concurrent: usize,
    pub max_retries: u32,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            status_timeout: DEFAULT_STATUS_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_RETRIES,
        }
    }
}

impl GatewayOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config::resolve_base_url(config),
            timeout: config.ollama.timeout(),
            status_timeout: config.ollama.status_timeout(),
            max_concurrent: config.ollama.max_concurrent,
            max_retries: config.ollama.max_retries,
        }
    }
}

/// Typed façade over the model service. Construct once and share by `Arc`.
pub struct ModelGateway {
    endpoint: Endpoint,
    client: OllamaClient,
    queue: RequestQueue,
    status_timeout: Duration,
    statuses: RwLock<HashMap<String, ModelStatus>>,
    response_chunks: Emitter<ResponseChunk>,
    model_status: Emitter<ModelStatusChanged>,
    connection_status: Emitter<StatusReport>,
}

impl ModelGateway {
    pub fn new(options: GatewayOptions) -> Self {
        let endpoint = Endpoint::new(options.base_url, options.timeout, options.max_concurrent);
        Self {
            client: OllamaClient::new(endpoint.clone()),
            queue: RequestQueue::with_retries(endpoint.max_concurrent(), options.max_retries),
            endpoint,
            status_timeout: options.status_timeout,
            statuses: RwLock::new(HashMap::new()),
            response_chunks: Emitter::new(),
            model_status: Emitter::new(),
            connection_status: Emitter::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(GatewayOptions::from_config(config))
    }

    pub fn base_url(&self) -> String {
        self.endpoint.base_url()
    }

    /// Point the gateway at a new service address (e.g. after a settings change).
    pub fn set_base_url(&self, url: impl Into<String>) {
        self.endpoint.set_base_url(url);
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// Streamed generate chunks, in arrival order per call.
    pub fn response_chunks(&self) -> &Emitter<ResponseChunk> {
        &self.response_chunks
    }

    /// Emitted after every recorded model status, successful or not.
    pub fn model_status_events(&self) -> &Emitter<ModelStatusChanged> {
        &self.model_status
    }

    /// Emitted after every status check.
    pub fn connection_status_events(&self) -> &Emitter<StatusReport> {
        &self.connection_status
    }

    /// Last recorded status for a model.
    pub fn model_status(&self, name: &str) -> Option<ModelStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn model_statuses(&self) -> HashMap<String, ModelStatus> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Lightweight reachability check with a short timeout. Never fails: errors are folded
    /// into a disconnected report.
    pub async fn check_status(&self) -> StatusReport {
        let client = self.client.clone();
        let timeout = self.status_timeout;
        let result = self
            .call(move || {
                let client = client.clone();
                async move { client.tags(Some(timeout)).await }
            })
            .await;
        let report = match result {
            Ok(models) => StatusReport::connected(models.into_iter().map(Into::into).collect()),
            Err(err) => {
                log::warn!("model service status check failed: {}", err);
                StatusReport::disconnected(err.to_string())
            }
        };
        self.connection_status.emit(&report);
        report
    }

    /// List local models. Fails with `InvalidResponseFormat` when the response has no models array.
    pub async fn list_models(&self) -> Result<Vec<ModelDescriptor>, ServiceError> {
        let client = self.client.clone();
        let models = self
            .call(move || {
                let client = client.clone();
                async move { client.tags(None).await }
            })
            .await?;
        Ok(models.into_iter().map(Into::into).collect())
    }

    /// Download a model, then record its status from a fresh health check.
    /// Does not refresh any model list.
    pub async fn pull_model(&self, name: &str) -> Result<PullResponse, ServiceError> {
        let client = self.client.clone();
        let owned = name.to_string();
        log::info!("pulling model {}", name);
        let res = self
            .call(move || {
                let client = client.clone();
                let name = owned.clone();
                async move { client.pull(&name).await }
            })
            .await?;
        self.check_model_health(name).await;
        Ok(res)
    }

    /// Delete a model and record it as unavailable. Does not refresh any model list.
    pub async fn delete_model(&self, name: &str) -> Result<(), ServiceError> {
        let client = self.client.clone();
        let owned = name.to_string();
        log::info!("deleting model {}", name);
        self.call(move || {
            let client = client.clone();
            let name = owned.clone();
            async move { client.delete(&name).await }
        })
        .await?;
        self.record_model_status(
            name,
            ModelStatus {
                available: false,
                error: Some("deleted".to_string()),
                ..ModelStatus::default()
            },
        );
        Ok(())
    }

    pub async fn get_model_info(&self, name: &str) -> Result<ModelInfo, ServiceError> {
        let client = self.client.clone();
        let name = name.to_string();
        self.call(move || {
            let client = client.clone();
            let name = name.clone();
            async move { client.show(&name).await }
        })
        .await
    }

    /// Fetch model info and record the outcome. Always records and emits a
    /// `ModelStatusChanged`, whether the lookup succeeded or not.
    pub async fn check_model_health(&self, name: &str) -> ModelStatus {
        let status = match self.get_model_info(name).await {
            Ok(info) => ModelStatus::available(&info),
            Err(err) => {
                log::warn!("health check for model {} failed: {}", name, err);
                ModelStatus::unavailable(&err)
            }
        };
        self.record_model_status(name, status.clone());
        status
    }

    /// Store a model status (last writer wins) and notify subscribers.
    pub fn record_model_status(&self, name: &str, status: ModelStatus) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), status.clone());
        self.model_status.emit(&ModelStatusChanged {
            name: name.to_string(),
            status,
        });
    }

    /// Run a streaming generate call. Each decoded chunk is emitted as a `ResponseChunk`
    /// in arrival order; returns the full text. A retried call re-emits its chunks.
    pub async fn generate_response(
        &self,
        prompt: &str,
        model: &str,
        options: GenerateOptions,
    ) -> Result<String, ServiceError> {
        let client = self.client.clone();
        let chunks = self.response_chunks.clone();
        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: true,
            options,
        };
        log::info!("generating with model {}", model);
        self.call(move || {
            let client = client.clone();
            let chunks = chunks.clone();
            let request = request.clone();
            async move {
                let model = request.model.clone();
                client
                    .generate(&request, move |event| {
                        chunks.emit(&ResponseChunk {
                            model: model.clone(),
                            chunk: event.chunk,
                            done: event.done,
                        })
                    })
                    .await
            }
        })
        .await
    }

    /// Funnel one network operation through the queue with address fallback.
    async fn call<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
        T: Send + 'static,
    {
        self.queue.enqueue_with_fallback(&self.endpoint, op).await
    }
}
