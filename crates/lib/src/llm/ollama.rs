//! Ollama API client (http://127.0.0.1:11434 by default).
//!
//! One method per endpoint. The base URL is read from the shared [`Endpoint`] on every call,
//! so an address fallback takes effect for all later requests. No retry or queueing here;
//! the gateway wraps these calls in the request queue.

use crate::endpoint::Endpoint;
use crate::error::ServiceError;
use crate::llm::stream::{decode_stream, StreamEvent};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for the Ollama HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    endpoint: Endpoint,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Streaming generate and pull have no total deadline: connecting and each body read are
    /// bounded by the endpoint timeout, so a long generation that keeps producing output
    /// finishes while a stalled one fails with `Timeout`. Other calls use the endpoint timeout
    /// per request.
    pub fn new(endpoint: Endpoint) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(endpoint.timeout())
            .read_timeout(endpoint.timeout())
            .build()
            .unwrap_or_else(|e| {
                log::warn!("falling back to default http client: {}", e);
                reqwest::Client::new()
            });
        Self { endpoint, client }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// GET /api/tags: list local models. `timeout` overrides the endpoint timeout.
    pub async fn tags(&self, timeout: Option<Duration>) -> Result<Vec<OllamaModel>, ServiceError> {
        let url = self.endpoint.url("/api/tags");
        log::debug!("GET {}", url);
        let res = self
            .client
            .get(&url)
            .timeout(timeout.unwrap_or_else(|| self.endpoint.timeout()))
            .send()
            .await?;
        let data: TagsResponse = read_json(check_status(res).await?).await?;
        data.models.ok_or_else(|| {
            ServiceError::InvalidResponseFormat("tags response has no models array".to_string())
        })
    }

    /// POST /api/show: model metadata.
    pub async fn show(&self, name: &str) -> Result<ModelInfo, ServiceError> {
        let url = self.endpoint.url("/api/show");
        log::debug!("POST {} ({})", url, name);
        let res = self
            .client
            .post(&url)
            .timeout(self.endpoint.timeout())
            .json(&NameRequest { name, stream: None })
            .send()
            .await?;
        read_json(check_status(res).await?).await
    }

    /// POST /api/pull with stream: true. Progress lines keep the read timeout from firing on
    /// long downloads; returns the last status line (`{"status":"success"}` when complete).
    pub async fn pull(&self, name: &str) -> Result<PullResponse, ServiceError> {
        let url = self.endpoint.url("/api/pull");
        log::debug!("POST {} ({})", url, name);
        let res = self
            .client
            .post(&url)
            .json(&NameRequest {
                name,
                stream: Some(true),
            })
            .send()
            .await?;
        let mut stream = check_status(res).await?.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut last = None;
        while let Some(fragment) = stream.next().await {
            buffer.extend_from_slice(&fragment?);
            while let Some(i) = buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=i).collect();
                if let Some(progress) = parse_pull_line(&line)? {
                    last = Some(progress);
                }
            }
        }
        if let Some(progress) = parse_pull_line(&buffer)? {
            last = Some(progress);
        }
        last.ok_or_else(|| {
            ServiceError::InvalidResponseFormat("pull response has no status line".to_string())
        })
    }

    /// DELETE /api/delete: remove a local model.
    pub async fn delete(&self, name: &str) -> Result<(), ServiceError> {
        let url = self.endpoint.url("/api/delete");
        log::debug!("DELETE {} ({})", url, name);
        let res = self
            .client
            .delete(&url)
            .timeout(self.endpoint.timeout())
            .json(&NameRequest { name, stream: None })
            .send()
            .await?;
        check_status(res).await?;
        Ok(())
    }

    /// POST /api/generate with stream: true. Decodes the NDJSON body, calling `on_event` for each
    /// chunk in arrival order; returns the accumulated text.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
        on_event: impl FnMut(StreamEvent) + Send,
    ) -> Result<String, ServiceError> {
        let url = self.endpoint.url("/api/generate");
        log::debug!("POST {} (model {})", url, request.model);
        let res = self.client.post(&url).json(request).send().await?;
        let res = check_status(res).await?;
        decode_stream(res.bytes_stream(), on_event).await
    }
}

/// Map a non-success response to a typed error. A JSON `{"error": ...}` body becomes
/// `RemoteError` (or `ModelNotFound` for 404); anything else becomes `Http`.
async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .map(|b| b.error);
    Err(match (status.as_u16(), message) {
        (404, Some(message)) => ServiceError::ModelNotFound(message),
        (404, None) => ServiceError::ModelNotFound(body),
        (_, Some(message)) if message.contains("not found") => {
            ServiceError::ModelNotFound(message)
        }
        (_, Some(message)) => ServiceError::RemoteError(message),
        (code, None) => ServiceError::Http { status: code, body },
    })
}

/// One pull progress line. Blank or malformed lines yield None; an `error` line fails.
fn parse_pull_line(raw: &[u8]) -> Result<Option<PullResponse>, ServiceError> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<PullResponse>(line) {
        Ok(PullResponse {
            error: Some(message),
            ..
        }) if message.contains("not found") => Err(ServiceError::ModelNotFound(message)),
        Ok(PullResponse {
            error: Some(message),
            ..
        }) => Err(ServiceError::RemoteError(message)),
        Ok(progress) => {
            log::debug!("pull: {}", progress.status);
            Ok(Some(progress))
        }
        Err(e) => {
            log::warn!("skipping malformed pull line: {}", e);
            Ok(None)
        }
    }
}

/// Read the body and parse it; parse failures are schema violations, not transport errors.
async fn read_json<T: serde::de::DeserializeOwned>(
    res: reqwest::Response,
) -> Result<T, ServiceError> {
    let body = res.text().await?;
    serde_json::from_str(&body).map_err(|e| ServiceError::InvalidResponseFormat(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct NameRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Option<Vec<OllamaModel>>,
}

/// Raw `/api/tags` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub details: Option<ModelDetails>,
}

/// Model family and quantization details as reported by Ollama.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization_level: Option<String>,
}

/// `/api/show` response (subset).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default, alias = "modified_at")]
    pub modified: Option<String>,
    #[serde(default)]
    pub details: Option<ModelDetails>,
}

/// Final `/api/pull` status line (e.g. `{"status":"success"}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body for POST /api/generate. Options are flattened beside model and prompt.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    #[serde(flatten)]
    pub options: GenerateOptions,
}

/// Optional generate parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// System prompt override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Model parameters (temperature, num_ctx, ...), sent as `options`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Map<String, serde_json::Value>>,
    /// How long the model stays loaded after the request (e.g. "5m").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<String>,
}

impl GenerateOptions {
    /// Set one model parameter (e.g. `temperature`).
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generate_request_flattens_options() {
        let request = GenerateRequest {
            model: "codellama".to_string(),
            prompt: "hi".to_string(),
            stream: true,
            options: GenerateOptions {
                system: Some("be brief".to_string()),
                ..Default::default()
            }
            .with_parameter("temperature", 0.5),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "model": "codellama",
                "prompt": "hi",
                "stream": true,
                "system": "be brief",
                "options": { "temperature": 0.5 }
            })
        );
    }

    #[test]
    fn model_info_accepts_modified_at() {
        let info: ModelInfo =
            serde_json::from_value(json!({ "size": 7, "digest": "sha256:ab", "modified_at": "t" }))
                .unwrap();
        assert_eq!(info.size, Some(7));
        assert_eq!(info.modified.as_deref(), Some("t"));
    }

    #[test]
    fn pull_lines_report_progress_and_errors() {
        let progress = parse_pull_line(b"{\"status\":\"pulling manifest\"}\n").unwrap();
        assert_eq!(progress.unwrap().status, "pulling manifest");
        assert!(parse_pull_line(b"  \n").unwrap().is_none());
        assert!(parse_pull_line(b"{oops").unwrap().is_none());
        assert_eq!(
            parse_pull_line(b"{\"error\":\"disk full\"}").unwrap_err(),
            ServiceError::RemoteError("disk full".into())
        );
        assert!(matches!(
            parse_pull_line(b"{\"error\":\"model 'x' not found\"}").unwrap_err(),
            ServiceError::ModelNotFound(_)
        ));
    }
}
