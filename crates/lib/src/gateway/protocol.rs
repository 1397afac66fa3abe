//! Gateway value types: model descriptors, status records and event payloads.

use crate::error::ServiceError;
use crate::llm::{ModelDetails, ModelInfo, OllamaModel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one available model (immutable snapshot from list/show).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Last-modified timestamp exactly as reported by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ModelDetails>,
}

impl From<OllamaModel> for ModelDescriptor {
    fn from(m: OllamaModel) -> Self {
        Self {
            name: m.name,
            size: m.size.unwrap_or(0),
            digest: m.digest,
            modified: m.modified_at,
            details: m.details,
        }
    }
}

/// Availability of one model, as last recorded by a health check or model call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModelStatus {
    pub fn available(info: &ModelInfo) -> Self {
        Self {
            available: true,
            size: info.size,
            digest: info.digest.clone(),
            modified: info.modified.clone(),
            error: None,
        }
    }

    pub fn unavailable(err: &ServiceError) -> Self {
        Self {
            available: false,
            error: Some(err.to_string()),
            ..Self::default()
        }
    }
}

/// Result of a status check. Failures are reported here rather than raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub connected: bool,
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusReport {
    pub fn connected(models: Vec<ModelDescriptor>) -> Self {
        Self {
            connected: true,
            models,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn disconnected(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            models: Vec::new(),
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// `response-chunk` notification: one streamed increment of a generate call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseChunk {
    pub model: String,
    pub chunk: String,
    pub done: bool,
}

/// `modelStatusChanged` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatusChanged {
    pub name: String,
    pub status: ModelStatus,
}
