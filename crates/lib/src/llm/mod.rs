//! Ollama HTTP client and NDJSON stream decoding.
//!
//! Raw endpoint calls only; queueing, retry and events live in the gateway.

mod ollama;
pub mod stream;

pub use ollama::{
    GenerateOptions, GenerateRequest, ModelDetails, ModelInfo, OllamaClient, OllamaModel,
    PullResponse,
};
pub use stream::{decode_stream, StreamDecoder, StreamEvent};
