//! Model service gateway: typed operations (list/pull/delete/show/generate/health) built on
//! the request queue and stream decoder, plus status-change and response-chunk events.
//!
//! Every operation that touches the network goes through the queue; none bypasses it.

mod protocol;
mod service;

pub use protocol::{ModelDescriptor, ModelStatus, ModelStatusChanged, ResponseChunk, StatusReport};
pub use service::{GatewayOptions, ModelGateway};
