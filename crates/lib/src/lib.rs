//! Parley core library. The model-service gateway behind the Parley chat client:
//! request queue, NDJSON stream decoder, Ollama gateway, health monitor and
//! connection state machine.

pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod gateway;
pub mod llm;
pub mod monitor;
pub mod queue;
pub mod session;

pub use error::ServiceError;
