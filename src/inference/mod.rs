//! Inference client — OpenAI-compatible API client for the model provider.
//!
//! This module handles all communication with the model endpoint:
//! - Streaming chat completions over SSE
//! - Tool call fragment assembly across deltas
//! - Endpoint configuration loading from `lumo-ops.yaml`
//!
//! The client speaks the OpenAI Chat Completions API, making the model
//! interchangeable via config.

pub mod client;
pub mod config;
pub mod errors;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::{ModelClient, ModelStream, OpenAiClient};
pub use config::{AppConfig, DatabaseConfig, ModelConfig};
pub use errors::InferenceError;
pub use types::{ChatMessage, Role, StreamChunk, ToolCallRequest, ToolDefinition};
