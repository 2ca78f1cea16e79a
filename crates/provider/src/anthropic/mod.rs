//! Anthropic Messages and Message Batches API client

pub mod client;
pub mod types;

pub use client::{AnthropicClient, AnthropicConfig};
