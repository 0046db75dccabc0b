//! Minimal client for the DeepSeek chat-completions API: one prompt in, one
//! reply out, every failure mapped to a typed [`Error`].

pub mod client;
pub mod config;
pub mod error;
pub mod models;

pub use client::{ChatApi, DeepSeekClient};
pub use config::{ClientBuilder, ClientConfig};
pub use error::{Error, Result};
pub use models::{
    ApiErrorDetail, ApiErrorEnvelope, ChatMessage, ChatRequest, ChatResponse, Choice, DecodeError,
    Payload, Usage,
};
