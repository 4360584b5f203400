//! Reasoning service backed by an OpenAI-compatible chat completions API
//! (Groq by default). Every request asks for a JSON object answer.

mod client;

pub use client::{ChatCompletionsClient, ClientError};
