mod client;

pub use client::{DEFAULT_BASE_URL, HttpAssistant};
pub use client::config::{ClientConfig, ClientConfigBuilder};
pub use voice_session_core as core;
