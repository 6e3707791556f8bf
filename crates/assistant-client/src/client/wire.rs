use serde::{Deserialize, Serialize};
use voice_session_core::{AssistantError, Reply};

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub message: &'a str,
}

/// The backend's reply envelope. Only `data` carries the reply text.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn into_reply(self) -> Result<Reply, AssistantError> {
        if !self.success {
            let reason = self.error.unwrap_or_else(|| "chat failed".to_string());
            return Err(AssistantError::Rejected(reason));
        }
        match self.data {
            Some(text) if !text.trim().is_empty() => Ok(Reply::new(text)),
            _ => Err(AssistantError::EmptyReply),
        }
    }
}
