//! Failure taxonomy of a voice session.
//!
//! None of these cross the controller boundary as `Err`: the controller turns
//! each into a state transition and, where the host should know, a
//! `Notification::Error`.

/// Why a capture attempt ended without an utterance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("speech capture lost its network connection")]
    Network,
    #[error("speech capture failed to start: {0}")]
    StartFailed(String),
    #[error("speech capture error: {0}")]
    Other(String),
}

impl CaptureError {
    /// Recoverable errors are retried after the longer network backoff.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::Network | CaptureError::StartFailed(_))
    }
}

/// Why the assistant did not produce a usable reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssistantError {
    #[error("assistant unavailable: {0}")]
    Unavailable(String),
    #[error("assistant request timed out")]
    Timeout,
    #[error("assistant rejected the request: {0}")]
    Rejected(String),
    #[error("assistant returned an empty reply")]
    EmptyReply,
    #[error("assistant returned an unreadable response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("speech capture is not supported in this environment")]
    CaptureUnsupported,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("speech playback is not supported, replies will not be spoken")]
    PlaybackUnsupported,
    #[error("speech playback failed: {0}")]
    Playback(String),
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    #[error("empty or duplicate input discarded")]
    EmptyOrDuplicateInput,
}

impl SessionError {
    /// Only a missing capture capability stops voice mode from being offered.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::CaptureUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_and_start_failures_back_off() {
        assert!(CaptureError::Network.is_recoverable());
        assert!(CaptureError::StartFailed("busy".into()).is_recoverable());
        assert!(!CaptureError::Other("no-speech".into()).is_recoverable());
    }

    #[test]
    fn test_capture_unsupported_is_the_only_fatal_error() {
        assert!(SessionError::CaptureUnsupported.is_fatal());
        assert!(!SessionError::PlaybackUnsupported.is_fatal());
        assert!(!SessionError::from(AssistantError::Timeout).is_fatal());
    }
}
