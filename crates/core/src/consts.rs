use std::time::Duration;

/// Minimum spacing between two accepted utterances.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);
/// Wait before restarting capture after a network error.
pub const NETWORK_BACKOFF: Duration = Duration::from_millis(2000);
/// Wait before restarting capture after it ended or failed for another reason.
pub const CAPTURE_RESTART_DELAY: Duration = Duration::from_millis(500);
/// Wait before listening again after a reply that is not spoken, or a failed request.
pub const REPLY_RESUME_DELAY: Duration = Duration::from_millis(1000);
/// Wait before listening again once playback has finished.
pub const PLAYBACK_RESUME_DELAY: Duration = Duration::from_millis(1000);

/// Upper bound on a single assistant request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on a backend health probe.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Assistant-authored transcript entry recorded when a request fails.
pub const ASSISTANT_ERROR_TEXT: &str = "Sorry, I encountered an error. Please try again.";

pub const SPEECH_RATE: f32 = 0.9;
pub const SPEECH_PITCH: f32 = 1.0;
pub const SPEECH_VOLUME: f32 = 1.0;
pub const SPEECH_LANGUAGE: &str = "en-US";
pub const PREFERRED_VOICE_PROVIDER: &str = "Google";
