use crate::consts::{
    PREFERRED_VOICE_PROVIDER, SPEECH_LANGUAGE, SPEECH_PITCH, SPEECH_RATE, SPEECH_VOLUME,
};

/// Fixed rendering parameters for spoken replies.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSettings {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    pub language: String,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            rate: SPEECH_RATE,
            pitch: SPEECH_PITCH,
            volume: SPEECH_VOLUME,
            language: SPEECH_LANGUAGE.to_string(),
        }
    }
}

/// A voice offered by a playback engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceDescriptor {
    pub name: String,
    pub lang: String,
}

impl VoiceDescriptor {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }
}

/// Picks the first English voice from the preferred provider, falling back
/// to the first voice available.
pub fn select_voice<'a>(
    voices: &'a [VoiceDescriptor],
    preferred_provider: &str,
) -> Option<&'a VoiceDescriptor> {
    voices
        .iter()
        .find(|v| v.lang.contains("en") && v.name.contains(preferred_provider))
        .or_else(|| voices.first())
}

/// `select_voice` with the default provider.
pub fn default_voice(voices: &[VoiceDescriptor]) -> Option<&VoiceDescriptor> {
    select_voice(voices, PREFERRED_VOICE_PROVIDER)
}
