use crate::clock::Ticket;
use crate::error::{AssistantError, CaptureError};
use crate::state::OutputMode;
use crate::transcript::Utterance;

/// A reply from the assistant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
}

impl Reply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// What a single capture attempt reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Utterance(Utterance),
    Error(CaptureError),
    Ended,
}

/// What a playback reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started,
    Ended,
    Error(String),
}

/// Everything the controller reacts to, from the host's controls to the
/// callbacks of capture, playback, the assistant and timers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    Stop,
    SubmitText(String),
    SetOutputMode(OutputMode),
    /// Silence the reply being spoken without ending the session.
    CancelPlayback,
    Capture {
        ticket: Ticket,
        event: CaptureEvent,
    },
    Playback {
        ticket: Ticket,
        event: PlaybackEvent,
    },
    Reply {
        ticket: Ticket,
        result: Result<Reply, AssistantError>,
    },
    TimerFired(Ticket),
}
