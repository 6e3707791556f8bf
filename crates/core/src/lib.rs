pub mod capability;
pub mod clock;
pub mod consts;
pub mod controller;
pub mod error;
pub mod event;
pub mod playback;
pub mod state;
pub mod transcript;

use std::time::Duration;

pub use clock::{Moment, SessionToken, Ticket};
pub use controller::{Capabilities, SessionTimings, VoiceSessionController};
pub use error::{AssistantError, CaptureError, SessionError};
pub use event::{CaptureEvent, Event, PlaybackEvent, Reply};
pub use state::{BackendStatus, OutputMode, SessionState};
pub use transcript::{Role, Transcript, Turn, Utterance};

/// Represents commands that the controller issues to the runtime.
///
/// This enum is the primary API for decoupling the session's decision-making
/// from the runtime's execution of side effects (starting the microphone,
/// speaking text, calling the assistant, arming timers).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Begin a capture attempt. Results must come back tagged with this ticket.
    StartCapture(Ticket),
    /// Stop the active capture attempt.
    StopCapture,
    /// Speak the given text. Playback callbacks must carry the ticket.
    Speak { ticket: Ticket, text: String },
    /// Silence the active playback.
    CancelPlayback,
    /// Send a single message to the assistant.
    Submit { ticket: Ticket, message: String },
    /// Fire `Event::TimerFired(ticket)` after `delay`.
    ScheduleRestart { ticket: Ticket, delay: Duration },
    /// Drop a timer armed by `ScheduleRestart`.
    CancelTimer(Ticket),
    /// Forward a notification to the host's subscribers.
    Notify(Notification),
}

/// What the host UI gets to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StateChanged(SessionState),
    TranscriptAppended(Turn),
    Error(SessionError),
}
