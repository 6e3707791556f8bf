//! The narrow interfaces the session talks to.
//!
//! The controller itself never calls these; the runtime executes the
//! controller's commands against them and feeds the results back as
//! [`Event`]s. Implementations report asynchronously by sending on the
//! channel they are handed, so a slow engine never blocks the event loop.

use crate::clock::Ticket;
use crate::error::AssistantError;
use crate::event::{Event, Reply};
use crate::playback::{SpeechSettings, VoiceDescriptor};
use crate::state::BackendStatus;
use anyhow::Result;
use async_trait::async_trait;

/// Where capture and playback engines deliver their callbacks.
pub type EventTx = tokio::sync::mpsc::Sender<Event>;

/// Turns live audio into transcribed utterances.
///
/// Each `start` begins one attempt which reports exactly one terminal
/// `CaptureEvent` (`Error` or `Ended`), optionally preceded by an
/// `Utterance`, all tagged with the ticket it was started with.
#[async_trait]
pub trait SpeechCapture: Send {
    fn is_supported(&self) -> bool;

    async fn start(&mut self, ticket: Ticket, events: EventTx) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;
}

/// A request to speak one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub ticket: Ticket,
    pub text: String,
    pub settings: SpeechSettings,
    pub voice: Option<VoiceDescriptor>,
}

/// Renders text as spoken audio, reporting `Started` then `Ended` or `Error`.
#[async_trait]
pub trait SpeechPlayback: Send {
    fn is_supported(&self) -> bool;

    fn voices(&self) -> Vec<VoiceDescriptor>;

    async fn speak(&mut self, request: SpeechRequest, events: EventTx) -> Result<()>;

    async fn cancel(&mut self) -> Result<()>;
}

/// The remote assistant. Each request carries only the current message.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    async fn submit(&self, message: &str) -> Result<Reply, AssistantError>;

    /// Used by hosts to gate submission; not part of the state machine.
    async fn health(&self) -> BackendStatus;
}
