//! A terminal host for the voice session.
//!
//! Typed lines stand in for the microphone while a capture attempt is open,
//! and replies are "spoken" by printing them and holding for roughly as long
//! as saying them aloud would take.

use crate::runtime::SessionHandle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, Utc};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use voice_session_core::capability::{
    AssistantClient, EventTx, SpeechCapture, SpeechPlayback, SpeechRequest,
};
use voice_session_core::playback::VoiceDescriptor;
use voice_session_core::{
    BackendStatus, CaptureEvent, Event, Notification, OutputMode, PlaybackEvent, Role, Ticket,
    Transcript, Turn, Utterance,
};

/// Upper bound on how long one simulated playback holds the session.
pub const MAX_SPEAKING_TIME: Duration = Duration::from_secs(10);
const WORDS_PER_SECOND: f32 = 2.5;

const HELP: &str = "\
commands:
  /start         start hands-free listening
  /stop          stop listening and speaking
  /mode <m>      reply output, 'text' or 'voice'
  /history       print the conversation so far
  /clear         forget the conversation and stop speaking
  /health        re-check the assistant backend
  /help          show this help
  /quit          exit
anything else is sent as a message (or heard, while listening)";

/// Shared view of the capture attempt that typed lines are delivered to.
#[derive(Debug, Clone, Default)]
pub struct CaptureSlot {
    active: Arc<Mutex<Option<(Ticket, EventTx)>>>,
}

impl CaptureSlot {
    pub fn is_listening(&self) -> bool {
        self.active.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Hands `text` to the open capture attempt, which then ends.
    ///
    /// Returns `false` when nothing is listening.
    pub fn deliver(&self, text: &str) -> bool {
        let Some((ticket, events)) = self.take() else {
            return false;
        };
        let utterance = Utterance::new(text, Utc::now());
        for event in [CaptureEvent::Utterance(utterance), CaptureEvent::Ended] {
            if let Err(e) = events.try_send(Event::Capture { ticket, event }) {
                tracing::warn!("dropping captured line for {}: {}", ticket, e);
            }
        }
        true
    }

    fn open(&self, ticket: Ticket, events: EventTx) {
        if let Ok(mut slot) = self.active.lock() {
            *slot = Some((ticket, events));
        }
    }

    fn take(&self) -> Option<(Ticket, EventTx)> {
        self.active.lock().ok()?.take()
    }
}

/// Speech capture fed from the keyboard.
#[derive(Debug, Default)]
pub struct ConsoleCapture {
    slot: CaptureSlot,
}

impl ConsoleCapture {
    pub fn new() -> (Self, CaptureSlot) {
        let slot = CaptureSlot::default();
        (Self { slot: slot.clone() }, slot)
    }
}

#[async_trait]
impl SpeechCapture for ConsoleCapture {
    fn is_supported(&self) -> bool {
        true
    }

    async fn start(&mut self, ticket: Ticket, events: EventTx) -> Result<()> {
        tracing::debug!("console capture {} listening", ticket);
        self.slot.open(ticket, events);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some((ticket, _)) = self.slot.take() {
            tracing::debug!("console capture {} closed", ticket);
        }
        Ok(())
    }
}

/// Speech playback that prints instead of talking.
#[derive(Debug)]
pub struct ConsolePlayback {
    voices: Vec<VoiceDescriptor>,
    current: Option<JoinHandle<()>>,
}

impl ConsolePlayback {
    pub fn new(voices: Vec<VoiceDescriptor>) -> Self {
        Self {
            voices,
            current: None,
        }
    }
}

impl Default for ConsolePlayback {
    fn default() -> Self {
        Self::new(vec![
            VoiceDescriptor::new("Console Narrator", "en-GB"),
            VoiceDescriptor::new("Google US English", "en-US"),
        ])
    }
}

/// How long speaking `text` at `rate` takes, capped at [`MAX_SPEAKING_TIME`].
pub fn speaking_time(text: &str, rate: f32) -> Duration {
    let words = text.split_whitespace().count().max(1) as f32;
    let secs = words / (WORDS_PER_SECOND * rate.max(0.1));
    Duration::from_secs_f32(secs).min(MAX_SPEAKING_TIME)
}

#[async_trait]
impl SpeechPlayback for ConsolePlayback {
    fn is_supported(&self) -> bool {
        true
    }

    fn voices(&self) -> Vec<VoiceDescriptor> {
        self.voices.clone()
    }

    async fn speak(&mut self, request: SpeechRequest, events: EventTx) -> Result<()> {
        self.cancel().await?;

        let voice = request
            .voice
            .as_ref()
            .map(|v| v.name.as_str())
            .unwrap_or("default voice");
        println!("  [speaking as {voice}] {}", request.text);

        let hold = speaking_time(&request.text, request.settings.rate);
        let ticket = request.ticket;
        self.current = Some(tokio::spawn(async move {
            for (event, pause) in [
                (PlaybackEvent::Started, hold),
                (PlaybackEvent::Ended, Duration::ZERO),
            ] {
                if events.send(Event::Playback { ticket, event }).await.is_err() {
                    return;
                }
                tokio::time::sleep(pause).await;
            }
        }));
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        if let Some(task) = self.current.take() {
            task.abort();
        }
        Ok(())
    }
}

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Start,
    Stop,
    Mode(OutputMode),
    History,
    Clear,
    Health,
    Help,
    Quit,
    Message(String),
    Invalid(String),
    Blank,
}

pub fn parse_line(line: &str) -> ConsoleInput {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleInput::Blank;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ConsoleInput::Message(line.to_string());
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default().to_ascii_lowercase();
    let arg = parts.next();
    match (name.as_str(), arg) {
        ("start", None) => ConsoleInput::Start,
        ("stop", None) => ConsoleInput::Stop,
        ("mode", Some(mode)) => match OutputMode::from_str(mode) {
            Ok(mode) => ConsoleInput::Mode(mode),
            Err(e) => ConsoleInput::Invalid(e.to_string()),
        },
        ("mode", None) => ConsoleInput::Invalid("usage: /mode text|voice".to_string()),
        ("history", None) => ConsoleInput::History,
        ("clear", None) => ConsoleInput::Clear,
        ("health", None) => ConsoleInput::Health,
        ("help", None) => ConsoleInput::Help,
        ("quit" | "exit", None) => ConsoleInput::Quit,
        _ => ConsoleInput::Invalid(format!("unknown command '{line}', try /help")),
    }
}

pub fn format_turn(turn: &Turn) -> String {
    let who = match turn.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let at = turn.timestamp.with_timezone(&Local).format("%H:%M:%S");
    format!("[{at}] {who}: {}", turn.content)
}

/// Drives the session from stdin and renders its notifications to stdout.
pub struct ConsoleHost {
    handle: SessionHandle,
    slot: CaptureSlot,
    assistant: Arc<dyn AssistantClient>,
    status: BackendStatus,
    transcript: Arc<Mutex<Transcript>>,
}

impl ConsoleHost {
    pub fn new(handle: SessionHandle, slot: CaptureSlot, assistant: Arc<dyn AssistantClient>) -> Self {
        Self {
            handle,
            slot,
            assistant,
            status: BackendStatus::Checking,
            transcript: Arc::new(Mutex::new(Transcript::new())),
        }
    }

    /// Runs until `/quit` or end of input.
    pub async fn run(mut self, auto_listen: bool) -> Result<()> {
        let renderer = tokio::spawn(render(self.handle.subscribe(), self.transcript.clone()));

        println!("{HELP}");
        self.check_health().await;
        if auto_listen {
            self.start_listening().await?;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
            match parse_line(&line) {
                ConsoleInput::Start => self.start_listening().await?,
                ConsoleInput::Stop => self.handle.stop().await?,
                ConsoleInput::Mode(mode) => {
                    self.handle.set_output_mode(mode).await?;
                    println!("replies will be delivered as {mode}");
                }
                ConsoleInput::History => self.print_history(),
                ConsoleInput::Clear => {
                    self.handle.cancel_playback().await?;
                    if let Ok(mut transcript) = self.transcript.lock() {
                        transcript.clear();
                    }
                    println!("conversation cleared");
                }
                ConsoleInput::Health => self.check_health().await,
                ConsoleInput::Help => println!("{HELP}"),
                ConsoleInput::Quit => break,
                ConsoleInput::Message(text) => self.send_message(text).await?,
                ConsoleInput::Invalid(reason) => println!("{reason}"),
                ConsoleInput::Blank => {}
            }
        }

        renderer.abort();
        Ok(())
    }

    async fn check_health(&mut self) {
        println!("checking assistant backend...");
        self.status = self.assistant.health().await;
        match self.status {
            BackendStatus::Connected => println!("assistant backend connected"),
            _ => println!("assistant backend unreachable, try /health again later"),
        }
    }

    async fn start_listening(&self) -> Result<()> {
        if !self.status.is_connected() {
            println!("cannot listen while the backend is disconnected");
            return Ok(());
        }
        self.handle.start().await
    }

    async fn send_message(&self, text: String) -> Result<()> {
        if self.slot.deliver(&text) {
            return Ok(());
        }
        if !self.status.is_connected() {
            println!("message not sent, the backend is disconnected");
            return Ok(());
        }
        self.handle.submit_text(text).await
    }

    fn print_history(&self) {
        let Ok(transcript) = self.transcript.lock() else {
            return;
        };
        if transcript.is_empty() {
            println!("no messages yet");
        }
        for turn in transcript.iter() {
            println!("{}", format_turn(turn));
        }
    }
}

async fn render(mut notifications: broadcast::Receiver<Notification>, transcript: Arc<Mutex<Transcript>>) {
    loop {
        match notifications.recv().await {
            Ok(Notification::TranscriptAppended(turn)) => {
                println!("{}", format_turn(&turn));
                if let Ok(mut transcript) = transcript.lock() {
                    transcript.push(turn);
                }
            }
            Ok(Notification::StateChanged(state)) => println!("  ({state})"),
            Ok(Notification::Error(error)) if error.is_fatal() => {
                println!("voice input unavailable: {error}");
            }
            Ok(Notification::Error(error)) => tracing::warn!("{}", error),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("console fell behind, {} notifications skipped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}
