//! Runs a [`VoiceSessionController`] against real collaborators.
//!
//! The runtime is the only place that performs side effects: it feeds every
//! incoming [`Event`] through the controller and carries out the returned
//! [`Command`]s. Capture, playback, assistant requests and timers all report
//! back through one `mpsc` channel, so transitions happen strictly one at a
//! time on the runtime's task.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, broadcast, mpsc};
use tokio::task::JoinHandle;
use voice_session_core::capability::{
    AssistantClient, EventTx, SpeechCapture, SpeechPlayback, SpeechRequest,
};
use voice_session_core::consts::{PREFERRED_VOICE_PROVIDER, REQUEST_TIMEOUT};
use voice_session_core::playback::{SpeechSettings, VoiceDescriptor, select_voice};
use voice_session_core::{
    AssistantError, Capabilities, CaptureError, CaptureEvent, Command, Event, Moment,
    Notification, OutputMode, PlaybackEvent, SessionTimings, Ticket, VoiceSessionController,
};

/// The capacity of the runtime's event channel.
pub const EVENT_CAPACITY: usize = 256;
/// The capacity of the notification broadcast channel.
pub const NOTIFICATION_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub timings: SessionTimings,
    pub request_timeout: Duration,
    pub output_mode: OutputMode,
    pub preferred_voice_provider: String,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            timings: SessionTimings::default(),
            request_timeout: REQUEST_TIMEOUT,
            output_mode: OutputMode::Text,
            preferred_voice_provider: PREFERRED_VOICE_PROVIDER.to_string(),
        }
    }
}

/// The control surface handed to the host UI.
#[derive(Clone)]
pub struct SessionHandle {
    events: EventTx,
    notifications: broadcast::Sender<Notification>,
    shutdown: Arc<Notify>,
}

impl SessionHandle {
    pub async fn start(&self) -> Result<()> {
        self.send(Event::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(Event::Stop).await
    }

    pub async fn submit_text(&self, message: impl Into<String>) -> Result<()> {
        self.send(Event::SubmitText(message.into())).await
    }

    pub async fn set_output_mode(&self, mode: OutputMode) -> Result<()> {
        self.send(Event::SetOutputMode(mode)).await
    }

    /// Silences the reply being spoken, if any.
    pub async fn cancel_playback(&self) -> Result<()> {
        self.send(Event::CancelPlayback).await
    }

    /// State changes, transcript entries and errors from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Stops the session and ends the runtime's loop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    async fn send(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .await
            .context("voice session runtime is no longer running")
    }
}

pub struct SessionRuntime<C, P> {
    controller: VoiceSessionController,
    capture: C,
    playback: P,
    assistant: Arc<dyn AssistantClient>,
    request_timeout: Duration,
    voice: Option<VoiceDescriptor>,
    events_tx: EventTx,
    events_rx: mpsc::Receiver<Event>,
    notifications: broadcast::Sender<Notification>,
    shutdown: Arc<Notify>,
    // Failures raised while executing a command, handled before new input.
    backlog: VecDeque<Event>,
    timers: HashMap<Ticket, JoinHandle<()>>,
}

impl<C: SpeechCapture, P: SpeechPlayback> SessionRuntime<C, P> {
    pub fn new(
        capture: C,
        playback: P,
        assistant: Arc<dyn AssistantClient>,
        options: RuntimeOptions,
    ) -> (Self, SessionHandle) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let shutdown = Arc::new(Notify::new());

        let capabilities = Capabilities {
            capture: capture.is_supported(),
            playback: playback.is_supported(),
        };
        if !capabilities.playback {
            tracing::warn!("speech playback not available, replies will only be printed");
        }
        let voice = select_voice(&playback.voices(), &options.preferred_voice_provider).cloned();
        match &voice {
            Some(v) => tracing::info!("using voice '{}' ({})", v.name, v.lang),
            None => tracing::debug!("playback offers no voices, using engine default"),
        }

        let controller = VoiceSessionController::new(capabilities, options.timings)
            .with_output_mode(options.output_mode);

        let handle = SessionHandle {
            events: events_tx.clone(),
            notifications: notifications.clone(),
            shutdown: shutdown.clone(),
        };

        let runtime = Self {
            controller,
            capture,
            playback,
            assistant,
            request_timeout: options.request_timeout,
            voice,
            events_tx,
            events_rx,
            notifications,
            shutdown,
            backlog: VecDeque::new(),
            timers: HashMap::new(),
        };
        (runtime, handle)
    }

    /// Process events until [`SessionHandle::shutdown`] is called.
    pub async fn run(mut self) -> Result<()> {
        tracing::info!("voice session runtime started");
        loop {
            let event = match self.backlog.pop_front() {
                Some(event) => event,
                None => tokio::select! {
                    _ = self.shutdown.notified() => break,
                    event = self.events_rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                },
            };
            self.dispatch(event).await;
        }

        self.dispatch(Event::Stop).await;
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        tracing::info!("voice session runtime stopped");
        Ok(())
    }

    async fn dispatch(&mut self, event: Event) {
        if let Event::TimerFired(ticket) = &event {
            self.timers.remove(ticket);
        }
        let now = Moment::new(tokio::time::Instant::now().into_std(), Utc::now());
        for command in self.controller.handle(event, now) {
            self.execute(command).await;
        }
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::StartCapture(ticket) => {
                if let Err(e) = self.capture.start(ticket, self.events_tx.clone()).await {
                    tracing::warn!("speech capture failed to start: {:#}", e);
                    self.backlog.push_back(Event::Capture {
                        ticket,
                        event: CaptureEvent::Error(CaptureError::StartFailed(e.to_string())),
                    });
                }
            }
            Command::StopCapture => {
                if let Err(e) = self.capture.stop().await {
                    tracing::debug!("speech capture already stopped: {:#}", e);
                }
            }
            Command::Speak { ticket, text } => {
                let request = SpeechRequest {
                    ticket,
                    text,
                    settings: SpeechSettings::default(),
                    voice: self.voice.clone(),
                };
                if let Err(e) = self.playback.speak(request, self.events_tx.clone()).await {
                    tracing::warn!("speech playback failed to start: {:#}", e);
                    self.backlog.push_back(Event::Playback {
                        ticket,
                        event: PlaybackEvent::Error(e.to_string()),
                    });
                }
            }
            Command::CancelPlayback => {
                if let Err(e) = self.playback.cancel().await {
                    tracing::debug!("speech playback already silent: {:#}", e);
                }
            }
            Command::Submit { ticket, message } => self.submit(ticket, message),
            Command::ScheduleRestart { ticket, delay } => {
                let events = self.events_tx.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if events.send(Event::TimerFired(ticket)).await.is_err() {
                        tracing::debug!("runtime gone before timer {} fired", ticket);
                    }
                });
                if let Some(previous) = self.timers.insert(ticket, timer) {
                    previous.abort();
                }
            }
            Command::CancelTimer(ticket) => {
                if let Some(timer) = self.timers.remove(&ticket) {
                    timer.abort();
                }
            }
            Command::Notify(notification) => {
                // No subscribers yet is not an error.
                let _ = self.notifications.send(notification);
            }
        }
    }

    fn submit(&self, ticket: Ticket, message: String) {
        let assistant = Arc::clone(&self.assistant);
        let events = self.events_tx.clone();
        let limit = self.request_timeout;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(limit, assistant.submit(&message)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("assistant request {} timed out after {:?}", ticket, limit);
                    Err(AssistantError::Timeout)
                }
            };
            if events.send(Event::Reply { ticket, result }).await.is_err() {
                tracing::debug!("runtime gone before reply {} arrived", ticket);
            }
        });
    }
}
