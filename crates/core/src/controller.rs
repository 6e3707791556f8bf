use crate::clock::{Moment, SessionToken, Ticket};
use crate::consts::{
    CAPTURE_RESTART_DELAY, DEBOUNCE_WINDOW, NETWORK_BACKOFF, PLAYBACK_RESUME_DELAY,
    REPLY_RESUME_DELAY,
};
use crate::error::{AssistantError, CaptureError, SessionError};
use crate::event::{CaptureEvent, Event, PlaybackEvent, Reply};
use crate::state::{OutputMode, SessionState};
use crate::transcript::{Turn, Utterance};
use crate::{Command, Notification};
use std::time::{Duration, Instant};

/// What the environment can do. Probed once by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub capture: bool,
    pub playback: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            capture: true,
            playback: true,
        }
    }
}

/// Delays the controller asks the runtime to wait before re-entering capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    pub debounce_window: Duration,
    pub network_backoff: Duration,
    pub capture_restart: Duration,
    pub reply_resume: Duration,
    pub playback_resume: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            debounce_window: DEBOUNCE_WINDOW,
            network_backoff: NETWORK_BACKOFF,
            capture_restart: CAPTURE_RESTART_DELAY,
            reply_resume: REPLY_RESUME_DELAY,
            playback_resume: PLAYBACK_RESUME_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Voice,
    Text,
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    ticket: Ticket,
    origin: Origin,
}

/// The hands-free conversation state machine.
///
/// Every input arrives as an [`Event`] through [`handle`](Self::handle), which
/// returns the [`Command`]s the runtime must carry out. The controller does
/// no I/O and reads no clock of its own, so any interleaving of callbacks can
/// be replayed in a test.
///
/// Capture is only ever running in `Listening` and playback only in
/// `Speaking`; `Listening` may be waiting on a restart timer with capture
/// stopped.
#[derive(Debug)]
pub struct VoiceSessionController {
    state: SessionState,
    auto_listen: bool,
    output_mode: OutputMode,
    capabilities: Capabilities,
    timings: SessionTimings,
    token: SessionToken,
    seq: u64,
    capture: Option<Ticket>,
    playback: Option<Ticket>,
    request: Option<PendingRequest>,
    restart: Option<Ticket>,
    last_accepted: Option<Instant>,
}

impl VoiceSessionController {
    pub fn new(capabilities: Capabilities, timings: SessionTimings) -> Self {
        Self {
            state: SessionState::Idle,
            auto_listen: false,
            output_mode: OutputMode::Text,
            capabilities,
            timings,
            token: SessionToken::default(),
            seq: 0,
            capture: None,
            playback: None,
            request: None,
            restart: None,
            last_accepted: None,
        }
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn auto_listen(&self) -> bool {
        self.auto_listen
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn capture_active(&self) -> bool {
        self.capture.is_some()
    }

    pub fn playback_active(&self) -> bool {
        self.playback.is_some()
    }

    /// Feed one event through the machine.
    pub fn handle(&mut self, event: Event, now: Moment) -> Vec<Command> {
        let mut commands = Vec::new();
        match event {
            Event::Start => self.on_start(&mut commands),
            Event::Stop => self.on_stop(&mut commands),
            Event::SubmitText(message) => self.on_submit_text(message, now, &mut commands),
            Event::SetOutputMode(mode) => {
                tracing::debug!("output mode set to {}", mode);
                self.output_mode = mode;
            }
            Event::CancelPlayback => self.on_cancel_playback(&mut commands),
            Event::Capture { ticket, event } => self.on_capture(ticket, event, now, &mut commands),
            Event::Playback { ticket, event } => self.on_playback(ticket, event, &mut commands),
            Event::Reply { ticket, result } => self.on_reply(ticket, result, now, &mut commands),
            Event::TimerFired(ticket) => self.on_timer(ticket, &mut commands),
        }
        self.check_invariants();
        commands
    }

    fn on_start(&mut self, commands: &mut Vec<Command>) {
        if !self.capabilities.capture {
            tracing::warn!("speech capture unsupported, voice session cannot start");
            commands.push(Command::Notify(Notification::Error(
                SessionError::CaptureUnsupported,
            )));
            return;
        }

        match self.state {
            SessionState::Idle => {
                self.auto_listen = true;
                self.token = self.token.next();
                tracing::info!("starting voice session {}", self.token);
                self.transition(SessionState::Listening, commands);
                self.begin_capture(commands);
            }
            SessionState::Listening => {
                tracing::debug!("already listening");
                self.auto_listen = true;
            }
            // The reply in flight finishes first, then the machine resumes listening.
            SessionState::AwaitingReply | SessionState::Speaking => {
                self.auto_listen = true;
            }
        }
    }

    fn on_stop(&mut self, commands: &mut Vec<Command>) {
        let busy = self.state != SessionState::Idle
            || self.auto_listen
            || self.capture.is_some()
            || self.playback.is_some()
            || self.restart.is_some()
            || self.request.is_some();
        if !busy {
            tracing::debug!("stop requested while already stopped");
            return;
        }

        tracing::info!("stopping voice session {}", self.token);
        self.auto_listen = false;
        self.halt_capture(commands);
        self.halt_playback(commands);
        self.cancel_restart(commands);
        // A reply still on its way belongs to the superseded session.
        self.request = None;
        self.token = self.token.next();
        self.transition(SessionState::Idle, commands);
    }

    fn on_submit_text(&mut self, message: String, now: Moment, commands: &mut Vec<Command>) {
        let text = message.trim();
        if text.is_empty() {
            tracing::debug!("{}", SessionError::EmptyOrDuplicateInput);
            return;
        }
        if self.state == SessionState::AwaitingReply {
            tracing::warn!("a request is already outstanding, ignoring typed message");
            return;
        }
        let turn = Turn::user(text, now.wall);
        self.dispatch(turn, Origin::Text, commands);
    }

    fn on_capture(
        &mut self,
        ticket: Ticket,
        event: CaptureEvent,
        now: Moment,
        commands: &mut Vec<Command>,
    ) {
        if self.capture != Some(ticket) {
            tracing::debug!("discarding capture callback from stale attempt {}", ticket);
            return;
        }

        match event {
            CaptureEvent::Utterance(utterance) => self.on_utterance(utterance, now, commands),
            CaptureEvent::Error(error) => {
                self.capture = None;
                tracing::warn!("capture attempt {} failed: {}", ticket, error);
                let delay = if error.is_recoverable() {
                    self.timings.network_backoff
                } else {
                    self.timings.capture_restart
                };
                commands.push(Command::Notify(Notification::Error(error.into())));
                self.relisten_or_idle(delay, commands);
            }
            CaptureEvent::Ended => {
                self.capture = None;
                tracing::debug!("capture attempt {} ended", ticket);
                self.relisten_or_idle(self.timings.capture_restart, commands);
            }
        }
    }

    fn on_utterance(&mut self, utterance: Utterance, now: Moment, commands: &mut Vec<Command>) {
        let text = utterance.text.trim();
        if text.is_empty() {
            tracing::debug!("{}: blank utterance", SessionError::EmptyOrDuplicateInput);
            return;
        }
        if let Some(last) = self.last_accepted {
            if now.instant.saturating_duration_since(last) < self.timings.debounce_window {
                tracing::debug!(
                    "{}: '{}' arrived inside the debounce window",
                    SessionError::EmptyOrDuplicateInput,
                    text
                );
                return;
            }
        }

        self.last_accepted = Some(now.instant);
        tracing::info!("heard: \"{}\"", text);
        let turn = Turn::user(text, utterance.captured_at);
        self.dispatch(turn, Origin::Voice, commands);
    }

    fn on_reply(
        &mut self,
        ticket: Ticket,
        result: Result<Reply, AssistantError>,
        now: Moment,
        commands: &mut Vec<Command>,
    ) {
        let Some(pending) = self.request.take_if(|r| r.ticket == ticket) else {
            tracing::debug!("discarding reply for superseded request {}", ticket);
            return;
        };

        let reply = match result {
            Ok(reply) if !reply.text.trim().is_empty() => reply,
            Ok(_) => return self.fail_request(AssistantError::EmptyReply, now, commands),
            Err(error) => return self.fail_request(error, now, commands),
        };

        commands.push(Command::Notify(Notification::TranscriptAppended(
            Turn::assistant(reply.text.clone(), now.wall),
        )));

        let speak = match pending.origin {
            Origin::Voice => true,
            Origin::Text => self.output_mode == OutputMode::Voice,
        };
        if !speak {
            return self.relisten_or_idle(self.timings.reply_resume, commands);
        }
        if !self.capabilities.playback {
            tracing::warn!("speech playback unsupported, reply recorded but not spoken");
            commands.push(Command::Notify(Notification::Error(
                SessionError::PlaybackUnsupported,
            )));
            return self.relisten_or_idle(self.timings.reply_resume, commands);
        }

        self.halt_capture(commands);
        self.cancel_restart(commands);
        let ticket = self.issue();
        self.playback = Some(ticket);
        self.transition(SessionState::Speaking, commands);
        commands.push(Command::Speak {
            ticket,
            text: reply.text,
        });
    }

    fn fail_request(&mut self, error: AssistantError, now: Moment, commands: &mut Vec<Command>) {
        tracing::error!("assistant request failed: {}", error);
        commands.push(Command::Notify(Notification::TranscriptAppended(
            Turn::assistant_error(now.wall),
        )));
        commands.push(Command::Notify(Notification::Error(error.into())));
        self.relisten_or_idle(self.timings.reply_resume, commands);
    }

    fn on_playback(&mut self, ticket: Ticket, event: PlaybackEvent, commands: &mut Vec<Command>) {
        if self.playback != Some(ticket) {
            tracing::debug!("discarding playback callback from stale playback {}", ticket);
            return;
        }

        match event {
            PlaybackEvent::Started => tracing::debug!("playback {} started", ticket),
            PlaybackEvent::Ended => {
                self.playback = None;
                tracing::debug!("playback {} finished", ticket);
                self.relisten_or_idle(self.timings.playback_resume, commands);
            }
            PlaybackEvent::Error(reason) => {
                self.playback = None;
                tracing::warn!("playback {} failed: {}", ticket, reason);
                commands.push(Command::Notify(Notification::Error(SessionError::Playback(
                    reason,
                ))));
                self.relisten_or_idle(self.timings.playback_resume, commands);
            }
        }
    }

    fn on_cancel_playback(&mut self, commands: &mut Vec<Command>) {
        let Some(ticket) = self.playback else {
            tracing::debug!("nothing is being spoken");
            return;
        };
        tracing::info!("playback {} cancelled", ticket);
        self.relisten_or_idle(self.timings.playback_resume, commands);
    }

    fn on_timer(&mut self, ticket: Ticket, commands: &mut Vec<Command>) {
        if self.restart != Some(ticket) {
            tracing::debug!("ignoring stale timer {}", ticket);
            return;
        }
        self.restart = None;

        if self.state == SessionState::Listening && self.auto_listen && self.capture.is_none() {
            self.begin_capture(commands);
        }
    }

    /// Records the user turn and hands the message to the assistant.
    fn dispatch(&mut self, turn: Turn, origin: Origin, commands: &mut Vec<Command>) {
        self.halt_capture(commands);
        self.halt_playback(commands);
        self.cancel_restart(commands);

        let message = turn.content.clone();
        commands.push(Command::Notify(Notification::TranscriptAppended(turn)));

        let ticket = self.issue();
        self.request = Some(PendingRequest { ticket, origin });
        self.transition(SessionState::AwaitingReply, commands);
        commands.push(Command::Submit { ticket, message });
    }

    /// Either wait `delay` in `Listening` before capturing again, or go idle.
    fn relisten_or_idle(&mut self, delay: Duration, commands: &mut Vec<Command>) {
        self.halt_playback(commands);
        if self.auto_listen {
            self.transition(SessionState::Listening, commands);
            self.schedule_restart(delay, commands);
        } else {
            self.halt_capture(commands);
            self.transition(SessionState::Idle, commands);
        }
    }

    fn begin_capture(&mut self, commands: &mut Vec<Command>) {
        self.halt_playback(commands);
        let ticket = self.issue();
        self.capture = Some(ticket);
        commands.push(Command::StartCapture(ticket));
    }

    fn schedule_restart(&mut self, delay: Duration, commands: &mut Vec<Command>) {
        self.cancel_restart(commands);
        let ticket = self.issue();
        self.restart = Some(ticket);
        commands.push(Command::ScheduleRestart { ticket, delay });
    }

    fn halt_capture(&mut self, commands: &mut Vec<Command>) {
        if self.capture.take().is_some() {
            commands.push(Command::StopCapture);
        }
    }

    fn halt_playback(&mut self, commands: &mut Vec<Command>) {
        if self.playback.take().is_some() {
            commands.push(Command::CancelPlayback);
        }
    }

    fn cancel_restart(&mut self, commands: &mut Vec<Command>) {
        if let Some(ticket) = self.restart.take() {
            commands.push(Command::CancelTimer(ticket));
        }
    }

    fn issue(&mut self) -> Ticket {
        self.seq += 1;
        Ticket {
            token: self.token,
            seq: self.seq,
        }
    }

    fn transition(&mut self, to: SessionState, commands: &mut Vec<Command>) {
        if self.state == to {
            return;
        }
        tracing::debug!("{} -> {}", self.state, to);
        self.state = to;
        commands.push(Command::Notify(Notification::StateChanged(to)));
    }

    fn check_invariants(&self) {
        debug_assert!(
            !(self.capture.is_some() && self.playback.is_some()),
            "capture and playback active together"
        );
        debug_assert!(self.capture.is_none() || self.state == SessionState::Listening);
        debug_assert_eq!(self.playback.is_some(), self.state == SessionState::Speaking);
        debug_assert_eq!(
            self.request.is_some(),
            self.state == SessionState::AwaitingReply
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::ASSISTANT_ERROR_TEXT;
    use crate::transcript::Role;

    /// Drives a controller along a synthetic timeline and keeps everything it emitted.
    struct Harness {
        controller: VoiceSessionController,
        base: Moment,
        elapsed: Duration,
        log: Vec<Command>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_capabilities(Capabilities::default())
        }

        fn with_capabilities(capabilities: Capabilities) -> Self {
            Self {
                controller: VoiceSessionController::new(capabilities, SessionTimings::default()),
                base: Moment::now(),
                elapsed: Duration::ZERO,
                log: Vec::new(),
            }
        }

        fn at(&mut self, millis: u64) -> &mut Self {
            self.elapsed = Duration::from_millis(millis);
            self
        }

        fn send(&mut self, event: Event) -> Vec<Command> {
            let now = self.base.after(self.elapsed);
            let commands = self.controller.handle(event, now);
            assert!(
                !(self.controller.capture_active() && self.controller.playback_active()),
                "capture and playback active together"
            );
            self.log.extend(commands.iter().cloned());
            commands
        }

        fn capture_ticket(&self) -> Ticket {
            self.log
                .iter()
                .rev()
                .find_map(|c| match c {
                    Command::StartCapture(t) => Some(*t),
                    _ => None,
                })
                .expect("capture was never started")
        }

        fn submit_ticket(&self) -> Ticket {
            self.log
                .iter()
                .rev()
                .find_map(|c| match c {
                    Command::Submit { ticket, .. } => Some(*ticket),
                    _ => None,
                })
                .expect("nothing was submitted")
        }

        fn speak_ticket(&self) -> Ticket {
            self.log
                .iter()
                .rev()
                .find_map(|c| match c {
                    Command::Speak { ticket, .. } => Some(*ticket),
                    _ => None,
                })
                .expect("nothing was spoken")
        }

        fn restart_ticket(&self) -> Ticket {
            self.log
                .iter()
                .rev()
                .find_map(|c| match c {
                    Command::ScheduleRestart { ticket, .. } => Some(*ticket),
                    _ => None,
                })
                .expect("no restart scheduled")
        }

        fn hear(&mut self, text: &str) -> Vec<Command> {
            let ticket = self.capture_ticket();
            let wall = self.base.after(self.elapsed).wall;
            self.send(Event::Capture {
                ticket,
                event: CaptureEvent::Utterance(Utterance::new(text, wall)),
            })
        }

        fn reply(&mut self, result: Result<Reply, AssistantError>) -> Vec<Command> {
            let ticket = self.submit_ticket();
            self.send(Event::Reply { ticket, result })
        }

        fn finish_playback(&mut self) -> Vec<Command> {
            let ticket = self.speak_ticket();
            self.send(Event::Playback {
                ticket,
                event: PlaybackEvent::Ended,
            })
        }

        fn turns(&self) -> Vec<(Role, String)> {
            self.log
                .iter()
                .filter_map(|c| match c {
                    Command::Notify(Notification::TranscriptAppended(t)) => {
                        Some((t.role, t.content.clone()))
                    }
                    _ => None,
                })
                .collect()
        }

        fn states(&self) -> Vec<SessionState> {
            self.log
                .iter()
                .filter_map(|c| match c {
                    Command::Notify(Notification::StateChanged(s)) => Some(*s),
                    _ => None,
                })
                .collect()
        }
    }

    fn count(commands: &[Command], pred: impl Fn(&Command) -> bool) -> usize {
        commands.iter().filter(|c| pred(c)).count()
    }

    #[test]
    fn test_start_enters_listening_and_begins_capture() {
        let mut h = Harness::new();
        let commands = h.send(Event::Start);

        assert_eq!(h.controller.state(), SessionState::Listening);
        assert!(h.controller.auto_listen());
        assert!(h.controller.capture_active());
        assert!(matches!(commands.last(), Some(Command::StartCapture(_))));
    }

    #[test]
    fn test_start_without_capture_support_stays_idle() {
        let mut h = Harness::with_capabilities(Capabilities {
            capture: false,
            playback: true,
        });
        let commands = h.send(Event::Start);

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(!h.controller.auto_listen());
        assert_eq!(
            commands,
            vec![Command::Notify(Notification::Error(
                SessionError::CaptureUnsupported
            ))]
        );
    }

    #[test]
    fn test_start_while_listening_is_a_no_op() {
        let mut h = Harness::new();
        h.send(Event::Start);
        let commands = h.send(Event::Start);
        assert!(commands.is_empty());
    }

    #[test]
    fn test_voice_round_trip_speaks_reply_and_resumes_listening() {
        let mut h = Harness::new();
        h.send(Event::Start);

        let commands = h.hear("hello");
        assert_eq!(commands[0], Command::StopCapture);
        assert!(matches!(
            commands.last(),
            Some(Command::Submit { message, .. }) if message == "hello"
        ));
        assert_eq!(h.controller.state(), SessionState::AwaitingReply);

        h.at(300);
        let commands = h.reply(Ok(Reply::new("hi")));
        assert!(matches!(
            commands.last(),
            Some(Command::Speak { text, .. }) if text == "hi"
        ));
        assert_eq!(h.controller.state(), SessionState::Speaking);

        h.at(2000);
        let commands = h.finish_playback();
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::ScheduleRestart { delay, .. } if *delay == PLAYBACK_RESUME_DELAY
        )));

        h.at(3000);
        let timer = h.restart_ticket();
        let commands = h.send(Event::TimerFired(timer));
        assert!(matches!(commands.as_slice(), [Command::StartCapture(_)]));

        assert_eq!(
            h.states(),
            vec![
                SessionState::Listening,
                SessionState::AwaitingReply,
                SessionState::Speaking,
                SessionState::Listening,
            ]
        );
        assert_eq!(
            h.turns(),
            vec![
                (Role::User, "hello".to_string()),
                (Role::Assistant, "hi".to_string()),
            ]
        );
    }

    #[test]
    fn test_utterance_inside_debounce_window_is_dropped() {
        let mut h = Harness::new();
        h.send(Event::Start);
        h.hear("hello");
        h.reply(Ok(Reply::new("hi")));
        h.finish_playback();
        let timer = h.restart_ticket();
        h.send(Event::TimerFired(timer));

        h.at(500);
        let commands = h.hear("hello again");

        assert!(commands.is_empty());
        assert_eq!(h.controller.state(), SessionState::Listening);
        assert_eq!(h.turns().len(), 2);
    }

    #[test]
    fn test_utterance_after_debounce_window_is_accepted() {
        let mut h = Harness::new();
        h.send(Event::Start);
        h.hear("first");
        h.reply(Err(AssistantError::Timeout));
        let timer = h.restart_ticket();
        h.at(1000);
        h.send(Event::TimerFired(timer));

        let commands = h.hear("second");
        assert!(matches!(commands.last(), Some(Command::Submit { .. })));
    }

    #[test]
    fn test_blank_utterance_is_ignored() {
        let mut h = Harness::new();
        h.send(Event::Start);
        let commands = h.hear("   ");
        assert!(commands.is_empty());
        assert!(h.controller.capture_active());
    }

    #[test]
    fn test_capture_results_while_awaiting_reply_are_dropped() {
        let mut h = Harness::new();
        h.send(Event::Start);
        let stale = h.capture_ticket();
        h.hear("hello");

        h.at(2000);
        let commands = h.send(Event::Capture {
            ticket: stale,
            event: CaptureEvent::Utterance(Utterance::new("echo", h.base.wall)),
        });
        assert!(commands.is_empty());
        assert_eq!(h.controller.state(), SessionState::AwaitingReply);
    }

    #[test]
    fn test_network_error_backs_off_before_restarting() {
        let mut h = Harness::new();
        h.send(Event::Start);
        let ticket = h.capture_ticket();
        let commands = h.send(Event::Capture {
            ticket,
            event: CaptureEvent::Error(CaptureError::Network),
        });

        assert_eq!(h.controller.state(), SessionState::Listening);
        assert!(!h.controller.capture_active());
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::ScheduleRestart { delay, .. } if *delay == NETWORK_BACKOFF
        )));
    }

    #[test]
    fn test_other_errors_and_natural_end_restart_quickly() {
        let mut h = Harness::new();
        h.send(Event::Start);
        let ticket = h.capture_ticket();
        let commands = h.send(Event::Capture {
            ticket,
            event: CaptureEvent::Error(CaptureError::Other("no-speech".into())),
        });
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::ScheduleRestart { delay, .. } if *delay == CAPTURE_RESTART_DELAY
        )));

        let timer = h.restart_ticket();
        h.send(Event::TimerFired(timer));
        let ticket = h.capture_ticket();
        let commands = h.send(Event::Capture {
            ticket,
            event: CaptureEvent::Ended,
        });
        assert!(matches!(
            commands.as_slice(),
            [Command::ScheduleRestart { delay, .. }] if *delay == CAPTURE_RESTART_DELAY
        ));
    }

    #[test]
    fn test_stop_returns_to_idle_from_every_state() {
        // Listening
        let mut h = Harness::new();
        h.send(Event::Start);
        let commands = h.send(Event::Stop);
        assert!(commands.contains(&Command::StopCapture));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(!h.controller.auto_listen());

        // AwaitingReply
        let mut h = Harness::new();
        h.send(Event::Start);
        h.hear("hello");
        h.send(Event::Stop);
        assert_eq!(h.controller.state(), SessionState::Idle);
        let late = h.reply(Ok(Reply::new("too late")));
        assert!(late.is_empty());

        // Speaking
        let mut h = Harness::new();
        h.send(Event::Start);
        h.hear("hello");
        h.reply(Ok(Reply::new("hi")));
        let commands = h.send(Event::Stop);
        assert!(commands.contains(&Command::CancelPlayback));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(!h.controller.playback_active());

        // Listening with a restart pending
        let mut h = Harness::new();
        h.send(Event::Start);
        let ticket = h.capture_ticket();
        h.send(Event::Capture {
            ticket,
            event: CaptureEvent::Ended,
        });
        let timer = h.restart_ticket();
        let commands = h.send(Event::Stop);
        assert!(commands.contains(&Command::CancelTimer(timer)));
        assert!(h.send(Event::TimerFired(timer)).is_empty());
    }

    #[test]
    fn test_late_capture_from_stopped_session_is_ignored() {
        let mut h = Harness::new();
        h.send(Event::Start);
        let session_a = h.capture_ticket();
        assert_eq!(session_a.token, h.controller.token());

        h.send(Event::Stop);
        assert_ne!(session_a.token, h.controller.token());

        h.send(Event::Start);
        let commands = h.send(Event::Capture {
            ticket: session_a,
            event: CaptureEvent::Utterance(Utterance::new("ghost", h.base.wall)),
        });
        assert!(commands.is_empty());
        assert_eq!(h.controller.state(), SessionState::Listening);
        assert!(h.turns().is_empty());
    }

    #[test]
    fn test_stop_twice_matches_stop_once() {
        let mut h = Harness::new();
        h.send(Event::Start);
        let ticket = h.capture_ticket();
        h.send(Event::Capture {
            ticket,
            event: CaptureEvent::Ended,
        });

        let first = h.send(Event::Stop);
        let token = h.controller.token();
        let second = h.send(Event::Stop);

        assert_eq!(
            count(&first, |c| matches!(c, Command::CancelTimer(_))),
            1
        );
        assert!(second.is_empty());
        assert_eq!(h.controller.token(), token);
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_typed_message_in_text_mode_is_not_spoken() {
        let mut h = Harness::new();
        let commands = h.send(Event::SubmitText("hello".into()));
        assert!(matches!(commands.last(), Some(Command::Submit { .. })));

        let commands = h.reply(Ok(Reply::new("hi there")));
        assert_eq!(
            count(&commands, |c| matches!(c, Command::Speak { .. })),
            0
        );
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(
            h.turns(),
            vec![
                (Role::User, "hello".to_string()),
                (Role::Assistant, "hi there".to_string()),
            ]
        );
    }

    #[test]
    fn test_typed_message_in_voice_mode_is_spoken() {
        let mut h = Harness::new();
        h.send(Event::SetOutputMode(OutputMode::Voice));
        h.send(Event::SubmitText("hello".into()));
        let commands = h.reply(Ok(Reply::new("hi")));

        assert!(matches!(commands.last(), Some(Command::Speak { .. })));
        h.finish_playback();
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_typed_message_rejected_while_awaiting_reply() {
        let mut h = Harness::new();
        h.send(Event::SubmitText("one".into()));
        let commands = h.send(Event::SubmitText("two".into()));
        assert!(commands.is_empty());
        assert_eq!(h.turns().len(), 1);
    }

    #[test]
    fn test_typed_message_interrupts_listening() {
        let mut h = Harness::new();
        h.send(Event::Start);
        let commands = h.send(Event::SubmitText("typed".into()));
        assert_eq!(commands[0], Command::StopCapture);
        assert_eq!(h.controller.state(), SessionState::AwaitingReply);

        // AutoListen survives, so a text reply hands back to the microphone.
        let commands = h.reply(Ok(Reply::new("ok")));
        assert_eq!(h.controller.state(), SessionState::Listening);
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::ScheduleRestart { delay, .. } if *delay == REPLY_RESUME_DELAY
        )));
    }

    #[test]
    fn test_blank_typed_message_is_ignored() {
        let mut h = Harness::new();
        assert!(h.send(Event::SubmitText("  \n".into())).is_empty());
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[test]
    fn test_assistant_failure_appends_one_error_turn_and_resumes() {
        let mut h = Harness::new();
        h.send(Event::Start);
        h.hear("hello");
        let commands = h.reply(Err(AssistantError::Unavailable("503".into())));

        let error_turns = count(&commands, |c| {
            matches!(
                c,
                Command::Notify(Notification::TranscriptAppended(t))
                    if t.role == Role::Assistant && t.content == ASSISTANT_ERROR_TEXT
            )
        });
        assert_eq!(error_turns, 1);
        assert_eq!(h.controller.state(), SessionState::Listening);
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::ScheduleRestart { delay, .. } if *delay == REPLY_RESUME_DELAY
        )));
    }

    #[test]
    fn test_assistant_timeout_without_auto_listen_goes_idle() {
        let mut h = Harness::new();
        h.send(Event::SubmitText("hello".into()));
        let commands = h.reply(Err(AssistantError::Timeout));

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(
            count(&commands, |c| matches!(
                c,
                Command::Notify(Notification::TranscriptAppended(_))
            )),
            1
        );
        assert!(commands.contains(&Command::Notify(Notification::Error(
            SessionError::Assistant(AssistantError::Timeout)
        ))));
    }

    #[test]
    fn test_empty_reply_counts_as_failure() {
        let mut h = Harness::new();
        h.send(Event::Start);
        h.hear("hello");
        h.reply(Ok(Reply::new("  ")));

        assert_eq!(
            h.turns().last(),
            Some(&(Role::Assistant, ASSISTANT_ERROR_TEXT.to_string()))
        );
        assert_eq!(h.controller.state(), SessionState::Listening);
    }

    #[test]
    fn test_missing_playback_records_reply_silently() {
        let mut h = Harness::with_capabilities(Capabilities {
            capture: true,
            playback: false,
        });
        h.send(Event::Start);
        h.hear("hello");
        let commands = h.reply(Ok(Reply::new("hi")));

        assert_eq!(count(&commands, |c| matches!(c, Command::Speak { .. })), 0);
        assert!(commands.contains(&Command::Notify(Notification::Error(
            SessionError::PlaybackUnsupported
        ))));
        assert_eq!(h.turns().len(), 2);
        assert_eq!(h.controller.state(), SessionState::Listening);
    }

    #[test]
    fn test_playback_error_resumes_listening() {
        let mut h = Harness::new();
        h.send(Event::Start);
        h.hear("hello");
        h.reply(Ok(Reply::new("hi")));
        let ticket = h.speak_ticket();
        let commands = h.send(Event::Playback {
            ticket,
            event: PlaybackEvent::Error("interrupted".into()),
        });

        assert_eq!(h.controller.state(), SessionState::Listening);
        assert!(!h.controller.playback_active());
        assert!(commands.iter().any(|c| matches!(c, Command::ScheduleRestart { .. })));
    }

    #[test]
    fn test_start_during_reply_resumes_listening_afterwards() {
        let mut h = Harness::new();
        h.send(Event::SubmitText("hello".into()));
        assert!(h.send(Event::Start).is_empty());
        h.reply(Ok(Reply::new("hi")));
        assert_eq!(h.controller.state(), SessionState::Listening);
    }

    #[test]
    fn test_stale_timer_after_resubmission_is_ignored() {
        let mut h = Harness::new();
        h.send(Event::Start);
        let ticket = h.capture_ticket();
        h.send(Event::Capture {
            ticket,
            event: CaptureEvent::Ended,
        });
        let timer = h.restart_ticket();
        let commands = h.send(Event::SubmitText("typed".into()));
        assert!(commands.contains(&Command::CancelTimer(timer)));

        assert!(h.send(Event::TimerFired(timer)).is_empty());
        assert_eq!(h.controller.state(), SessionState::AwaitingReply);
    }

    #[test]
    fn test_capture_and_playback_never_overlap_across_a_long_session() {
        let mut h = Harness::new();
        h.send(Event::Start);
        let mut clock = 0;
        for round in 0..5 {
            clock += 1500;
            h.at(clock);
            h.hear(&format!("utterance {round}"));
            h.reply(Ok(Reply::new("reply")));
            // A stray callback from the microphone while speaking.
            let stale = h.capture_ticket();
            h.send(Event::Capture {
                ticket: stale,
                event: CaptureEvent::Ended,
            });
            h.finish_playback();
            let timer = h.restart_ticket();
            h.send(Event::TimerFired(timer));
        }
        assert_eq!(h.turns().len(), 10);
        assert_eq!(h.controller.state(), SessionState::Listening);
    }

    #[test]
    fn test_cancel_playback_while_speaking_resumes_listening() {
        let mut h = Harness::new();
        h.send(Event::Start);
        h.hear("hello");
        h.reply(Ok(Reply::new("a long answer")));
        assert_eq!(h.controller.state(), SessionState::Speaking);

        let commands = h.send(Event::CancelPlayback);

        assert_eq!(commands[0], Command::CancelPlayback);
        assert_eq!(h.controller.state(), SessionState::Listening);
        assert!(!h.controller.playback_active());
        assert!(!h.controller.capture_active());
        assert!(commands.iter().any(|c| matches!(
            c,
            Command::ScheduleRestart { delay, .. } if *delay == Duration::from_millis(1000)
        )));

        // The silenced playback may still report its end.
        let stale = h.speak_ticket();
        assert!(h
            .send(Event::Playback {
                ticket: stale,
                event: PlaybackEvent::Ended,
            })
            .is_empty());
    }

    #[test]
    fn test_cancel_playback_of_typed_reply_goes_idle() {
        let mut h = Harness::new();
        h.send(Event::SetOutputMode(OutputMode::Voice));
        h.send(Event::SubmitText("hello".into()));
        h.reply(Ok(Reply::new("hi")));
        assert_eq!(h.controller.state(), SessionState::Speaking);

        h.send(Event::CancelPlayback);

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.turns().len(), 2);
    }

    #[test]
    fn test_cancel_playback_when_silent_does_nothing() {
        let mut h = Harness::new();
        assert!(h.send(Event::CancelPlayback).is_empty());
        h.send(Event::Start);
        assert!(h.send(Event::CancelPlayback).is_empty());
        assert_eq!(h.controller.state(), SessionState::Listening);
    }
}
