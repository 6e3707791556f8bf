use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};

/// A clock reading handed to the controller with every event.
///
/// `instant` drives debouncing, `wall` stamps transcript turns. Keeping both
/// outside the controller lets tests replay any timeline without sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub instant: Instant,
    pub wall: DateTime<Utc>,
}

impl Moment {
    pub fn new(instant: Instant, wall: DateTime<Utc>) -> Self {
        Self { instant, wall }
    }

    pub fn now() -> Self {
        Self::new(Instant::now(), Utc::now())
    }

    /// The reading `delay` later than this one.
    pub fn after(&self, delay: Duration) -> Self {
        let wall = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| self.wall.checked_add_signed(d))
            .unwrap_or(self.wall);
        Self::new(self.instant + delay, wall)
    }
}

/// Identifies one start/stop lifecycle of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SessionToken(u64);

impl SessionToken {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Stamped on every capture attempt, playback, request and timer the
/// controller dispatches. A callback is honoured only while its ticket is
/// the outstanding one of its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub token: SessionToken,
    pub seq: u64,
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.token, self.seq)
    }
}
