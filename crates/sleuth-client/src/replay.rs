//! Offline replay of recorded realtime transcripts.
//!
//! A transcript is JSON lines, one pushed frame per line:
//!
//! ```text
//! # comment
//! {"at_ms": 0, "frame": {"type": "game_public_update", "data": {...}}}
//! {"at_ms": 1500, "frame": {"type": "timer_tick", "remaining": 4}}
//! ```
//!
//! Entries are fed through a fresh [`Session`] on a virtual clock. No REST
//! calls are answered, so the outcome reflects pushed state only.

use std::{
    ops::{Add, Sub},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Deserialize;
use serde_json::Value;
use sleuth_core::{
    Environment, Session, SessionAction, SessionConfig, SessionError, SessionEvent,
    SessionIdentity, SessionView,
};
use thiserror::Error;
use tracing::{debug, trace};

/// One recorded frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TranscriptEntry {
    /// Milliseconds since the start of the recording.
    #[serde(default)]
    pub at_ms: u64,
    /// Frame exactly as the server pushed it.
    pub frame: Value,
    /// Source line, 1-based.
    #[serde(skip)]
    pub line: usize,
}

/// Errors from parsing or replaying a transcript.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// A line is not a valid entry.
    #[error("line {line}: {source}")]
    Parse {
        /// Source line, 1-based.
        line: usize,
        /// Decode failure.
        source: serde_json::Error,
    },

    /// The session failed fatally.
    #[error("session failed: {0}")]
    Session(#[from] SessionError),

    /// An entry is timestamped before the one preceding it.
    #[error("line {line}: timestamp goes backwards")]
    TimeTravel {
        /// Source line, 1-based.
        line: usize,
    },
}

/// Parse a transcript. Blank lines and `#` comments are skipped.
pub fn parse_transcript(text: &str) -> Result<Vec<TranscriptEntry>, ReplayError> {
    text.lines()
        .enumerate()
        .map(|(i, raw)| (i + 1, raw.trim()))
        .filter(|(_, raw)| !raw.is_empty() && !raw.starts_with('#'))
        .map(|(line, raw)| {
            let mut entry: TranscriptEntry = serde_json::from_str(raw)
                .map_err(|source| ReplayError::Parse { line, source })?;
            entry.line = line;
            Ok(entry)
        })
        .collect()
}

/// Instant on the replay clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplayInstant(Duration);

impl Sub for ReplayInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

impl Add<Duration> for ReplayInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + rhs)
    }
}

/// Virtual clock that only moves when the transcript says so.
#[derive(Debug, Clone, Default)]
pub struct ReplayClock {
    millis: Arc<AtomicU64>,
}

impl ReplayClock {
    /// Clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    fn millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

impl Environment for ReplayClock {
    type Instant = ReplayInstant;

    fn now(&self) -> ReplayInstant {
        ReplayInstant(Duration::from_millis(self.millis()))
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.millis.fetch_add(millis, Ordering::SeqCst);
        std::future::ready(())
    }
}

/// Result of a replay.
#[derive(Debug)]
pub struct ReplayOutcome {
    /// Session view after the last entry.
    pub view: SessionView,
    /// Every action the session emitted.
    pub actions: Vec<SessionAction>,
    /// Frames fed.
    pub frames: usize,
}

/// Replay `entries` through a fresh session.
///
/// The channel is connected and opened up front; any reconnect the session
/// asks for is treated as succeeding immediately. Before each frame the
/// clock moves to the entry's timestamp and the session is ticked.
pub fn replay(
    entries: &[TranscriptEntry],
    identity: SessionIdentity,
    config: SessionConfig,
) -> Result<ReplayOutcome, ReplayError> {
    let clock = ReplayClock::new();
    let mut session = Session::new(clock.clone(), identity, config);
    let mut actions = Vec::new();

    feed(&mut session, SessionEvent::Connect, &mut actions)?;

    for entry in entries {
        if entry.at_ms < clock.millis() {
            return Err(ReplayError::TimeTravel { line: entry.line });
        }
        clock.set(entry.at_ms);
        feed(&mut session, SessionEvent::Tick, &mut actions)?;

        trace!(line = entry.line, at_ms = entry.at_ms, "replaying frame");
        feed(&mut session, SessionEvent::FrameReceived(entry.frame.to_string()), &mut actions)?;
    }

    debug!(frames = entries.len(), actions = actions.len(), "replay finished");
    Ok(ReplayOutcome { view: session.view(), actions, frames: entries.len() })
}

fn feed(
    session: &mut Session<ReplayClock>,
    event: SessionEvent,
    log: &mut Vec<SessionAction>,
) -> Result<(), ReplayError> {
    let mut pending = vec![event];
    while let Some(event) = pending.pop() {
        let actions = match session.handle(event) {
            Ok(actions) => actions,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                debug!(error = %e, "event rejected during replay");
                continue;
            },
        };
        if actions.iter().any(|a| matches!(a, SessionAction::OpenChannel { .. })) {
            pending.push(SessionEvent::ChannelOpened);
        }
        log.extend(actions);
    }
    Ok(())
}
