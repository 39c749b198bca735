use crate::domain::models::TimerState;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Running,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
        }
    }
}

/// What a detail view renders for one task timer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    pub session_start: Option<String>,
    pub accumulated_seconds: f64,
    pub last_session_seconds: f64,
    pub total_seconds: f64,
    pub display: String,
}

/// In-memory timing session for a single task. `accumulated_seconds` only
/// moves on `stop` or when a new baseline is substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerSession {
    state: TimerState,
}

impl TimerSession {
    pub fn from_state(state: TimerState) -> Self {
        Self { state }
    }

    pub fn from_baseline(accumulated_seconds: f64) -> Self {
        Self::from_state(TimerState::idle(accumulated_seconds))
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn phase(&self) -> TimerPhase {
        if self.state.is_running {
            TimerPhase::Running
        } else {
            TimerPhase::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running
    }

    /// Returns `false` when a session was already running.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.state.is_running {
            return false;
        }
        self.state.is_running = true;
        self.state.session_start = Some(now);
        true
    }

    /// Commits the running session and returns its length in seconds, or
    /// `None` when nothing was running.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Option<f64> {
        if !self.state.is_running {
            return None;
        }
        let session_seconds = self.session_seconds(now);
        self.state.accumulated_seconds += session_seconds;
        self.state.last_session_seconds = session_seconds;
        self.state.is_running = false;
        self.state.session_start = None;
        Some(session_seconds)
    }

    pub fn session_seconds(&self, now: DateTime<Utc>) -> f64 {
        self.state
            .session_start
            .map(|start| seconds_between(start, now))
            .unwrap_or(0.0)
    }

    pub fn total_seconds(&self, now: DateTime<Utc>) -> f64 {
        self.state.accumulated_seconds + self.session_seconds(now)
    }

    /// Remote-wins: the fetched total replaces the baseline outright. A running
    /// session keeps its start instant and is counted on top.
    pub fn replace_baseline(&mut self, accumulated_seconds: f64) {
        self.state.accumulated_seconds = accumulated_seconds;
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> TimerSnapshot {
        let total_seconds = self.total_seconds(now);
        TimerSnapshot {
            phase: self.phase(),
            session_start: self.state.session_start.map(|value| value.to_rfc3339()),
            accumulated_seconds: self.state.accumulated_seconds,
            last_session_seconds: self.state.last_session_seconds,
            total_seconds,
            display: format_elapsed(total_seconds),
        }
    }
}

/// Non-negative seconds from `from` to `to`, at millisecond resolution.
pub fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let millis = (to - from).num_milliseconds().max(0);
    millis as f64 / 1000.0
}

/// `HH:MM:SS` with minutes and seconds always padded and hours padded to at
/// least two digits.
pub fn format_elapsed(seconds: f64) -> String {
    let total_seconds = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
