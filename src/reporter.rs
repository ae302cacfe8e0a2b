use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::log_book::LogEntry;
use crate::state::RunState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Where the human watching the run sees what is going on.
pub trait StatusReporter {
    fn notify(&self, level: NoticeLevel, message: &str);

    fn log(&self, entry: &LogEntry);

    fn state_changed(&self, state: &RunState);

    /// `None` clears the countdown display.
    fn countdown(&self, remaining: Option<Duration>);
}

/// Reporter for headless use: everything goes to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info | NoticeLevel::Success => info!(?level, "{message}"),
            NoticeLevel::Warning => warn!("{message}"),
            NoticeLevel::Error => error!("{message}"),
        }
    }

    fn log(&self, _entry: &LogEntry) {}

    fn state_changed(&self, state: &RunState) {
        info!(
            active = state.active,
            retries = state.retry_count,
            outcome = %state.submit_outcome,
            "state changed"
        );
    }

    fn countdown(&self, remaining: Option<Duration>) {
        if let Some(remaining) = remaining {
            info!(seconds = remaining.as_secs(), "activation countdown");
        }
    }
}
