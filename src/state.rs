use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    #[default]
    Unknown,
    Success,
    Uncertain,
}

impl std::fmt::Display for SubmitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SubmitOutcome::Unknown => "unknown",
            SubmitOutcome::Success => "success",
            SubmitOutcome::Uncertain => "uncertain",
        })
    }
}

/// Result of counting one more "expected element not found".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    TryAgain,
    Exhausted,
}

/// Run state reloaded from the store on every page load.
///
/// `active == false` covers both a user pause and a terminal halt; `halted`
/// tells them apart so a scheduled activation never revives a halt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunState {
    pub active: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub submit_outcome: SubmitOutcome,
    pub halted: bool,
}

impl RunState {
    pub fn fresh(max_retries: u32) -> Self {
        Self {
            active: true,
            retry_count: 0,
            max_retries,
            submit_outcome: SubmitOutcome::Unknown,
            halted: false,
        }
    }

    /// Counts one miss. Past the cap the run is halted on the spot.
    pub fn record_miss(&mut self) -> RetryVerdict {
        self.retry_count = self.retry_count.saturating_add(1);
        if self.retry_count > self.max_retries {
            self.halt();
            RetryVerdict::Exhausted
        } else {
            RetryVerdict::TryAgain
        }
    }

    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
    }

    pub fn halt(&mut self) {
        self.active = false;
        self.halted = true;
    }

    pub fn pause(&mut self) {
        self.active = false;
    }

    /// Manual restart: clears every terminal marker.
    pub fn restart(&mut self) {
        self.active = true;
        self.halted = false;
        self.retry_count = 0;
        self.submit_outcome = SubmitOutcome::Unknown;
    }

    pub fn confirm_success(&mut self) {
        self.submit_outcome = SubmitOutcome::Success;
        self.retry_count = 0;
        self.halt();
    }

    pub fn can_auto_activate(&self) -> bool {
        !self.active && !self.halted && self.submit_outcome != SubmitOutcome::Success
    }
}

/// Subject identifier to resolved detail-page url.
///
/// Keys are only ever added or overwritten; removal is a full reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectUrlCache(BTreeMap<String, String>);

impl SubjectUrlCache {
    pub fn get(&self, subject: &str) -> Option<&str> {
        self.0.get(subject).map(String::as_str)
    }

    /// Returns the previous url when the entry was refreshed.
    pub fn insert(&mut self, subject: &str, url: String) -> Option<String> {
        self.0.insert(subject.to_string(), url)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misses_halt_only_past_the_cap() {
        let mut state = RunState::fresh(2);
        assert_eq!(state.record_miss(), RetryVerdict::TryAgain);
        assert_eq!(state.record_miss(), RetryVerdict::TryAgain);
        assert!(state.active);
        assert_eq!(state.record_miss(), RetryVerdict::Exhausted);
        assert!(!state.active);
        assert!(state.halted);
        assert_eq!(state.retry_count, 3);
    }

    #[test]
    fn success_is_terminal_until_restart() {
        let mut state = RunState::fresh(5);
        state.retry_count = 4;
        state.confirm_success();
        assert_eq!(state.retry_count, 0);
        assert!(!state.can_auto_activate());

        state.restart();
        assert!(state.active);
        assert_eq!(state.submit_outcome, SubmitOutcome::Unknown);
    }

    #[test]
    fn a_pause_can_be_auto_activated_but_a_halt_cannot() {
        let mut paused = RunState::fresh(5);
        paused.pause();
        assert!(paused.can_auto_activate());

        let mut halted = RunState::fresh(5);
        halted.halt();
        assert!(!halted.can_auto_activate());
    }

    #[test]
    fn cache_refresh_overwrites_and_reports_previous() {
        let mut cache = SubjectUrlCache::default();
        assert_eq!(cache.insert("04026360364", "https://a/1".into()), None);
        assert_eq!(
            cache.insert("04026360364", "https://a/2".into()).as_deref(),
            Some("https://a/1")
        );
        assert_eq!(cache.get("04026360364"), Some("https://a/2"));
        assert_eq!(cache.len(), 1);
    }
}
