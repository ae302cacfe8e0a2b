//! One-shot navigation intents.
//!
//! An intent is recorded right before a page transition and consumed by the
//! first load that looks for it, so that load can tell whether the transition
//! landed where it was meant to.

use std::collections::HashMap;

use chrono::{DateTime, Local};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationIntent {
    DetailPage,
    SelectionPage,
    Submission,
}

impl NavigationIntent {
    pub const ALL: [NavigationIntent; 3] = [
        NavigationIntent::DetailPage,
        NavigationIntent::SelectionPage,
        NavigationIntent::Submission,
    ];
}

impl std::fmt::Display for NavigationIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            NavigationIntent::DetailPage => "detail-page attempt",
            NavigationIntent::SelectionPage => "selection-page attempt",
            NavigationIntent::Submission => "submission attempt",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIntent {
    pub kind: NavigationIntent,
    pub target: String,
    pub recorded_at: DateTime<Local>,
}

/// Storage scoped to one navigation sequence.
///
/// `take` is read-and-clear: a recorded intent is handed out at most once.
pub trait IntentStore {
    fn record(&mut self, kind: NavigationIntent, target: &str);
    fn take(&mut self, kind: NavigationIntent) -> Option<PendingIntent>;
    fn clear(&mut self);
}

/// Intents kept for the life of one browser session.
#[derive(Debug, Default)]
pub struct SessionIntents {
    pending: HashMap<NavigationIntent, PendingIntent>,
}

impl SessionIntents {
    pub fn is_pending(&self, kind: NavigationIntent) -> bool {
        self.pending.contains_key(&kind)
    }
}

impl IntentStore for SessionIntents {
    fn record(&mut self, kind: NavigationIntent, target: &str) {
        self.pending.insert(
            kind,
            PendingIntent {
                kind,
                target: target.to_string(),
                recorded_at: Local::now(),
            },
        );
    }

    fn take(&mut self, kind: NavigationIntent) -> Option<PendingIntent> {
        self.pending.remove(&kind)
    }

    fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_hands_out_an_intent_once() {
        let mut intents = SessionIntents::default();
        intents.record(NavigationIntent::DetailPage, "https://p/d");

        let taken = intents.take(NavigationIntent::DetailPage).unwrap();
        assert_eq!(taken.target, "https://p/d");
        assert!(intents.take(NavigationIntent::DetailPage).is_none());
    }

    #[test]
    fn kinds_are_independent() {
        let mut intents = SessionIntents::default();
        intents.record(NavigationIntent::Submission, "https://p/s");
        intents.record(NavigationIntent::DetailPage, "https://p/s");

        assert!(intents.take(NavigationIntent::Submission).is_some());
        assert!(intents.is_pending(NavigationIntent::DetailPage));
        assert!(!intents.is_pending(NavigationIntent::SelectionPage));

        intents.clear();
        assert!(NavigationIntent::ALL.iter().all(|k| !intents.is_pending(*k)));
    }
}
