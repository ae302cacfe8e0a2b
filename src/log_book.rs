use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Local>,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Bounded, persisted operator log. Stored oldest-first, shown newest-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBook {
    entries: VecDeque<LogEntry>,
    cap: usize,
}

impl LogBook {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn from_entries(entries: Vec<LogEntry>, cap: usize) -> Self {
        let mut book = Self::new(cap);
        for entry in entries {
            book.push_entry(entry);
        }
        book
    }

    pub fn push(&mut self, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            at: Local::now(),
            message: message.into(),
        };
        self.push_entry(entry.clone());
        entry
    }

    fn push_entry(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    pub fn entries_newest_first(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().rev()
    }

    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
