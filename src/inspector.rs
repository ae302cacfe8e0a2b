//! Read-only queries against the currently loaded page.
//!
//! Implementations never fail: missing structure is reported as `None` or
//! `false` and the controller decides what that means.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub trait PageInspector {
    /// Target link of the first interactive control whose text matches.
    fn find_action_control(&self, label: &str, matcher: LabelMatcher) -> Option<String>;

    fn find_success_indicator(&self) -> bool;

    /// Whether a styled error region contains `pattern`.
    fn find_failure_indicator(&self, pattern: &str) -> bool;

    /// Action link of the first results row whose `match_column` text equals
    /// `match_value`.
    fn scan_results_table(
        &self,
        match_column: usize,
        match_value: &str,
        action_column: usize,
    ) -> Option<String>;
}

/// How a control's visible text is compared with the wanted label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum LabelMatcher {
    Exact,
    /// Text starts with the label's first word.
    FirstWord,
    #[default]
    ExactOrFirstWord,
}

impl LabelMatcher {
    pub fn matches(self, text: &str, label: &str) -> bool {
        let text = text.trim();
        let label = label.trim();
        if label.is_empty() {
            return false;
        }
        let first_word = label.split_whitespace().next().unwrap_or(label);
        match self {
            LabelMatcher::Exact => text == label,
            LabelMatcher::FirstWord => text.starts_with(first_word),
            LabelMatcher::ExactOrFirstWord => text == label || text.starts_with(first_word),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCandidate {
    pub text: String,
    pub href: Option<String>,
}

impl ControlCandidate {
    pub fn new(text: &str, href: &str) -> Self {
        Self {
            text: text.to_string(),
            href: Some(href.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCell {
    pub text: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

impl TableRow {
    /// Convenience for building rows where only one cell carries a link.
    pub fn with_link(texts: &[&str], link_column: usize, link: &str) -> Self {
        let cells = texts
            .iter()
            .enumerate()
            .map(|(i, text)| TableCell {
                text: text.to_string(),
                link: (i == link_column).then(|| link.to_string()),
            })
            .collect();
        Self { cells }
    }
}

/// First matching control that actually carries a link.
pub fn pick_control<'a>(
    candidates: &'a [ControlCandidate],
    label: &str,
    matcher: LabelMatcher,
) -> Option<&'a str> {
    candidates
        .iter()
        .filter(|c| matcher.matches(&c.text, label))
        .find_map(|c| c.href.as_deref().filter(|href| !href.trim().is_empty()))
}

pub fn pick_row_link<'a>(
    rows: &'a [TableRow],
    match_column: usize,
    match_value: &str,
    action_column: usize,
) -> Option<&'a str> {
    let wanted = match_value.trim();
    rows.iter()
        .find(|row| {
            row.cells
                .get(match_column)
                .is_some_and(|cell| cell.text.trim() == wanted)
        })
        .and_then(|row| row.cells.get(action_column))
        .and_then(|cell| cell.link.as_deref())
}

/// A page captured as plain data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub controls: Vec<ControlCandidate>,
    pub success_marker: bool,
    pub error_banners: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl PageInspector for PageSnapshot {
    fn find_action_control(&self, label: &str, matcher: LabelMatcher) -> Option<String> {
        pick_control(&self.controls, label, matcher).map(String::from)
    }

    fn find_success_indicator(&self) -> bool {
        self.success_marker
    }

    fn find_failure_indicator(&self, pattern: &str) -> bool {
        !pattern.is_empty() && self.error_banners.iter().any(|b| b.contains(pattern))
    }

    fn scan_results_table(
        &self,
        match_column: usize,
        match_value: &str,
        action_column: usize,
    ) -> Option<String> {
        pick_row_link(&self.rows, match_column, match_value, action_column).map(String::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_or_first_word_accepts_either_form() {
        let m = LabelMatcher::ExactOrFirstWord;
        assert!(m.matches("  Invia domanda ", "Invia domanda"));
        assert!(m.matches("Invia la domanda", "Invia domanda"));
        assert!(!m.matches("Annulla", "Invia domanda"));
    }

    #[test]
    fn exact_rejects_prefix_matches() {
        assert!(!LabelMatcher::Exact.matches("Invia la domanda", "Invia domanda"));
        assert!(LabelMatcher::FirstWord.matches("Invia la domanda", "Invia domanda"));
    }

    #[test]
    fn blank_label_matches_nothing() {
        assert!(!LabelMatcher::FirstWord.matches("anything", "   "));
    }

    #[test]
    fn control_without_link_is_skipped() {
        let controls = vec![
            ControlCandidate {
                text: "Invia domanda".into(),
                href: None,
            },
            ControlCandidate::new("Invia domanda", "/fesr2020/invio/123"),
        ];
        assert_eq!(
            pick_control(&controls, "Invia domanda", LabelMatcher::Exact),
            Some("/fesr2020/invio/123")
        );
        assert_eq!(
            pick_control(&controls[..1], "Invia domanda", LabelMatcher::Exact),
            None
        );
    }

    #[test]
    fn row_lookup_uses_the_match_column() {
        let rows = vec![
            TableRow::with_link(&["Seleziona", "01234567890"], 0, "/sel/1"),
            TableRow::with_link(&["Seleziona", "04026360364"], 0, "/sel/77"),
        ];
        assert_eq!(pick_row_link(&rows, 1, "04026360364", 0), Some("/sel/77"));
        assert_eq!(pick_row_link(&rows, 1, "99999999999", 0), None);
        assert_eq!(pick_row_link(&rows, 5, "04026360364", 0), None);
    }

    #[test]
    fn snapshot_failure_indicator_is_a_substring_check() {
        let page = PageSnapshot {
            error_banners: vec!["Errore: Soggetto non valido per la richiesta".into()],
            ..Default::default()
        };
        assert!(page.find_failure_indicator("Soggetto non valido"));
        assert!(!page.find_failure_indicator("Sessione scaduta"));
        assert!(!page.find_failure_indicator(""));
    }
}
