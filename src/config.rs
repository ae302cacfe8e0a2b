use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// User-editable automation target.
///
/// The controller never navigates while `request_id` is absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationConfig {
    pub subject_id: Option<String>,
    pub request_id: Option<String>,
    pub activation_at: Option<DateTime<Local>>,
}

impl AutomationConfig {
    /// Builds a config from raw form/CLI input. Blank fields mean "absent",
    /// except the request id which must be present and numeric.
    pub fn from_input(
        subject_id: &str,
        request_id: &str,
        activation_at: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            subject_id: non_blank(subject_id),
            request_id: Some(parse_request_id(request_id)?),
            activation_at: parse_activation(activation_at)?,
        })
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject_id.as_deref()
    }
}

pub fn parse_request_id(raw: &str) -> Result<String, ConfigError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(ConfigError::EmptyRequestId);
    }
    if !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::InvalidRequestId(id.to_string()));
    }
    Ok(id.to_string())
}

/// Accepts RFC 3339 or a local `YYYY-MM-DDTHH:MM[:SS]` (a space works in
/// place of the `T`). Blank input clears the activation.
pub fn parse_activation(raw: &str) -> Result<Option<DateTime<Local>>, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(instant.with_timezone(&Local)));
    }
    const LOCAL_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    LOCAL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).single())
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidActivation(raw.to_string()))
}

fn non_blank(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn blank_subject_means_absent() {
        let config = AutomationConfig::from_input("  ", "46317", "").unwrap();
        assert_eq!(config.subject_id(), None);
        assert_eq!(config.request_id(), Some("46317"));
        assert_eq!(config.activation_at, None);
    }

    #[test]
    fn request_id_is_required_and_numeric() {
        assert_eq!(
            AutomationConfig::from_input("", " ", ""),
            Err(ConfigError::EmptyRequestId)
        );
        assert_eq!(
            parse_request_id("46a17"),
            Err(ConfigError::InvalidRequestId("46a17".into()))
        );
    }

    #[test]
    fn local_activation_formats_parse() {
        let at = parse_activation("2030-03-01T09:30").unwrap().unwrap();
        assert_eq!((at.year(), at.month(), at.day()), (2030, 3, 1));
        assert_eq!((at.hour(), at.minute(), at.second()), (9, 30, 0));

        let at = parse_activation("2030-03-01 09:30:15").unwrap().unwrap();
        assert_eq!(at.second(), 15);
    }

    #[test]
    fn rfc3339_activation_parses() {
        let at = parse_activation("2030-03-01T09:30:00+00:00").unwrap().unwrap();
        assert_eq!(at.timestamp(), 1_898_587_800);
    }

    #[test]
    fn nonsense_activation_is_rejected() {
        assert_eq!(
            parse_activation("tomorrow morning"),
            Err(ConfigError::InvalidActivation("tomorrow morning".into()))
        );
    }
}
