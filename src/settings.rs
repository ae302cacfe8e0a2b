use std::path::PathBuf;

use clap::Args;
use url::Url;

use crate::error::ConfigError;
use crate::inspector::LabelMatcher;

pub const DEFAULT_BASE_URL: &str = "https://servizifederati.regione.emilia-romagna.it/fesr2020/";
pub const DEFAULT_SELECTION_PATH: &str = "soggetti/selezione";
pub const DEFAULT_SUBMIT_LABEL: &str = "Invia domanda";
pub const DEFAULT_FAILURE_PATTERN: &str = "Soggetto non valido";
pub const DEFAULT_MAX_RETRIES: u32 = 20;
pub const DEFAULT_LOG_CAP: usize = 200;

/// Portal-wide settings, fixed for the lifetime of the agent process.
///
/// Everything here can come from a flag or from the environment (a `.env`
/// file is loaded first).
#[derive(Debug, Clone, Args)]
pub struct PortalSettings {
    /// Root of the portal; anything outside it is ignored.
    #[arg(long, env = "PORTAL_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Subject selection listing, relative to the base url.
    #[arg(long, env = "PORTAL_SELECTION_PATH", default_value = DEFAULT_SELECTION_PATH)]
    pub selection_path: String,

    /// Visible text of the submission control on the detail page.
    #[arg(long, env = "PORTAL_SUBMIT_LABEL", default_value = DEFAULT_SUBMIT_LABEL)]
    pub submit_label: String,

    #[arg(long, value_enum, env = "PORTAL_LABEL_MATCH", default_value_t = LabelMatcher::ExactOrFirstWord)]
    pub label_match: LabelMatcher,

    /// Text of the error banner shown when the active subject is rejected.
    #[arg(long, env = "PORTAL_FAILURE_PATTERN", default_value = DEFAULT_FAILURE_PATTERN)]
    pub failure_pattern: String,

    /// Results table column holding the subject identifier.
    #[arg(long, env = "PORTAL_SUBJECT_COLUMN", default_value_t = 1)]
    pub subject_column: usize,

    /// Results table column holding the per-subject action link.
    #[arg(long, env = "PORTAL_ACTION_COLUMN", default_value_t = 0)]
    pub action_column: usize,

    #[arg(long, env = "PORTAL_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Pause before each reload of the same page.
    #[arg(long, env = "PORTAL_RELOAD_DELAY_MS", default_value_t = 1500)]
    pub reload_delay_ms: u64,

    #[arg(long, env = "PORTAL_LOG_CAP", default_value_t = DEFAULT_LOG_CAP)]
    pub log_cap: usize,

    /// Where state.json lives. Defaults to the platform data directory.
    #[arg(long, env = "PORTAL_STATE_DIR")]
    pub state_dir: Option<PathBuf>,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            selection_path: DEFAULT_SELECTION_PATH.to_string(),
            submit_label: DEFAULT_SUBMIT_LABEL.to_string(),
            label_match: LabelMatcher::ExactOrFirstWord,
            failure_pattern: DEFAULT_FAILURE_PATTERN.to_string(),
            subject_column: 1,
            action_column: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            reload_delay_ms: 1500,
            log_cap: DEFAULT_LOG_CAP,
            state_dir: None,
        }
    }
}

impl PortalSettings {
    pub fn urls(&self) -> Result<PortalUrls, ConfigError> {
        PortalUrls::new(&self.base_url, &self.selection_path)
    }

    pub fn resolved_state_dir(&self) -> PathBuf {
        match &self.state_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("portal-autosubmit"),
        }
    }
}

/// The portal's fixed and derived page addresses.
///
/// All comparisons are case-insensitive and ignore a trailing slash, the
/// portal serves the same page for both spellings.
#[derive(Debug, Clone)]
pub struct PortalUrls {
    base: Url,
    selection: Url,
}

impl PortalUrls {
    pub fn new(base_url: &str, selection_path: &str) -> Result<Self, ConfigError> {
        let mut base =
            Url::parse(base_url).map_err(|_| ConfigError::InvalidBaseUrl(base_url.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let selection = base
            .join(selection_path.trim_start_matches('/'))
            .map_err(|_| ConfigError::InvalidBaseUrl(base_url.to_string()))?;
        Ok(Self { base, selection })
    }

    pub fn base(&self) -> &str {
        self.base.as_str()
    }

    pub fn selection_url(&self) -> &str {
        self.selection.as_str()
    }

    pub fn detail_url(&self, request_id: &str) -> String {
        format!("{}richieste/common/{}/dettaglio", self.base, request_id)
    }

    /// The base itself or anything below it; a sibling path that merely
    /// shares the prefix is not on the portal.
    pub fn is_on_portal(&self, current: &str) -> bool {
        let current = normalize(current);
        let root = normalize(self.base.as_str());
        current == root || current.starts_with(&format!("{root}/"))
    }

    pub fn is_base(&self, current: &str) -> bool {
        same_page(current, self.base.as_str())
    }

    pub fn is_selection(&self, current: &str) -> bool {
        same_page(current, self.selection.as_str())
    }

    pub fn is_detail(&self, current: &str, request_id: &str) -> bool {
        same_page(current, &self.detail_url(request_id))
    }

    /// Resolves a link found on the page against `against`. Relative links
    /// that cannot be joined are dropped.
    pub fn resolve(against: &str, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        let root = Url::parse(against).ok()?;
        root.join(href).ok().map(String::from)
    }

    pub fn resolve_against_base(&self, href: &str) -> Option<String> {
        Self::resolve(self.base.as_str(), href)
    }
}

pub fn same_page(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

fn normalize(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> PortalUrls {
        PortalSettings::default().urls().unwrap()
    }

    #[test]
    fn detail_url_is_derived_from_base_and_request() {
        assert_eq!(
            urls().detail_url("46317"),
            "https://servizifederati.regione.emilia-romagna.it/fesr2020/richieste/common/46317/dettaglio"
        );
    }

    #[test]
    fn comparisons_ignore_case_and_trailing_slash() {
        let urls = urls();
        assert!(urls.is_base("https://servizifederati.regione.Emilia-Romagna.it/fesr2020"));
        assert!(urls.is_detail(
            "https://servizifederati.regione.emilia-romagna.it/FESR2020/richieste/common/46317/dettaglio/",
            "46317"
        ));
        assert!(!urls.is_detail(
            "https://servizifederati.regione.emilia-romagna.it/fesr2020/richieste/common/1/dettaglio",
            "46317"
        ));
    }

    #[test]
    fn portal_membership_is_a_prefix_check() {
        let urls = urls();
        assert!(urls.is_on_portal(
            "https://servizifederati.regione.emilia-romagna.it/fesr2020/home"
        ));
        assert!(!urls.is_on_portal("https://example.org/fesr2020/"));
    }

    #[test]
    fn sibling_path_sharing_the_prefix_is_off_portal() {
        let urls = urls();
        assert!(urls.is_on_portal(
            "https://servizifederati.regione.emilia-romagna.it/fesr2020"
        ));
        assert!(!urls.is_on_portal(
            "https://servizifederati.regione.emilia-romagna.it/fesr2020-other/x"
        ));
    }

    #[test]
    fn base_without_trailing_slash_is_normalized() {
        let urls = PortalUrls::new("https://portal.test/app", "list").unwrap();
        assert_eq!(urls.base(), "https://portal.test/app/");
        assert_eq!(urls.selection_url(), "https://portal.test/app/list");
    }

    #[test]
    fn links_resolve_against_the_page() {
        let urls = urls();
        assert_eq!(
            urls.resolve_against_base("/sel/77").as_deref(),
            Some("https://servizifederati.regione.emilia-romagna.it/sel/77")
        );
        assert_eq!(PortalUrls::resolve("https://portal.test/a/b", "  "), None);
    }

    #[test]
    fn garbage_base_is_rejected() {
        assert!(matches!(
            PortalUrls::new("not a url", "x"),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }
}
