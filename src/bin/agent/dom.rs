use anyhow::Result;
use clap::Args;
use headless_chrome::Tab;
use portal_autosubmit::inspector::{
    ControlCandidate, LabelMatcher, PageInspector, TableRow, pick_control, pick_row_link,
};
use portal_autosubmit::navigator::PageTransport;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// CSS selectors for the portal's markup. Only this module knows them.
#[derive(Debug, Clone, Args)]
pub struct DomSelectors {
    /// Interactive controls considered for the submit label.
    #[arg(long, env = "PORTAL_CONTROL_SELECTOR", default_value = "a.btn")]
    pub control_selector: String,

    #[arg(long, env = "PORTAL_SUCCESS_SELECTOR", default_value = ".alert-success")]
    pub success_selector: String,

    /// Wizard steps; the one carrying both `submitted` and `active` marks a
    /// sent request.
    #[arg(long, env = "PORTAL_STEP_SELECTOR", default_value = ".wizard .step, .steps li")]
    pub step_selector: String,

    #[arg(long, env = "PORTAL_ERROR_SELECTOR", default_value = ".alert-danger, .alert-error")]
    pub error_selector: String,

    #[arg(long, env = "PORTAL_RESULTS_ROW_SELECTOR", default_value = "table tbody tr")]
    pub results_row_selector: String,
}

/// The driven Chrome tab, seen as the current page.
///
/// Queries are plain reads. A failed evaluation reads as "not there".
pub struct ChromePage {
    tab: Arc<Tab>,
    selectors: DomSelectors,
    reload_delay: Duration,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>, selectors: DomSelectors, reload_delay: Duration) -> Self {
        Self {
            tab,
            selectors,
            reload_delay,
        }
    }

    pub fn current_url(&self) -> String {
        match self.tab.evaluate("window.location.href", false) {
            Ok(result) => result
                .value
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or_else(|| self.tab.get_url()),
            Err(_) => self.tab.get_url(),
        }
    }

    /// Runs a script that returns `JSON.stringify(...)` and decodes it.
    fn query<T: DeserializeOwned>(&self, script: &str) -> Option<T> {
        let result = match self.tab.evaluate(script, false) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "page query failed");
                return None;
            }
        };
        let raw = result.value.and_then(|v| v.as_str().map(String::from))?;
        serde_json::from_str(&raw)
            .map_err(|e| warn!(error = %e, "page query returned unexpected data"))
            .ok()
    }

    fn controls(&self) -> Vec<ControlCandidate> {
        let script = format!(
            r#"JSON.stringify([...document.querySelectorAll({sel})].map(el => ({{
                text: (el.textContent || '').trim(),
                href: el.getAttribute('href')
            }})))"#,
            sel = js_string(&self.selectors.control_selector)
        );
        self.query(&script).unwrap_or_default()
    }

    fn rows(&self) -> Vec<TableRow> {
        let script = format!(
            r#"JSON.stringify([...document.querySelectorAll({sel})].map(tr => ({{
                cells: [...tr.cells].map(td => {{
                    const a = td.querySelector('a[href]');
                    return {{ text: (td.textContent || '').trim(), link: a ? a.getAttribute('href') : null }};
                }})
            }})))"#,
            sel = js_string(&self.selectors.results_row_selector)
        );
        self.query(&script).unwrap_or_default()
    }
}

impl PageInspector for ChromePage {
    fn find_action_control(&self, label: &str, matcher: LabelMatcher) -> Option<String> {
        let controls = self.controls();
        pick_control(&controls, label, matcher).map(String::from)
    }

    fn find_success_indicator(&self) -> bool {
        let script = format!(
            r#"JSON.stringify(!!document.querySelector({success}) ||
                [...document.querySelectorAll({step})].some(el =>
                    el.classList.contains('submitted') && el.classList.contains('active')))"#,
            success = js_string(&self.selectors.success_selector),
            step = js_string(&self.selectors.step_selector)
        );
        self.query(&script).unwrap_or(false)
    }

    fn find_failure_indicator(&self, pattern: &str) -> bool {
        let script = format!(
            r#"JSON.stringify([...document.querySelectorAll({sel})].map(el => (el.textContent || '').trim()))"#,
            sel = js_string(&self.selectors.error_selector)
        );
        let banners: Vec<String> = self.query(&script).unwrap_or_default();
        !pattern.is_empty() && banners.iter().any(|b| b.contains(pattern))
    }

    fn scan_results_table(
        &self,
        match_column: usize,
        match_value: &str,
        action_column: usize,
    ) -> Option<String> {
        let rows = self.rows();
        pick_row_link(&rows, match_column, match_value, action_column).map(String::from)
    }
}

impl PageTransport for ChromePage {
    fn assign(&self, url: &str) -> Result<()> {
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }

    fn reload(&self) -> Result<()> {
        std::thread::sleep(self.reload_delay);
        self.tab.reload(false, None)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }
}

/// Quotes a value for splicing into a script.
fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}
