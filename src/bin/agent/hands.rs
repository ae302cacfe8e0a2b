use anyhow::{Context, Result, anyhow};
use clap::Args;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Args)]
pub struct BrowserOptions {
    /// DevTools port of an already running Chrome to attach to.
    #[arg(long, env = "CHROME_DEBUG_PORT", default_value_t = 9222)]
    pub debug_port: u16,

    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Profile used when Chrome has to be launched. The portal login lives
    /// here between runs.
    #[arg(long, env = "CHROME_PROFILE_DIR")]
    pub profile_dir: Option<PathBuf>,
}

/// The browser and the one tab the automation drives.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    pub fn launch(options: &BrowserOptions) -> Result<Self> {
        // Attaching keeps the operator's own, already authenticated, window.
        let endpoint = format!("http://127.0.0.1:{}", options.debug_port);
        info!(%endpoint, "attempting to attach to a running Chrome");
        if let Ok(browser) = Browser::connect(endpoint) {
            info!("attached to existing Chrome");
            let existing = {
                let tabs = browser.get_tabs();
                let tabs = tabs
                    .lock()
                    .map_err(|e| anyhow!("tab list lock poisoned: {e}"))?;
                tabs.first().cloned()
            };
            let tab = match existing {
                Some(tab) => {
                    info!("using the first open tab");
                    tab
                }
                None => {
                    info!("no tabs open, creating one");
                    browser.new_tab()?
                }
            };
            return Ok(Self {
                _browser: browser,
                tab,
            });
        }

        warn!("could not attach, launching Chrome with the agent profile");
        let chrome_path = match &options.chrome_path {
            Some(path) => path.clone(),
            None => find_chrome()?,
        };
        let profile = match &options.profile_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?.join("agent_profile"),
        };
        if !profile.exists() {
            info!(profile = %profile.display(), "creating agent profile, log into the portal once");
            std::fs::create_dir_all(&profile)
                .with_context(|| format!("creating {}", profile.display()))?;
        }

        let launch = LaunchOptions {
            headless: false,
            path: Some(chrome_path),
            user_data_dir: Some(profile),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--disable-infobars"),
                OsStr::new("--password-store=basic"),
            ],
            // The agent can sit idle for hours waiting for an activation.
            idle_browser_timeout: std::time::Duration::from_secs(24 * 60 * 60),
            ..Default::default()
        };

        let browser = Browser::new(launch).map_err(|e| anyhow!("browser launch failed: {e}"))?;
        let tab = browser.new_tab()?;
        info!("Chrome ready");

        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

fn find_chrome() -> Result<PathBuf> {
    let candidates = [
        r"C:\Program Files\Google\Chrome\Application\chrome.exe".to_string(),
        r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe".to_string(),
        format!(
            r"C:\Users\{}\AppData\Local\Google\Chrome\Application\chrome.exe",
            std::env::var("USERNAME").unwrap_or_else(|_| "Default".to_string())
        ),
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome".to_string(),
        "/usr/bin/google-chrome".to_string(),
        "/usr/bin/google-chrome-stable".to_string(),
        "/usr/bin/chromium".to_string(),
        "/usr/bin/chromium-browser".to_string(),
    ];

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| {
            anyhow!("Chrome executable not found. Install Google Chrome or pass --chrome-path.")
        })
}
