//! Operator-level operations: one page load end to end, start, stop,
//! scheduled activation, configuration edits.

use anyhow::Result;
use tracing::info;

use crate::config::AutomationConfig;
use crate::controller::{Action, Controller};
use crate::error::StoreError;
use crate::inspector::PageInspector;
use crate::intent::IntentStore;
use crate::navigator::{Navigator, PageTransport};
use crate::reporter::{NoticeLevel, StatusReporter};
use crate::settings::{PortalSettings, PortalUrls};
use crate::store::{PersistentState, StateStore};

/// Everything one page load needs, borrowed for its duration.
pub struct PageLoad<'a, S: StateStore, I: IntentStore + ?Sized> {
    pub settings: &'a PortalSettings,
    pub urls: &'a PortalUrls,
    pub state: &'a mut PersistentState<S>,
    pub intents: &'a mut I,
    pub reporter: &'a dyn StatusReporter,
}

impl<S: StateStore, I: IntentStore + ?Sized> PageLoad<'_, S, I> {
    /// Runs the controller on the current page and carries out its decision.
    pub fn run(
        &mut self,
        current_url: &str,
        page: &dyn PageInspector,
        transport: &dyn PageTransport,
    ) -> Result<Action> {
        let action = Controller::new(
            self.settings,
            self.urls,
            self.state,
            self.intents,
            self.reporter,
        )
        .on_page_load(current_url, page)?;

        let config = self.state.config();
        let mut navigator = Navigator::new(self.urls, config.request_id(), self.intents);
        match &action {
            Action::Navigate { url, purpose } => {
                let entry = self.state.append_log(format!("Navigating to: {url}"))?;
                self.reporter.log(&entry);
                navigator.go_to(transport, url, *purpose)?;
            }
            Action::Reload => navigator.reload(transport)?,
            Action::Idle(_) | Action::Halt(_) => {}
        }
        Ok(action)
    }
}

/// Manual (re)start: clears every terminal marker, the log, and any stale
/// intents from before the pause.
pub fn start<S: StateStore, I: IntentStore + ?Sized>(
    state: &mut PersistentState<S>,
    intents: &mut I,
    reporter: &dyn StatusReporter,
) -> Result<(), StoreError> {
    let mut run = state.run_state();
    run.restart();
    state.save_run_state(&run)?;
    state.clear_logs()?;
    intents.clear();
    announce(state, reporter, NoticeLevel::Info, "Automation started by the user.")?;
    reporter.state_changed(&run);
    Ok(())
}

pub fn stop<S: StateStore>(
    state: &mut PersistentState<S>,
    reporter: &dyn StatusReporter,
) -> Result<(), StoreError> {
    let mut run = state.run_state();
    run.pause();
    state.save_run_state(&run)?;
    announce(state, reporter, NoticeLevel::Info, "Automation stopped.")?;
    reporter.state_changed(&run);
    Ok(())
}

/// Fired by the activation timer. Only wakes a paused run; returns whether
/// anything changed.
pub fn activate_on_schedule<S: StateStore, I: IntentStore + ?Sized>(
    state: &mut PersistentState<S>,
    intents: &mut I,
    reporter: &dyn StatusReporter,
) -> Result<bool, StoreError> {
    let mut run = state.run_state();
    if !run.can_auto_activate() {
        info!(active = run.active, halted = run.halted, "scheduled activation skipped");
        return Ok(false);
    }
    run.active = true;
    run.reset_retries();
    state.save_run_state(&run)?;
    intents.clear();
    announce(
        state,
        reporter,
        NoticeLevel::Info,
        "Scheduled activation reached, automation started.",
    )?;
    reporter.state_changed(&run);
    Ok(true)
}

pub fn update_config<S: StateStore>(
    state: &mut PersistentState<S>,
    reporter: &dyn StatusReporter,
    config: &AutomationConfig,
) -> Result<(), StoreError> {
    state.save_config(config)?;
    let message = format!(
        "Configuration saved: request {}, subject {}, activation {}.",
        config.request_id().unwrap_or("-"),
        config.subject_id().unwrap_or("-"),
        config
            .activation_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string()),
    );
    announce(state, reporter, NoticeLevel::Info, &message)
}

fn announce<S: StateStore>(
    state: &mut PersistentState<S>,
    reporter: &dyn StatusReporter,
    level: NoticeLevel,
    message: &str,
) -> Result<(), StoreError> {
    let entry = state.append_log(message)?;
    info!("{message}");
    reporter.notify(level, message);
    reporter.log(&entry);
    Ok(())
}
