//! The per-load decision procedure.
//!
//! Each load runs in two phases. First the outcome of the previous action is
//! classified (a pending submission attempt, then pending navigation
//! attempts), then the current page decides the next step. Intents are
//! consumed in phase one whether or not they end up mattering, so none is
//! ever acted on twice.

use std::fmt;

use tracing::info;

use crate::config::AutomationConfig;
use crate::error::StoreError;
use crate::inspector::PageInspector;
use crate::intent::{IntentStore, NavigationIntent, PendingIntent};
use crate::navigator::NavPurpose;
use crate::reporter::{NoticeLevel, StatusReporter};
use crate::settings::{PortalSettings, PortalUrls, same_page};
use crate::state::{RetryVerdict, RunState, SubmitOutcome};
use crate::store::{PersistentState, StateStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do on this page.
    Idle(IdleReason),
    Navigate { url: String, purpose: NavPurpose },
    Reload,
    /// The run is over until a human restarts it.
    Halt(HaltReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleReason {
    Inactive,
    MissingRequestId,
    WrongDomain,
}

/// What was missing when a retry was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrySituation {
    ControlMissing,
    UncertainOutcome,
    BaseRedirect,
}

impl fmt::Display for RetrySituation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetrySituation::ControlMissing => "submit control not found",
            RetrySituation::UncertainOutcome => "submission outcome uncertain",
            RetrySituation::BaseRedirect => "redirected to the portal root",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    SubmissionConfirmed,
    RetriesExhausted { situation: RetrySituation, count: u32 },
    /// The portal rejected the active subject and no replacement is set.
    SubjectRejected,
    /// Trying to open the selection listing bounced to the portal root.
    SelectionRedirected,
    SubjectNotListed { subject: String },
}

impl HaltReason {
    fn level(&self) -> NoticeLevel {
        match self {
            HaltReason::SubmissionConfirmed => NoticeLevel::Success,
            _ => NoticeLevel::Error,
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::SubmissionConfirmed => {
                write!(f, "Submission confirmed. Automation stopped.")
            }
            HaltReason::RetriesExhausted { situation, count } => write!(
                f,
                "Max retries reached ({count}) while {situation}. Automation stopped."
            ),
            HaltReason::SubjectRejected => write!(
                f,
                "The portal rejected the active subject and no subject id is configured. Automation stopped."
            ),
            HaltReason::SelectionRedirected => write!(
                f,
                "Redirected to the portal root while opening the subject listing. Automation stopped."
            ),
            HaltReason::SubjectNotListed { subject } => write!(
                f,
                "Subject {subject} not found in the selection listing. Automation stopped."
            ),
        }
    }
}

pub struct Controller<'a, S: StateStore, I: IntentStore + ?Sized> {
    settings: &'a PortalSettings,
    urls: &'a PortalUrls,
    state: &'a mut PersistentState<S>,
    intents: &'a mut I,
    reporter: &'a dyn StatusReporter,
}

impl<'a, S: StateStore, I: IntentStore + ?Sized> Controller<'a, S, I> {
    pub fn new(
        settings: &'a PortalSettings,
        urls: &'a PortalUrls,
        state: &'a mut PersistentState<S>,
        intents: &'a mut I,
        reporter: &'a dyn StatusReporter,
    ) -> Self {
        Self {
            settings,
            urls,
            state,
            intents,
            reporter,
        }
    }

    /// Decides the single next action for the page at `current_url`.
    ///
    /// The returned action has not been performed yet; only run state, the
    /// subject cache and the log have been written.
    pub fn on_page_load(
        &mut self,
        current_url: &str,
        page: &dyn PageInspector,
    ) -> Result<Action, StoreError> {
        self.log(format!("Current URL: {current_url}"))?;

        let mut run = self.state.run_state();
        if !run.active {
            self.log("Automation is not active.")?;
            return Ok(Action::Idle(IdleReason::Inactive));
        }

        let config = self.state.config();
        let Some(request_id) = config.request_id().map(str::to_string) else {
            self.reporter.notify(
                NoticeLevel::Warning,
                "Set a request id to let the automation run.",
            );
            self.log("No request id configured, nothing to do.")?;
            return Ok(Action::Idle(IdleReason::MissingRequestId));
        };
        let on_detail = self.urls.is_detail(current_url, &request_id);

        // At most one miss is counted per load.
        let mut miss_counted = false;

        if self.intents.take(NavigationIntent::Submission).is_some() {
            if page.find_success_indicator() {
                run.confirm_success();
                return self.finish(&run, HaltReason::SubmissionConfirmed);
            }
            if on_detail {
                run.submit_outcome = SubmitOutcome::Uncertain;
                self.reporter.notify(
                    NoticeLevel::Warning,
                    "Submission outcome uncertain: back on the detail page without a confirmation.",
                );
                miss_counted = true;
                if let Some(halt) = self.count_miss(&mut run, RetrySituation::UncertainOutcome)? {
                    return Ok(halt);
                }
            } else {
                if run.submit_outcome != SubmitOutcome::Unknown {
                    run.submit_outcome = SubmitOutcome::Unknown;
                    self.state.save_run_state(&run)?;
                    self.reporter.state_changed(&run);
                }
                self.log(format!(
                    "No confirmation after the submission attempt, landed on {current_url}."
                ))?;
            }
        }

        let detail_attempt = self.intents.take(NavigationIntent::DetailPage);
        let selection_attempt = self.intents.take(NavigationIntent::SelectionPage);

        if self.urls.is_base(current_url) {
            if selection_attempt.is_some() {
                run.halt();
                return self.finish(&run, HaltReason::SelectionRedirected);
            }
            if let Some(attempt) = detail_attempt {
                return self.on_base_redirect(
                    &mut run,
                    &config,
                    &request_id,
                    attempt,
                    page,
                    miss_counted,
                );
            }
        }

        if !self.urls.is_on_portal(current_url) {
            self.log("Outside the portal, not acting on this page.")?;
            return Ok(Action::Idle(IdleReason::WrongDomain));
        }

        if on_detail {
            return self.on_detail_page(&mut run, current_url, page, miss_counted);
        }

        if self.urls.is_selection(current_url) {
            if let Some(subject) = config.subject_id() {
                return self.on_selection_page(&mut run, subject, page);
            }
        }

        let detail_url = self.urls.detail_url(&request_id);
        self.log(format!("Not on the detail page, heading to {detail_url}"))?;
        Ok(Action::Navigate {
            url: detail_url,
            purpose: NavPurpose::Page,
        })
    }

    fn on_detail_page(
        &mut self,
        run: &mut RunState,
        current_url: &str,
        page: &dyn PageInspector,
        miss_counted: bool,
    ) -> Result<Action, StoreError> {
        self.log("On the detail page, looking for the submit control...")?;
        let label = &self.settings.submit_label;
        let link = page
            .find_action_control(label, self.settings.label_match)
            .and_then(|href| PortalUrls::resolve(current_url, &href));

        if let Some(url) = link {
            self.log(format!("Submit control found, following {url}"))?;
            return Ok(Action::Navigate {
                url,
                purpose: NavPurpose::Submission,
            });
        }

        self.log("Submit control not found.")?;
        if !miss_counted {
            if let Some(halt) = self.count_miss(run, RetrySituation::ControlMissing)? {
                return Ok(halt);
            }
        }
        self.log("Reloading the page.")?;
        Ok(Action::Reload)
    }

    /// The detail page was requested but the portal answered with its root.
    fn on_base_redirect(
        &mut self,
        run: &mut RunState,
        config: &AutomationConfig,
        request_id: &str,
        attempt: PendingIntent,
        page: &dyn PageInspector,
        miss_counted: bool,
    ) -> Result<Action, StoreError> {
        self.log("Unexpected redirect to the portal root after trying the detail page.")?;

        if page.find_failure_indicator(&self.settings.failure_pattern) {
            return match config.subject_id() {
                Some(subject) => self.switch_subject(run, subject, &attempt),
                None => {
                    run.halt();
                    self.finish(run, HaltReason::SubjectRejected)
                }
            };
        }

        if !miss_counted {
            if let Some(halt) = self.count_miss(run, RetrySituation::BaseRedirect)? {
                return Ok(halt);
            }
        }
        let detail_url = self.urls.detail_url(request_id);
        self.log(format!("Trying the detail page again: {detail_url}"))?;
        Ok(Action::Navigate {
            url: detail_url,
            purpose: NavPurpose::Page,
        })
    }

    /// Makes the configured subject the active one, through the cache when
    /// possible.
    fn switch_subject(
        &mut self,
        run: &mut RunState,
        subject: &str,
        failed: &PendingIntent,
    ) -> Result<Action, StoreError> {
        let cache = self.state.subject_cache();
        match cache.get(subject) {
            // A cached url that itself just bounced is stale; refresh it from
            // the listing, counting the wasted trip.
            Some(url) if same_page(url, &failed.target) => {
                self.log(format!(
                    "Cached url for subject {subject} was rejected, looking it up again."
                ))?;
                if let Some(halt) = self.count_miss(run, RetrySituation::BaseRedirect)? {
                    return Ok(halt);
                }
            }
            Some(url) => {
                self.log(format!("Switching to subject {subject} via cached url {url}"))?;
                return Ok(Action::Navigate {
                    url: url.to_string(),
                    purpose: NavPurpose::SubjectSwitch,
                });
            }
            None => {
                self.log(format!("Subject {subject} not cached yet."))?;
            }
        }
        let listing = self.urls.selection_url().to_string();
        self.log(format!("Opening the subject listing: {listing}"))?;
        Ok(Action::Navigate {
            url: listing,
            purpose: NavPurpose::Page,
        })
    }

    fn on_selection_page(
        &mut self,
        run: &mut RunState,
        subject: &str,
        page: &dyn PageInspector,
    ) -> Result<Action, StoreError> {
        self.log(format!("On the subject listing, looking for {subject}..."))?;
        let link = page
            .scan_results_table(self.settings.subject_column, subject, self.settings.action_column)
            .and_then(|href| self.urls.resolve_against_base(&href));

        let Some(url) = link else {
            run.halt();
            return self.finish(
                run,
                HaltReason::SubjectNotListed {
                    subject: subject.to_string(),
                },
            );
        };

        if let Some(previous) = self.state.cache_subject_url(subject, url.clone())? {
            if previous != url {
                info!(subject, %previous, %url, "subject url refreshed");
            }
        }
        run.reset_retries();
        self.state.save_run_state(run)?;
        self.reporter.state_changed(run);
        self.log(format!("Subject {subject} found, selecting it: {url}"))?;
        Ok(Action::Navigate {
            url,
            purpose: NavPurpose::SubjectSwitch,
        })
    }

    /// Counts one miss and persists it. Returns the halt when the cap is
    /// exceeded.
    fn count_miss(
        &mut self,
        run: &mut RunState,
        situation: RetrySituation,
    ) -> Result<Option<Action>, StoreError> {
        match run.record_miss() {
            RetryVerdict::Exhausted => {
                let count = run.retry_count;
                self.finish(run, HaltReason::RetriesExhausted { situation, count })
                    .map(Some)
            }
            RetryVerdict::TryAgain => {
                self.state.save_run_state(run)?;
                self.reporter.state_changed(run);
                self.log(format!(
                    "Retry {}/{} ({situation}).",
                    run.retry_count, run.max_retries
                ))?;
                Ok(None)
            }
        }
    }

    /// Persists a halted run and tells the operator why.
    fn finish(&mut self, run: &RunState, reason: HaltReason) -> Result<Action, StoreError> {
        self.state.save_run_state(run)?;
        let message = reason.to_string();
        self.reporter.notify(reason.level(), &message);
        self.reporter.state_changed(run);
        self.log(message)?;
        Ok(Action::Halt(reason))
    }

    fn log(&mut self, message: impl Into<String>) -> Result<(), StoreError> {
        let entry = self.state.append_log(message)?;
        info!("{}", entry.message);
        self.reporter.log(&entry);
        Ok(())
    }
}
