use anyhow::{Context, Result};
use tracing::debug;

use crate::intent::{IntentStore, NavigationIntent};
use crate::settings::PortalUrls;

/// The raw page transition. Implemented over a real browser tab by the agent.
pub trait PageTransport {
    /// Loads `url` and returns once the new page has settled.
    fn assign(&self, url: &str) -> Result<()>;

    /// Reloads the current page and returns once it has settled.
    fn reload(&self) -> Result<()>;
}

/// Why a navigation happens, beyond what its url says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavPurpose {
    /// Intents follow from the url alone.
    Page,
    /// Selecting a subject; the portal should land on the request detail.
    SubjectSwitch,
    /// Following the submit control. The portal returns to the detail page,
    /// so a detail-page attempt is recorded as well.
    Submission,
}

/// Records the navigation intents for a transition, then performs it.
pub struct Navigator<'a, I: IntentStore + ?Sized> {
    urls: &'a PortalUrls,
    request_id: Option<&'a str>,
    intents: &'a mut I,
}

impl<'a, I: IntentStore + ?Sized> Navigator<'a, I> {
    pub fn new(urls: &'a PortalUrls, request_id: Option<&'a str>, intents: &'a mut I) -> Self {
        Self {
            urls,
            request_id,
            intents,
        }
    }

    pub fn intents_for(&self, url: &str, purpose: NavPurpose) -> Vec<NavigationIntent> {
        let mut kinds = Vec::new();
        if purpose == NavPurpose::Submission {
            kinds.push(NavigationIntent::Submission);
        }
        let to_detail = self
            .request_id
            .is_some_and(|id| self.urls.is_detail(url, id));
        if to_detail || purpose != NavPurpose::Page {
            kinds.push(NavigationIntent::DetailPage);
        }
        if self.urls.is_selection(url) {
            kinds.push(NavigationIntent::SelectionPage);
        }
        kinds
    }

    /// If the transport fails the intents are withdrawn again, so a load that
    /// never happened cannot be mistaken for a redirect.
    pub fn go_to(
        &mut self,
        transport: &dyn PageTransport,
        url: &str,
        purpose: NavPurpose,
    ) -> Result<()> {
        let kinds = self.intents_for(url, purpose);
        for kind in &kinds {
            self.intents.record(*kind, url);
        }
        debug!(url, ?kinds, "navigating");
        if let Err(e) = transport.assign(url) {
            for kind in &kinds {
                self.intents.take(*kind);
            }
            return Err(e).with_context(|| format!("navigation to {url} failed"));
        }
        Ok(())
    }

    /// Reloads in place. Intents are left alone: a reload keeps trying the
    /// same page rather than going somewhere new.
    pub fn reload(&self, transport: &dyn PageTransport) -> Result<()> {
        transport.reload().context("reload failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::SessionIntents;
    use crate::settings::PortalSettings;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recorder {
        visits: RefCell<Vec<String>>,
        fail: bool,
    }

    impl PageTransport for Recorder {
        fn assign(&self, url: &str) -> Result<()> {
            if self.fail {
                anyhow::bail!("tab closed");
            }
            self.visits.borrow_mut().push(url.to_string());
            Ok(())
        }

        fn reload(&self) -> Result<()> {
            self.visits.borrow_mut().push("<reload>".into());
            Ok(())
        }
    }

    #[test]
    fn detail_and_selection_urls_are_recognised() {
        let urls = PortalSettings::default().urls().unwrap();
        let mut intents = SessionIntents::default();
        let nav = Navigator::new(&urls, Some("46317"), &mut intents);

        assert_eq!(
            nav.intents_for(&urls.detail_url("46317"), NavPurpose::Page),
            [NavigationIntent::DetailPage]
        );
        assert_eq!(
            nav.intents_for(urls.selection_url(), NavPurpose::Page),
            [NavigationIntent::SelectionPage]
        );
        assert!(nav.intents_for(urls.base(), NavPurpose::Page).is_empty());
    }

    #[test]
    fn submission_records_both_intents_before_moving() {
        let urls = PortalSettings::default().urls().unwrap();
        let mut intents = SessionIntents::default();
        let transport = Recorder::default();
        let target = "https://servizifederati.regione.emilia-romagna.it/fesr2020/invio/123";

        Navigator::new(&urls, Some("46317"), &mut intents)
            .go_to(&transport, target, NavPurpose::Submission)
            .unwrap();

        assert_eq!(*transport.visits.borrow(), [target]);
        assert!(intents.is_pending(NavigationIntent::Submission));
        assert!(intents.is_pending(NavigationIntent::DetailPage));
    }

    #[test]
    fn failed_transition_withdraws_its_intents() {
        let urls = PortalSettings::default().urls().unwrap();
        let mut intents = SessionIntents::default();
        let transport = Recorder {
            fail: true,
            ..Default::default()
        };
        let detail = urls.detail_url("46317");

        let err = Navigator::new(&urls, Some("46317"), &mut intents)
            .go_to(&transport, &detail, NavPurpose::Page)
            .unwrap_err();

        assert!(err.to_string().contains("navigation to"));
        assert!(!intents.is_pending(NavigationIntent::DetailPage));
    }

    #[test]
    fn reload_leaves_intents_untouched() {
        let urls = PortalSettings::default().urls().unwrap();
        let mut intents = SessionIntents::default();
        intents.record(NavigationIntent::SelectionPage, "x");
        let transport = Recorder::default();

        Navigator::new(&urls, None, &mut intents)
            .reload(&transport)
            .unwrap();

        assert_eq!(*transport.visits.borrow(), ["<reload>"]);
        assert!(intents.is_pending(NavigationIntent::SelectionPage));
    }
}
