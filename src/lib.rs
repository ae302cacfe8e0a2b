//! Core of the portal auto-submit agent.
//!
//! Every observed page load runs the [`controller::Controller`] once. The
//! controller holds nothing in memory between loads: continuity lives in the
//! persistent [`store::PersistentState`] and the one-shot
//! [`intent::IntentStore`].

pub mod config;
pub mod controller;
pub mod error;
pub mod inspector;
pub mod intent;
pub mod lifecycle;
pub mod log_book;
pub mod navigator;
pub mod reporter;
pub mod schedule;
pub mod settings;
pub mod state;
pub mod store;

pub use controller::{Action, Controller, HaltReason, IdleReason, RetrySituation};
pub use error::{ConfigError, StoreError};
pub use settings::{PortalSettings, PortalUrls};
pub use state::{RunState, SubmitOutcome};
