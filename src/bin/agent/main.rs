mod dom;
mod face;
mod hands;

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use face::{PanelCommand, PanelReporter};
use portal_autosubmit::config::AutomationConfig;
use portal_autosubmit::intent::SessionIntents;
use portal_autosubmit::lifecycle::{self, PageLoad};
use portal_autosubmit::reporter::{NoticeLevel, StatusReporter, TracingReporter};
use portal_autosubmit::schedule::{ActivationPlan, Scheduler};
use portal_autosubmit::settings::same_page;
use portal_autosubmit::store::{JsonFileStore, PersistentState};
use portal_autosubmit::{Action, PortalSettings, PortalUrls};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often an idle agent checks whether the human moved the tab.
const URL_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(
    name = "agent",
    version,
    about = "Keeps a FESR portal tab moving until the request is submitted"
)]
struct Cli {
    #[command(flatten)]
    portal: PortalSettings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the browser, with the control panel on localhost.
    Run {
        #[arg(long, env = "PANEL_PORT", default_value_t = 3000)]
        port: u16,

        #[command(flatten)]
        browser: hands::BrowserOptions,

        #[command(flatten)]
        selectors: dom::DomSelectors,
    },
    /// Set the request, subject and optional activation instant.
    Config {
        #[arg(long)]
        request_id: String,

        #[arg(long, default_value = "")]
        subject_id: String,

        /// RFC 3339 or local YYYY-MM-DDTHH:MM[:SS]
        #[arg(long, default_value = "")]
        activate_at: String,
    },
    /// Print run state, configuration, cached subjects and recent log lines.
    Status {
        #[arg(long, default_value_t = 15)]
        logs: usize,
    },
    Start,
    Stop,
    /// Forget every cached subject url.
    ResetCache,
    ClearLogs,
}

type FileState = PersistentState<JsonFileStore>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let urls = cli.portal.urls()?;
    let state_path = cli.portal.resolved_state_dir().join("state.json");
    let store = JsonFileStore::open(&state_path)
        .with_context(|| format!("opening {}", state_path.display()))?;
    let mut state = PersistentState::new(store, cli.portal.max_retries, cli.portal.log_cap);

    match cli.command {
        Command::Run {
            port,
            browser,
            selectors,
        } => run(&cli.portal, &urls, state, port, browser, selectors).await,
        Command::Config {
            request_id,
            subject_id,
            activate_at,
        } => {
            let config = AutomationConfig::from_input(&subject_id, &request_id, &activate_at)?;
            lifecycle::update_config(&mut state, &TracingReporter, &config)?;
            println!("Detail page: {}", urls.detail_url(request_id.trim()));
            Ok(())
        }
        Command::Status { logs } => {
            print_status(&mut state, &urls, logs);
            Ok(())
        }
        Command::Start => {
            lifecycle::start(&mut state, &mut SessionIntents::default(), &TracingReporter)?;
            Ok(())
        }
        Command::Stop => {
            lifecycle::stop(&mut state, &TracingReporter)?;
            Ok(())
        }
        Command::ResetCache => {
            state.reset_subject_cache()?;
            println!("Subject cache cleared.");
            Ok(())
        }
        Command::ClearLogs => {
            state.clear_logs()?;
            println!("Log cleared.");
            Ok(())
        }
    }
}

async fn run(
    settings: &PortalSettings,
    urls: &PortalUrls,
    mut state: FileState,
    port: u16,
    browser: hands::BrowserOptions,
    selectors: dom::DomSelectors,
) -> Result<()> {
    let (mut commands, reporter) = face::start_server(port).await?;
    reporter.sync_from(&mut state);

    info!("Launching Chrome...");
    let session = tokio::task::spawn_blocking(move || hands::BrowserSession::launch(&browser))
        .await
        .map_err(|e| anyhow!("Browser launch panicked: {e}"))??;
    let page = dom::ChromePage::new(
        session.tab.clone(),
        selectors,
        Duration::from_millis(settings.reload_delay_ms),
    );

    let mut intents = SessionIntents::default();
    let mut scheduler = Scheduler::default();
    let (fire_tx, mut fire_rx) = mpsc::channel::<()>(1);
    let mut last_url = String::new();
    let mut load_pending = true;

    loop {
        while let Ok(command) = commands.try_recv() {
            load_pending |=
                handle_command(command, &mut state, &mut intents, &mut scheduler, &reporter);
        }
        sync_schedule(&mut state, &mut scheduler, &reporter, &fire_tx);

        if load_pending {
            let current_url = tokio::task::block_in_place(|| page.current_url());
            let outcome = tokio::task::block_in_place(|| {
                PageLoad {
                    settings,
                    urls,
                    state: &mut state,
                    intents: &mut intents,
                    reporter: &reporter,
                }
                .run(&current_url, &page, &page)
            });
            load_pending = match outcome {
                Ok(Action::Navigate { .. } | Action::Reload) => true,
                Ok(Action::Halt(reason)) => {
                    info!(%reason, "run halted");
                    if scheduler.cancel() {
                        reporter.countdown(None);
                    }
                    false
                }
                Ok(Action::Idle(reason)) => {
                    info!(?reason, "idle");
                    false
                }
                Err(e) => {
                    error!("page load failed: {e:#}");
                    reporter.notify(NoticeLevel::Error, &format!("{e:#}"));
                    false
                }
            };
            last_url = tokio::task::block_in_place(|| page.current_url());
            continue;
        }

        tokio::select! {
            Some(command) = commands.recv() => {
                load_pending =
                    handle_command(command, &mut state, &mut intents, &mut scheduler, &reporter);
            }
            Some(()) = fire_rx.recv() => {
                match lifecycle::activate_on_schedule(&mut state, &mut intents, &reporter) {
                    Ok(activated) => load_pending = activated,
                    Err(e) => error!("scheduled activation failed: {e:#}"),
                }
                reporter.countdown(None);
            }
            _ = tokio::time::sleep(URL_POLL_INTERVAL) => {
                let url = tokio::task::block_in_place(|| page.current_url());
                if !same_page(&url, &last_url) {
                    info!(%url, "tab moved, treating as a new page load");
                    load_pending = true;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down.");
                scheduler.cancel();
                return Ok(());
            }
        }
    }
}

/// Applies a panel command. Returns whether the current page should be run
/// through the controller right away.
fn handle_command(
    command: PanelCommand,
    state: &mut FileState,
    intents: &mut SessionIntents,
    scheduler: &mut Scheduler,
    reporter: &PanelReporter,
) -> bool {
    // Any manual action supersedes a pending activation. Stopping also keeps
    // the configured instant from being re-armed; saving or starting lifts that.
    let cancelled = match &command {
        PanelCommand::Toggle if state.run_state().active => {
            scheduler.dismiss(state.config().activation_at)
        }
        _ => {
            scheduler.restore();
            scheduler.cancel()
        }
    };
    if cancelled {
        reporter.countdown(None);
    }
    let result = match command {
        PanelCommand::Toggle => {
            if state.run_state().active {
                lifecycle::stop(state, reporter).map(|_| false)
            } else {
                let started = lifecycle::start(state, intents, reporter).map(|_| true);
                reporter.sync_from(state);
                started
            }
        }
        PanelCommand::SaveConfig(payload) => {
            match AutomationConfig::from_input(
                &payload.subject_id,
                &payload.request_id,
                &payload.activation_at,
            ) {
                Ok(config) => {
                    let saved = lifecycle::update_config(state, reporter, &config);
                    reporter.sync_from(state);
                    saved.map(|_| state.run_state().active)
                }
                Err(e) => {
                    warn!(error = %e, "rejected configuration");
                    reporter.notify(NoticeLevel::Error, &e.to_string());
                    Ok(false)
                }
            }
        }
    };
    result.unwrap_or_else(|e| {
        error!("command failed: {e}");
        reporter.notify(NoticeLevel::Error, &e.to_string());
        false
    })
}

/// Re-derives the activation plan from the stored instant and arms or
/// cancels the timer to match.
fn sync_schedule(
    state: &mut FileState,
    scheduler: &mut Scheduler,
    reporter: &PanelReporter,
    fire_tx: &mpsc::Sender<()>,
) {
    let config = state.config();
    let run = state.run_state();
    match ActivationPlan::evaluate(&config, Local::now(), &run) {
        ActivationPlan::Pending { at, remaining } => {
            if !scheduler.should_arm(at) {
                return;
            }
            info!(%at, seconds = remaining.as_secs(), "activation scheduled");
            let fire = fire_tx.clone();
            let ticker = reporter.clone();
            scheduler.arm(
                at,
                remaining,
                move || {
                    let _ = fire.try_send(());
                },
                move |left| ticker.countdown(Some(left)),
            );
        }
        _ => {
            if scheduler.cancel() {
                reporter.countdown(None);
            }
        }
    }
}

fn print_status(state: &mut FileState, urls: &PortalUrls, logs: usize) {
    let run = state.run_state();
    let config = state.config();
    println!(
        "Active: {}{}",
        run.active,
        if run.halted { " (halted)" } else { "" }
    );
    println!("Retries: {}/{}", run.retry_count, run.max_retries);
    println!("Submission: {}", run.submit_outcome);
    match config.request_id() {
        Some(id) => println!("Request: {id} ({})", urls.detail_url(id)),
        None => println!("Request: not configured"),
    }
    println!("Subject: {}", config.subject_id().unwrap_or("-"));
    if let Some(at) = config.activation_at {
        println!("Activation: {}", at.format("%Y-%m-%d %H:%M:%S"));
    }

    let cache = state.subject_cache();
    if !cache.is_empty() {
        println!("Cached subjects:");
        for (subject, url) in cache.iter() {
            println!("  {subject} -> {url}");
        }
    }

    let book = state.log_book();
    if !book.is_empty() {
        println!("Recent log:");
        for entry in book.entries_newest_first().take(logs) {
            println!("  {entry}");
        }
    }
}
