use anyhow::{Result, bail};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use portal_autosubmit::log_book::LogEntry;
use portal_autosubmit::reporter::{NoticeLevel, StatusReporter};
use portal_autosubmit::store::{PersistentState, StateStore};
use portal_autosubmit::RunState;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};

/// Lines kept in the panel snapshot for late joiners.
const PANEL_LOG_LINES: usize = 100;

/// Events streamed to the panel via SSE.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum PanelEvent {
    Notice { level: NoticeLevel, message: String },
    Log { line: String },
    State { snapshot: PanelSnapshot },
    Countdown { seconds: Option<u64> },
}

impl PanelEvent {
    fn to_sse_event(&self) -> Event {
        let name = match self {
            PanelEvent::Notice { .. } => "notice",
            PanelEvent::Log { .. } => "log",
            PanelEvent::State { .. } => "state",
            PanelEvent::Countdown { .. } => "countdown",
        };
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(name).data(data)
    }
}

/// Everything the panel shows, kept current by [`PanelReporter`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct PanelSnapshot {
    pub active: bool,
    pub retry_count: u32,
    pub max_retries: u32,
    pub submit_outcome: String,
    pub subject_id: Option<String>,
    pub request_id: Option<String>,
    pub activation_at: Option<String>,
    pub notice: Option<String>,
    pub countdown_seconds: Option<u64>,
    /// Newest first.
    pub logs: Vec<String>,
}

/// What the human can ask for from the panel.
#[derive(Debug, Clone)]
pub enum PanelCommand {
    Toggle,
    SaveConfig(ConfigPayload),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigPayload {
    #[serde(default)]
    pub subject_id: String,
    pub request_id: String,
    #[serde(default)]
    pub activation_at: String,
}

#[derive(Clone)]
pub struct PanelReporter {
    events: broadcast::Sender<PanelEvent>,
    snapshot: Arc<RwLock<PanelSnapshot>>,
}

impl PanelReporter {
    fn update(&self, f: impl FnOnce(&mut PanelSnapshot)) {
        if let Ok(mut snapshot) = self.snapshot.write() {
            f(&mut snapshot);
        }
    }

    fn current(&self) -> PanelSnapshot {
        self.snapshot
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Reloads run state, configuration and log history from the store.
    pub fn sync_from<S: StateStore>(&self, state: &mut PersistentState<S>) {
        let run = state.run_state();
        let config = state.config();
        let logs: Vec<String> = state
            .log_book()
            .entries_newest_first()
            .take(PANEL_LOG_LINES)
            .map(ToString::to_string)
            .collect();
        self.update(|s| {
            apply_run_state(s, &run);
            s.subject_id = config.subject_id.clone();
            s.request_id = config.request_id.clone();
            s.activation_at = config
                .activation_at
                .map(|at| at.format("%Y-%m-%dT%H:%M:%S").to_string());
            s.logs = logs;
        });
        let _ = self.events.send(PanelEvent::State {
            snapshot: self.current(),
        });
    }
}

fn apply_run_state(snapshot: &mut PanelSnapshot, run: &RunState) {
    snapshot.active = run.active;
    snapshot.retry_count = run.retry_count;
    snapshot.max_retries = run.max_retries;
    snapshot.submit_outcome = run.submit_outcome.to_string();
}

impl StatusReporter for PanelReporter {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.update(|s| s.notice = Some(message.to_string()));
        let _ = self.events.send(PanelEvent::Notice {
            level,
            message: message.to_string(),
        });
    }

    fn log(&self, entry: &LogEntry) {
        let line = entry.to_string();
        self.update(|s| {
            s.logs.insert(0, line.clone());
            s.logs.truncate(PANEL_LOG_LINES);
        });
        let _ = self.events.send(PanelEvent::Log { line });
    }

    fn state_changed(&self, state: &RunState) {
        self.update(|s| apply_run_state(s, state));
        let _ = self.events.send(PanelEvent::State {
            snapshot: self.current(),
        });
    }

    fn countdown(&self, remaining: Option<Duration>) {
        let seconds = remaining.map(|d| d.as_secs());
        self.update(|s| s.countdown_seconds = seconds);
        let _ = self.events.send(PanelEvent::Countdown { seconds });
    }
}

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::Sender<PanelCommand>,
    reporter: PanelReporter,
}

/// Starts the panel on the first free port from `port`. Returns the command
/// channel and the reporter feeding the panel.
pub async fn start_server(port: u16) -> Result<(mpsc::Receiver<PanelCommand>, PanelReporter)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<PanelCommand>(8);
    let (event_tx, _) = broadcast::channel::<PanelEvent>(256);
    let reporter = PanelReporter {
        events: event_tx,
        snapshot: Arc::new(RwLock::new(PanelSnapshot::default())),
    };

    let state = Arc::new(AppState {
        cmd_tx,
        reporter: reporter.clone(),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/state", get(state_handler))
        .route("/toggle", post(toggle_handler))
        .route("/config", post(config_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    let mut bound = None;
    for p in port..port.saturating_add(10) {
        if let Ok(listener) = tokio::net::TcpListener::bind(format!("127.0.0.1:{p}")).await {
            bound = Some((listener, p));
            break;
        }
    }
    let Some((listener, port)) = bound else {
        bail!("could not bind the panel to any port from {port}; is another agent running?");
    };

    info!("Control panel at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "panel server stopped");
        }
    });

    Ok((cmd_rx, reporter))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn state_handler(State(state): State<Arc<AppState>>) -> Json<PanelSnapshot> {
    Json(state.reporter.current())
}

async fn toggle_handler(State(state): State<Arc<AppState>>) -> &'static str {
    info!("panel: toggle");
    let _ = state.cmd_tx.send(PanelCommand::Toggle).await;
    "ok"
}

async fn config_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ConfigPayload>,
) -> &'static str {
    info!(request_id = %payload.request_id, "panel: save config");
    let _ = state.cmd_tx.send(PanelCommand::SaveConfig(payload)).await;
    "ok"
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.reporter.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
        Err(_) => None,
    });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Portal auto-submit</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { background: #0a0a0f; color: #e0e0e0; font-family: 'Segoe UI', system-ui, sans-serif; padding: 24px 32px; }
  h1 { font-size: 20px; margin-bottom: 16px; display: flex; align-items: center; gap: 10px; }
  .dot { width: 10px; height: 10px; border-radius: 50%; background: #555; }
  .dot.on { background: #22c55e; }
  .row { display: flex; gap: 16px; margin-bottom: 12px; align-items: center; flex-wrap: wrap; }
  .card { background: #111118; border-radius: 8px; padding: 12px 16px; margin-bottom: 12px; }
  #notice { border-left: 3px solid #6366f1; }
  #notice.warning { border-color: #f59e0b; color: #fcd34d; }
  #notice.error { border-color: #ef4444; color: #fca5a5; }
  #notice.success { border-color: #22c55e; color: #86efac; }
  label { font-size: 13px; color: #999; display: flex; flex-direction: column; gap: 4px; }
  input { background: #0a0a0f; border: 1px solid #222; border-radius: 6px; padding: 8px 10px; color: #fff; }
  button { background: #6366f1; color: #fff; border: none; border-radius: 8px; padding: 10px 18px; font-weight: 600; cursor: pointer; }
  button:hover { background: #4f46e5; }
  #log { font-family: 'Cascadia Code', monospace; font-size: 12px; max-height: 320px; overflow-y: auto; }
  #log div { padding: 2px 0; border-bottom: 1px solid #1a1a2e; }
</style>
</head>
<body>
  <h1><span class="dot" id="dot"></span>Portal auto-submit</h1>
  <div class="row">
    <button id="toggle" onclick="toggle()">Start</button>
    <span>Retries: <strong id="retries">0/0</strong></span>
    <span>Submission: <strong id="outcome">unknown</strong></span>
    <span>Activation in: <strong id="countdown">-</strong></span>
  </div>
  <div class="card" id="notice">Waiting for the agent...</div>
  <div class="card row">
    <label>Request id <input id="request" placeholder="46317"></label>
    <label>Subject id <input id="subject" placeholder="optional"></label>
    <label>Activate at <input id="activation" type="datetime-local" step="1"></label>
    <button onclick="saveConfig()">Save</button>
  </div>
  <div class="card" id="log"></div>
<script>
  const $ = id => document.getElementById(id);

  function fmtCountdown(s) {
    if (s === null || s === undefined) return '-';
    const h = Math.floor(s / 3600), m = Math.floor(s % 3600 / 60), sec = s % 60;
    return h + 'h ' + m + 'm ' + sec + 's';
  }

  function render(s) {
    $('dot').className = s.active ? 'dot on' : 'dot';
    $('toggle').textContent = s.active ? 'Stop' : 'Start';
    $('retries').textContent = s.retry_count + '/' + s.max_retries;
    $('outcome').textContent = s.submit_outcome || 'unknown';
    $('countdown').textContent = fmtCountdown(s.countdown_seconds);
    if (s.notice) $('notice').textContent = s.notice;
    if (document.activeElement.tagName !== 'INPUT') {
      $('request').value = s.request_id || '';
      $('subject').value = s.subject_id || '';
      $('activation').value = s.activation_at || '';
    }
    $('log').innerHTML = '';
    for (const line of s.logs || []) addLog(line, false);
  }

  function addLog(line, prepend) {
    const div = document.createElement('div');
    div.textContent = line;
    if (prepend) $('log').prepend(div); else $('log').appendChild(div);
  }

  async function toggle() { await fetch('/toggle', { method: 'POST' }); }

  async function saveConfig() {
    await fetch('/config', {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({
        request_id: $('request').value,
        subject_id: $('subject').value,
        activation_at: $('activation').value,
      }),
    });
  }

  fetch('/state').then(r => r.json()).then(render);

  const es = new EventSource('/events');
  es.addEventListener('state', e => render(JSON.parse(e.data).snapshot));
  es.addEventListener('log', e => addLog(JSON.parse(e.data).line, true));
  es.addEventListener('countdown', e => {
    $('countdown').textContent = fmtCountdown(JSON.parse(e.data).seconds);
  });
  es.addEventListener('notice', e => {
    const d = JSON.parse(e.data);
    $('notice').textContent = d.message;
    $('notice').className = 'card ' + d.level;
  });
</script>
</body>
</html>
"##;
