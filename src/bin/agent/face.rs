use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use browser_sleuth::registry::{self, catalogue};
use browser_sleuth::{AgentEvent, Orchestrator, ToolArgs};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info};

const PORT_ATTEMPTS: u16 = 10;

fn to_sse_event(event: &AgentEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(event.payload().to_string())
}

pub struct AppState {
    agent: Arc<Mutex<Orchestrator>>,
    cmd_tx: mpsc::Sender<String>,
    event_tx: broadcast::Sender<AgentEvent>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Serve the console on the first free port from `first_port`. Returns the task queue.
pub async fn start_server(
    agent: Arc<Mutex<Orchestrator>>,
    event_tx: broadcast::Sender<AgentEvent>,
    first_port: u16,
) -> Result<mpsc::Receiver<String>> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);
    let state = Arc::new(AppState {
        agent,
        cmd_tx,
        event_tx,
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route("/tools", get(tools_handler))
        .route("/tools/{name}", post(tool_call_handler))
        .route(
            "/favicon.ico",
            get(|| async { StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    let mut bound = None;
    for port in first_port..first_port.saturating_add(PORT_ATTEMPTS) {
        if let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            bound = Some((listener, port));
            break;
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "Could not bind to any port {}-{}. Stop the old agent first.",
            first_port,
            first_port.saturating_add(PORT_ATTEMPTS - 1)
        )
    })?;

    info!("Web console running at http://localhost:{}", port);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Web server stopped: {}", e);
        }
    });

    Ok(cmd_rx)
}

async fn index_handler() -> Html<&'static str> {
    debug!("GET /");
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> (StatusCode, &'static str) {
    info!("POST /command: {}", payload.command);
    match state.cmd_tx.try_send(payload.command) {
        Ok(()) => (StatusCode::ACCEPTED, "queued"),
        Err(_) => (StatusCode::CONFLICT, "a task is already queued"),
    }
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(to_sse_event(&event))),
        Err(_) => None,
    });
    Sse::new(stream)
}

async fn tools_handler() -> Json<Value> {
    Json(json!(catalogue()))
}

/// Run one tool against the shared session. Waits for any running task to finish.
async fn tool_call_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let args = if body.iter().all(u8::is_ascii_whitespace) {
        ToolArgs::new()
    } else {
        match serde_json::from_slice::<Value>(&body)
            .ok()
            .and_then(ToolArgs::from_value)
        {
            Some(args) => args,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"status": "error", "message": "arguments must be a JSON object"})),
                );
            }
        }
    };

    let call = match registry::validate(&name, &args) {
        Ok(call) => call,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "message": e.to_string()})),
            );
        }
    };

    info!("POST /tools/{}", call);
    let mut agent = state.agent.lock().await;
    let result = registry::dispatch(agent.executor_mut(), &call).await;
    (
        StatusCode::OK,
        Json(serde_json::to_value(&result).unwrap_or_else(|_| json!({"status": "error"}))),
    )
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Browser Sleuth</title>
<style>
  * { margin: 0; padding: 0; box-sizing: border-box; }
  body { background: #0b0d12; color: #d8dde6; font: 14px/1.5 system-ui, sans-serif;
         height: 100vh; display: flex; flex-direction: column; }
  header { padding: 18px 28px; border-bottom: 1px solid #1c2130; display: flex; gap: 10px; align-items: center; }
  header h1 { font-size: 18px; color: #fff; font-weight: 600; }
  #dot { width: 8px; height: 8px; border-radius: 50%; background: #22c55e; }
  #dot.busy { background: #eab308; }
  main { flex: 1; display: grid; grid-template-columns: 1fr 260px; gap: 20px; padding: 20px 28px; overflow: hidden; }
  #log { overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  #tools { overflow-y: auto; font-size: 12px; color: #8b93a7; }
  #tools b { color: #c7d2fe; font-family: monospace; }
  .e { padding: 8px 12px; border-radius: 6px; border-left: 3px solid #334155; background: #111521; }
  .e.user { border-color: #6366f1; }
  .e.step { border-color: #3b82f6; font-family: monospace; font-size: 12px; }
  .e.err { border-color: #ef4444; color: #fca5a5; }
  .e.done { border-color: #22c55e; color: #86efac; white-space: pre-wrap; }
  .e.think { border-color: #eab308; color: #fde68a; }
  form { display: flex; gap: 8px; padding: 0 28px 20px; }
  #cmd { flex: 1; background: #111521; border: 1px solid #253047; border-radius: 6px; padding: 10px 14px; color: #fff; font-size: 15px; }
  button { background: #4f46e5; color: #fff; border: 0; border-radius: 6px; padding: 10px 20px; font-weight: 600; cursor: pointer; }
  button:disabled, #cmd:disabled { opacity: .5; cursor: not-allowed; }
</style>
</head>
<body>
<header><div id="dot"></div><h1>Browser Sleuth</h1></header>
<main><div id="log"></div><div id="tools"></div></main>
<form id="f"><input id="cmd" placeholder="Describe what to investigate..." autofocus><button id="go">Run</button></form>
<script>
  const $ = id => document.getElementById(id);
  const esc = s => String(s).replace(/&/g, '&amp;').replace(/</g, '&lt;');
  const add = (cls, html) => { const d = document.createElement('div'); d.className = 'e ' + cls; d.innerHTML = html; $('log').appendChild(d); $('log').scrollTop = 1e9; };
  const busy = b => { $('cmd').disabled = b; $('go').disabled = b; $('dot').className = b ? 'busy' : ''; if (!b) $('cmd').focus(); };

  $('f').addEventListener('submit', async ev => {
    ev.preventDefault();
    const text = $('cmd').value.trim();
    if (!text) return;
    $('cmd').value = '';
    add('user', '<b>Task:</b> ' + esc(text));
    busy(true);
    const r = await fetch('/command', { method: 'POST', headers: {'Content-Type': 'application/json'}, body: JSON.stringify({command: text}) });
    if (!r.ok) { add('err', esc(await r.text())); busy(false); }
  });

  fetch('/tools').then(r => r.json()).then(list => {
    $('tools').innerHTML = list.map(t => '<p><b>' + esc(t.name) + '</b> ' + esc(t.description) + '</p>').join('');
  });

  const es = new EventSource('/events');
  const on = (name, fn) => es.addEventListener(name, e => fn(JSON.parse(e.data)));
  on('thinking', () => add('think', 'Thinking...'));
  on('step', d => add('step', 'Step ' + d.number + ': ' + esc(d.description)));
  on('step_error', d => add('err', esc(d.message)));
  on('task_complete', d => add('done', '<b>Report:</b>\n' + esc(d.summary)));
  on('task_error', d => add('err', '<b>Task ended:</b> ' + esc(d.message)));
  on('ready', () => busy(false));
  add('done', 'Ready. Describe a task to begin.');
</script>
</body>
</html>
"##;
