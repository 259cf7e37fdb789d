//! Stdio comms channel — line-oriented JSON transport.
//!
//! One JSON object per line on stdin:
//! `{"command": "cast", "params": {...}}`; one JSON object per line on
//! stdout: `{"result": ...}` or `{"error": "..."}`. This is the embedding
//! transport for host processes that spawn the daemon as a child instead of
//! talking HTTP. Log output goes to stderr so stdout stays parseable.
//!
//! Implements [`Component`] so the comms subsystem can spawn it as an
//! independent task. All supervisor communication goes through the typed
//! [`CommsState`] methods — this module has no direct bus access.
//!
//! Runs until the `shutdown` token is cancelled or stdin is closed.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::spells::CastRequest;
use crate::subsystems::runtime::{Component, ComponentFuture};
use super::state::{CommsEvent, CommsState};

// ── StdioChannel ─────────────────────────────────────────────────────────────

pub struct StdioChannel {
    channel_id: String,
    state: Arc<CommsState>,
}

impl StdioChannel {
    pub fn new(channel_id: impl Into<String>, state: Arc<CommsState>) -> Self {
        Self {
            channel_id: channel_id.into(),
            state,
        }
    }
}

impl Component for StdioChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_stdio(self.channel_id, self.state, shutdown))
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// One inbound request line.
#[derive(Debug, Deserialize)]
struct RequestFrame {
    command: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct EnvParams {
    env: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct QuickEditParams {
    text: String,
}

// ── run_stdio ────────────────────────────────────────────────────────────────

async fn run_stdio(
    channel_id: String,
    state: Arc<CommsState>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    info!(%channel_id, "stdio channel started");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(%channel_id, "stdio channel shutting down");
                break;
            }

            line = lines.next_line() => {
                match line {
                    Err(e) => {
                        warn!("stdio read error: {e}");
                        break;
                    }
                    Ok(None) => {
                        info!("stdio stdin closed");
                        break;
                    }
                    Ok(Some(input)) => {
                        let input = input.trim().to_string();
                        if input.is_empty() { continue; }

                        debug!(%channel_id, "stdio received line");
                        let reply = handle_line(&state, &channel_id, &input).await;
                        println!("{reply}");
                    }
                }
            }
        }
    }

    state.report_event(CommsEvent::ChannelShutdown { channel_id });
    Ok(())
}

/// Parse one request line and resolve it to a reply line.
///
/// Never errors upward: anything wrong with the line itself becomes an
/// `{"error": ...}` reply so the peer's read loop stays in sync.
async fn handle_line(state: &CommsState, channel_id: &str, line: &str) -> String {
    let frame: RequestFrame = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => return error_reply(format!("invalid request line: {e}")),
    };

    match frame.command.as_str() {
        "ping" => json!({ "result": "pong" }).to_string(),

        "cast" => {
            let request: CastRequest = match serde_json::from_value(frame.params) {
                Ok(r) => r,
                Err(e) => return error_reply(format!("invalid cast params: {e}")),
            };
            match state.cast_spell(channel_id, request).await {
                Ok(outcome) => wrap_result(serde_json::to_value(&outcome)),
                Err(e) => error_reply(e.to_string()),
            }
        }

        "list_spells" => match state.list_spells().await {
            Ok(spells) => wrap_result(serde_json::to_value(&spells)),
            Err(e) => error_reply(e.to_string()),
        },

        "reload_spells" => match state.reload_spells().await {
            Ok(count) => json!({ "result": { "reloaded": count } }).to_string(),
            Err(e) => error_reply(e.to_string()),
        },

        "update_env" => {
            let params: EnvParams = match serde_json::from_value(frame.params) {
                Ok(p) => p,
                Err(e) => return error_reply(format!("invalid update_env params: {e}")),
            };
            match state.update_env(params.env).await {
                Ok(outcome) => wrap_result(serde_json::to_value(&outcome)),
                Err(e) => error_reply(e.to_string()),
            }
        }

        "quick_edit" => {
            let params: QuickEditParams = match serde_json::from_value(frame.params) {
                Ok(p) => p,
                Err(e) => return error_reply(format!("invalid quick_edit params: {e}")),
            };
            match state.quick_edit(params.text).await {
                Ok(result) => json!({ "result": result }).to_string(),
                Err(e) => error_reply(e.to_string()),
            }
        }

        other => error_reply(format!("unknown command: {other}")),
    }
}

fn wrap_result(value: Result<Value, serde_json::Error>) -> String {
    match value {
        Ok(v) => json!({ "result": v }).to_string(),
        Err(e) => error_reply(format!("reply serialization failed: {e}")),
    }
}

fn error_reply(message: String) -> String {
    json!({ "error": message }).to_string()
}
