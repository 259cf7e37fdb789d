//! HTTP comms channel — the sidecar's primary transport.
//!
//! Deliberately hand-rolled over `tokio::net::TcpListener`: the surface is
//! six fixed routes with `Connection: close` semantics, which does not
//! justify a framework dependency. Request parsing handles exactly what
//! local clients send — a request line, headers, optional
//! `Content-Length` body.
//!
//! Routes (paths kept compatible with existing clients):
//! - `GET  /ping`          → `"pong"`
//! - `GET  /health`        → `{"status":"ok"}`
//! - `POST /cast`          → cast a spell, JSON outcome
//! - `GET  /spells`        → registry listing
//! - `POST /spells/reload` → re-scan the spells directory
//! - `POST /env`           → LLM env update + provider probe
//! - `POST /quick_edit`    → one-shot LLM text improvement

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::spells::CastRequest;
use crate::subsystems::runtime::{Component, ComponentFuture};
use super::state::{CommsEvent, CommsState};

const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Casts can block on a busy sandbox; everything else should answer fast.
const CAST_TIMEOUT: Duration = Duration::from_secs(120);
const QUICK_EDIT_TIMEOUT: Duration = Duration::from_secs(120);
const ENV_TIMEOUT: Duration = Duration::from_secs(30);
const RELOAD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpChannel {
    channel_id: String,
    bind_addr: String,
    state: Arc<CommsState>,
}

impl HttpChannel {
    pub fn new(
        channel_id: impl Into<String>,
        bind_addr: impl Into<String>,
        state: Arc<CommsState>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            bind_addr: bind_addr.into(),
            state,
        }
    }
}

impl Component for HttpChannel {
    fn id(&self) -> &str {
        &self.channel_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_http(self.channel_id, self.bind_addr, self.state, shutdown))
    }
}

async fn run_http(
    channel_id: String,
    bind_addr: String,
    state: Arc<CommsState>,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Comms(format!("http bind failed on {bind_addr}: {e}")))?;

    info!(%channel_id, %bind_addr, "http channel listening");

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(%channel_id, "http channel shutting down");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        debug!(%channel_id, %peer, "http client connected");
                        state.report_event(CommsEvent::SessionStarted { channel_id: channel_id.clone() });
                        let state = state.clone();
                        let channel_id = channel_id.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(state, channel_id, socket).await {
                                warn!("http connection handling failed: {e}");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(%channel_id, "http accept error: {e}");
                    }
                }
            }
        }
    }

    state.report_event(CommsEvent::ChannelShutdown { channel_id });
    Ok(())
}

async fn handle_connection(
    state: Arc<CommsState>,
    channel_id: String,
    mut socket: tokio::net::TcpStream,
) -> Result<(), AppError> {
    let request = read_request(&mut socket).await?;

    let Some(req) = request else {
        return Ok(());
    };

    match (req.method.as_str(), req.path.as_str()) {
        // ── GET /ping ────────────────────────────────────────────────
        ("GET", "/ping") => {
            write_json_response(&mut socket, "200 OK", b"\"pong\"").await?;
        }

        // ── GET /health ──────────────────────────────────────────────
        ("GET", "/health") => {
            write_json_response(&mut socket, "200 OK", br#"{"status":"ok"}"#).await?;
        }

        // ── POST /cast ───────────────────────────────────────────────
        ("POST", "/cast") => {
            let cast_req: CastRequest = match parse_body(&req.body) {
                Ok(r) => r,
                Err(resp) => return write_bad_request(&mut socket, resp).await,
            };

            let outcome = tokio::time::timeout(
                CAST_TIMEOUT,
                state.cast_spell(&channel_id, cast_req),
            )
            .await;

            match outcome {
                Ok(Ok(outcome)) => {
                    let body = serde_json::to_vec(&outcome)
                        .map_err(|e| AppError::Comms(format!("outcome serialization failed: {e}")))?;
                    write_json_response(&mut socket, "200 OK", &body).await?;
                }
                Ok(Err(e)) => {
                    warn!(%channel_id, "cast request failed: {e}");
                    write_error(&mut socket, "502 Bad Gateway", "internal", &e.to_string()).await?;
                }
                Err(_) => {
                    write_error(&mut socket, "504 Gateway Timeout", "timeout", "cast timed out").await?;
                }
            }
        }

        // ── GET /spells ──────────────────────────────────────────────
        ("GET", "/spells") => {
            match state.list_spells().await {
                Ok(spells) => {
                    let body = serde_json::to_vec(&spells)
                        .map_err(|e| AppError::Comms(format!("list serialization failed: {e}")))?;
                    write_json_response(&mut socket, "200 OK", &body).await?;
                }
                Err(e) => {
                    warn!(%channel_id, "spell listing failed: {e}");
                    write_error(&mut socket, "502 Bad Gateway", "internal", &e.to_string()).await?;
                }
            }
        }

        // ── POST /spells/reload ──────────────────────────────────────
        ("POST", "/spells/reload") => {
            match tokio::time::timeout(RELOAD_TIMEOUT, state.reload_spells()).await {
                Ok(Ok(count)) => {
                    let body = serde_json::json!({ "reloaded": count });
                    write_json_response(&mut socket, "200 OK", body.to_string().as_bytes()).await?;
                }
                Ok(Err(e)) => {
                    write_error(&mut socket, "502 Bad Gateway", "internal", &e.to_string()).await?;
                }
                Err(_) => {
                    write_error(&mut socket, "504 Gateway Timeout", "timeout", "reload timed out").await?;
                }
            }
        }

        // ── POST /env ────────────────────────────────────────────────
        ("POST", "/env") => {
            let env_req: EnvUpdateRequest = match parse_body(&req.body) {
                Ok(r) => r,
                Err(resp) => return write_bad_request(&mut socket, resp).await,
            };

            match tokio::time::timeout(ENV_TIMEOUT, state.update_env(env_req.env)).await {
                Ok(Ok(outcome)) => {
                    let body = serde_json::to_vec(&outcome)
                        .map_err(|e| AppError::Comms(format!("env serialization failed: {e}")))?;
                    write_json_response(&mut socket, "200 OK", &body).await?;
                }
                Ok(Err(e)) => {
                    write_error(&mut socket, "502 Bad Gateway", "internal", &e.to_string()).await?;
                }
                Err(_) => {
                    write_error(&mut socket, "504 Gateway Timeout", "timeout", "env update timed out").await?;
                }
            }
        }

        // ── POST /quick_edit ─────────────────────────────────────────
        ("POST", "/quick_edit") => {
            let edit_req: QuickEditRequest = match parse_body(&req.body) {
                Ok(r) => r,
                Err(resp) => return write_bad_request(&mut socket, resp).await,
            };

            match tokio::time::timeout(QUICK_EDIT_TIMEOUT, state.quick_edit(edit_req.text)).await {
                Ok(Ok(result)) => {
                    let body = serde_json::json!({ "result": result });
                    write_json_response(&mut socket, "200 OK", body.to_string().as_bytes()).await?;
                }
                Ok(Err(e)) => {
                    write_error(&mut socket, "502 Bad Gateway", "internal", &e.to_string()).await?;
                }
                Err(_) => {
                    write_error(&mut socket, "504 Gateway Timeout", "timeout", "quick_edit timed out").await?;
                }
            }
        }

        // ── Catch-all 404 ────────────────────────────────────────────
        _ => {
            write_error(&mut socket, "404 Not Found", "not_found", "no such endpoint").await?;
        }
    }

    Ok(())
}

// ── Request types ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct EnvUpdateRequest {
    env: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct QuickEditRequest {
    text: String,
}

/// Parsed HTTP request with method, path, and optional body.
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, String> {
    let body_str =
        std::str::from_utf8(body).map_err(|_| "request body is not valid utf-8".to_string())?;
    serde_json::from_str(body_str).map_err(|e| format!("invalid JSON: {e}"))
}

// ── Request parsing ───────────────────────────────────────────────────────────

async fn read_request(
    socket: &mut tokio::net::TcpStream,
) -> Result<Option<HttpRequest>, AppError> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    // Read until we have the full header block (terminated by \r\n\r\n).
    loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(AppError::Comms("http request truncated".to_string()));
        }

        buffer.extend_from_slice(&chunk[..n]);

        if buffer.len() > MAX_HEADER_BYTES {
            return Err(AppError::Comms("http request headers too large".to_string()));
        }

        if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    // Split headers from any body bytes already read.
    let header_end = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or_default();
    let body_start = header_end + 4;
    let header_bytes = &buffer[..header_end];

    let header_str = std::str::from_utf8(header_bytes)
        .map_err(|_| AppError::Comms("http request was not valid utf-8".to_string()))?;

    let first_line = header_str
        .lines()
        .next()
        .ok_or_else(|| AppError::Comms("empty http request".to_string()))?;

    let mut parts = first_line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| AppError::Comms("missing http method".to_string()))?
        .to_string();
    let path = parts
        .next()
        .ok_or_else(|| AppError::Comms("missing http path".to_string()))?
        .to_string();

    // Parse Content-Length from headers (case-insensitive).
    let content_length: usize = header_str
        .lines()
        .skip(1)
        .find_map(|line| {
            let lower = line.to_ascii_lowercase();
            if lower.starts_with("content-length:") {
                line.split_once(':')
                    .and_then(|(_, v)| v.trim().parse().ok())
            } else {
                None
            }
        })
        .unwrap_or(0);

    // Read body if Content-Length > 0.
    let mut body = buffer[body_start..].to_vec();
    while body.len() < content_length {
        let remaining = content_length - body.len();
        let mut read_buf = vec![0u8; remaining.min(8192)];
        let n = socket.read(&mut read_buf).await?;
        if n == 0 {
            return Err(AppError::Comms("http request body truncated".to_string()));
        }
        body.extend_from_slice(&read_buf[..n]);
    }
    body.truncate(content_length);

    Ok(Some(HttpRequest { method, path, body }))
}

// ── Response writing ──────────────────────────────────────────────────────────

async fn write_bad_request(
    socket: &mut tokio::net::TcpStream,
    message: String,
) -> Result<(), AppError> {
    write_error(socket, "400 Bad Request", "bad_request", &message).await
}

async fn write_error(
    socket: &mut tokio::net::TcpStream,
    status: &str,
    kind: &str,
    message: &str,
) -> Result<(), AppError> {
    let body = serde_json::json!({ "error": kind, "message": message });
    write_json_response(socket, status, body.to_string().as_bytes()).await
}

async fn write_json_response(
    socket: &mut tokio::net::TcpStream,
    status: &str,
    body: &[u8],
) -> Result<(), AppError> {
    write_response(socket, status, "application/json", body).await
}

async fn write_response(
    socket: &mut tokio::net::TcpStream,
    status: &str,
    content_type: &str,
    body: &[u8],
) -> Result<(), AppError> {
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    socket.write_all(header.as_bytes()).await?;
    socket.write_all(body).await?;
    socket.shutdown().await?;
    Ok(())
}
