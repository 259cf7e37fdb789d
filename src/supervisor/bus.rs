//! Supervisor event bus — typed request/reply channel between comms
//! channels and subsystems.
//!
//! Channels hold a cloneable [`BusHandle`]; the supervisor owns the
//! receiving end and routes each message to the subsystem registered for
//! the method's first `/`-delimited segment.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::error::AppError;
use crate::llm::EnvOutcome;
use crate::spells::registry::SpellDescriptor;
use crate::spells::{CastOutcome, CastRequest};

// ── Errors ────────────────────────────────────────────────────────────────────

pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INTERNAL: i64 = -32000;

/// A structured failure reply from a subsystem.
#[derive(Debug, Clone)]
pub struct BusError {
    pub code: i64,
    pub message: String,
}

impl BusError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type BusResult = Result<BusPayload, BusError>;

// ── Payloads ──────────────────────────────────────────────────────────────────

/// Every request/reply body that crosses the bus.
#[derive(Debug)]
pub enum BusPayload {
    /// `spells/cast` request.
    Cast(CastRequest),
    /// `spells/cast` reply.
    CastDone(CastOutcome),
    /// `spells/list` request.
    ListSpells,
    /// `spells/list` reply.
    SpellList(Vec<SpellDescriptor>),
    /// `spells/reload` request — re-scan the spells directory.
    ReloadSpells,
    /// `spells/reload` reply.
    SpellsReloaded { count: usize },
    /// `llm/update_env` request.
    UpdateEnv { vars: HashMap<String, String> },
    /// `llm/update_env` reply.
    EnvUpdated(EnvOutcome),
    /// `llm/quick_edit` request.
    QuickEdit { text: String },
    /// `llm/quick_edit` reply.
    QuickEdited { text: String },
}

// ── Messages ──────────────────────────────────────────────────────────────────

pub enum BusMessage {
    /// Expects exactly one reply through `reply_tx`.
    Request {
        method: String,
        payload: BusPayload,
        reply_tx: oneshot::Sender<BusResult>,
    },
    /// Fire-and-forget.
    Notification { method: String, payload: BusPayload },
}

// ── BusHandle ─────────────────────────────────────────────────────────────────

/// Cloneable sender half given to comms channels.
#[derive(Clone)]
pub struct BusHandle {
    tx: mpsc::Sender<BusMessage>,
}

impl BusHandle {
    /// Send a request and await the subsystem's reply.
    ///
    /// The outer `Result` is transport failure (bus closed); the inner
    /// [`BusResult`] is the subsystem's answer.
    pub async fn request(
        &self,
        method: impl Into<String>,
        payload: BusPayload,
    ) -> Result<BusResult, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::Request {
                method: method.into(),
                payload,
                reply_tx,
            })
            .await
            .map_err(|_| AppError::Comms("bus closed".to_string()))?;

        reply_rx
            .await
            .map_err(|_| AppError::Comms("bus reply dropped".to_string()))
    }

    /// Send a notification without waiting for a reply.
    pub async fn notify(
        &self,
        method: impl Into<String>,
        payload: BusPayload,
    ) -> Result<(), AppError> {
        self.tx
            .send(BusMessage::Notification {
                method: method.into(),
                payload,
            })
            .await
            .map_err(|_| AppError::Comms("bus closed".to_string()))
    }
}

// ── SupervisorBus ─────────────────────────────────────────────────────────────

/// Owns the supervisor-side channel end.
pub struct SupervisorBus {
    /// Supervisor receives inbound messages here.
    pub rx: mpsc::Receiver<BusMessage>,
    handle: BusHandle,
}

impl SupervisorBus {
    pub fn new(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        Self {
            rx,
            handle: BusHandle { tx },
        }
    }

    /// A cloneable sender for comms channels.
    pub fn handle(&self) -> BusHandle {
        self.handle.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_round_trip() {
        let mut bus = SupervisorBus::new(4);
        let handle = bus.handle();

        let server = tokio::spawn(async move {
            match bus.rx.recv().await {
                Some(BusMessage::Request { method, reply_tx, .. }) => {
                    assert_eq!(method, "spells/list");
                    let _ = reply_tx.send(Ok(BusPayload::SpellList(Vec::new())));
                }
                _ => panic!("expected a request"),
            }
        });

        let reply = handle.request("spells/list", BusPayload::ListSpells).await.unwrap();
        assert!(matches!(reply, Ok(BusPayload::SpellList(ref v)) if v.is_empty()));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn request_after_close_is_transport_error() {
        let bus = SupervisorBus::new(1);
        let handle = bus.handle();
        drop(bus);

        let err = handle.request("spells/list", BusPayload::ListSpells).await.unwrap_err();
        assert!(err.to_string().contains("bus closed"));
    }
}
