//! Shared state for the Comms subsystem — capability boundary for channels.
//!
//! Channels receive an `Arc<CommsState>` and are restricted to the typed
//! methods below.  The raw [`BusHandle`] is private; channels cannot call
//! arbitrary bus methods or supervisor internals.
//!
//! # Intra-subsystem events
//!
//! [`CommsState::report_event`] lets a running channel signal the comms
//! subsystem manager (e.g. "I shut down", "new session started") without
//! going through the supervisor bus.  The manager owns the receiver end.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::llm::EnvOutcome;
use crate::spells::registry::SpellDescriptor;
use crate::spells::{CastOutcome, CastRequest};
use crate::supervisor::bus::{BusHandle, BusPayload};

// ── Events ────────────────────────────────────────────────────────────────────

/// Events a channel sends back to the comms subsystem manager.
#[derive(Debug)]
pub enum CommsEvent {
    /// Channel has stopped (clean exit or EOF).
    ChannelShutdown { channel_id: String },
    /// A new session/connection was established on the channel.
    SessionStarted { channel_id: String },
}

// ── State ─────────────────────────────────────────────────────────────────────

/// Shared state passed as `Arc<CommsState>` to every channel task.
pub struct CommsState {
    /// Supervisor bus — private so channels can't call arbitrary methods.
    bus: BusHandle,
    /// Back-channel to the comms subsystem manager.
    event_tx: mpsc::Sender<CommsEvent>,
}

impl CommsState {
    pub fn new(bus: BusHandle, event_tx: mpsc::Sender<CommsEvent>) -> Self {
        Self { bus, event_tx }
    }

    /// Cast a spell and await its outcome.
    ///
    /// Failures inside the spell come back as unsuccessful outcomes; an
    /// `Err` here means the request never reached the spells subsystem.
    pub async fn cast_spell(
        &self,
        channel_id: &str,
        request: CastRequest,
    ) -> Result<CastOutcome, AppError> {
        debug!(%channel_id, spell_id = %request.spell_id, "forwarding cast");
        match self.bus.request("spells/cast", BusPayload::Cast(request)).await {
            Err(e) => Err(AppError::Comms(format!("bus error: {e}"))),
            Ok(Err(e)) => Err(AppError::Comms(format!("spells error {}: {}", e.code, e.message))),
            Ok(Ok(BusPayload::CastDone(outcome))) => Ok(outcome),
            Ok(Ok(_)) => Err(AppError::Comms("unexpected reply payload".to_string())),
        }
    }

    /// List all registered spells.
    pub async fn list_spells(&self) -> Result<Vec<SpellDescriptor>, AppError> {
        match self.bus.request("spells/list", BusPayload::ListSpells).await {
            Err(e) => Err(AppError::Comms(format!("bus error: {e}"))),
            Ok(Err(e)) => Err(AppError::Comms(format!("spells error {}: {}", e.code, e.message))),
            Ok(Ok(BusPayload::SpellList(spells))) => Ok(spells),
            Ok(Ok(_)) => Err(AppError::Comms("unexpected reply payload".to_string())),
        }
    }

    /// Re-scan the spells directory; returns the new registry size.
    pub async fn reload_spells(&self) -> Result<usize, AppError> {
        match self.bus.request("spells/reload", BusPayload::ReloadSpells).await {
            Err(e) => Err(AppError::Comms(format!("bus error: {e}"))),
            Ok(Err(e)) => Err(AppError::Comms(format!("spells error {}: {}", e.code, e.message))),
            Ok(Ok(BusPayload::SpellsReloaded { count })) => Ok(count),
            Ok(Ok(_)) => Err(AppError::Comms("unexpected reply payload".to_string())),
        }
    }

    /// Apply env vars to the LLM configuration overlay and probe the
    /// rebuilt provider.
    pub async fn update_env(
        &self,
        vars: HashMap<String, String>,
    ) -> Result<EnvOutcome, AppError> {
        match self.bus.request("llm/update_env", BusPayload::UpdateEnv { vars }).await {
            Err(e) => Err(AppError::Comms(format!("bus error: {e}"))),
            Ok(Err(e)) => Err(AppError::Comms(format!("llm error {}: {}", e.code, e.message))),
            Ok(Ok(BusPayload::EnvUpdated(outcome))) => Ok(outcome),
            Ok(Ok(_)) => Err(AppError::Comms("unexpected reply payload".to_string())),
        }
    }

    /// One-shot LLM text improvement.
    pub async fn quick_edit(&self, text: String) -> Result<String, AppError> {
        match self.bus.request("llm/quick_edit", BusPayload::QuickEdit { text }).await {
            Err(e) => Err(AppError::Comms(format!("bus error: {e}"))),
            Ok(Err(e)) => Err(AppError::Comms(format!("llm error {}: {}", e.code, e.message))),
            Ok(Ok(BusPayload::QuickEdited { text })) => Ok(text),
            Ok(Ok(_)) => Err(AppError::Comms("unexpected reply payload".to_string())),
        }
    }

    /// Report an event to the comms subsystem manager.
    ///
    /// Non-blocking: drops the event and logs a warning if the manager is not
    /// keeping up (channel full) or has already exited (closed).
    pub fn report_event(&self, event: CommsEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            warn!("comms event dropped: {e}");
        }
    }
}
