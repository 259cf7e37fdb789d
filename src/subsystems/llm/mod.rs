//! LLM subsystem — routes `llm/*` bus requests to the provider cell.
//!
//! Implements [`BusHandler`] with prefix `"llm"` so the supervisor can
//! register it generically.  Each request is resolved in a spawned task;
//! the supervisor loop is never blocked on I/O.
//!
//! # Env updates
//!
//! `llm/update_env` never touches the process environment. Updates land in
//! an in-process overlay map consulted before `std::env::var`, the provider
//! is rebuilt from base config + overlay, and the fresh provider is probed
//! with a one-shot completion. A rebuild failure keeps the previous
//! provider in place, matching the original daemon's behavior.

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::{Config, LlmConfig};
use crate::llm::{EnvOutcome, ProviderCell, providers};
use crate::supervisor::bus::{BusError, BusPayload, BusResult, ERR_METHOD_NOT_FOUND};
use crate::supervisor::dispatch::BusHandler;

/// Overlay keys the rebuild consults.
const KEY_PROVIDER: &str = "GRIMOIRE_LLM_PROVIDER";
const KEY_MODEL: &str = "GRIMOIRE_LLM_MODEL";
const KEY_BASE_URL: &str = "GRIMOIRE_LLM_BASE_URL";
const KEY_API_KEY: &str = "LLM_API_KEY";

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LlmSubsystem {
    base: LlmConfig,
    cell: Arc<ProviderCell>,
    overlay: Arc<Mutex<HashMap<String, String>>>,
}

impl LlmSubsystem {
    /// Construct the subsystem. A provider build failure leaves the cell
    /// empty and is logged, never fatal — spells still load and list.
    pub fn new(config: &Config) -> Self {
        let initial = match providers::build(&config.llm, config.llm_api_key.clone()) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("llm provider unavailable at startup: {e}");
                None
            }
        };

        Self {
            base: config.llm.clone(),
            cell: Arc::new(ProviderCell::new(initial)),
            overlay: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The capability cell shared with the spell sandbox.
    pub fn provider_cell(&self) -> Arc<ProviderCell> {
        self.cell.clone()
    }
}

/// Resolve `key` from the overlay first, the process environment second.
fn effective(overlay: &HashMap<String, String>, key: &str) -> Option<String> {
    overlay.get(key).cloned().or_else(|| env::var(key).ok())
}

/// Base config with overlay/env overrides applied; returns the config and
/// the effective API key.
fn rebuild_config(
    base: &LlmConfig,
    overlay: &HashMap<String, String>,
) -> (LlmConfig, Option<String>) {
    let mut config = base.clone();
    if let Some(provider) = effective(overlay, KEY_PROVIDER) {
        config.provider = provider;
    }
    if let Some(model) = effective(overlay, KEY_MODEL) {
        config.openai.model = model;
    }
    if let Some(url) = effective(overlay, KEY_BASE_URL) {
        config.openai.api_base_url = url;
    }
    let api_key = effective(overlay, KEY_API_KEY);
    (config, api_key)
}

impl BusHandler for LlmSubsystem {
    fn prefix(&self) -> &str {
        "llm"
    }

    /// Route an `llm/*` request. Ownership of `reply_tx` is moved into a
    /// spawned task — the supervisor loop returns immediately.
    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        match (method, payload) {
            ("llm/quick_edit", BusPayload::QuickEdit { text }) => {
                let cell = self.cell.clone();
                tokio::spawn(async move {
                    let result = quick_edit(&cell, text).await;
                    let _ = reply_tx.send(Ok(BusPayload::QuickEdited { text: result }));
                });
            }
            ("llm/update_env", BusPayload::UpdateEnv { vars }) => {
                let cell = self.cell.clone();
                let overlay = self.overlay.clone();
                let base = self.base.clone();
                tokio::spawn(async move {
                    let outcome = update_env(&cell, &overlay, &base, vars).await;
                    let _ = reply_tx.send(Ok(BusPayload::EnvUpdated(outcome)));
                });
            }
            (method, _) => {
                let _ = reply_tx.send(Err(BusError::new(
                    ERR_METHOD_NOT_FOUND,
                    format!("unsupported method or payload: {method}"),
                )));
            }
        }
    }
}

/// One-shot LLM text improvement.
///
/// Without a provider the text is uppercased as a visible no-LLM fallback;
/// a provider error returns the text unchanged. Both are original-daemon
/// behavior — `quick_edit` must always hand something usable back.
async fn quick_edit(cell: &ProviderCell, text: String) -> String {
    if text.is_empty() {
        return text;
    }

    let Some(provider) = cell.snapshot() else {
        return text.to_uppercase();
    };

    match provider.complete(&text).await {
        Ok(reply) => reply.trim().to_string(),
        Err(e) => {
            warn!("quick_edit provider call failed: {e}");
            text
        }
    }
}

async fn update_env(
    cell: &ProviderCell,
    overlay: &Mutex<HashMap<String, String>>,
    base: &LlmConfig,
    vars: HashMap<String, String>,
) -> EnvOutcome {
    let updated: Vec<String> = vars.keys().cloned().collect();

    let merged = {
        let mut guard = overlay.lock().unwrap_or_else(PoisonError::into_inner);
        guard.extend(vars);
        guard.clone()
    };

    let (config, api_key) = rebuild_config(base, &merged);
    debug!(provider = %config.provider, model = %config.openai.model, "rebuilding llm provider");

    let provider = match providers::build(&config, api_key) {
        Ok(p) => {
            cell.replace(p.clone());
            p
        }
        Err(e) => {
            // Previous provider (if any) stays active.
            warn!("llm provider rebuild failed: {e}");
            return EnvOutcome {
                updated,
                ok: false,
                msg: e.to_string(),
            };
        }
    };

    match tokio::time::timeout(PROBE_TIMEOUT, provider.complete("Hello")).await {
        Ok(Ok(reply)) => EnvOutcome {
            updated,
            ok: !reply.is_empty(),
            msg: String::new(),
        },
        Ok(Err(e)) => EnvOutcome {
            updated,
            ok: false,
            msg: e.to_string(),
        },
        Err(_) => EnvOutcome {
            updated,
            ok: false,
            msg: "provider probe timed out".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmProvider;
    use crate::llm::providers::dummy::DummyProvider;
    use tempfile::TempDir;

    fn dummy_subsystem() -> LlmSubsystem {
        let dir = TempDir::new().unwrap();
        LlmSubsystem::new(&Config::test_default(dir.path()))
    }

    #[tokio::test]
    async fn quick_edit_uses_the_provider() {
        let cell = ProviderCell::new(Some(LlmProvider::Dummy(DummyProvider)));
        assert_eq!(quick_edit(&cell, "fix me".into()).await, "[echo] fix me");
    }

    #[tokio::test]
    async fn quick_edit_without_provider_uppercases() {
        let cell = ProviderCell::new(None);
        assert_eq!(quick_edit(&cell, "fix me".into()).await, "FIX ME");
    }

    #[tokio::test]
    async fn quick_edit_empty_text_is_passthrough() {
        let cell = ProviderCell::new(None);
        assert_eq!(quick_edit(&cell, String::new()).await, "");
    }

    #[tokio::test]
    async fn update_env_probes_rebuilt_provider() {
        let sub = dummy_subsystem();
        let (reply_tx, reply_rx) = oneshot::channel();
        sub.handle_request(
            "llm/update_env",
            BusPayload::UpdateEnv {
                vars: HashMap::from([(KEY_PROVIDER.to_string(), "dummy".to_string())]),
            },
            reply_tx,
        );

        match reply_rx.await.unwrap() {
            Ok(BusPayload::EnvUpdated(outcome)) => {
                assert!(outcome.ok);
                assert_eq!(outcome.updated, vec![KEY_PROVIDER.to_string()]);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_env_with_unknown_provider_reports_failure() {
        let sub = dummy_subsystem();
        let (reply_tx, reply_rx) = oneshot::channel();
        sub.handle_request(
            "llm/update_env",
            BusPayload::UpdateEnv {
                vars: HashMap::from([(KEY_PROVIDER.to_string(), "mystery".to_string())]),
            },
            reply_tx,
        );

        match reply_rx.await.unwrap() {
            Ok(BusPayload::EnvUpdated(outcome)) => {
                assert!(!outcome.ok);
                assert!(outcome.msg.contains("mystery"));
                // previous provider must survive a failed rebuild
                assert!(sub.cell.is_available());
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn overlay_beats_process_env() {
        let overlay = HashMap::from([(KEY_MODEL.to_string(), "overlay-model".to_string())]);
        let base = Config::test_default(TempDir::new().unwrap().path()).llm;
        let (config, _) = rebuild_config(&base, &overlay);
        assert_eq!(config.openai.model, "overlay-model");
    }
}
