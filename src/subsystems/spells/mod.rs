//! Spells subsystem — routes `spells/*` bus requests to the [`SpellService`].
//!
//! Implements [`BusHandler`] with prefix `"spells"` so the supervisor can
//! register it generically. Casting and re-scanning touch the filesystem and
//! serialize on the sandbox lock, so both run on blocking threads; the
//! supervisor loop is never blocked.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use crate::spells::SpellService;
use crate::supervisor::bus::{BusError, BusPayload, BusResult, ERR_METHOD_NOT_FOUND};
use crate::supervisor::dispatch::BusHandler;

pub struct SpellsSubsystem {
    service: Arc<SpellService>,
    spells_dir: PathBuf,
}

impl SpellsSubsystem {
    pub fn new(service: Arc<SpellService>, spells_dir: PathBuf) -> Self {
        Self { service, spells_dir }
    }
}

impl BusHandler for SpellsSubsystem {
    fn prefix(&self) -> &str {
        "spells"
    }

    fn handle_request(&self, method: &str, payload: BusPayload, reply_tx: oneshot::Sender<BusResult>) {
        match (method, payload) {
            ("spells/cast", BusPayload::Cast(req)) => {
                let service = self.service.clone();
                debug!(spell_id = %req.spell_id, "dispatching cast to blocking pool");
                tokio::task::spawn_blocking(move || {
                    let outcome = service.cast(&req);
                    let _ = reply_tx.send(Ok(BusPayload::CastDone(outcome)));
                });
            }
            ("spells/list", BusPayload::ListSpells) => {
                let _ = reply_tx.send(Ok(BusPayload::SpellList(self.service.list())));
            }
            ("spells/reload", BusPayload::ReloadSpells) => {
                let service = self.service.clone();
                let dir = self.spells_dir.clone();
                tokio::task::spawn_blocking(move || {
                    let count = service.discover(&dir);
                    let _ = reply_tx.send(Ok(BusPayload::SpellsReloaded { count }));
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailureOutput;
    use crate::spells::CastRequest;
    use crate::spells::sandbox::{LlmCapability, ScriptSandbox};
    use tempfile::TempDir;

    fn subsystem(spells_dir: &TempDir) -> SpellsSubsystem {
        let service = Arc::new(SpellService::new(
            ScriptSandbox::new(LlmCapability::Unavailable),
            FailureOutput::Empty,
        ));
        service.discover(spells_dir.path());
        SpellsSubsystem::new(service, spells_dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn cast_request_resolves_outcome() {
        let dir = TempDir::new().unwrap();
        let sub = subsystem(&dir);

        let (reply_tx, reply_rx) = oneshot::channel();
        sub.handle_request(
            "spells/cast",
            BusPayload::Cast(CastRequest {
                spell_id: "inline".into(),
                script_file: None,
                script: Some("fn main(text) { text.to_upper() }".into()),
                input: "abc".into(),
            }),
            reply_tx,
        );

        match reply_rx.await.unwrap() {
            Ok(BusPayload::CastDone(outcome)) => {
                assert!(outcome.success);
                assert_eq!(outcome.output, "ABC");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_reflects_discovered_spells() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("shout.rhai"),
            "const META = #{ id: \"shout\" };\nfn main(text) { text.to_upper() }",
        )
        .unwrap();
        let sub = subsystem(&dir);

        let (reply_tx, reply_rx) = oneshot::channel();
        sub.handle_request("spells/list", BusPayload::ListSpells, reply_tx);

        match reply_rx.await.unwrap() {
            Ok(BusPayload::SpellList(spells)) => {
                assert_eq!(spells.len(), 1);
                assert_eq!(spells[0].id, "shout");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reload_picks_up_new_scripts() {
        let dir = TempDir::new().unwrap();
        let sub = subsystem(&dir);

        std::fs::write(
            dir.path().join("late.rhai"),
            "const META = #{ id: \"late\" };\nfn main(text) { text }",
        )
        .unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        sub.handle_request("spells/reload", BusPayload::ReloadSpells, reply_tx);

        match reply_rx.await.unwrap() {
            Ok(BusPayload::SpellsReloaded { count }) => assert_eq!(count, 1),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mismatched_payload_is_rejected() {
        let dir = TempDir::new().unwrap();
        let sub = subsystem(&dir);

        let (reply_tx, reply_rx) = oneshot::channel();
        sub.handle_request("spells/cast", BusPayload::ListSpells, reply_tx);

        match reply_rx.await.unwrap() {
            Err(e) => assert_eq!(e.code, ERR_METHOD_NOT_FOUND),
            Ok(_) => panic!("expected an error"),
        }
    }
}
