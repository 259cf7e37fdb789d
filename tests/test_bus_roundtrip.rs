//! Full round-trip through the supervisor bus: requests enter as a comms
//! channel would submit them and resolve against the real spells and llm
//! subsystems.

use std::collections::HashMap;
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use grimoire::config::{
    CommsConfig, Config, FailureOutput, HttpConfig, LlmConfig, OpenAiConfig, SpellsConfig,
    StdioConfig,
};
use grimoire::spells::sandbox::{LlmCapability, ScriptSandbox};
use grimoire::spells::{CastRequest, SpellService};
use grimoire::subsystems::llm::LlmSubsystem;
use grimoire::subsystems::spells::SpellsSubsystem;
use grimoire::supervisor;
use grimoire::supervisor::bus::{BusHandle, BusPayload, SupervisorBus};
use grimoire::supervisor::dispatch::BusHandler;

fn dummy_config(spells_dir: &std::path::Path) -> Config {
    Config {
        daemon_name: "test".into(),
        spells_dir: spells_dir.to_path_buf(),
        log_level: "info".into(),
        comms: CommsConfig {
            stdio: StdioConfig { enabled: false },
            http: HttpConfig {
                enabled: false,
                bind: "127.0.0.1:0".into(),
            },
        },
        spells: SpellsConfig {
            failure_output: FailureOutput::Empty,
        },
        llm: LlmConfig {
            provider: "dummy".into(),
            openai: OpenAiConfig {
                api_base_url: "http://localhost:0/v1/chat/completions".into(),
                model: "test-model".into(),
                temperature: 0.0,
                timeout_seconds: 1,
            },
        },
        llm_api_key: None,
    }
}

/// Spin up a supervisor with real subsystems over `spells_dir`.
fn start_daemon(spells_dir: &TempDir) -> (BusHandle, CancellationToken) {
    let config = dummy_config(spells_dir.path());

    let llm = LlmSubsystem::new(&config);
    let capability = LlmCapability::Provider {
        cell: llm.provider_cell(),
        handle: tokio::runtime::Handle::current(),
    };

    let service = Arc::new(SpellService::new(
        ScriptSandbox::new(capability),
        config.spells.failure_output,
    ));
    service.discover(spells_dir.path());

    let handlers: Vec<Box<dyn BusHandler>> = vec![
        Box::new(SpellsSubsystem::new(service, spells_dir.path().to_path_buf())),
        Box::new(llm),
    ];

    let bus = SupervisorBus::new(16);
    let handle = bus.handle();
    let shutdown = CancellationToken::new();
    tokio::spawn(supervisor::run(bus, shutdown.clone(), handlers));

    (handle, shutdown)
}

fn write_spell(dir: &TempDir, name: &str, contents: &str) {
    std::fs::write(dir.path().join(name), contents).unwrap();
}

#[tokio::test]
async fn cast_resolves_through_the_bus() {
    let dir = TempDir::new().unwrap();
    write_spell(
        &dir,
        "shout.rhai",
        "const META = #{ id: \"shout\" };\nfn main(text) { text.to_upper() }",
    );
    let (bus, shutdown) = start_daemon(&dir);

    let reply = bus
        .request(
            "spells/cast",
            BusPayload::Cast(CastRequest {
                spell_id: "shout".into(),
                script_file: None,
                script: None,
                input: "abc".into(),
            }),
        )
        .await
        .unwrap();

    match reply {
        Ok(BusPayload::CastDone(outcome)) => {
            assert!(outcome.success);
            assert_eq!(outcome.output, "ABC");
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    shutdown.cancel();
}

#[tokio::test]
async fn spell_can_reach_the_llm_capability() {
    let dir = TempDir::new().unwrap();
    write_spell(
        &dir,
        "oracle.rhai",
        "const META = #{ id: \"oracle\" };\nfn main(text) { llm(text) }",
    );
    let (bus, shutdown) = start_daemon(&dir);

    let reply = bus
        .request(
            "spells/cast",
            BusPayload::Cast(CastRequest {
                spell_id: "oracle".into(),
                script_file: None,
                script: None,
                input: "hello".into(),
            }),
        )
        .await
        .unwrap();

    match reply {
        Ok(BusPayload::CastDone(outcome)) => {
            assert!(outcome.success, "error: {:?}", outcome.error);
            assert_eq!(outcome.output, "[echo] hello");
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    shutdown.cancel();
}

#[tokio::test]
async fn list_and_reload_via_bus() {
    let dir = TempDir::new().unwrap();
    let (bus, shutdown) = start_daemon(&dir);

    match bus.request("spells/list", BusPayload::ListSpells).await.unwrap() {
        Ok(BusPayload::SpellList(spells)) => assert!(spells.is_empty()),
        other => panic!("unexpected reply: {other:?}"),
    }

    write_spell(
        &dir,
        "late.rhai",
        "const META = #{ id: \"late\" };\nfn main(text) { text }",
    );

    match bus.request("spells/reload", BusPayload::ReloadSpells).await.unwrap() {
        Ok(BusPayload::SpellsReloaded { count }) => assert_eq!(count, 1),
        other => panic!("unexpected reply: {other:?}"),
    }

    shutdown.cancel();
}

#[tokio::test]
async fn quick_edit_and_env_update_via_bus() {
    let dir = TempDir::new().unwrap();
    let (bus, shutdown) = start_daemon(&dir);

    match bus
        .request("llm/quick_edit", BusPayload::QuickEdit { text: "fix me".into() })
        .await
        .unwrap()
    {
        Ok(BusPayload::QuickEdited { text }) => assert_eq!(text, "[echo] fix me"),
        other => panic!("unexpected reply: {other:?}"),
    }

    let vars = HashMap::from([("GRIMOIRE_LLM_PROVIDER".to_string(), "dummy".to_string())]);
    match bus
        .request("llm/update_env", BusPayload::UpdateEnv { vars })
        .await
        .unwrap()
    {
        Ok(BusPayload::EnvUpdated(outcome)) => {
            assert!(outcome.ok, "probe failed: {}", outcome.msg);
            assert_eq!(outcome.updated, vec!["GRIMOIRE_LLM_PROVIDER".to_string()]);
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    shutdown.cancel();
}
