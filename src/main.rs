//! Grimoire daemon — entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Init logger at configured level
//!   4. Build the LLM subsystem and the spell sandbox around its capability
//!   5. Discover spells
//!   6. Spawn the supervisor and comms channels; run until Ctrl-C

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use grimoire::config;
use grimoire::error::AppError;
use grimoire::logger;
use grimoire::spells::SpellService;
use grimoire::spells::sandbox::{LlmCapability, ScriptSandbox};
use grimoire::subsystems;
use grimoire::subsystems::llm::LlmSubsystem;
use grimoire::subsystems::spells::SpellsSubsystem;
use grimoire::supervisor;
use grimoire::supervisor::bus::SupervisorBus;
use grimoire::supervisor::dispatch::BusHandler;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let config = config::load()?;
    logger::init(&config.log_level)?;

    info!(
        daemon = %config.daemon_name,
        spells_dir = %config.spells_dir.display(),
        log_level = %config.log_level,
        "config loaded"
    );

    let shutdown = CancellationToken::new();
    let bus = SupervisorBus::new(64);
    let bus_handle = bus.handle();

    // LLM subsystem first — the spell sandbox wants its provider cell.
    let llm = LlmSubsystem::new(&config);
    let capability = LlmCapability::Provider {
        cell: llm.provider_cell(),
        handle: tokio::runtime::Handle::current(),
    };

    let service = Arc::new(SpellService::new(
        ScriptSandbox::new(capability),
        config.spells.failure_output,
    ));

    // Startup discovery runs spell top-level code — keep it off the executor.
    let spells_dir = config.spells_dir.clone();
    let discovered = {
        let service = service.clone();
        let dir = spells_dir.clone();
        tokio::task::spawn_blocking(move || service.discover(&dir))
            .await
            .map_err(|e| AppError::Comms(format!("discovery task panicked: {e}")))?
    };
    info!(count = discovered, "spells discovered");

    let handlers: Vec<Box<dyn BusHandler>> = vec![
        Box::new(SpellsSubsystem::new(service, spells_dir)),
        Box::new(llm),
    ];

    let supervisor_task = tokio::spawn(supervisor::run(bus, shutdown.clone(), handlers));
    let comms = subsystems::comms::start(&config, bus_handle, shutdown.clone());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            shutdown.cancel();
        }
        result = comms.join() => {
            if let Err(e) = result {
                warn!("comms subsystem exited with error: {e}");
            }
            shutdown.cancel();
        }
    }

    if let Err(e) = supervisor_task.await {
        warn!("supervisor task panicked: {e}");
    }

    info!("daemon stopped");
    Ok(())
}
