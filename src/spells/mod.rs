//! Spell domain — sandbox, loader cache, registry, and the casting façade.
//!
//! A spell is a user-authored Rhai script exposing an optional unary `main`
//! entry function and an optional top-level `META` record. [`SpellService`]
//! ties the pieces together and is the only type the bus-facing subsystem
//! talks to.

pub mod loader;
pub mod registry;
pub mod sandbox;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::FailureOutput;
use loader::{LoadedSpell, SpellLoader};
use registry::{SpellDescriptor, SpellRegistry};
use sandbox::ScriptSandbox;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SpellError {
    #[error("spell script not found: {0}")]
    NotFound(String),

    #[error("spell load failed: {0}")]
    Load(String),

    #[error("spell invocation failed: {0}")]
    Invocation(String),
}

// ── Wire types ────────────────────────────────────────────────────────────────

/// Inbound cast request (`POST /cast`, stdio `cast` command).
///
/// Wire field names are camelCase for compatibility with existing clients
/// of the original daemon.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastRequest {
    pub spell_id: String,
    /// Path to the script to run; falls back to the registry entry for
    /// `spell_id` when absent.
    #[serde(default)]
    pub script_file: Option<String>,
    /// Inline script content — staged to a scratch file for the duration of
    /// the cast.
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub input: String,
}

/// Outcome of one cast, success or failure. Failures carry a message in
/// `error` and never propagate as transport errors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastOutcome {
    pub spell_id: String,
    pub success: bool,
    pub output: String,
    /// Total wall-clock time in milliseconds, including any load.
    pub execution_time: u64,
    pub error: Option<String>,
}

// ── SpellService ──────────────────────────────────────────────────────────────

pub struct SpellService {
    loader: SpellLoader,
    registry: SpellRegistry,
    failure_output: FailureOutput,
    scratch_dir: PathBuf,
}

impl SpellService {
    pub fn new(sandbox: ScriptSandbox, failure_output: FailureOutput) -> Self {
        Self {
            loader: SpellLoader::new(sandbox),
            registry: SpellRegistry::new(),
            failure_output,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Stage inline scripts under `dir` instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn loader(&self) -> &SpellLoader {
        &self.loader
    }

    /// Scan `dir` and rebuild the registry. Returns the registry size.
    pub fn discover(&self, dir: &Path) -> usize {
        self.registry.discover(dir, &self.loader)
    }

    pub fn list(&self) -> Vec<SpellDescriptor> {
        self.registry.list()
    }

    /// Cast a spell. Never errors: failures become unsuccessful outcomes
    /// with the configured placeholder output.
    pub fn cast(&self, req: &CastRequest) -> CastOutcome {
        let started = Instant::now();
        let result = self.resolve_and_invoke(req);
        let execution_time = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => CastOutcome {
                spell_id: req.spell_id.clone(),
                success: true,
                output,
                execution_time,
                error: None,
            },
            Err(e) => {
                warn!(spell_id = %req.spell_id, "spell cast failed: {e}");
                let output = match self.failure_output {
                    FailureOutput::Empty => String::new(),
                    FailureOutput::Input => req.input.clone(),
                    FailureOutput::Message => e.to_string(),
                };
                CastOutcome {
                    spell_id: req.spell_id.clone(),
                    success: false,
                    output,
                    execution_time,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn resolve_and_invoke(&self, req: &CastRequest) -> Result<String, SpellError> {
        let unit = if let Some(script) = &req.script {
            self.load_inline(script)?
        } else if let Some(file) = &req.script_file {
            self.loader.load(Path::new(file))?
        } else if let Some(desc) = self.registry.get(&req.spell_id) {
            self.loader.load(Path::new(&desc.script_file))?
        } else {
            return Err(SpellError::NotFound(format!(
                "{} (no scriptFile or script provided)",
                req.spell_id
            )));
        };

        Ok(self.loader.invoke(&unit, &req.input)?.output)
    }

    /// Write inline content to a uniquely named scratch file and load it
    /// uncached. The file is removed when the handle drops — every exit
    /// path, including load and invocation failures.
    fn load_inline(&self, script: &str) -> Result<Arc<LoadedSpell>, SpellError> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("grimoire-spell-{}-", uuid::Uuid::new_v4()))
            .suffix(".rhai")
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| SpellError::Load(format!("cannot stage inline script: {e}")))?;

        std::fs::write(scratch.path(), script)
            .map_err(|e| SpellError::Load(format!("cannot stage inline script: {e}")))?;

        self.loader.load_uncached(scratch.path())
    }
}
