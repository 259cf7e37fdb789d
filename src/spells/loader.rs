//! Spell loading and the process-lifetime cache.
//!
//! A spell is compiled and its top-level statements executed exactly once
//! per canonical path; later loads return the cached unit. The cache is
//! never evicted and entries are never mutated after insertion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use rhai::{AST, Scope};
use serde::Deserialize;
use tracing::debug;

use super::SpellError;
use super::sandbox::{ENTRY_FN, ScriptSandbox};

// ── LoadedSpell ───────────────────────────────────────────────────────────────

/// Metadata record a spell may declare as a top-level `META` constant.
///
/// `id` is mandatory; a spell without a valid record is castable by path
/// but invisible to the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct SpellMeta {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category: String,
}

/// A cached, already-executed representation of a spell's top-level code.
#[derive(Debug)]
pub struct LoadedSpell {
    pub path: PathBuf,
    pub ast: AST,
    /// Scope left behind by top-level execution — `META` is read from here,
    /// and entry calls reuse it instead of re-running the body.
    pub scope: Scope<'static>,
    pub meta: Option<SpellMeta>,
    /// Whether the script defines a unary `main` entry function.
    pub has_entry: bool,
    /// Print output emitted while the top level ran.
    pub init_output: String,
}

/// Result of one invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub output: String,
    pub elapsed_ms: u64,
}

// ── SpellLoader ───────────────────────────────────────────────────────────────

pub struct SpellLoader {
    sandbox: ScriptSandbox,
    cache: RwLock<HashMap<PathBuf, Arc<LoadedSpell>>>,
    /// Counts actual top-level executions; cache hits do not increment.
    top_level_runs: AtomicUsize,
}

impl SpellLoader {
    pub fn new(sandbox: ScriptSandbox) -> Self {
        Self {
            sandbox,
            cache: RwLock::new(HashMap::new()),
            top_level_runs: AtomicUsize::new(0),
        }
    }

    /// Load a spell, executing its top-level code at most once per process.
    ///
    /// The cache key is the canonical path, so `./spells/x.rhai` and an
    /// absolute path to the same file share one entry.
    pub fn load(&self, path: &Path) -> Result<Arc<LoadedSpell>, SpellError> {
        let canonical = path
            .canonicalize()
            .map_err(|_| SpellError::NotFound(path.display().to_string()))?;

        if let Some(unit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&canonical)
        {
            debug!(path = %canonical.display(), "spell cache hit");
            return Ok(unit.clone());
        }

        let unit = self.load_fresh(&canonical)?;

        // Two racing first-loads both executed top-level code; keep whichever
        // landed first so callers always share one unit per path.
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        Ok(cache.entry(canonical).or_insert(unit).clone())
    }

    /// Load without touching the cache — used for one-shot inline scripts
    /// whose temp paths would otherwise accumulate entries forever.
    pub fn load_uncached(&self, path: &Path) -> Result<Arc<LoadedSpell>, SpellError> {
        let canonical = path
            .canonicalize()
            .map_err(|_| SpellError::NotFound(path.display().to_string()))?;
        self.load_fresh(&canonical)
    }

    fn load_fresh(&self, canonical: &Path) -> Result<Arc<LoadedSpell>, SpellError> {
        let source = std::fs::read_to_string(canonical).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpellError::NotFound(canonical.display().to_string())
            } else {
                SpellError::Load(format!("cannot read {}: {e}", canonical.display()))
            }
        })?;

        let ast = self.sandbox.compile(&source)?;
        let (scope, init_output) = self.sandbox.run_top_level(&ast)?;
        self.top_level_runs.fetch_add(1, Ordering::Relaxed);

        let meta = scope
            .get_value::<rhai::Map>("META")
            .and_then(|map| rhai::serde::from_dynamic::<SpellMeta>(&rhai::Dynamic::from(map)).ok());

        let has_entry = ast
            .iter_functions()
            .any(|f| f.name == ENTRY_FN && f.params.len() == 1);

        debug!(
            path = %canonical.display(),
            has_entry,
            has_meta = meta.is_some(),
            "spell loaded"
        );

        Ok(Arc::new(LoadedSpell {
            path: canonical.to_path_buf(),
            ast,
            scope,
            meta,
            has_entry,
            init_output,
        }))
    }

    /// Invoke a loaded unit with `input`.
    ///
    /// Entry function if present, whole-body fallback otherwise. Errors are
    /// the callee's; converting them into failure outcomes is the caller's
    /// job.
    pub fn invoke(&self, unit: &LoadedSpell, input: &str) -> Result<Invocation, SpellError> {
        let started = Instant::now();

        let output = if unit.has_entry {
            self.sandbox.call_entry(&unit.ast, &unit.scope, input)?
        } else {
            self.sandbox.run_body_with_input(&unit.ast, input)?
        };

        Ok(Invocation {
            output,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Number of top-level executions performed so far.
    pub fn top_level_runs(&self) -> usize {
        self.top_level_runs.load(Ordering::Relaxed)
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
