//! Rhai execution sandbox for spells.
//!
//! One engine is shared by every spell. Scripts talk to the host through
//! two surfaces only:
//! - `print(...)` — routed into the active [`CapturedOutput`] buffer during
//!   an invocation, passed through to process stdout otherwise;
//! - `llm(prompt)` — resolves a completion through the injected
//!   [`LlmCapability`]; fails the call (never the load) when the capability
//!   is absent.
//!
//! The print sink is process-global state, so executions are serialized
//! with `exec_lock` around the acquire/run/release critical section.
//! [`CapturedOutput`] releases the sink in `Drop`, covering every exit path
//! including script errors.

use std::sync::{Arc, Mutex, PoisonError};

use rhai::{AST, CallFnOptions, Dynamic, Engine, EvalAltResult, Position, Scope};

use crate::llm::{ProviderCell, ProviderError};
use super::SpellError;

/// Name of the designated entry function a spell may expose.
pub const ENTRY_FN: &str = "main";

/// Variable bound in a spell's namespace during fallback execution.
pub const INPUT_VAR: &str = "INPUT_TEXT";

type Sink = Arc<Mutex<Option<String>>>;

// ── LlmCapability ─────────────────────────────────────────────────────────────

/// The language-model capability injected into the spell namespace.
///
/// Passed explicitly at sandbox construction; the `Unavailable` variant is
/// the no-op stand-in so spell loading and listing never depend on LLM
/// configuration.
#[derive(Clone)]
pub enum LlmCapability {
    Unavailable,
    Provider {
        cell: Arc<ProviderCell>,
        handle: tokio::runtime::Handle,
    },
}

impl LlmCapability {
    fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        match self {
            LlmCapability::Unavailable => Err(ProviderError::Unavailable),
            LlmCapability::Provider { cell, handle } => cell.complete_blocking(handle, prompt),
        }
    }
}

// ── CapturedOutput ────────────────────────────────────────────────────────────

/// Scoped handle on the sandbox print sink.
///
/// While alive, `print` output accumulates in the buffer; dropping it
/// restores pass-through printing. Acquired only under `exec_lock`.
pub struct CapturedOutput<'a> {
    sink: &'a Sink,
}

impl CapturedOutput<'_> {
    /// Current buffer contents.
    pub fn snapshot(&self) -> String {
        lock(self.sink).as_deref().unwrap_or_default().to_string()
    }
}

impl Drop for CapturedOutput<'_> {
    fn drop(&mut self) {
        *lock(self.sink) = None;
    }
}

fn lock(sink: &Sink) -> std::sync::MutexGuard<'_, Option<String>> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── ScriptSandbox ─────────────────────────────────────────────────────────────

pub struct ScriptSandbox {
    engine: Engine,
    sink: Sink,
    /// Serializes capture/execute/restore; without it, concurrent
    /// invocations would interleave in one buffer.
    exec_lock: Mutex<()>,
}

impl ScriptSandbox {
    pub fn new(llm: LlmCapability) -> Self {
        let mut engine = Engine::new();
        let sink: Sink = Arc::new(Mutex::new(None));

        let print_sink = sink.clone();
        engine.on_print(move |text| {
            let mut guard = print_sink.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.as_mut() {
                Some(buf) => {
                    buf.push_str(text);
                    buf.push('\n');
                }
                None => println!("{text}"),
            }
        });

        engine.register_fn(
            "llm",
            move |prompt: &str| -> Result<String, Box<EvalAltResult>> {
                llm.complete(prompt).map_err(|e| {
                    Box::new(EvalAltResult::ErrorRuntime(
                        Dynamic::from(e.to_string()),
                        Position::NONE,
                    ))
                })
            },
        );

        Self {
            engine,
            sink,
            exec_lock: Mutex::new(()),
        }
    }

    pub fn compile(&self, source: &str) -> Result<AST, SpellError> {
        self.engine
            .compile(source)
            .map_err(|e| SpellError::Load(e.to_string()))
    }

    /// Execute `ast`'s top-level statements in a fresh namespace.
    ///
    /// `INPUT_TEXT` is bound to an empty string so fallback-style spells
    /// (which read it at the top level) still load cleanly. Returns the
    /// resulting scope (top-level constants, `META`, …) and whatever the
    /// script printed while loading.
    pub fn run_top_level(&self, ast: &AST) -> Result<(Scope<'static>, String), SpellError> {
        let _serial = self.exec_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let capture = self.begin_capture();

        let mut scope = Scope::new();
        scope.push_constant(INPUT_VAR, String::new());

        self.engine
            .run_ast_with_scope(&mut scope, ast)
            .map_err(|e| SpellError::Load(e.to_string()))?;

        let printed = capture.snapshot();
        Ok((scope, printed))
    }

    /// Call the spell's entry function with `input`.
    ///
    /// Top-level statements are *not* re-evaluated on each call — load-time
    /// side effects stay load-time. A string return is the output verbatim,
    /// a unit return falls back to captured print output, and anything else
    /// is stringified.
    pub fn call_entry(
        &self,
        ast: &AST,
        load_scope: &Scope<'static>,
        input: &str,
    ) -> Result<String, SpellError> {
        let _serial = self.exec_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let capture = self.begin_capture();

        let mut scope = load_scope.clone();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);

        let result: Dynamic = self
            .engine
            .call_fn_with_options(options, &mut scope, ast, ENTRY_FN, (input.to_string(),))
            .map_err(|e| SpellError::Invocation(e.to_string()))?;

        if result.is_unit() {
            Ok(capture.snapshot())
        } else if result.is_string() {
            Ok(result.into_string().unwrap_or_default())
        } else {
            Ok(result.to_string())
        }
    }

    /// Fallback execution: run the whole body in a fresh namespace with
    /// `INPUT_TEXT` bound to `input`, and return the captured print output.
    pub fn run_body_with_input(&self, ast: &AST, input: &str) -> Result<String, SpellError> {
        let _serial = self.exec_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let capture = self.begin_capture();

        let mut scope = Scope::new();
        scope.push_constant(INPUT_VAR, input.to_string());

        self.engine
            .run_ast_with_scope(&mut scope, ast)
            .map_err(|e| SpellError::Invocation(e.to_string()))?;

        Ok(capture.snapshot())
    }

    fn begin_capture(&self) -> CapturedOutput<'_> {
        *lock(&self.sink) = Some(String::new());
        CapturedOutput { sink: &self.sink }
    }
}
