//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Provider instances are shared immutable capabilities — clone them freely.
//! Async is delegated to the underlying provider; the `complete` method is
//! `async fn` on the enum so callers need no trait-object machinery.
//!
//! [`ProviderCell`] is the swappable slot the rest of the daemon sees: the
//! spell sandbox and the quick-edit path hold an `Arc<ProviderCell>` and
//! never a provider directly, so an env update can rebuild the provider
//! without touching them. An empty cell means the capability is absent —
//! spells still load and list, only LLM calls fail.

pub mod providers;

use std::sync::RwLock;

use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("llm capability unavailable")]
    Unavailable,
}

// ── EnvOutcome ────────────────────────────────────────────────────────────────

/// Wire-visible result of an env update (`POST /env`, stdio `update_env`).
///
/// `ok` reports whether the rebuilt provider answered a one-shot probe;
/// `msg` carries the failure detail when it did not.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnvOutcome {
    pub updated: Vec<String>,
    pub ok: bool,
    pub msg: String,
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Enum dispatch avoids `dyn` trait objects and the `async-trait` dependency.
/// Adding a backend = new module + new variant + new `complete` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Dummy(providers::dummy::DummyProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl LlmProvider {
    /// Send `content` to the provider and return its text reply.
    pub async fn complete(&self, content: &str) -> Result<String, ProviderError> {
        match self {
            LlmProvider::Dummy(p) => p.complete(content).await,
            LlmProvider::OpenAiCompatible(p) => p.complete(content).await,
        }
    }
}

// ── ProviderCell ──────────────────────────────────────────────────────────────

/// Shared, swappable provider slot.
///
/// Starts empty when the configured provider fails to build; a later env
/// update may fill it. Readers take a cheap clone of the provider so the
/// lock is never held across a request.
pub struct ProviderCell {
    slot: RwLock<Option<LlmProvider>>,
}

impl ProviderCell {
    pub fn new(initial: Option<LlmProvider>) -> Self {
        Self { slot: RwLock::new(initial) }
    }

    /// Current provider, if any.
    pub fn snapshot(&self) -> Option<LlmProvider> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Swap in a freshly built provider.
    pub fn replace(&self, provider: LlmProvider) {
        match self.slot.write() {
            Ok(mut guard) => *guard = Some(provider),
            Err(poisoned) => *poisoned.into_inner() = Some(provider),
        }
    }

    /// Resolve a completion from a blocking context (spell sandbox threads).
    ///
    /// `handle` must belong to the daemon's runtime; the caller is already
    /// off the async executor so blocking here is safe.
    pub fn complete_blocking(
        &self,
        handle: &tokio::runtime::Handle,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let provider = self.snapshot().ok_or(ProviderError::Unavailable)?;
        handle.block_on(provider.complete(prompt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::dummy::DummyProvider;

    #[test]
    fn empty_cell_reports_unavailable() {
        let cell = ProviderCell::new(None);
        assert!(!cell.is_available());
        assert!(cell.snapshot().is_none());
    }

    #[test]
    fn replace_fills_the_slot() {
        let cell = ProviderCell::new(None);
        cell.replace(LlmProvider::Dummy(DummyProvider));
        assert!(cell.is_available());
    }

    #[tokio::test]
    async fn snapshot_clone_completes() {
        let cell = ProviderCell::new(Some(LlmProvider::Dummy(DummyProvider)));
        let provider = cell.snapshot().unwrap();
        assert_eq!(provider.complete("hi").await.unwrap(), "[echo] hi");
    }
}
