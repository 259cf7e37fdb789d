//! Dummy LLM provider — echoes input back prefixed with `[echo]`.
//! Keeps `quick_edit` and LLM-dependent spells exercisable without a real
//! API key; also the default provider in a fresh install.

use crate::llm::ProviderError;

#[derive(Debug, Clone)]
pub struct DummyProvider;

impl DummyProvider {
    pub async fn complete(&self, content: &str) -> Result<String, ProviderError> {
        Ok(format!("[echo] {content}"))
    }
}
