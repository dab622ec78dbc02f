//! Registry that routes requests to providers by id

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{ChatMessage, ChatProvider, Error, FragmentStream, ModelInfo, Result};

/// Routes `list_models` / `send_chat` to the provider registered under an id.
///
/// Callers only ever see ordered text fragments; whether the provider is a
/// local daemon or a hosted API is hidden behind [`ChatProvider`].
#[derive(Clone, Default)]
pub struct ProviderGateway {
    providers: BTreeMap<String, Arc<dyn ChatProvider>>,
}

impl ProviderGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own id, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn ChatProvider>) {
        let id = provider.id().to_string();
        if self.providers.insert(id.clone(), provider).is_some() {
            tracing::debug!("Replaced provider '{}'", id);
        }
    }

    /// Builder-style [`register`](Self::register)
    pub fn with_provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Registered provider ids, sorted
    pub fn provider_ids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn provider(&self, provider_id: &str) -> Result<&Arc<dyn ChatProvider>> {
        self.providers
            .get(provider_id)
            .ok_or_else(|| Error::UnknownProvider(provider_id.to_string()))
    }

    pub async fn list_models(&self, provider_id: &str) -> Result<Vec<ModelInfo>> {
        self.provider(provider_id)?.list_models().await
    }

    pub async fn send_chat(
        &self,
        provider_id: &str,
        model_id: &str,
        messages: &[ChatMessage],
    ) -> Result<FragmentStream> {
        self.provider(provider_id)?.send_chat(model_id, messages).await
    }
}
