//! Provider router: selects the LLM provider named by config.

use std::collections::HashMap;
use std::sync::Arc;

use palaver_config::AppConfig;
use palaver_core::error::ProviderError;
use palaver_core::provider::Provider;
use tracing::debug;

use crate::openai_compat::OpenAiCompatProvider;

/// Providers that serve locally and don't check API keys.
const KEYLESS: &[&str] = &["ollama", "vllm", "llamacpp", "llama.cpp"];

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// The provider named by `default_provider`.
    pub fn default_provider(&self) -> Result<Arc<dyn Provider>, ProviderError> {
        self.get(&self.default_provider).ok_or_else(|| {
            ProviderError::NotConfigured(format!("provider '{}' is not registered", self.default_provider))
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    /// Build the router from configuration.
    ///
    /// Every `[providers.<name>]` section is registered, and the default
    /// provider is registered even when it has no section of its own. A
    /// keyed provider with no key anywhere is a configuration error.
    pub fn build_from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let mut router = Self::new(&config.default_provider);

        let mut names: Vec<&String> = config.providers.keys().collect();
        if !config.providers.contains_key(&config.default_provider) {
            names.push(&config.default_provider);
        }

        for name in names {
            let section = config.providers.get(name);
            let api_key = section
                .and_then(|p| p.api_key.clone())
                .or_else(|| config.api_key.clone());
            let api_key = match api_key {
                Some(key) => key,
                None if KEYLESS.contains(&name.as_str()) => String::new(),
                None if name == &config.default_provider => {
                    return Err(ProviderError::NotConfigured(format!(
                        "no API key for provider '{name}' (set PALAVER_API_KEY or OPENAI_API_KEY)"
                    )));
                }
                None => {
                    debug!(provider = %name, "Skipping provider without API key");
                    continue;
                }
            };
            let base_url = section
                .and_then(|p| p.api_url.clone())
                .unwrap_or_else(|| default_base_url(name));

            let provider = OpenAiCompatProvider::new(name.as_str(), base_url, api_key)?;
            router.register(name.clone(), Arc::new(provider));
        }

        Ok(router)
    }
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_config::ProviderConfig;

    #[test]
    fn default_base_urls() {
        assert!(default_base_url("openrouter").contains("openrouter.ai"));
        assert!(default_base_url("openai").contains("api.openai.com"));
        assert!(default_base_url("ollama").contains("localhost:11434"));
    }

    #[test]
    fn missing_key_is_not_configured() {
        let config = AppConfig::default();
        let err = ProviderRouter::build_from_config(&config).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn top_level_key_builds_default_provider() {
        let config = AppConfig {
            api_key: Some("sk-test".into()),
            ..AppConfig::default()
        };
        let router = ProviderRouter::build_from_config(&config).unwrap();
        assert_eq!(router.default_provider().unwrap().name(), "openai");
    }

    #[test]
    fn keyless_local_provider() {
        let config = AppConfig {
            default_provider: "ollama".into(),
            ..AppConfig::default()
        };
        let router = ProviderRouter::build_from_config(&config).unwrap();
        assert!(router.get("ollama").is_some());
    }

    #[test]
    fn sections_register_and_unkeyed_extras_are_skipped() {
        let mut config = AppConfig {
            default_provider: "openrouter".into(),
            ..AppConfig::default()
        };
        config.providers.insert(
            "openrouter".into(),
            ProviderConfig {
                api_key: Some("sk-or".into()),
                api_url: Some("https://proxy.internal/v1".into()),
                default_model: None,
            },
        );
        config.providers.insert("groq".into(), ProviderConfig::default());

        let router = ProviderRouter::build_from_config(&config).unwrap();
        assert_eq!(router.list(), ["openrouter"]);
    }
}
