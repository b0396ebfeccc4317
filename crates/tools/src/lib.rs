//! Built-in tool implementations for palaver.
//!
//! Tools are stateless request/response capabilities. Only the generative
//! backend calls them; the model decides when.

pub mod clock;
pub mod weather;

use std::time::Duration;

use palaver_config::ToolsConfig;
use palaver_core::tool::ToolRegistry;

pub use clock::TimeTool;
pub use weather::WeatherTool;

/// Create a tool registry with the tools enabled in config.
pub fn default_registry(config: &ToolsConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    if config.weather {
        registry.register(Box::new(WeatherTool::new(Duration::from_secs(
            config.http_timeout_secs,
        ))));
    }
    if config.time {
        registry.register(Box::new(TimeTool));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_both_tools() {
        let registry = default_registry(&ToolsConfig::default());
        assert_eq!(registry.names(), ["get_current_time", "get_current_weather"]);
    }

    #[test]
    fn disabled_tools_are_not_registered() {
        let config = ToolsConfig {
            weather: false,
            ..ToolsConfig::default()
        };
        let registry = default_registry(&config);
        assert!(registry.get("get_current_weather").is_none());
        assert_eq!(registry.len(), 1);
    }
}
