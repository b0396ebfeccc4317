//! Weather tool: current conditions from wttr.in.
//!
//! When the model doesn't name a location, the caller's approximate
//! location is looked up from their public IP. Lookup failures are reported
//! to the model as text rather than as tool errors, so it can apologise.

use std::time::Duration;

use async_trait::async_trait;
use palaver_core::error::ToolError;
use palaver_core::tool::{Tool, ToolResult};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

const GEOLOCATION_URL: &str = "http://ip-api.com/json/";
const WEATHER_URL: &str = "https://wttr.in/";
const GEOLOCATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Used when geolocation is unavailable.
pub const FALLBACK_LOCATION: &str = "San Francisco";

pub struct WeatherTool {
    client: reqwest::Client,
    timeout: Duration,
    geolocation_url: String,
    weather_url: String,
}

impl WeatherTool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            geolocation_url: GEOLOCATION_URL.into(),
            weather_url: WEATHER_URL.into(),
        }
    }

    /// Point the tool at different geolocation and weather services.
    pub fn with_endpoints(mut self, geolocation_url: impl Into<String>, weather_url: impl Into<String>) -> Self {
        self.geolocation_url = geolocation_url.into();
        self.weather_url = weather_url.into();
        self
    }

    /// Best-effort location of the caller. Never fails.
    pub async fn locate(&self) -> String {
        match self.geolocate().await {
            Ok(Some(location)) => location,
            Ok(None) => FALLBACK_LOCATION.into(),
            Err(e) => {
                debug!(error = %e, "Geolocation failed, using fallback location");
                FALLBACK_LOCATION.into()
            }
        }
    }

    async fn geolocate(&self) -> Result<Option<String>, reqwest::Error> {
        let info: GeoInfo = self
            .client
            .get(&self.geolocation_url)
            .timeout(GEOLOCATION_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(info.most_specific())
    }

    async fn conditions(&self, location: &str) -> Result<String, String> {
        let url = weather_url(&self.weather_url, location)?;
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| e.to_string())?;
        let text = response.text().await.map_err(|e| e.to_string())?;
        Ok(text.trim().to_string())
    }
}

/// `<base>/<location>?format=%C+%t+%h+%w`: condition, temperature, humidity, wind.
fn weather_url(base: &str, location: &str) -> Result<Url, String> {
    let mut url = Url::parse(base).map_err(|e| e.to_string())?;
    url.path_segments_mut()
        .map_err(|_| format!("{base} cannot be a base URL"))?
        .pop_if_empty()
        .push(location);
    url.set_query(Some("format=%C+%t+%h+%w"));
    Ok(url)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeoInfo {
    #[serde(default)]
    status: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    country: String,
}

impl GeoInfo {
    /// "City, Region" > city > region > country.
    fn most_specific(&self) -> Option<String> {
        if self.status != "success" {
            return None;
        }
        match (self.city.as_str(), self.region_name.as_str(), self.country.as_str()) {
            (city, region, _) if !city.is_empty() && !region.is_empty() => Some(format!("{city}, {region}")),
            (city, _, _) if !city.is_empty() => Some(city.to_string()),
            (_, region, _) if !region.is_empty() => Some(region.to_string()),
            (_, _, country) if !country.is_empty() => Some(country.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "get_current_weather"
    }

    fn description(&self) -> &str {
        "Get current weather conditions for any location. If no location provided, uses user's current location."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City or place name; omit to use the user's location"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let location = match arguments.get("location") {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(other) => {
                return Err(ToolError::InvalidArguments(format!(
                    "'location' must be a string, got {other}"
                )));
            }
        };
        let location = if location.is_empty() {
            self.locate().await
        } else {
            location
        };

        let output = match self.conditions(&location).await {
            Ok(text) => format!("Weather in {location}: {text}"),
            Err(e) => format!("Sorry, couldn't get weather for {location}. Error: {e}"),
        };
        Ok(ToolResult::ok(output))
    }
}
