//! REST client for the device/user API.
//!
//! Consumed only to populate session configuration before connecting (voice
//! id, system prompt, tool configuration); responses are otherwise treated as
//! opaque. A 401 anywhere clears the stored bearer token and surfaces
//! [`ApiError::Unauthorized`], the "credential expired" signal.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ExchangeConfig;

/// REST request failure.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The stored credential was rejected; log in again
    #[error("credentials expired or invalid")]
    Unauthorized,
    #[error("unexpected response ({status}): {body}")]
    Unexpected { status: StatusCode, body: String },
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// A registered device as the API reports it. Only the fields the console
/// uses are modeled; everything else is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub device_id: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tool_configuration: Option<Value>,
}

impl Device {
    /// Overlay this device's stored configuration onto exchange parameters.
    pub fn apply_to(&self, exchange: &mut ExchangeConfig) {
        if let Some(voice) = &self.voice_id {
            exchange.voice_id = voice.clone();
        }
        if let Some(prompt) = &self.system_prompt {
            exchange.system_prompt = prompt.clone();
        }
        if let Some(tools) = &self.tool_configuration {
            exchange.tool_configuration = tools.clone();
        }
    }
}

/// Thin authenticated client for the console's REST collaborator.
pub struct ConsoleApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ConsoleApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: None,
        }
    }

    /// Whether a bearer token is currently held.
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Exchange credentials for a bearer token.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ApiError> {
        let response = self
            .http
            .post(endpoint(&self.base_url, "/api/auth/login"))
            .json(&LoginRequest { username, password })
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        let response = check(response).await?;
        let login: LoginResponse = response.json().await?;
        self.token = Some(login.token);
        debug!("logged in to device API");
        Ok(())
    }

    /// Stored configuration for one device.
    pub async fn get_device_config(&mut self, device_id: &str) -> Result<Device, ApiError> {
        let path = format!("/api/devices/{device_id}");
        let response = self.get(&path).await?;
        Ok(response.json().await?)
    }

    /// All devices visible to the logged-in account.
    pub async fn list_devices(&mut self) -> Result<Vec<Device>, ApiError> {
        let response = self.get("/api/devices").await?;
        Ok(response.json().await?)
    }

    async fn get(&mut self, path: &str) -> Result<reqwest::Response, ApiError> {
        let mut request = self.http.get(endpoint(&self.base_url, path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("bearer token rejected, clearing stored credential");
            self.token = None;
            return Err(ApiError::Unauthorized);
        }
        check(response).await
    }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Unexpected { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_joins_without_double_slashes() {
        assert_eq!(
            endpoint("http://localhost:8080/", "/api/devices"),
            "http://localhost:8080/api/devices"
        );
        assert_eq!(
            endpoint("http://localhost:8080", "/api/devices"),
            "http://localhost:8080/api/devices"
        );
    }

    #[test]
    fn device_config_overlays_only_present_fields() {
        let device: Device = serde_json::from_value(json!({
            "device_id": "d1",
            "voice_id": "tiffany",
            "tool_configuration": {"tools": [{"name": "weather"}]}
        }))
        .unwrap();
        let mut exchange = ExchangeConfig::default();
        let original_prompt = exchange.system_prompt.clone();
        device.apply_to(&mut exchange);
        assert_eq!(exchange.voice_id, "tiffany");
        assert_eq!(exchange.system_prompt, original_prompt);
        assert_eq!(
            exchange.tool_configuration["tools"][0]["name"],
            "weather"
        );
    }
}
