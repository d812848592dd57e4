//! Console configuration.
//!
//! Everything is environment-driven with sensible local defaults so the
//! harness runs against a dev backend with zero setup. CLI flags in the
//! binary override individual fields.

pub mod pricing;

use std::time::Duration;

use serde_json::{Value, json};

use crate::core::events::{DeviceCredentials, InferenceConfig, Role};
use pricing::{TokenRates, default_rates};

/// WebSocket endpoint of the streaming backend.
pub const DEFAULT_WS_URL: &str = "ws://localhost:8081";
/// REST endpoint of the device/user API.
pub const DEFAULT_API_URL: &str = "http://localhost:8080";
/// Default synthesis voice.
pub const DEFAULT_VOICE_ID: &str = "matthew";

/// System prompt used when neither the device config nor the environment
/// supplies one.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly assistant. The user and you will \
    engage in a spoken dialog exchanging the transcripts of a natural real-time conversation. \
    Keep your responses short, generally two or three sentences for chatty scenarios.";

/// One replayed conversation turn.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Empty tool configuration passed through `promptStart` by default.
pub fn default_tool_configuration() -> Value {
    json!({ "tools": [] })
}

/// A short canned conversation for exercising history replay.
pub fn sample_chat_history() -> Vec<ChatTurn> {
    vec![
        ChatTurn {
            role: Role::User,
            content: "What time does the store open tomorrow?".to_string(),
        },
        ChatTurn {
            role: Role::Assistant,
            content: "The store opens at nine in the morning tomorrow. Anything else I can help with?"
                .to_string(),
        },
    ]
}

/// Parameters for one test exchange.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Synthesis voice advertised in `promptStart`
    pub voice_id: String,
    /// System prompt sent as the first TEXT stream
    pub system_prompt: String,
    /// Opaque tool configuration forwarded to the backend
    pub tool_configuration: Value,
    /// Model inference parameters
    pub inference: InferenceConfig,
    /// Turns replayed after the opening sequence; empty disables replay
    pub chat_history: Vec<ChatTurn>,
    /// Delay between successive exchange sends. The backend has no
    /// application-level ack, so this pacing is the only flow control.
    pub send_pacing: Duration,
    /// Tighter delay used during history replay
    pub history_pacing: Duration,
    /// Token rates for the usage meter
    pub rates: TokenRates,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            voice_id: DEFAULT_VOICE_ID.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            tool_configuration: default_tool_configuration(),
            inference: InferenceConfig::default(),
            chat_history: Vec::new(),
            send_pacing: Duration::from_millis(100),
            history_pacing: Duration::from_millis(50),
            rates: default_rates(),
        }
    }
}

/// Process-level configuration for the console binary.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Streaming backend WebSocket URL (`S2S_WS_URL`)
    pub ws_url: String,
    /// REST API base URL (`S2S_API_URL`)
    pub api_url: String,
    /// Device account username (`S2S_USERNAME`)
    pub username: Option<String>,
    /// Device account password (`S2S_PASSWORD`)
    pub password: Option<String>,
    /// Device identifier (`S2S_DEVICE_ID`); generated when absent
    pub device_id: Option<String>,
    /// Device display name (`S2S_DEVICE_NAME`)
    pub device_name: Option<String>,
    /// Exchange parameters
    pub exchange: ExchangeConfig,
}

impl ConsoleConfig {
    /// Read configuration from the environment, defaulting everything that
    /// is unset.
    pub fn from_env() -> Self {
        let mut exchange = ExchangeConfig::default();
        if let Some(voice) = env_opt("S2S_VOICE_ID") {
            exchange.voice_id = voice;
        }
        if let Some(prompt) = env_opt("S2S_SYSTEM_PROMPT") {
            exchange.system_prompt = prompt;
        }
        Self {
            ws_url: env_or("S2S_WS_URL", DEFAULT_WS_URL),
            api_url: env_or("S2S_API_URL", DEFAULT_API_URL),
            username: env_opt("S2S_USERNAME"),
            password: env_opt("S2S_PASSWORD"),
            device_id: env_opt("S2S_DEVICE_ID"),
            device_name: env_opt("S2S_DEVICE_NAME"),
            exchange,
        }
    }

    /// Device credentials for the WebSocket auth handshake, when a username
    /// and password are configured. Missing device id/name are generated the
    /// way the backend does for anonymous devices.
    pub fn credentials(&self) -> Option<DeviceCredentials> {
        let username = self.username.clone()?;
        let password = self.password.clone()?;
        let device_id = self.device_id.clone().unwrap_or_else(|| {
            let millis = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or(0);
            format!("device_{millis}")
        });
        let device_name = self
            .device_name
            .clone()
            .unwrap_or_else(|| "s2s-console".to_string());
        Some(DeviceCredentials {
            username,
            password,
            device_id,
            device_name,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_defaults_match_backend_expectations() {
        let exchange = ExchangeConfig::default();
        assert_eq!(exchange.voice_id, "matthew");
        assert_eq!(exchange.inference.max_tokens, 1024);
        assert_eq!(exchange.send_pacing, Duration::from_millis(100));
        assert_eq!(exchange.history_pacing, Duration::from_millis(50));
        assert!(exchange.chat_history.is_empty());
    }

    #[test]
    fn credentials_require_username_and_password() {
        let mut config = ConsoleConfig {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            username: Some("operator".to_string()),
            password: None,
            device_id: None,
            device_name: None,
            exchange: ExchangeConfig::default(),
        };
        assert!(config.credentials().is_none());

        config.password = Some("secret".to_string());
        let creds = config.credentials().unwrap();
        assert!(creds.device_id.starts_with("device_"));
        assert_eq!(creds.device_name, "s2s-console");
    }
}
