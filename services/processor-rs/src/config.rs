use std::time::Duration;

use dotenvy::dotenv;
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Environment variables are read with this prefix, e.g. `TXBRIDGE_PROJECT_ID`.
pub const ENV_PREFIX: &str = "TXBRIDGE_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    pub project_id: String,
    pub subscription: String,
    pub pubsub_endpoint: String,
    pub bigquery_endpoint: String,
    /// OAuth bearer token. Left unset when talking to the emulators.
    pub access_token: Option<String>,
    pub request_timeout_ms: u64,
    pub max_messages: u32,
    pub poll_interval_ms: u64,
    pub max_concurrent_messages: usize,
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: "local-project".to_string(),
            subscription: "consumersubscription".to_string(),
            pubsub_endpoint: "https://pubsub.googleapis.com".to_string(),
            bigquery_endpoint: "https://bigquery.googleapis.com".to_string(),
            access_token: None,
            request_timeout_ms: 5000,
            max_messages: 10,
            poll_interval_ms: 1000,
            max_concurrent_messages: 32,
            api_port: 8080,
        }
    }
}

impl Config {
    /// Load `.env` (if any), then layer `TXBRIDGE_*` variables over the defaults.
    pub fn load() -> Result<Self, BridgeError> {
        dotenv().ok();
        Self::figment().extract().map_err(BridgeError::from)
    }

    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default())).merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
