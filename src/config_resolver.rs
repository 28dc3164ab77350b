//! API-key resolution with cached → persisted → default precedence, refreshed opportunistically
//! from a key-distribution endpoint.
use std::sync::{Arc, RwLock};

use crate::settings_store::{SettingsStore, SETTING_API_KEY};
use crate::transport::Transport;
use crate::ReporterConfig;

/// JSON field carrying the distributed key in the key-server response.
const KEY_FIELD: &str = "amplitude_api_key";

/// Resolves the API key used to authenticate outbound calls and exposes the two static endpoint
/// URLs.
///
/// The in-memory key is the authority once [`init`](ConfigResolver::init) has run; it is replaced
/// under a write lock only when a remote refresh yields a different value, and re-persisted
/// immediately on change. Every failure mode of the refresh retains the best-known key.
pub struct ConfigResolver {
    store: Arc<dyn SettingsStore>,
    transport: Arc<dyn Transport>,
    api_key: RwLock<String>,
    default_api_key: String,
    key_server_url: String,
    event_track_endpoint: String,
    feature_flag_endpoint: String,
}

impl ConfigResolver {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        transport: Arc<dyn Transport>,
        config: &ReporterConfig,
    ) -> ConfigResolver {
        ConfigResolver {
            store,
            transport,
            api_key: RwLock::new(String::new()),
            default_api_key: config.default_api_key.clone(),
            key_server_url: config.key_server_url.clone(),
            event_track_endpoint: config.event_track_endpoint.clone(),
            feature_flag_endpoint: config.feature_flag_endpoint.clone(),
        }
    }

    /// Synchronously load the API key: persisted value if present, otherwise the hardcoded
    /// default (which is then persisted so later runs find it).
    ///
    /// The remote refresh is issued separately (and asynchronously) by the orchestrator right
    /// after init; see [`refresh`](ConfigResolver::refresh).
    pub fn init(&self) {
        let persisted = self.store.get(SETTING_API_KEY).filter(|v| !v.is_empty());
        let key = match persisted {
            Some(key) => {
                log::info!(target: "event_report", "API key loaded from settings store");
                key
            }
            None => {
                if let Err(err) = self.store.set(SETTING_API_KEY, &self.default_api_key) {
                    log::warn!(target: "event_report", "failed to persist default API key: {err}");
                }
                log::info!(target: "event_report", "using default API key");
                self.default_api_key.clone()
            }
        };
        *self.api_key.write().unwrap() = key;
    }

    /// The current resolved key. Safe to call before the remote refresh completes.
    pub fn api_key(&self) -> String {
        self.api_key.read().unwrap().clone()
    }

    /// Event-ingestion endpoint. Constant for the process lifetime.
    pub fn event_track_endpoint(&self) -> &str {
        &self.event_track_endpoint
    }

    /// Feature-flag retrieval endpoint. Constant for the process lifetime.
    pub fn feature_flag_endpoint(&self) -> &str {
        &self.feature_flag_endpoint
    }

    /// One-shot remote refresh of the API key.
    ///
    /// Non-2xx responses, malformed JSON, and a missing or empty key field all leave the current
    /// key untouched; no retry is scheduled.
    pub async fn refresh(&self) {
        log::debug!(target: "event_report", "fetching API key from {}", self.key_server_url);

        let response = match self.transport.get(&self.key_server_url, Vec::new()).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!(target: "event_report", "API key refresh failed, keeping current key: {err}");
                return;
            }
        };
        if !response.is_success() {
            log::warn!(
                target: "event_report",
                "API key server responded with status {}, keeping current key",
                response.status
            );
            return;
        }

        let body: serde_json::Value = match serde_json::from_slice(&response.body) {
            Ok(body) => body,
            Err(err) => {
                log::warn!(target: "event_report", "invalid JSON from API key server: {err}");
                return;
            }
        };
        let Some(server_key) = body.get(KEY_FIELD).and_then(|v| v.as_str()).filter(|k| !k.is_empty())
        else {
            log::warn!(target: "event_report", "API key server response lacks '{KEY_FIELD}' field");
            return;
        };

        let changed = {
            let mut key = self.api_key.write().unwrap();
            if *key != server_key {
                *key = server_key.to_owned();
                true
            } else {
                false
            }
        };
        if changed {
            if let Err(err) = self.store.set(SETTING_API_KEY, server_key) {
                log::warn!(target: "event_report", "failed to persist refreshed API key: {err}");
            }
            log::info!(target: "event_report", "API key updated from server");
        } else {
            log::debug!(target: "event_report", "API key from server matches current value");
        }
    }
}
