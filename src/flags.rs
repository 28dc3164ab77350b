//! In-memory feature-flag cache fed by an asynchronous variant fetch.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config_resolver::ConfigResolver;
use crate::identity::IdentityResolver;
use crate::transport::Transport;

/// One resolved feature-flag variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantInfo {
    /// Resolved variant name.
    #[serde(default)]
    pub key: String,
    /// Opaque variant payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Outcome notification for one flag-fetch completion.
#[derive(Debug, Clone)]
pub enum FlagsUpdate {
    /// The cache was replaced with a fresh table of `count` flags.
    Updated {
        /// Number of flags in the new table.
        count: usize,
    },
    /// The fetch failed; the previous cache is untouched.
    Failed {
        /// Human-readable error description.
        error: String,
    },
}

/// Feature-flag cache: serves synchronous reads of the last successfully fetched variant table
/// while fetches may be in flight.
///
/// The table is replaced wholesale on every successful fetch ("last fetch wins"); entries absent
/// from the newest response are dropped, never merged. Overlapping fetches race and whichever
/// completion runs last wins; this mirrors the upstream behavior and no cancellation or
/// sequencing is provided.
pub struct FeatureFlagCache {
    identity: Arc<IdentityResolver>,
    config: Arc<ConfigResolver>,
    transport: Arc<dyn Transport>,
    flags: RwLock<HashMap<String, VariantInfo>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<FlagsUpdate>>>,
}

impl FeatureFlagCache {
    pub fn new(
        identity: Arc<IdentityResolver>,
        config: Arc<ConfigResolver>,
        transport: Arc<dyn Transport>,
    ) -> FeatureFlagCache {
        FeatureFlagCache {
            identity,
            config,
            transport,
            flags: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register for flag-fetch completion notifications.
    ///
    /// Every completed fetch (successful or not) delivers one [`FlagsUpdate`] to each live
    /// subscriber. Dropped receivers are pruned on the next notification.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<FlagsUpdate> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    /// Snapshot of the current variant table. Never blocks on an in-flight fetch.
    pub fn all_flags(&self) -> HashMap<String, VariantInfo> {
        self.flags.read().unwrap().clone()
    }

    /// The variant for `flag_key`, or an empty default if absent or nothing has been fetched yet.
    pub fn flag(&self, flag_key: &str) -> VariantInfo {
        self.flags
            .read()
            .unwrap()
            .get(flag_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Fetch variants for the current user/device, optionally filtered to `flag_keys`.
    ///
    /// On success the whole cache is replaced; on any failure (transport error, non-2xx status,
    /// malformed body) the existing cache is left untouched and a failure notification is
    /// emitted.
    pub async fn fetch_flags(&self, flag_keys: Vec<String>) {
        let mut params = vec![
            ("user_id".to_owned(), self.identity.user_id()),
            ("device_id".to_owned(), self.identity.device_id()),
        ];
        if !flag_keys.is_empty() {
            params.push(("flag_keys".to_owned(), flag_keys.join(",")));
        }

        let url = match url::Url::parse_with_params(self.config.feature_flag_endpoint(), &params) {
            Ok(url) => url,
            Err(err) => {
                self.notify(FlagsUpdate::Failed {
                    error: format!("invalid feature-flag endpoint: {err}"),
                });
                return;
            }
        };
        let headers = vec![(
            "Authorization".to_owned(),
            format!("Api-Key {}", self.config.api_key()),
        )];

        log::debug!(target: "event_report", "fetching flags from {url}");
        let response = match self.transport.get(url.as_str(), headers).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!(target: "event_report", "flag fetch failed: {err}");
                self.notify(FlagsUpdate::Failed {
                    error: err.to_string(),
                });
                return;
            }
        };
        if !response.is_success() {
            log::warn!(target: "event_report", "flag fetch returned status {}", response.status);
            self.notify(FlagsUpdate::Failed {
                error: format!("server responded with status {}", response.status),
            });
            return;
        }

        let table: HashMap<String, VariantInfo> = match serde_json::from_slice(&response.body) {
            Ok(table) => table,
            Err(err) => {
                log::warn!(target: "event_report", "invalid flag response: {err}");
                self.notify(FlagsUpdate::Failed {
                    error: format!("invalid flag response: {err}"),
                });
                return;
            }
        };

        let count = table.len();
        // Last fetch wins: replace the table, dropping entries the response no longer carries.
        *self.flags.write().unwrap() = table;

        log::info!(target: "event_report", "loaded {count} flags");
        self.notify(FlagsUpdate::Updated { count });
    }

    fn notify(&self, update: FlagsUpdate) {
        self.subscribers
            .lock()
            .unwrap()
            .retain(|sender| sender.send(update.clone()).is_ok());
    }
}
