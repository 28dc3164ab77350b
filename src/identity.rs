//! Stable user identifier + coarse device fingerprint.
use std::sync::{Arc, Mutex};

use crate::host;
use crate::settings_store::{SettingsStore, SETTING_USER_ID};

/// Produces the identity fields attached to every enriched event.
///
/// The user id is a UUID generated once and persisted in the settings store, so it survives
/// process restarts. The device id is recomputed from hardware probes on first use each process
/// and memoized for the process lifetime; it is intentionally a descriptive string, not a
/// cryptographic identifier, and collisions across identical hardware are acceptable.
pub struct IdentityResolver {
    store: Arc<dyn SettingsStore>,
    user_id: Mutex<Option<String>>,
    device_id: Mutex<Option<String>>,
}

impl IdentityResolver {
    /// Create a resolver over the given settings store. No I/O happens until first use.
    pub fn new(store: Arc<dyn SettingsStore>) -> IdentityResolver {
        IdentityResolver {
            store,
            user_id: Mutex::new(None),
            device_id: Mutex::new(None),
        }
    }

    /// Resolve both identifiers eagerly so later report calls don't pay the probe cost.
    pub fn init(&self) {
        let user_id = self.user_id();
        let device_id = self.device_id();
        log::info!(target: "event_report", "identity resolved: user {user_id}, device {device_id}");
    }

    /// The stable user identifier.
    ///
    /// Never fails outward: if persisting a freshly generated id fails, the id is still returned
    /// (and stays memoized in memory, so the process keeps a consistent identity).
    pub fn user_id(&self) -> String {
        let mut memo = self.user_id.lock().unwrap();
        if let Some(id) = &*memo {
            return id.clone();
        }

        let id = match self.store.get(SETTING_USER_ID).filter(|v| !v.is_empty()) {
            Some(id) => id,
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                if let Err(err) = self.store.set(SETTING_USER_ID, &id) {
                    log::warn!(target: "event_report", "failed to persist user id: {err}");
                }
                id
            }
        };
        *memo = Some(id.clone());
        id
    }

    /// The device fingerprint, `"CPU:<cpu>; Mem:<mem>GB; GPU:<gpu>"`.
    ///
    /// Stable within one process lifetime; recomputed on each process start.
    pub fn device_id(&self) -> String {
        let mut memo = self.device_id.lock().unwrap();
        if let Some(id) = &*memo {
            return id.clone();
        }

        let cpu = host::cpu_name().unwrap_or_else(|| "Unknown CPU".to_owned());
        let mem = host::total_memory_gb()
            .map(|gb| format!("{gb}GB"))
            .unwrap_or_else(|| "Unknown Mem".to_owned());
        let gpu = host::gpu_name().unwrap_or_else(|| "Unknown GPU".to_owned());

        let id = format!("CPU:{cpu}; Mem:{mem}; GPU:{gpu}");
        *memo = Some(id.clone());
        id
    }
}
