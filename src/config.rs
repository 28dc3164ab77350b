//! Reporter construction options.
use std::path::PathBuf;
use std::sync::Arc;

use crate::settings_store::{JsonFileStore, SettingsStore};
use crate::transport::{HttpTransport, Transport};

/// Default ingestion endpoint for event batches.
pub const DEFAULT_EVENT_TRACK_ENDPOINT: &str = "https://api2.amplitude.com/2/httpapi";
/// Default endpoint for feature-flag variant retrieval.
pub const DEFAULT_FEATURE_FLAG_ENDPOINT: &str = "https://api.lab.amplitude.com/v1/vardata";
/// Default key-distribution endpoint polled once at startup for an updated API key.
pub const DEFAULT_KEY_SERVER_URL: &str = "https://your-server.com/api/get-amplitude-key";
/// Hardcoded fallback API key, used until a persisted or remotely distributed key is known.
pub const DEFAULT_API_KEY: &str = "14283a6672ee87df21326b38aa4a5604";

/// Configuration for [`EventReporter`](crate::EventReporter).
///
/// # Examples
/// ```no_run
/// # use event_report::ReporterConfig;
/// let reporter = ReporterConfig::new("my-app", "2.1.0").to_reporter();
/// ```
pub struct ReporterConfig {
    pub(crate) app_name: String,
    pub(crate) app_version: String,
    pub(crate) event_track_endpoint: String,
    pub(crate) feature_flag_endpoint: String,
    pub(crate) key_server_url: String,
    pub(crate) default_api_key: String,
    pub(crate) store: Option<Arc<dyn SettingsStore>>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) failure_log_path: Option<PathBuf>,
}

impl ReporterConfig {
    /// Create a configuration for the given application name and version.
    ///
    /// The application name determines the default location of the on-disk state (settings file
    /// and failure log); the version is stamped into every enriched event.
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> ReporterConfig {
        ReporterConfig {
            app_name: app_name.into(),
            app_version: app_version.into(),
            event_track_endpoint: DEFAULT_EVENT_TRACK_ENDPOINT.to_owned(),
            feature_flag_endpoint: DEFAULT_FEATURE_FLAG_ENDPOINT.to_owned(),
            key_server_url: DEFAULT_KEY_SERVER_URL.to_owned(),
            default_api_key: DEFAULT_API_KEY.to_owned(),
            store: None,
            transport: None,
            failure_log_path: None,
        }
    }

    /// Override the event ingestion endpoint. Clients should use the default in most cases.
    pub fn event_track_endpoint(mut self, url: impl Into<String>) -> ReporterConfig {
        self.event_track_endpoint = url.into();
        self
    }

    /// Override the feature-flag endpoint. Clients should use the default in most cases.
    pub fn feature_flag_endpoint(mut self, url: impl Into<String>) -> ReporterConfig {
        self.feature_flag_endpoint = url.into();
        self
    }

    /// Override the key-distribution endpoint.
    pub fn key_server_url(mut self, url: impl Into<String>) -> ReporterConfig {
        self.key_server_url = url.into();
        self
    }

    /// Override the hardcoded fallback API key.
    pub fn default_api_key(mut self, key: impl Into<String>) -> ReporterConfig {
        self.default_api_key = key.into();
        self
    }

    /// Substitute the settings store used for the user id and cached API key.
    ///
    /// Defaults to a JSON file under the application's local data directory.
    pub fn store(mut self, store: Arc<dyn SettingsStore>) -> ReporterConfig {
        self.store = Some(store);
        self
    }

    /// Substitute the HTTP transport. Defaults to a `reqwest`-backed client.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> ReporterConfig {
        self.transport = Some(transport);
        self
    }

    /// Override where failed event batches are appended for later replay.
    pub fn failure_log_path(mut self, path: impl Into<PathBuf>) -> ReporterConfig {
        self.failure_log_path = Some(path.into());
        self
    }

    /// Create an [`EventReporter`](crate::EventReporter) from this configuration.
    pub fn to_reporter(self) -> crate::EventReporter {
        crate::EventReporter::new(self)
    }

    /// Per-application directory holding the settings file and failure log.
    fn data_dir(&self) -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(&self.app_name)
            .join("event_report")
    }

    pub(crate) fn resolved_store(&self) -> Arc<dyn SettingsStore> {
        match &self.store {
            Some(store) => Arc::clone(store),
            None => Arc::new(JsonFileStore::open(self.data_dir().join("settings.json"))),
        }
    }

    pub(crate) fn resolved_transport(&self) -> Arc<dyn Transport> {
        match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(HttpTransport::new()),
        }
    }

    pub(crate) fn resolved_failure_log(&self) -> PathBuf {
        match &self.failure_log_path {
            Some(path) => path.clone(),
            None => self.data_dir().join("failed_events.jsonl"),
        }
    }
}
