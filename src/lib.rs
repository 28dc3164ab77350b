//! Client-side event reporting and feature-flag SDK.
//!
//! # Overview
//!
//! The SDK revolves around an [`EventReporter`] that accumulates application events, enriches
//! them with identity/device/environment metadata, batches them, and transmits them to a remote
//! analytics endpoint. Batches that fail to send are appended to a local JSON-Lines failure file
//! and can be replayed later with [`EventReporter::report_events_from_json_file`].
//!
//! The reporter also retrieves feature-flag variants for the current user/device
//! ([`EventReporter::fetch_flags`]) and serves synchronous, lock-protected reads of the cached
//! variant table ([`EventReporter::all_flags`], [`EventReporter::flag`]) from any thread.
//!
//! All mutating operations are fire-and-forget hand-offs onto one dedicated worker thread;
//! callers never block and never run pipeline logic on their own thread.
//!
//! ```no_run
//! # use event_report::ReporterConfig;
//! let reporter = ReporterConfig::new("my-app", env!("CARGO_PKG_VERSION")).to_reporter();
//! reporter.init().expect("reporter starts once");
//!
//! reporter.report_event("app_start", Default::default(), Default::default());
//! reporter.fetch_flags(vec!["new_onboarding".to_owned()]);
//!
//! // ... later ...
//! if reporter.flag("new_onboarding").key == "treatment" {
//!     // show the new flow
//! }
//!
//! reporter.shutdown().expect("worker drains and stops");
//! ```
//!
//! # Building blocks
//!
//! [`IdentityResolver`](identity::IdentityResolver) produces a stable persisted user id and an
//! in-process device fingerprint. [`ConfigResolver`](config_resolver::ConfigResolver) resolves
//! the API key (cached → persisted → default, refreshed once from a key-distribution endpoint)
//! and the two static endpoint URLs. [`EventPipeline`](pipeline::EventPipeline) enriches,
//! batches (≤1000 records per request), transmits, and persists failures.
//! [`FeatureFlagCache`](flags::FeatureFlagCache) replaces its variant table wholesale on every
//! successful fetch. The [`Transport`] and [`SettingsStore`] traits are the seams to the HTTP
//! client and the key-value persistence the pipeline depends on.
//!
//! # Delivery guarantees
//!
//! Delivery is at-least-zero, at-most-duplicated: there is no exactly-once guarantee, batches
//! may complete out of order, and unsent events exist only in the failure file until replayed.
//! Nothing in this crate is fatal to the process; every failure mode is absorbed and logged.
//!
//! # Logging
//!
//! The crate logs through the [`log`](https://docs.rs/log) facade under the `event_report`
//! target. Install a `log`-compatible logger for visibility into SDK operations.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod config_resolver;
pub mod flags;
pub mod host;
pub mod identity;
pub mod pipeline;
pub mod settings_store;
pub mod transport;

mod config;
mod error;
mod events;
mod reporter;

pub use config::{
    ReporterConfig, DEFAULT_API_KEY, DEFAULT_EVENT_TRACK_ENDPOINT, DEFAULT_FEATURE_FLAG_ENDPOINT,
    DEFAULT_KEY_SERVER_URL,
};
pub use error::{Error, Result};
pub use events::{EnrichedEvent, TrackEvent};
pub use flags::{FlagsUpdate, VariantInfo};
pub use reporter::EventReporter;
pub use settings_store::{JsonFileStore, MemoryStore, SettingsStore};
pub use transport::{HttpResponse, HttpTransport, Transport};
