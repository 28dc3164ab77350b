//! Event enrichment, batching, transmission, and failure persistence.
//!
//! Events flow in as [`TrackEvent`]s (or pre-enriched JSON records on the replay path), get split
//! into bounded chunks, and each chunk is POSTed independently. A chunk whose transmission fails
//! is appended, one JSON object per line, to a local failure file; replay is an explicit later
//! call to [`EventPipeline::report_events_from_json_file`] pointed at that file.
use std::future::Future;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;

use crate::config_resolver::ConfigResolver;
use crate::events::{EnrichedEvent, TrackEvent};
use crate::host;
use crate::identity::IdentityResolver;
use crate::transport::Transport;

/// Maximum number of event records per ingestion request.
pub const MAX_BATCH_SIZE: usize = 1000;

/// A pending chunk transmission. The orchestrator spawns these onto the worker runtime; they run
/// concurrently and each fires its completion handling exactly once.
pub(crate) type ChunkSend = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Wire body of one ingestion POST.
#[derive(Serialize)]
struct IngestBody<'a> {
    api_key: &'a str,
    events: &'a [serde_json::Value],
}

/// Environment metadata stamped into every enriched event. Captured once per process; cheap and
/// stable enough that per-event probing would be waste.
struct EnvironmentInfo {
    app_version: String,
    platform: String,
    os_name: String,
    os_version: String,
    country: String,
    language: String,
}

impl EnvironmentInfo {
    fn capture(app_version: String) -> EnvironmentInfo {
        let (language, country) = host::locale();
        EnvironmentInfo {
            app_version,
            platform: host::platform().to_owned(),
            os_name: host::os_name(),
            os_version: host::os_version(),
            country,
            language,
        }
    }
}

/// The event delivery pipeline.
pub struct EventPipeline {
    identity: Arc<IdentityResolver>,
    config: Arc<ConfigResolver>,
    transport: Arc<dyn Transport>,
    failure_log: PathBuf,
    environment: EnvironmentInfo,
}

impl EventPipeline {
    pub fn new(
        identity: Arc<IdentityResolver>,
        config: Arc<ConfigResolver>,
        transport: Arc<dyn Transport>,
        app_version: String,
        failure_log: PathBuf,
    ) -> EventPipeline {
        EventPipeline {
            identity,
            config,
            transport,
            failure_log,
            environment: EnvironmentInfo::capture(app_version),
        }
    }

    /// Attach identity, device, timestamp, and environment metadata to a raw event.
    pub fn enrich(&self, event: &TrackEvent) -> EnrichedEvent {
        EnrichedEvent {
            user_id: self.identity.user_id(),
            device_id: self.identity.device_id(),
            event_type: event.event_type.clone(),
            time: chrono::Utc::now().timestamp_millis(),
            event_properties: event.event_properties.clone(),
            user_properties: event.user_properties.clone(),
            app_version: self.environment.app_version.clone(),
            platform: self.environment.platform.clone(),
            os_name: self.environment.os_name.clone(),
            os_version: self.environment.os_version.clone(),
            country: self.environment.country.clone(),
            language: self.environment.language.clone(),
            ip: "$remote".to_owned(),
        }
    }

    /// Enrich and submit a single event.
    pub(crate) fn report_event(&self, event: TrackEvent) -> Vec<ChunkSend> {
        self.report_events(vec![event])
    }

    /// Enrich and submit a batch of events.
    pub(crate) fn report_events(&self, events: Vec<TrackEvent>) -> Vec<ChunkSend> {
        let records = events
            .iter()
            .filter_map(|event| match serde_json::to_value(self.enrich(event)) {
                Ok(record) => Some(record),
                Err(err) => {
                    log::error!(target: "event_report", "dropping unserializable event: {err}");
                    None
                }
            })
            .collect::<Vec<_>>();
        log::info!(target: "event_report", "reporting {} events", records.len());
        self.dispatch(records)
    }

    /// Replay pre-enriched records from a JSON-Lines file.
    ///
    /// Each non-blank line is parsed as JSON and accepted if it is an object or an array of
    /// objects; malformed lines are skipped. Records are sent exactly as read, with no
    /// re-enrichment, which keeps replayed batches byte-for-byte identical to what was
    /// persisted. An unreadable file is a logged no-op.
    pub(crate) fn report_events_from_json_file(&self, path: &Path) -> Vec<ChunkSend> {
        let records = read_replay_records(path);
        if records.is_empty() {
            return Vec::new();
        }
        log::info!(
            target: "event_report",
            "replaying {} events from {}",
            records.len(),
            path.display()
        );
        self.dispatch(records)
    }

    /// Partition records into chunks of at most [`MAX_BATCH_SIZE`] and build one transmission per
    /// chunk. Chunks are independent: the caller launches them all without waiting, and each one
    /// persists its own records on failure.
    fn dispatch(&self, records: Vec<serde_json::Value>) -> Vec<ChunkSend> {
        let api_key = self.config.api_key();
        let endpoint = self.config.event_track_endpoint().to_owned();

        records
            .chunks(MAX_BATCH_SIZE)
            .map(|chunk| {
                Box::pin(send_chunk(
                    Arc::clone(&self.transport),
                    endpoint.clone(),
                    api_key.clone(),
                    chunk.to_vec(),
                    self.failure_log.clone(),
                )) as ChunkSend
            })
            .collect()
    }
}

async fn send_chunk(
    transport: Arc<dyn Transport>,
    endpoint: String,
    api_key: String,
    chunk: Vec<serde_json::Value>,
    failure_log: PathBuf,
) {
    let body = match serde_json::to_vec(&IngestBody {
        api_key: &api_key,
        events: &chunk,
    }) {
        Ok(body) => body,
        Err(err) => {
            // Records came from serde_json, so this shouldn't happen; keep them anyway.
            log::error!(target: "event_report", "failed to serialize event batch: {err}");
            persist_failed_records(&failure_log, &chunk);
            return;
        }
    };

    log::debug!(
        target: "event_report",
        "sending batch of {} events to {endpoint}",
        chunk.len()
    );
    match transport.post_json(&endpoint, body).await {
        Ok(response) if response.is_success() => {
            log::debug!(
                target: "event_report",
                "batch of {} events accepted (status {})",
                chunk.len(),
                response.status
            );
        }
        Ok(response) => {
            log::warn!(
                target: "event_report",
                "batch rejected with status {}: {}",
                response.status,
                String::from_utf8_lossy(&response.body)
            );
            persist_failed_records(&failure_log, &chunk);
        }
        Err(err) => {
            log::warn!(target: "event_report", "batch transmission failed: {err}");
            persist_failed_records(&failure_log, &chunk);
        }
    }
}

/// Append the chunk's records to the failure file, one compact JSON object per line. I/O errors
/// degrade to in-memory-only behavior: the loss is logged and the pipeline keeps going.
fn persist_failed_records(path: &Path, records: &[serde_json::Value]) {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        for record in records {
            serde_json::to_writer(&mut file, record)?;
            file.write_all(b"\n")?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => log::info!(
            target: "event_report",
            "saved {} failed events to {}",
            records.len(),
            path.display()
        ),
        Err(err) => log::error!(
            target: "event_report",
            "could not persist {} failed events: {err}",
            records.len()
        ),
    }
}

fn read_replay_records(path: &Path) -> Vec<serde_json::Value> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            log::warn!(
                target: "event_report",
                "cannot open replay file {}: {err}",
                path.display()
            );
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(&line) {
            Ok(serde_json::Value::Object(object)) => {
                records.push(serde_json::Value::Object(object));
            }
            Ok(serde_json::Value::Array(items)) => {
                records.extend(items.into_iter().filter(|item| item.is_object()));
            }
            _ => {
                // Malformed or non-object line; skip, not fatal to the read.
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings_store::{MemoryStore, SettingsStore};
    use crate::transport::mock::MockTransport;
    use crate::ReporterConfig;

    fn pipeline_with(transport: Arc<MockTransport>, failure_log: PathBuf) -> EventPipeline {
        let store: Arc<dyn SettingsStore> = Arc::new(MemoryStore::new());
        let config = ReporterConfig::new("test-app", "3.2.1").default_api_key("test-key");
        let resolver = Arc::new(ConfigResolver::new(
            Arc::clone(&store),
            Arc::clone(&transport) as Arc<dyn Transport>,
            &config,
        ));
        resolver.init();
        let identity = Arc::new(IdentityResolver::new(store));
        EventPipeline::new(
            identity,
            resolver,
            transport,
            "3.2.1".to_owned(),
            failure_log,
        )
    }

    fn numbered_records(count: usize) -> Vec<serde_json::Value> {
        (0..count)
            .map(|i| serde_json::json!({"event_type": "e", "seq": i}))
            .collect()
    }

    #[test]
    fn enrichment_attaches_identity_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_with(
            Arc::new(MockTransport::new()),
            dir.path().join("failed.jsonl"),
        );

        let enriched = pipeline.enrich(&TrackEvent::new("app_start"));

        assert!(!enriched.user_id.is_empty());
        assert!(enriched.device_id.starts_with("CPU:"));
        assert_eq!(enriched.event_type, "app_start");
        assert!(enriched.time > 0);
        assert_eq!(enriched.app_version, "3.2.1");
        assert_eq!(enriched.ip, "$remote");
    }

    #[tokio::test]
    async fn events_split_into_ceiling_n_over_1000_posts() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let pipeline = pipeline_with(Arc::clone(&transport), dir.path().join("failed.jsonl"));

        let sends = pipeline.dispatch(numbered_records(2500));
        assert_eq!(sends.len(), 3);
        for send in sends {
            send.await;
        }

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        let sizes: Vec<usize> = requests
            .iter()
            .map(|r| r.body_json()["events"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![1000, 1000, 500]);
        for request in &requests {
            let body = request.body_json();
            assert_eq!(body["api_key"], "test-key");
            assert!(body["events"].as_array().unwrap().len() <= MAX_BATCH_SIZE);
        }
    }

    #[tokio::test]
    async fn single_event_report_posts_one_enriched_record() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let pipeline = pipeline_with(Arc::clone(&transport), dir.path().join("failed.jsonl"));

        for send in pipeline.report_event(TrackEvent::new("clicked")) {
            send.await;
        }

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let events = requests[0].body_json()["events"].clone();
        assert_eq!(events.as_array().unwrap().len(), 1);
        assert_eq!(events[0]["event_type"], "clicked");
        assert_eq!(events[0]["event_properties"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn only_the_failed_chunk_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let failure_log = dir.path().join("failed.jsonl");
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_ok(200, b"{}");
        transport.enqueue_ok(500, b"server error");
        transport.enqueue_ok(200, b"{}");
        let pipeline = pipeline_with(Arc::clone(&transport), failure_log.clone());

        for send in pipeline.dispatch(numbered_records(2500)) {
            send.await;
        }

        let contents = std::fs::read_to_string(&failure_log).unwrap();
        let persisted: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        // Exactly chunk 2's records: seq 1000..2000.
        assert_eq!(persisted.len(), 1000);
        assert_eq!(persisted[0]["seq"], 1000);
        assert_eq!(persisted[999]["seq"], 1999);
    }

    #[tokio::test]
    async fn transport_errors_persist_the_chunk_too() {
        let dir = tempfile::tempdir().unwrap();
        let failure_log = dir.path().join("failed.jsonl");
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_error();
        let pipeline = pipeline_with(Arc::clone(&transport), failure_log.clone());

        for send in pipeline.report_event(TrackEvent::new("lost")) {
            send.await;
        }

        let contents = std::fs::read_to_string(&failure_log).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn replay_resends_persisted_records_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let failure_log = dir.path().join("failed.jsonl");

        // First run: the send fails and the enriched records land in the failure file.
        let failing = Arc::new(MockTransport::new());
        failing.enqueue_error();
        let pipeline = pipeline_with(Arc::clone(&failing), failure_log.clone());
        for send in pipeline.report_event(TrackEvent::new("offline_click")) {
            send.await;
        }
        let persisted_lines: Vec<String> = std::fs::read_to_string(&failure_log)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect();
        assert_eq!(persisted_lines.len(), 1);

        // Replay: the posted records must match the persisted ones byte for byte (same
        // enrichment fields, no re-enrichment).
        let replaying = Arc::new(MockTransport::new());
        let pipeline = pipeline_with(Arc::clone(&replaying), dir.path().join("other.jsonl"));
        for send in pipeline.report_events_from_json_file(&failure_log) {
            send.await;
        }

        let requests = replaying.requests();
        assert_eq!(requests.len(), 1);
        let events = requests[0].body_json()["events"].as_array().unwrap().clone();
        assert_eq!(events.len(), 1);
        let resent = serde_json::to_string(&events[0]).unwrap();
        let persisted: serde_json::Value = serde_json::from_str(&persisted_lines[0]).unwrap();
        assert_eq!(resent, serde_json::to_string(&persisted).unwrap());
    }

    #[tokio::test]
    async fn replay_skips_malformed_lines_and_accepts_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"event_type\":\"a\"}\n",
                "this is not json\n",
                "\n",
                "[{\"event_type\":\"b\"},{\"event_type\":\"c\"},42]\n",
                "\"just a string\"\n",
            ),
        )
        .unwrap();
        let transport = Arc::new(MockTransport::new());
        let pipeline = pipeline_with(Arc::clone(&transport), dir.path().join("failed.jsonl"));

        for send in pipeline.report_events_from_json_file(&path) {
            send.await;
        }

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let events = requests[0].body_json()["events"].as_array().unwrap().clone();
        let types: Vec<&str> = events
            .iter()
            .map(|e| e["event_type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn missing_replay_file_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let pipeline = pipeline_with(Arc::clone(&transport), dir.path().join("failed.jsonl"));

        let sends = pipeline.report_events_from_json_file(&dir.path().join("nope.jsonl"));

        assert!(sends.is_empty());
        assert!(transport.requests().is_empty());
    }
}
