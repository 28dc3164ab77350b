//! The thread-safe facade over the whole pipeline.
//!
//! All mutating state (identity cache, API-key cache, event pipeline, flag cache) lives behind a
//! single dedicated worker thread running a current-thread tokio runtime. Public mutating calls
//! are queued onto it over a single-consumer channel and executed strictly in submission order;
//! transport completions run on the same thread. Read accessors go straight to the lock-protected
//! fields and may be called from any thread.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config_resolver::ConfigResolver;
use crate::events::TrackEvent;
use crate::flags::{FeatureFlagCache, FlagsUpdate, VariantInfo};
use crate::identity::IdentityResolver;
use crate::pipeline::{ChunkSend, EventPipeline};
use crate::transport::Transport;
use crate::{Error, ReporterConfig, Result};

/// Work items marshalled onto the worker thread.
enum Command {
    ReportEvent(TrackEvent),
    ReportEvents(Vec<TrackEvent>),
    ReportEventsFromJsonFile(PathBuf),
    FetchFlags(Vec<String>),
}

struct Worker {
    sender: mpsc::UnboundedSender<Command>,
    join_handle: std::thread::JoinHandle<()>,
}

enum Lifecycle {
    Uninitialized,
    Initializing,
    Running(Worker),
    ShuttingDown,
    Stopped,
}

impl Lifecycle {
    fn name(&self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Initializing => "initializing",
            Lifecycle::Running(_) => "running",
            Lifecycle::ShuttingDown => "shutting down",
            Lifecycle::Stopped => "stopped",
        }
    }
}

type ReadySignal = Arc<(Mutex<Option<Result<()>>>, Condvar)>;

/// Entry point of the SDK: owns the lifecycle of all pipeline components and exposes a
/// thread-safe facade to them.
///
/// Construct one via [`ReporterConfig::to_reporter`], call [`init`](EventReporter::init) once,
/// and [`shutdown`](EventReporter::shutdown) before process exit. Report calls are
/// fire-and-forget; flag reads are synchronous and best-effort.
///
/// # Examples
/// ```no_run
/// # use event_report::ReporterConfig;
/// let reporter = ReporterConfig::new("my-app", "2.1.0").to_reporter();
/// reporter.init().unwrap();
/// reporter.report_event("app_start", Default::default(), Default::default());
/// reporter.fetch_flags(vec![]);
/// reporter.shutdown().unwrap();
/// ```
pub struct EventReporter {
    state: Mutex<Lifecycle>,
    ready: ReadySignal,
    // Field order is drop order: business services first, transport last, since every component
    // holds a reference to the transport.
    flags: Arc<FeatureFlagCache>,
    pipeline: Arc<EventPipeline>,
    config: Arc<ConfigResolver>,
    identity: Arc<IdentityResolver>,
    #[allow(dead_code)]
    transport: Arc<dyn Transport>,
}

impl EventReporter {
    /// Construct the reporter and its components. Cheap; no worker is started and no network
    /// I/O happens until [`init`](EventReporter::init).
    pub fn new(config: ReporterConfig) -> EventReporter {
        let store = config.resolved_store();
        let transport = config.resolved_transport();
        let failure_log = config.resolved_failure_log();

        let identity = Arc::new(IdentityResolver::new(Arc::clone(&store)));
        let config_resolver = Arc::new(ConfigResolver::new(
            store,
            Arc::clone(&transport),
            &config,
        ));
        let pipeline = Arc::new(EventPipeline::new(
            Arc::clone(&identity),
            Arc::clone(&config_resolver),
            Arc::clone(&transport),
            config.app_version.clone(),
            failure_log,
        ));
        let flags = Arc::new(FeatureFlagCache::new(
            Arc::clone(&identity),
            Arc::clone(&config_resolver),
            Arc::clone(&transport),
        ));

        EventReporter {
            state: Mutex::new(Lifecycle::Uninitialized),
            ready: Arc::new((Mutex::new(None), Condvar::new())),
            flags,
            pipeline,
            config: config_resolver,
            identity,
            transport,
        }
    }

    /// Start the worker thread and initialize components on it, in dependency order (identity,
    /// then config with its asynchronous key refresh, then the event pipeline and flag cache).
    ///
    /// Returns an error if the reporter was already initialized or if the thread cannot be
    /// spawned. Use [`wait_until_ready`](EventReporter::wait_until_ready) to block until the
    /// on-thread initialization has finished.
    pub fn init(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if !matches!(*state, Lifecycle::Uninitialized) {
                return Err(Error::InvalidState(state.name()));
            }
            *state = Lifecycle::Initializing;
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let join_handle = {
            let ready = Arc::clone(&self.ready);
            let identity = Arc::clone(&self.identity);
            let config = Arc::clone(&self.config);
            let pipeline = Arc::clone(&self.pipeline);
            let flags = Arc::clone(&self.flags);

            let spawned = std::thread::Builder::new()
                .name("event-report-worker".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        worker_loop(receiver, &ready, identity, config, pipeline, flags);
                    }));
                    if result.is_err() {
                        publish_ready(&ready, Err(Error::WorkerThreadPanicked));
                    }
                });
            match spawned {
                Ok(handle) => handle,
                Err(err) => {
                    *self.state.lock().unwrap() = Lifecycle::Uninitialized;
                    return Err(err.into());
                }
            }
        };

        *self.state.lock().unwrap() = Lifecycle::Running(Worker {
            sender,
            join_handle,
        });
        log::info!(target: "event_report", "reporter initialized");
        Ok(())
    }

    /// Block until the worker thread has finished initializing its components.
    pub fn wait_until_ready(&self) -> Result<()> {
        if matches!(*self.state.lock().unwrap(), Lifecycle::Uninitialized) {
            return Err(Error::InvalidState("uninitialized"));
        }
        let mut slot = self
            .ready
            .0
            .lock()
            .map_err(|_| Error::WorkerThreadPanicked)?;
        loop {
            match &*slot {
                Some(result) => return result.clone(),
                None => {
                    slot = self
                        .ready
                        .1
                        .wait(slot)
                        .map_err(|_| Error::WorkerThreadPanicked)?;
                }
            }
        }
    }

    /// Report a single event. Fire-and-forget: enrichment and transmission happen on the worker
    /// thread; when the reporter is not running the event is dropped with a warning.
    pub fn report_event(
        &self,
        event_type: impl Into<String>,
        event_properties: HashMap<String, serde_json::Value>,
        user_properties: HashMap<String, serde_json::Value>,
    ) {
        self.enqueue(Command::ReportEvent(TrackEvent {
            event_type: event_type.into(),
            event_properties,
            user_properties,
        }));
    }

    /// Report a batch of events.
    pub fn report_events(&self, events: Vec<TrackEvent>) {
        self.enqueue(Command::ReportEvents(events));
    }

    /// Replay previously persisted (pre-enriched) events from a JSON-Lines file.
    pub fn report_events_from_json_file(&self, path: impl Into<PathBuf>) {
        self.enqueue(Command::ReportEventsFromJsonFile(path.into()));
    }

    /// Request a flag fetch for the current user/device, optionally filtered to `flag_keys`.
    /// Completion is observable via [`subscribe`](EventReporter::subscribe).
    pub fn fetch_flags(&self, flag_keys: Vec<String>) {
        self.enqueue(Command::FetchFlags(flag_keys));
    }

    /// Snapshot of all cached flags. Callable from any thread; never blocks on a fetch.
    pub fn all_flags(&self) -> HashMap<String, VariantInfo> {
        self.flags.all_flags()
    }

    /// The cached variant for `flag_key`, or a default if unknown.
    pub fn flag(&self, flag_key: &str) -> VariantInfo {
        self.flags.flag(flag_key)
    }

    /// Register for flag-fetch completion notifications.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<FlagsUpdate> {
        self.flags.subscribe()
    }

    /// The currently resolved API key.
    pub fn api_key(&self) -> String {
        self.config.api_key()
    }

    fn enqueue(&self, command: Command) {
        let state = self.state.lock().unwrap();
        match &*state {
            Lifecycle::Running(worker) => {
                if worker.sender.send(command).is_err() {
                    log::warn!(target: "event_report", "worker channel closed, dropping operation");
                }
            }
            other => {
                log::warn!(
                    target: "event_report",
                    "reporter is {}, dropping operation",
                    other.name()
                );
            }
        }
    }

    /// Stop accepting new work, drain already-queued operations and in-flight transmissions,
    /// and join the worker thread.
    pub fn shutdown(&self) -> Result<()> {
        let worker = {
            let mut state = self.state.lock().unwrap();
            match std::mem::replace(&mut *state, Lifecycle::ShuttingDown) {
                Lifecycle::Running(worker) => worker,
                other => {
                    let name = other.name();
                    *state = other;
                    return Err(Error::InvalidState(name));
                }
            }
        };

        // Dropping the sender closes the channel; the worker processes everything already queued,
        // waits out in-flight sends, and exits.
        drop(worker.sender);
        let joined = worker.join_handle.join();
        *self.state.lock().unwrap() = Lifecycle::Stopped;
        log::info!(target: "event_report", "reporter stopped");
        joined.map_err(|_| Error::WorkerThreadPanicked)
    }
}

fn publish_ready(ready: &ReadySignal, value: Result<()>) {
    *ready.0.lock().unwrap() = Some(value);
    ready.1.notify_all();
}

fn worker_loop(
    mut receiver: mpsc::UnboundedReceiver<Command>,
    ready: &ReadySignal,
    identity: Arc<IdentityResolver>,
    config: Arc<ConfigResolver>,
    pipeline: Arc<EventPipeline>,
    flags: Arc<FeatureFlagCache>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            publish_ready(ready, Err(Error::from(err)));
            return;
        }
    };

    runtime.block_on(async {
        let mut in_flight: JoinSet<()> = JoinSet::new();

        // Dependency-ordered initialization. The transport needs none; identity populates the
        // ids that config and the pipeline read; the API-key refresh runs concurrently with
        // normal operation and the pipeline uses whatever key is current at submission time.
        identity.init();
        config.init();
        {
            let config = Arc::clone(&config);
            in_flight.spawn(async move { config.refresh().await });
        }
        publish_ready(ready, Ok(()));
        log::debug!(target: "event_report", "worker thread ready");

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(command) => {
                        handle_command(command, &pipeline, &flags, &mut in_flight);
                    }
                    // Channel closed and queue drained: begin shutdown.
                    None => break,
                },
                // Reap finished transmissions so the set doesn't grow unboundedly.
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        // Queued commands are all handled at this point; wait out in-flight transmissions so
        // completion handlers (including failure persistence) always fire.
        while in_flight.join_next().await.is_some() {}
        log::debug!(target: "event_report", "worker thread drained");
    });
}

fn handle_command(
    command: Command,
    pipeline: &Arc<EventPipeline>,
    flags: &Arc<FeatureFlagCache>,
    in_flight: &mut JoinSet<()>,
) {
    match command {
        Command::ReportEvent(event) => {
            spawn_sends(in_flight, pipeline.report_event(event));
        }
        Command::ReportEvents(events) => {
            spawn_sends(in_flight, pipeline.report_events(events));
        }
        Command::ReportEventsFromJsonFile(path) => {
            spawn_sends(in_flight, pipeline.report_events_from_json_file(&path));
        }
        Command::FetchFlags(flag_keys) => {
            let flags = Arc::clone(flags);
            in_flight.spawn(async move { flags.fetch_flags(flag_keys).await });
        }
    }
}

fn spawn_sends(in_flight: &mut JoinSet<()>, sends: Vec<ChunkSend>) {
    for send in sends {
        in_flight.spawn(send);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings_store::MemoryStore;
    use crate::transport::mock::MockTransport;

    fn reporter_with(transport: Arc<MockTransport>, dir: &std::path::Path) -> EventReporter {
        ReporterConfig::new("test-app", "1.0")
            .default_api_key("test-key")
            .store(Arc::new(MemoryStore::new()))
            .transport(transport)
            .failure_log_path(dir.join("failed.jsonl"))
            .to_reporter()
    }

    #[test]
    fn init_is_one_shot_and_shutdown_requires_running() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = reporter_with(Arc::new(MockTransport::new()), dir.path());

        assert!(matches!(
            reporter.shutdown(),
            Err(Error::InvalidState("uninitialized"))
        ));

        reporter.init().unwrap();
        reporter.wait_until_ready().unwrap();
        assert!(matches!(reporter.init(), Err(Error::InvalidState(_))));

        reporter.shutdown().unwrap();
        assert!(matches!(reporter.shutdown(), Err(Error::InvalidState(_))));
        assert!(matches!(reporter.init(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn init_refreshes_api_key_from_server() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_ok(200, br#"{"amplitude_api_key": "distributed-key"}"#);
        let reporter = reporter_with(Arc::clone(&transport), dir.path());

        reporter.init().unwrap();
        reporter.wait_until_ready().unwrap();
        reporter.shutdown().unwrap();

        assert_eq!(reporter.api_key(), "distributed-key");
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].url.contains("get-amplitude-key"));
    }

    #[test]
    fn shutdown_drains_queued_reports() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let reporter = reporter_with(Arc::clone(&transport), dir.path());

        reporter.init().unwrap();
        for i in 0..3 {
            reporter.report_event(format!("event_{i}"), HashMap::new(), HashMap::new());
        }
        reporter.shutdown().unwrap();

        let posts: Vec<_> = transport
            .requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect();
        assert_eq!(posts.len(), 3);
        let mut reported: Vec<String> = posts
            .iter()
            .map(|post| {
                post.body_json()["events"][0]["event_type"]
                    .as_str()
                    .unwrap()
                    .to_owned()
            })
            .collect();
        reported.sort();
        assert_eq!(reported, vec!["event_0", "event_1", "event_2"]);
    }

    #[test]
    fn flag_fetch_flows_through_the_worker_and_updates_reads() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        // The same body answers both the key refresh and the flag fetch, so the test does not
        // depend on which request the worker issues first. The refresh simply finds no
        // `amplitude_api_key` field and keeps the default.
        let body = br#"{"banner": {"key": "treatment", "payload": {"color": "red"}}}"#;
        transport.enqueue_ok(200, body);
        transport.enqueue_ok(200, body);
        let reporter = reporter_with(Arc::clone(&transport), dir.path());
        let mut updates = reporter.subscribe();

        reporter.init().unwrap();
        reporter.fetch_flags(vec!["banner".to_owned()]);
        reporter.shutdown().unwrap();

        assert!(matches!(
            updates.try_recv().unwrap(),
            FlagsUpdate::Updated { count: 1 }
        ));
        assert_eq!(reporter.flag("banner").key, "treatment");
        assert_eq!(reporter.all_flags().len(), 1);

        let requests = transport.requests();
        assert!(requests
            .iter()
            .any(|request| request.url.contains("flag_keys=banner")));
    }

    #[test]
    fn reports_after_shutdown_are_dropped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let reporter = reporter_with(Arc::clone(&transport), dir.path());

        reporter.init().unwrap();
        reporter.shutdown().unwrap();
        reporter.report_event("late", HashMap::new(), HashMap::new());

        assert!(transport
            .requests()
            .iter()
            .all(|request| request.method != "POST"));
    }

    #[test]
    fn failed_batches_survive_for_replay_across_reporters() {
        let dir = tempfile::tempdir().unwrap();
        let failing = Arc::new(MockTransport::new());
        // Both the key refresh and the event batch fail; the refresh failure is harmless (the
        // default key is retained) and the batch failure must land in the failure file.
        failing.enqueue_error();
        failing.enqueue_error();
        let reporter = reporter_with(Arc::clone(&failing), dir.path());

        reporter.init().unwrap();
        reporter.report_event("offline", HashMap::new(), HashMap::new());
        reporter.shutdown().unwrap();

        let failure_log = dir.path().join("failed.jsonl");
        assert_eq!(
            std::fs::read_to_string(&failure_log).unwrap().lines().count(),
            1
        );

        // A later reporter replays the file verbatim.
        let replaying = Arc::new(MockTransport::new());
        let reporter = reporter_with(Arc::clone(&replaying), dir.path());
        reporter.init().unwrap();
        reporter.report_events_from_json_file(&failure_log);
        reporter.shutdown().unwrap();

        let posts: Vec<_> = replaying
            .requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].body_json()["events"][0]["event_type"], "offline");
    }
}
