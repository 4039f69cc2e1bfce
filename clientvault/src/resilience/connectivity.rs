use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lock;
use crate::backend::HealthProbe;
use crate::clock::Clock;

const DEFAULT_PROBE_SECS: u64 = 20;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
const DEFAULT_UNSTABLE_SECS: u64 = 30;
const DEFAULT_OFFLINE_SECS: u64 = 60;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub unstable_after: Duration,
    pub offline_after: Duration,
    pub stop_timeout: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(DEFAULT_PROBE_SECS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            unstable_after: Duration::from_secs(DEFAULT_UNSTABLE_SECS),
            offline_after: Duration::from_secs(DEFAULT_OFFLINE_SECS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Online,
    Unstable,
    Offline,
}

impl ConnectivityStatus {
    pub fn allows_remote(self) -> bool {
        self != ConnectivityStatus::Offline
    }
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityStatus::Online => write!(f, "online"),
            ConnectivityStatus::Unstable => write!(f, "unstable"),
            ConnectivityStatus::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityState {
    pub status: ConnectivityStatus,
    pub last_success_at: Option<OffsetDateTime>,
    pub last_failure_at: Option<OffsetDateTime>,
}

impl ConnectivityState {
    /// Short text for a status bar.
    pub fn status_text(&self) -> &'static str {
        match self.status {
            ConnectivityStatus::Online => "Online",
            ConnectivityStatus::Unstable => "Unstable connection",
            ConnectivityStatus::Offline => "Offline, showing last-known data",
        }
    }
}

/// Probe history; the status is always derived from it, never stored.
#[derive(Debug, Clone)]
pub struct ConnectivityTracker {
    started_at: OffsetDateTime,
    last_success_at: Option<OffsetDateTime>,
    last_failure_at: Option<OffsetDateTime>,
    last_probe_ok: Option<bool>,
}

impl ConnectivityTracker {
    pub fn new(started_at: OffsetDateTime) -> Self {
        Self {
            started_at,
            last_success_at: None,
            last_failure_at: None,
            last_probe_ok: None,
        }
    }

    pub fn record_success(&mut self, at: OffsetDateTime) {
        self.last_success_at = Some(at);
        self.last_probe_ok = Some(true);
    }

    pub fn record_failure(&mut self, at: OffsetDateTime) {
        self.last_failure_at = Some(at);
        self.last_probe_ok = Some(false);
    }

    pub fn status_at(&self, now: OffsetDateTime, config: &ConnectivityConfig) -> ConnectivityStatus {
        let since = |at: OffsetDateTime| -> Duration {
            (now - at).try_into().unwrap_or(Duration::ZERO)
        };
        match self.last_probe_ok {
            None => ConnectivityStatus::Unstable,
            Some(true) => {
                let age = self.last_success_at.map(since).unwrap_or(Duration::ZERO);
                if age < config.unstable_after {
                    ConnectivityStatus::Online
                } else if age < config.offline_after {
                    ConnectivityStatus::Unstable
                } else {
                    ConnectivityStatus::Offline
                }
            }
            Some(false) => {
                let outage = since(self.last_success_at.unwrap_or(self.started_at));
                if outage < config.offline_after {
                    ConnectivityStatus::Unstable
                } else {
                    ConnectivityStatus::Offline
                }
            }
        }
    }

    pub fn snapshot(&self, now: OffsetDateTime, config: &ConnectivityConfig) -> ConnectivityState {
        ConnectivityState {
            status: self.status_at(now, config),
            last_success_at: self.last_success_at,
            last_failure_at: self.last_failure_at,
        }
    }
}

/// Tells a caller whether a remote round trip is worth attempting.
pub trait RouteHint: Send + Sync {
    fn allows_remote(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRemote;

impl RouteHint for AlwaysRemote {
    fn allows_remote(&self) -> bool {
        true
    }
}

type Subscriber = Arc<dyn Fn(&ConnectivityState) + Send + Sync>;

struct ProbeState {
    tracker: ConnectivityTracker,
    published: Option<ConnectivityStatus>,
}

struct Shared {
    probe: Arc<dyn HealthProbe>,
    clock: Arc<dyn Clock>,
    config: ConnectivityConfig,
    state: Mutex<ProbeState>,
    subscribers: Mutex<Vec<Subscriber>>,
    notifier: Mutex<Option<mpsc::UnboundedSender<ConnectivityState>>>,
}

struct Running {
    cancel: CancellationToken,
    probe_loop: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

pub struct ConnectivityMonitor {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl ConnectivityMonitor {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        clock: Arc<dyn Clock>,
        config: ConnectivityConfig,
    ) -> Self {
        let tracker = ConnectivityTracker::new(clock.now());
        Self {
            shared: Arc::new(Shared {
                probe,
                clock,
                config,
                state: Mutex::new(ProbeState {
                    tracker,
                    published: None,
                }),
                subscribers: Mutex::new(Vec::new()),
                notifier: Mutex::new(None),
            }),
            running: Mutex::new(None),
        }
    }

    /// Status changes are delivered one at a time from the dispatcher task.
    pub fn subscribe(&self, callback: impl Fn(&ConnectivityState) + Send + Sync + 'static) {
        lock(&self.shared.subscribers).push(Arc::new(callback));
    }

    pub fn current(&self) -> ConnectivityState {
        let now = self.shared.clock.now();
        lock(&self.shared.state)
            .tracker
            .snapshot(now, &self.shared.config)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Spawns the probe loop; returns false if it was already running.
    pub fn start(&self) -> bool {
        let mut running = lock(&self.running);
        if running.is_some() {
            return false;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.shared.notifier) = Some(tx);
        let cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&self.shared), rx));
        let probe_loop = tokio::spawn(probe_loop(Arc::clone(&self.shared), cancel.clone()));
        *running = Some(Running {
            cancel,
            probe_loop,
            dispatcher,
        });
        tracing::info!(
            interval_secs = self.shared.config.probe_interval.as_secs(),
            "connectivity monitor started"
        );
        true
    }

    /// Cancels the loop and waits at most `stop_timeout` for it to exit.
    pub async fn stop(&self) {
        let running = lock(&self.running).take();
        let Some(running) = running else {
            return;
        };
        running.cancel.cancel();
        lock(&self.shared.notifier).take();

        let probe_abort = running.probe_loop.abort_handle();
        let dispatch_abort = running.dispatcher.abort_handle();
        let joined = tokio::time::timeout(self.shared.config.stop_timeout, async {
            let _ = running.probe_loop.await;
            let _ = running.dispatcher.await;
        })
        .await;
        if joined.is_err() {
            tracing::warn!(
                timeout_ms = self.shared.config.stop_timeout.as_millis() as u64,
                "connectivity monitor did not stop in time, aborting"
            );
            probe_abort.abort();
            dispatch_abort.abort();
        }
        tracing::info!("connectivity monitor stopped");
    }

    /// Runs one probe on the caller's task.
    pub async fn probe_now(&self) -> ConnectivityState {
        probe_once(&self.shared).await
    }
}

impl RouteHint for ConnectivityMonitor {
    fn allows_remote(&self) -> bool {
        self.current().status.allows_remote()
    }
}

async fn probe_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = probe_once(&shared) => {}
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.config.probe_interval) => {}
        }
    }
}

async fn probe_once(shared: &Shared) -> ConnectivityState {
    let attempt = tokio::time::timeout(shared.config.probe_timeout, shared.probe.probe());
    let ok = match AssertUnwindSafe(attempt).catch_unwind().await {
        Ok(Ok(Ok(()))) => true,
        Ok(Ok(Err(err))) => {
            tracing::debug!(error = %err, "health probe failed");
            false
        }
        Ok(Err(_)) => {
            tracing::debug!(
                timeout_ms = shared.config.probe_timeout.as_millis() as u64,
                "health probe timed out"
            );
            false
        }
        Err(_) => {
            tracing::warn!("health probe panicked");
            false
        }
    };

    let now = shared.clock.now();
    let mut guard = lock(&shared.state);
    if ok {
        guard.tracker.record_success(now);
    } else {
        guard.tracker.record_failure(now);
    }
    let state = guard.tracker.snapshot(now, &shared.config);
    if guard.published != Some(state.status) {
        guard.published = Some(state.status);
        tracing::info!(status = %state.status, "connectivity changed");
        // Sent under the state lock so delivery order matches update order.
        if let Some(tx) = lock(&shared.notifier).as_ref() {
            let _ = tx.send(state.clone());
        }
    }
    drop(guard);
    state
}

async fn dispatch_loop(shared: Arc<Shared>, mut rx: mpsc::UnboundedReceiver<ConnectivityState>) {
    while let Some(state) = rx.recv().await {
        let subscribers = lock(&shared.subscribers).clone();
        for subscriber in subscribers {
            let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| subscriber(&state)));
            if delivered.is_err() {
                tracing::warn!(status = %state.status, "connectivity subscriber panicked");
            }
        }
    }
}
