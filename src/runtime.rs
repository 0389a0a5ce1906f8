//! Owner thread for the hub.
//!
//! The hub lives on one thread. Everything else talks to it through a
//! [`HubHandle`], which queues commands on a crossbeam channel. The loop wakes
//! up for commands or when the next sweep is due, and polls the settings
//! store for external edits about once a second.

use crate::config::Config;
use crate::device::DeviceBinding;
use crate::error::HubError;
use crate::events::RealtimeMessage;
use crate::hub::Hub;
use crate::sensor::{CompositeId, RawSignalResult};
use crate::stats::StatsLog;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot};

/// How often the settings store is checked for external edits.
const SETTINGS_POLL: Duration = Duration::from_secs(1);

type HubCall = Box<dyn FnOnce(&mut Hub) + Send>;

enum Command {
    Payload { protocol: String, payload: String },
    Ingest(RawSignalResult),
    SettingsChanged(String),
    Call(HubCall),
    Shutdown,
}

/// Cloneable handle to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: Sender<Command>,
    realtime: broadcast::Sender<RealtimeMessage>,
    running: Arc<AtomicBool>,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Start the owner thread.
///
/// Cumulative decode statistics are loaded from and saved to
/// `config.stats_path()`.
pub fn spawn(hub: Hub, config: &Config) -> HubHandle {
    let stats_log = StatsLog::with_persistence(config.stats_path());
    spawn_with_stats(hub, stats_log)
}

/// Start the owner thread with an explicit statistics log.
pub fn spawn_with_stats(hub: Hub, stats_log: StatsLog) -> HubHandle {
    let (commands, receiver) = unbounded();
    let realtime = hub.realtime_sender();
    let running = Arc::new(AtomicBool::new(true));

    let flag = running.clone();
    let thread = thread::Builder::new()
        .name("weather-hub".into())
        .spawn(move || {
            run_loop(hub, receiver, &stats_log);
            flag.store(false, Ordering::SeqCst);
        });

    let thread = match thread {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!("Could not start hub thread: {}", e);
            running.store(false, Ordering::SeqCst);
            None
        }
    };

    HubHandle {
        commands,
        realtime,
        running,
        thread: Arc::new(Mutex::new(thread)),
    }
}

fn run_loop(mut hub: Hub, receiver: Receiver<Command>, stats_log: &StatsLog) {
    let interval = hub.monitor().interval();
    let mut last_sweep = Instant::now();
    let mut last_settings_check = Instant::now();
    tracing::info!("Hub started, sweeping every {:?}", interval);

    loop {
        let until_sweep = interval.saturating_sub(last_sweep.elapsed());
        let until_poll = SETTINGS_POLL.saturating_sub(last_settings_check.elapsed());

        match receiver.recv_timeout(until_sweep.min(until_poll)) {
            Ok(Command::Shutdown) => break,
            Ok(command) => dispatch(&mut hub, command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::debug!("All hub handles dropped");
                break;
            }
        }

        if last_sweep.elapsed() >= interval {
            let report = hub.sweep(Utc::now());
            if !report.removed.is_empty() || !report.marked_unavailable.is_empty() {
                tracing::debug!(
                    "Sweep removed {} sensor(s), marked {} device(s) unavailable",
                    report.removed.len(),
                    report.marked_unavailable.len()
                );
            }
            last_sweep = Instant::now();
        }

        if last_settings_check.elapsed() >= SETTINGS_POLL {
            hub.refresh_settings();
            last_settings_check = Instant::now();
        }
    }

    let stats = hub.protocol_stats();
    if let Err(e) = stats_log.save(&stats) {
        tracing::warn!("Could not save statistics: {}", e);
    }
    tracing::info!("Hub stopped");
}

fn dispatch(hub: &mut Hub, command: Command) {
    match command {
        Command::Payload { protocol, payload } => {
            if let Err(e) = hub.handle_payload(&protocol, &payload) {
                tracing::warn!("Dropping payload: {}", e);
            }
        }
        Command::Ingest(raw) => {
            hub.ingest(raw);
        }
        Command::SettingsChanged(key) => hub.settings_changed(&key),
        Command::Call(call) => call(hub),
        Command::Shutdown => {}
    }
}

impl HubHandle {
    fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).map_err(|_| HubError::Stopped)
    }

    /// Queue a payload for the given protocol.
    pub fn send_payload(
        &self,
        protocol: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<(), HubError> {
        self.send(Command::Payload {
            protocol: protocol.into(),
            payload: payload.into(),
        })
    }

    /// Queue an already decoded result.
    pub fn ingest(&self, raw: RawSignalResult) -> Result<(), HubError> {
        self.send(Command::Ingest(raw))
    }

    /// Announce that a settings key changed.
    pub fn settings_changed(&self, key: impl Into<String>) -> Result<(), HubError> {
        self.send(Command::SettingsChanged(key.into()))
    }

    /// Run a closure on the owner thread and wait for its result.
    ///
    /// Must not be called from inside an async runtime; use [`call_async`](Self::call_async) there.
    pub fn call<T, F>(&self, f: F) -> Result<T, HubError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Hub) -> T + Send + 'static,
    {
        let reply = self.queue_call(f)?;
        reply.blocking_recv().map_err(|_| HubError::NoReply)
    }

    /// Async variant of [`call`](Self::call).
    pub async fn call_async<T, F>(&self, f: F) -> Result<T, HubError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Hub) -> T + Send + 'static,
    {
        let reply = self.queue_call(f)?;
        reply.await.map_err(|_| HubError::NoReply)
    }

    fn queue_call<T, F>(&self, f: F) -> Result<oneshot::Receiver<T>, HubError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Hub) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Call(Box::new(move |hub| {
            let _ = tx.send(f(hub));
        })))?;
        Ok(rx)
    }

    pub fn pair(&self, id: CompositeId, binding: Arc<dyn DeviceBinding>) -> Result<(), HubError> {
        self.call(move |hub| hub.pair(id, binding))
    }

    /// Returns whether a binding was removed.
    pub fn unpair(&self, id: CompositeId) -> Result<bool, HubError> {
        self.call(move |hub| hub.unpair(&id).is_some())
    }

    pub fn set_watching(&self, protocol: impl Into<String>, watching: bool) -> Result<(), HubError> {
        let protocol = protocol.into();
        self.call(move |hub| hub.set_watching(&protocol, watching))?
    }

    /// Subscribe to the realtime push channel.
    pub fn realtime(&self) -> broadcast::Receiver<RealtimeMessage> {
        self.realtime.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the owner thread and wait for it to exit.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);

        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Hub thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for HubHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubHandle")
            .field("running", &self.is_running())
            .finish()
    }
}
