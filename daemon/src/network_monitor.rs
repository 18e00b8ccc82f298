use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::{ExecutionMode, NetworkConfig, DEFAULT_NETWORK_INTERVAL_SECS};
use crate::context::Collaborators;
use crate::poll::PollLoop;
use crate::probe::ProbeKind;
use crate::report::{LogEvent, Notifier};
use crate::sequencer::{LaunchSequencer, LaunchSummary};

/// Connection state tracked across checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkState {
    pub connected: bool,
    /// Set once the network programs were launched for the current connection;
    /// cleared when the connection drops.
    pub programs_started: bool,
}

/// Polls the configured addresses and launches the network-mode programs once
/// per connection.
///
/// Each check walks the address buckets in the fixed order ping, HTTP, TCP and
/// stops at the first address that answers.  Only the disconnected ->
/// connected edge launches programs; a drop re-arms the launch.
pub struct NetworkMonitor {
    shared: Arc<Shared>,
    poll: Mutex<Option<PollLoop>>,
}

struct Shared {
    collaborators: Collaborators,
    notifier: Arc<Notifier>,
    sequencer: LaunchSequencer,
    state: Mutex<NetworkState>,
    /// Serialises checks from the timer and from [`NetworkMonitor::check_now`].
    check_lock: tokio::sync::Mutex<()>,
}

impl NetworkMonitor {
    pub fn new(collaborators: Collaborators) -> Self {
        let notifier = Arc::new(Notifier::new());
        let sequencer = LaunchSequencer::new(&collaborators, Arc::clone(&notifier));
        Self {
            shared: Arc::new(Shared {
                collaborators,
                notifier,
                sequencer,
                state: Mutex::new(NetworkState::default()),
                check_lock: tokio::sync::Mutex::new(()),
            }),
            poll: Mutex::new(None),
        }
    }

    pub fn on_log_message(&self, handler: impl Fn(&LogEvent) + Send + Sync + 'static) {
        self.shared.notifier.on_log_message(handler);
    }

    /// Fires after the network programs were launched for a new connection.
    pub fn on_all_programs_started(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.shared.notifier.on_all_programs_started(handler);
    }

    /// Starts polling, replacing any running poll loop.  The first check runs
    /// immediately.  Must be called from within a tokio runtime.
    pub fn start(&self) {
        let secs = match self.shared.collaborators.settings.load() {
            Ok(config) => config.network.effective_check_interval_secs(),
            Err(e) => {
                self.shared.notifier.error(format!(
                    "Failed to read network settings, polling every {DEFAULT_NETWORK_INTERVAL_SECS}s: {e:#}"
                ));
                DEFAULT_NETWORK_INTERVAL_SECS
            }
        };

        self.shared.notifier.info("Network monitoring started.");
        let shared = Arc::clone(&self.shared);
        let next = PollLoop::spawn(
            "Network",
            Duration::from_secs(secs),
            Arc::clone(&self.shared.notifier),
            move || {
                let shared = Arc::clone(&shared);
                async move { shared.check().await }
            },
        );
        let previous = self
            .poll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(next);
        if let Some(previous) = previous {
            previous.cancel();
        }
    }

    /// Stops polling and cancels any in-flight check.  Does nothing when the
    /// monitor is not running.
    pub fn stop(&self) {
        let previous = self
            .poll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.cancel();
            self.shared.notifier.warn("Network monitoring stopped.");
        }
    }

    /// Like [`stop`](Self::stop), but also waits for the poll task to exit.
    pub async fn shutdown(&self) {
        let previous = self
            .poll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.shutdown().await;
            self.shared.notifier.warn("Network monitoring stopped.");
        }
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn is_running(&self) -> bool {
        self.poll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn state(&self) -> NetworkState {
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one check outside the timer.  While the monitor is running,
    /// [`stop`](Self::stop) abandons the check as it would a timer check.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn check_now(&self) {
        let token = self
            .poll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(PollLoop::token);
        match token {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        self.shared.notifier.info("Network check cancelled.");
                    }
                    _ = self.shared.check() => {}
                }
            }
            None => self.shared.check().await,
        }
    }

    /// Launches the network-mode programs on demand, without touching the
    /// connection state.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn launch_enabled_programs_now(&self) -> LaunchSummary {
        self.shared
            .sequencer
            .launch_enabled(ExecutionMode::Network)
            .await
    }
}

impl Shared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn check(&self) {
        let _serial = self.check_lock.lock().await;

        let config = match self.collaborators.settings.load() {
            Ok(config) => config.network,
            Err(e) => {
                self.notifier
                    .error(format!("Failed to read network settings: {e:#}"));
                return;
            }
        };

        if !config.has_addresses() {
            self.notifier
                .warn("No addresses configured for the network check.");
            return;
        }

        self.notifier.info("Checking network connection...");
        let reachable = self.probe_buckets(&config).await;
        let retry_delay = Duration::from_secs(config.retry_delay_secs);

        match reachable {
            Some((kind, address)) => {
                let state = *self.lock_state();
                if state.connected {
                    return;
                }
                self.notifier.success(format!(
                    "Network connected: {address} ({})",
                    kind.label()
                ));

                if config.auto_start_programs && !state.programs_started {
                    self.sequencer.launch_enabled(ExecutionMode::Network).await;
                    // Committed only once the whole sequence ran; a check
                    // cancelled mid-launch leaves the monitor disconnected.
                    *self.lock_state() = NetworkState {
                        connected: true,
                        programs_started: true,
                    };
                    self.notifier.all_programs_started();
                } else {
                    self.lock_state().connected = true;
                }
            }
            None => {
                let was_connected = {
                    let mut state = self.lock_state();
                    let was_connected = state.connected;
                    if was_connected {
                        state.connected = false;
                        state.programs_started = false;
                    }
                    was_connected
                };

                if was_connected {
                    self.notifier.error("Network connection lost.");
                    self.notifier.warn(format!(
                        "Retrying in {} seconds...",
                        config.retry_delay_secs
                    ));
                } else {
                    self.notifier.warn(format!(
                        "All addresses unreachable. Retrying in {} seconds...",
                        config.retry_delay_secs
                    ));
                }
                if !retry_delay.is_zero() {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    /// Returns the first address that answers, trying buckets in priority
    /// order and addresses in configured order.
    async fn probe_buckets(&self, config: &NetworkConfig) -> Option<(ProbeKind, String)> {
        let timeout = Duration::from_millis(config.effective_timeout_ms());
        let port = config.effective_port();

        for kind in ProbeKind::PRIORITY {
            for address in bucket(config, kind) {
                self.notifier
                    .info(format!("  -> {address} ({}) checking...", kind.label()));
                if self
                    .collaborators
                    .probe
                    .probe(kind, address, timeout, port)
                    .await
                {
                    self.notifier.success(format!("  ✓ {address} reachable"));
                    return Some((kind, address.clone()));
                }
                self.notifier.warn(format!("  ✗ {address} unreachable"));
            }
        }
        None
    }
}

fn bucket(config: &NetworkConfig, kind: ProbeKind) -> &[String] {
    match kind {
        ProbeKind::Ping => &config.ping_addresses,
        ProbeKind::Http => &config.http_addresses,
        ProbeKind::Tcp => &config.tcp_addresses,
    }
}
