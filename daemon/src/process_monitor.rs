use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::{ExecutionMode, DEFAULT_TRIGGER_INTERVAL_SECS};
use crate::context::Collaborators;
use crate::poll::PollLoop;
use crate::report::{LogEvent, Notifier};
use crate::sequencer::{LaunchSequencer, LaunchSummary};

/// Detection state tracked across checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessState {
    /// Watched names seen running and not yet seen gone.
    pub detected: BTreeSet<String>,
    /// Set once the trigger programs were launched for the current detection
    /// episode; cleared when a check finds none of the watched processes.
    pub programs_started: bool,
}

/// Polls the OS process list for the configured trigger processes and
/// launches the trigger-mode programs once per detection episode.
///
/// Watched names are checked in configured order and the first running one
/// wins; only one needs to be present.  An episode ends when a full check
/// finds none of them running.
pub struct ProcessMonitor {
    shared: Arc<Shared>,
    poll: Mutex<Option<PollLoop>>,
}

struct Shared {
    collaborators: Collaborators,
    notifier: Arc<Notifier>,
    sequencer: LaunchSequencer,
    state: Mutex<ProcessState>,
    check_lock: tokio::sync::Mutex<()>,
}

impl ProcessMonitor {
    pub fn new(collaborators: Collaborators) -> Self {
        let notifier = Arc::new(Notifier::new());
        let sequencer = LaunchSequencer::new(&collaborators, Arc::clone(&notifier));
        Self {
            shared: Arc::new(Shared {
                collaborators,
                notifier,
                sequencer,
                state: Mutex::new(ProcessState::default()),
                check_lock: tokio::sync::Mutex::new(()),
            }),
            poll: Mutex::new(None),
        }
    }

    pub fn on_log_message(&self, handler: impl Fn(&LogEvent) + Send + Sync + 'static) {
        self.shared.notifier.on_log_message(handler);
    }

    /// Fires after the trigger programs were launched for a new detection.
    pub fn on_all_programs_started(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.shared.notifier.on_all_programs_started(handler);
    }

    /// Starts polling, replacing any running poll loop.  The first check runs
    /// immediately.  Must be called from within a tokio runtime.
    pub fn start(&self) {
        let secs = match self.shared.collaborators.settings.load() {
            Ok(config) => config.trigger.effective_check_interval_secs(),
            Err(e) => {
                self.shared.notifier.error(format!(
                    "Failed to read trigger settings, polling every {DEFAULT_TRIGGER_INTERVAL_SECS}s: {e:#}"
                ));
                DEFAULT_TRIGGER_INTERVAL_SECS
            }
        };

        self.shared.notifier.info("Process monitoring started.");
        let shared = Arc::clone(&self.shared);
        let next = PollLoop::spawn(
            "Process",
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
            self.shared.notifier.warn("Process monitoring stopped.");
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
            self.shared.notifier.warn("Process monitoring stopped.");
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
    pub fn state(&self) -> ProcessState {
        self.shared.lock_state().clone()
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
                        self.shared.notifier.info("Process check cancelled.");
                    }
                    _ = self.shared.check() => {}
                }
            }
            None => self.shared.check().await,
        }
    }

    /// Launches the trigger-mode programs on demand, without touching the
    /// detection state.
    #[cfg_attr(not(test), allow(dead_code))]
    pub async fn launch_enabled_programs_now(&self) -> LaunchSummary {
        self.shared
            .sequencer
            .launch_enabled(ExecutionMode::Trigger)
            .await
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn check(&self) {
        let _serial = self.check_lock.lock().await;

        let config = match self.collaborators.settings.load() {
            Ok(config) => config.trigger,
            Err(e) => {
                self.notifier
                    .error(format!("Failed to read trigger settings: {e:#}"));
                return;
            }
        };

        if config.target_processes.is_empty() {
            self.notifier
                .warn("No trigger processes configured. Add one in the settings.");
            return;
        }

        self.notifier.info(format!(
            "Checking processes ({} watched)...",
            config.target_processes.len()
        ));

        let detected = self.scan(&config.target_processes);

        let programs_started = self.lock_state().programs_started;
        match detected {
            Some(name) if !programs_started => {
                self.notifier
                    .success(format!("Trigger process detected: {name}"));
                if config.auto_start_programs {
                    self.sequencer.launch_enabled(ExecutionMode::Trigger).await;
                    self.lock_state().programs_started = true;
                    self.notifier.all_programs_started();
                }
            }
            None if programs_started => {
                {
                    let mut state = self.lock_state();
                    state.programs_started = false;
                    state.detected.clear();
                }
                self.notifier.warn("All trigger processes have ended.");
            }
            _ => {}
        }
    }

    /// One pass over the watched names.  Returns the first running one and
    /// keeps the detected set in step with what was looked at.
    fn scan(&self, targets: &[String]) -> Option<String> {
        for name in targets {
            let pids = self.collaborators.processes.pids_by_name(name);

            if !pids.is_empty() {
                let first_seen = self.lock_state().detected.insert(name.clone());
                if first_seen {
                    let pids: Vec<String> = pids.iter().map(u32::to_string).collect();
                    self.notifier.success(format!(
                        "  ✓ Process detected: {name} (PID: {})",
                        pids.join(", ")
                    ));
                }
                return Some(name.clone());
            }

            let vanished = self.lock_state().detected.remove(name);
            if vanished {
                self.notifier.warn(format!("  ✗ Process ended: {name}"));
            }
        }
        None
    }
}
