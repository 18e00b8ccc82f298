/// Mode chaining: network monitoring first, then trigger-process monitoring.
///
/// The chain is an explicit state machine.  Each monitor's "all programs
/// started" signal is turned into a [`Transition`] on a channel owned by the
/// current run, and a driver task applies transitions one at a time:
///
/// ```text
/// Idle --start_all--> Network --NetworkDone--> Process --ProcessDone--> Idle
///   ^                    |                        |
///   +------stop_all------+------------------------+
/// ```
///
/// Every `start_all` begins a new run with its own channel and cancellation
/// token, so a signal from a monitor belonging to an earlier run can never
/// advance the current one.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ExecutionMode;
use crate::context::Collaborators;
use crate::network_monitor::NetworkMonitor;
use crate::process_monitor::ProcessMonitor;
use crate::report::{LogEvent, LogLevel, Notifier};
use crate::sequencer::{LaunchSequencer, LaunchSummary};

/// Which monitor, if any, is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Network,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    NetworkDone,
    ProcessDone,
}

enum Active {
    Idle,
    Network(Arc<NetworkMonitor>),
    Process(Arc<ProcessMonitor>),
}

impl Active {
    fn stage(&self) -> Stage {
        match self {
            Active::Idle => Stage::Idle,
            Active::Network(_) => Stage::Network,
            Active::Process(_) => Stage::Process,
        }
    }

    fn stop(&self) {
        match self {
            Active::Idle => {}
            Active::Network(monitor) => monitor.stop(),
            Active::Process(monitor) => monitor.stop(),
        }
    }

    async fn shutdown(&self) {
        match self {
            Active::Idle => {}
            Active::Network(monitor) => monitor.shutdown().await,
            Active::Process(monitor) => monitor.shutdown().await,
        }
    }
}

struct Run {
    active: Active,
    /// Cancelled when the run ends; owned by the run's driver task.
    token: Option<CancellationToken>,
}

type StageHandler = Arc<dyn Fn(Stage) + Send + Sync>;

/// Owns the monitors and chains them.  Construct once and share it with
/// whatever needs to start or stop monitoring.
pub struct Orchestrator {
    shared: Arc<Shared>,
}

struct Shared {
    collaborators: Collaborators,
    notifier: Arc<Notifier>,
    sequencer: LaunchSequencer,
    stage_handlers: Mutex<Vec<StageHandler>>,
    run: Mutex<Run>,
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators) -> Self {
        let notifier = Arc::new(Notifier::new());
        let sequencer = LaunchSequencer::new(&collaborators, Arc::clone(&notifier));
        Self {
            shared: Arc::new(Shared {
                collaborators,
                notifier,
                sequencer,
                stage_handlers: Mutex::new(Vec::new()),
                run: Mutex::new(Run {
                    active: Active::Idle,
                    token: None,
                }),
            }),
        }
    }

    /// Receives the log lines of both monitors as well as the orchestrator's
    /// own.
    pub fn on_log_message(&self, handler: impl Fn(&LogEvent) + Send + Sync + 'static) {
        self.shared.notifier.on_log_message(handler);
    }

    /// Fires once the whole chain has finished, after both monitors stopped.
    pub fn on_completed(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.shared.notifier.on_all_programs_started(handler);
    }

    pub fn on_stage_changed(&self, handler: impl Fn(Stage) + Send + Sync + 'static) {
        self.shared
            .stage_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    /// Writes a line to the same sink the monitors log to.
    pub fn report(&self, level: LogLevel, message: impl Into<String>) {
        self.shared.notifier.log(level, message);
    }

    pub fn stage(&self) -> Stage {
        self.shared.lock_run().active.stage()
    }

    /// Stops whatever is running and starts a fresh chain at the network
    /// stage.  Must be called from within a tokio runtime.
    pub fn start_all(&self) {
        self.stop_all();

        let token = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let network = Arc::new(NetworkMonitor::new(self.shared.collaborators.clone()));
        {
            let notifier = Arc::clone(&self.shared.notifier);
            network.on_log_message(move |e| notifier.emit(e));
            let tx = tx.clone();
            network.on_all_programs_started(move || {
                let _ = tx.send(Transition::NetworkDone);
            });
        }

        {
            let mut run = self.shared.lock_run();
            run.active = Active::Network(Arc::clone(&network));
            run.token = Some(token.clone());
        }
        tokio::spawn(Arc::clone(&self.shared).drive(token, tx, rx));

        self.shared.stage_changed(Stage::Network);
        network.start();
    }

    /// Stops and drops both monitors.  Calling it while idle does nothing.
    pub fn stop_all(&self) {
        let Some(previous) = self.shared.end_run() else {
            return;
        };
        previous.stop();
        self.shared.stage_changed(Stage::Idle);
    }

    /// Like [`stop_all`](Self::stop_all), but waits for the running monitor's
    /// poll task to exit.
    pub async fn shutdown(&self) {
        let Some(previous) = self.shared.end_run() else {
            return;
        };
        previous.shutdown().await;
        self.shared.stage_changed(Stage::Idle);
    }

    /// Runs the launch sequence for `mode` on demand, whatever stage the chain
    /// is in.
    pub async fn launch_enabled_programs_now(&self, mode: ExecutionMode) -> LaunchSummary {
        self.shared.sequencer.launch_enabled(mode).await
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(previous) = self.shared.end_run() {
            previous.stop();
        }
    }
}

impl Shared {
    fn lock_run(&self) -> MutexGuard<'_, Run> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stage_changed(&self, stage: Stage) {
        let handlers = self
            .stage_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(stage);
        }
    }

    /// Detaches the running monitor and cancels the run.  `None` when idle.
    fn end_run(&self) -> Option<Active> {
        let mut run = self.lock_run();
        if let Some(token) = run.token.take() {
            token.cancel();
        }
        match std::mem::replace(&mut run.active, Active::Idle) {
            Active::Idle => None,
            previous => Some(previous),
        }
    }

    async fn drive(
        self: Arc<Self>,
        token: CancellationToken,
        tx: mpsc::UnboundedSender<Transition>,
        mut rx: mpsc::UnboundedReceiver<Transition>,
    ) {
        loop {
            let transition = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                transition = rx.recv() => match transition {
                    Some(transition) => transition,
                    None => break,
                },
            };
            tracing::debug!(?transition, "mode chain transition");

            match transition {
                Transition::NetworkDone => self.enter_process_stage(&token, &tx),
                Transition::ProcessDone => {
                    self.complete(&token);
                    break;
                }
            }
        }
    }

    fn enter_process_stage(&self, token: &CancellationToken, tx: &mpsc::UnboundedSender<Transition>) {
        let process = Arc::new(ProcessMonitor::new(self.collaborators.clone()));
        {
            let notifier = Arc::clone(&self.notifier);
            process.on_log_message(move |e| notifier.emit(e));
            let tx = tx.clone();
            process.on_all_programs_started(move || {
                let _ = tx.send(Transition::ProcessDone);
            });
        }

        let previous = {
            let mut run = self.lock_run();
            // stop_all cancels under this lock, so a cancelled run never
            // installs a new monitor.
            if token.is_cancelled() || !matches!(run.active, Active::Network(_)) {
                return;
            }
            std::mem::replace(&mut run.active, Active::Process(Arc::clone(&process)))
        };
        previous.stop();

        self.notifier
            .info("Network stage complete. Switching to process monitoring.");
        self.stage_changed(Stage::Process);
        process.start();
    }

    fn complete(&self, token: &CancellationToken) {
        let previous = {
            let mut run = self.lock_run();
            if token.is_cancelled() || !matches!(run.active, Active::Process(_)) {
                return;
            }
            run.token = None;
            std::mem::replace(&mut run.active, Active::Idle)
        };
        previous.stop();
        self.stage_changed(Stage::Idle);

        self.notifier.success("All programs launched.");
        self.notifier.info("Monitoring stopped automatically.");
        self.notifier.all_programs_started();
    }
}
