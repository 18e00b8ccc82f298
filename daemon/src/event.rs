use crate::orchestrator::Stage;

pub enum DaemonEvent {
    /// The config file changed on disk. Carries the re-parse error, if any.
    SettingsReloaded(Result<(), String>),
    /// The orchestrator moved to another stage of the mode chain.
    StageChanged(Stage),
    /// The network -> process chain ran to completion.
    MonitoringCompleted,
    /// Ctrl+C received; the daemon should stop monitoring and exit.
    Shutdown,
}
