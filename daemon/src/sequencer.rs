/// Ordered, best-effort launching of the configured programs.
///
/// Entries for one execution mode are started one after another with a fixed
/// spacing between them, so the launched programs do not all start up at
/// once.  An entry is skipped when its monitored process is already running or
/// its path is missing.  A failing entry never stops the rest of the list.
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ExecutionMode, ProgramEntry, SettingsStore};
use crate::context::Collaborators;
use crate::launcher::Launcher;
use crate::process_table::ProcessTable;
use crate::report::Notifier;

/// Pause between two consecutive launches.
pub const LAUNCH_SPACING: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// An executable was spawned.
    Started { pid: u32 },
    /// A folder was handed to the file browser.
    OpenedFolder,
    /// The monitored process was already running; nothing was launched.
    AlreadyRunning,
    /// The configured file or folder does not exist.
    MissingPath,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct LaunchReport {
    pub name: String,
    pub outcome: LaunchOutcome,
}

/// Per-entry outcomes of one sequencer run, in launch order.
#[derive(Debug, Clone, Default)]
pub struct LaunchSummary {
    pub reports: Vec<LaunchReport>,
}

impl LaunchSummary {
    pub fn launched(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    LaunchOutcome::Started { .. } | LaunchOutcome::OpenedFolder
                )
            })
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| {
                matches!(
                    r.outcome,
                    LaunchOutcome::AlreadyRunning | LaunchOutcome::MissingPath
                )
            })
            .count()
    }

    pub fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, LaunchOutcome::Failed(_)))
            .count()
    }
}

#[derive(Clone)]
pub struct LaunchSequencer {
    settings: Arc<dyn SettingsStore>,
    processes: Arc<dyn ProcessTable>,
    launcher: Arc<dyn Launcher>,
    notifier: Arc<Notifier>,
}

impl LaunchSequencer {
    pub fn new(collaborators: &Collaborators, notifier: Arc<Notifier>) -> Self {
        Self {
            settings: Arc::clone(&collaborators.settings),
            processes: Arc::clone(&collaborators.processes),
            launcher: Arc::clone(&collaborators.launcher),
            notifier,
        }
    }

    /// Launches every enabled entry of `mode`, lowest execution order first.
    pub async fn launch_enabled(&self, mode: ExecutionMode) -> LaunchSummary {
        let mut summary = LaunchSummary::default();

        let programs = match self.settings.load() {
            Ok(config) => config.programs_for(mode),
            Err(e) => {
                self.notifier
                    .error(format!("Could not read the program list: {e:#}"));
                return summary;
            }
        };

        if programs.is_empty() {
            self.notifier
                .warn(format!("No enabled {} programs to launch.", mode.label()));
            return summary;
        }

        self.notifier.info(format!(
            "Launching {} {} program(s)...",
            programs.len(),
            mode.label()
        ));

        for (i, program) in programs.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(LAUNCH_SPACING).await;
            }
            let outcome = self.launch_one(program);
            summary.reports.push(LaunchReport {
                name: program.name.clone(),
                outcome,
            });
        }

        self.notifier.success(format!(
            "Finished launching {} programs: {} launched, {} skipped, {} failed.",
            mode.label(),
            summary.launched(),
            summary.skipped(),
            summary.failed()
        ));
        summary
    }

    /// Launches a single entry with the duplicate and missing-path guards.
    pub fn launch_one(&self, program: &ProgramEntry) -> LaunchOutcome {
        let name = &program.name;

        if let Some(process) = program.monitored_process() {
            if self.processes.is_running(process) {
                self.notifier
                    .warn(format!("[{name}] Already running (process: {process})."));
                return LaunchOutcome::AlreadyRunning;
            }
        }

        let path = program.path.as_path();
        let exists = if program.is_folder {
            path.is_dir()
        } else {
            path.is_file()
        };
        if !exists {
            let what = if program.is_folder { "Folder" } else { "File" };
            self.notifier
                .error(format!("[{name}] {what} not found: {}", path.display()));
            return LaunchOutcome::MissingPath;
        }

        let result = if program.is_folder {
            self.launcher
                .open_in_file_browser(path)
                .map(|()| LaunchOutcome::OpenedFolder)
        } else {
            let working_dir = working_dir_of(path);
            self.launcher
                .start_process(path, working_dir)
                .map(|pid| LaunchOutcome::Started { pid })
        };

        match result {
            Ok(outcome) => {
                tracing::info!(program = %name, id = program.id, path = %path.display(), ?outcome, "launched");
                self.notifier
                    .success(format!("[{name}] Launched: {}", path.display()));
                outcome
            }
            Err(e) => {
                self.notifier
                    .error(format!("[{name}] Launch failed: {e:#}"));
                LaunchOutcome::Failed(format!("{e:#}"))
            }
        }
    }
}

/// The containing folder of `path`; `.` for bare file names.
fn working_dir_of(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
