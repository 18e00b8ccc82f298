//! In-memory collaborators for unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{Config, ExecutionMode, ProgramEntry, SettingsStore};
use crate::context::Collaborators;
use crate::launcher::Launcher;
use crate::probe::{ProbeKind, ReachabilityProbe};
use crate::process_table::{names_match, ProcessTable};
use crate::report::{LogEvent, LogLevel, Notifier};

// ── settings ─────────────────────────────────────────────────────────────────

pub struct MemorySettings {
    current: Mutex<std::result::Result<Config, String>>,
    loads: AtomicUsize,
}

impl MemorySettings {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(Ok(config)),
            loads: AtomicUsize::new(0),
        })
    }

    pub fn update(&self, f: impl FnOnce(&mut Config)) {
        let mut current = self.current.lock().unwrap();
        if let Ok(config) = current.as_mut() {
            f(config);
        }
    }

    pub fn fail(&self, reason: &str) {
        *self.current.lock().unwrap() = Err(reason.to_string());
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl SettingsStore for MemorySettings {
    fn load(&self) -> Result<Config> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.current.lock().unwrap().clone().map_err(|e| anyhow!(e))
    }
}

// ── probe ────────────────────────────────────────────────────────────────────

/// Answers from a table keyed by address; unknown addresses fail.
#[derive(Default)]
pub struct FakeProbe {
    answers: Mutex<HashMap<String, bool>>,
    calls: Mutex<Vec<(ProbeKind, String)>>,
    delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(&self, address: &str, reachable: bool) {
        self.answers
            .lock()
            .unwrap()
            .insert(address.to_string(), reachable);
    }

    /// Every probe sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> Vec<(ProbeKind, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilityProbe for FakeProbe {
    async fn probe(&self, kind: ProbeKind, address: &str, _timeout: Duration, _port: u16) -> bool {
        self.calls.lock().unwrap().push((kind, address.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(false)
    }
}

// ── process table ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeProcessTable {
    running: Mutex<HashMap<String, Vec<u32>>>,
    queries: Mutex<Vec<String>>,
}

impl FakeProcessTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spawn(&self, name: &str, pid: u32) {
        self.running
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(pid);
    }

    pub fn kill(&self, name: &str) {
        self.running.lock().unwrap().remove(name);
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

impl ProcessTable for FakeProcessTable {
    fn pids_by_name(&self, name: &str) -> Vec<u32> {
        self.queries.lock().unwrap().push(name.to_string());
        let running = self.running.lock().unwrap();
        let mut pids: Vec<u32> = running
            .iter()
            .filter(|(running_name, _)| names_match(running_name, name))
            .flat_map(|(_, pids)| pids.iter().copied())
            .collect();
        pids.sort_unstable();
        pids
    }
}

// ── launcher ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launched {
    Process { path: PathBuf, working_dir: PathBuf },
    Folder(PathBuf),
}

#[derive(Default)]
pub struct RecordingLauncher {
    launched: Mutex<Vec<Launched>>,
    failing: Mutex<HashSet<PathBuf>>,
    next_pid: AtomicUsize,
}

impl RecordingLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_pid: AtomicUsize::new(1000),
            ..Self::default()
        })
    }

    pub fn fail_on(&self, path: &Path) {
        self.failing.lock().unwrap().insert(path.to_path_buf());
    }

    pub fn launched(&self) -> Vec<Launched> {
        self.launched.lock().unwrap().clone()
    }

    pub fn launched_paths(&self) -> Vec<PathBuf> {
        self.launched()
            .into_iter()
            .map(|l| match l {
                Launched::Process { path, .. } => path,
                Launched::Folder(path) => path,
            })
            .collect()
    }
}

impl Launcher for RecordingLauncher {
    fn start_process(&self, path: &Path, working_dir: &Path) -> Result<u32> {
        if self.failing.lock().unwrap().contains(path) {
            return Err(anyhow!("access denied"));
        }
        self.launched.lock().unwrap().push(Launched::Process {
            path: path.to_path_buf(),
            working_dir: working_dir.to_path_buf(),
        });
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst) as u32)
    }

    fn open_in_file_browser(&self, path: &Path) -> Result<()> {
        if self.failing.lock().unwrap().contains(path) {
            return Err(anyhow!("no file browser"));
        }
        self.launched
            .lock()
            .unwrap()
            .push(Launched::Folder(path.to_path_buf()));
        Ok(())
    }
}

// ── wiring ───────────────────────────────────────────────────────────────────

pub struct Fixture {
    pub settings: Arc<MemorySettings>,
    pub probe: Arc<FakeProbe>,
    pub processes: Arc<FakeProcessTable>,
    pub launcher: Arc<RecordingLauncher>,
}

impl Fixture {
    pub fn new(config: Config) -> Self {
        Self {
            settings: MemorySettings::new(config),
            probe: FakeProbe::new(),
            processes: FakeProcessTable::new(),
            launcher: RecordingLauncher::new(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            settings: self.settings.clone(),
            probe: self.probe.clone(),
            processes: self.processes.clone(),
            launcher: self.launcher.clone(),
        }
    }
}

/// Records every log line emitted through `notifier`.
pub fn collect_logs(notifier: &Notifier) -> Arc<Mutex<Vec<LogEvent>>> {
    let logs = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&logs);
    notifier.on_log_message(move |e| sink.lock().unwrap().push(e.clone()));
    logs
}

pub fn has_log(logs: &Mutex<Vec<LogEvent>>, level: LogLevel, needle: &str) -> bool {
    logs.lock()
        .unwrap()
        .iter()
        .any(|e| e.level == level && e.message.contains(needle))
}

pub fn count_logs(logs: &Mutex<Vec<LogEvent>>, needle: &str) -> usize {
    logs.lock()
        .unwrap()
        .iter()
        .filter(|e| e.message.contains(needle))
        .count()
}

/// Counts "all programs started" signals from `notifier`.
pub fn count_started(notifier: &Notifier) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    notifier.on_all_programs_started(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}

/// Creates an empty file standing in for an executable.
pub fn make_exe(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, b"").unwrap();
    path
}

pub fn program(name: &str, path: &Path, mode: ExecutionMode, order: i32) -> ProgramEntry {
    ProgramEntry {
        id: 0,
        enabled: true,
        name: name.to_string(),
        path: path.to_path_buf(),
        process_name: None,
        execution_mode: mode,
        execution_order: order,
        is_folder: false,
    }
}

/// Lets spawned tasks run until they park on a timer or I/O.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
