use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::event::DaemonEvent;

pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_TIMEOUT_MS: u64 = 3_000;
pub const MAX_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_NETWORK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 10;
pub const DEFAULT_TRIGGER_INTERVAL_SECS: u64 = 5;
/// Timers cannot tick faster than this.
pub const MIN_INTERVAL_SECS: u64 = 1;

/// Root configuration structure. Deserialized from %APPDATA%\LaunchWatch\config.toml.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub programs: Vec<ProgramEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Start the network -> process chain as soon as the daemon is up.
    #[serde(default = "default_true")]
    pub auto_start_monitoring: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            auto_start_monitoring: true,
        }
    }
}

/// Reachability policy. The three address buckets are always tried in the
/// order ping, HTTP, TCP.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default, deserialize_with = "deserialize_list")]
    pub ping_addresses: Vec<String>,
    /// Full URLs including scheme.
    #[serde(default, deserialize_with = "deserialize_list")]
    pub http_addresses: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_list")]
    pub tcp_addresses: Vec<String>,
    /// Port used for every TCP address.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_network_interval")]
    pub check_interval_secs: u64,
    /// Extra wait after a tick in which every address failed.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_true")]
    pub auto_start_programs: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ping_addresses: Vec::new(),
            http_addresses: Vec::new(),
            tcp_addresses: Vec::new(),
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            check_interval_secs: DEFAULT_NETWORK_INTERVAL_SECS,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            auto_start_programs: true,
        }
    }
}

impl NetworkConfig {
    pub fn has_addresses(&self) -> bool {
        !(self.ping_addresses.is_empty()
            && self.http_addresses.is_empty()
            && self.tcp_addresses.is_empty())
    }

    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms.clamp(1, MAX_TIMEOUT_MS)
    }

    pub fn effective_check_interval_secs(&self) -> u64 {
        self.check_interval_secs.max(MIN_INTERVAL_SECS)
    }

    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_PORT
        } else {
            self.port
        }
    }
}

/// Process-watch policy.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    /// Process names, with or without the `.exe` extension.
    #[serde(default, deserialize_with = "deserialize_list")]
    pub target_processes: Vec<String>,
    #[serde(default = "default_trigger_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_true")]
    pub auto_start_programs: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            target_processes: Vec::new(),
            check_interval_secs: DEFAULT_TRIGGER_INTERVAL_SECS,
            auto_start_programs: true,
        }
    }
}

impl TriggerConfig {
    pub fn effective_check_interval_secs(&self) -> u64 {
        self.check_interval_secs.max(MIN_INTERVAL_SECS)
    }
}

/// Which monitor's success launches a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Launched once the network becomes reachable.
    Network,
    /// Launched once a watched process appears.
    Trigger,
    /// Only ever launched on demand.
    LauncherOnly,
}

impl ExecutionMode {
    pub fn label(self) -> &'static str {
        match self {
            ExecutionMode::Network => "network",
            ExecutionMode::Trigger => "trigger",
            ExecutionMode::LauncherOnly => "launcher-only",
        }
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "network" => Ok(ExecutionMode::Network),
            "trigger" => Ok(ExecutionMode::Trigger),
            "launcher-only" | "launcher_only" | "launcheronly" => Ok(ExecutionMode::LauncherOnly),
            other => anyhow::bail!("unknown execution mode: {other}"),
        }
    }
}

/// A launchable program or folder.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgramEntry {
    #[serde(default)]
    pub id: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub name: String,
    pub path: PathBuf,
    /// Process name (extension optional) used to detect an already-running copy.
    #[serde(default)]
    pub process_name: Option<String>,
    #[serde(default = "default_mode")]
    pub execution_mode: ExecutionMode,
    /// Ascending; ties keep their configured order.
    #[serde(default)]
    pub execution_order: i32,
    #[serde(default)]
    pub is_folder: bool,
}

impl ProgramEntry {
    /// The duplicate-detection name, if one is configured and non-blank.
    pub fn monitored_process(&self) -> Option<&str> {
        self.process_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

impl Config {
    /// Enabled programs for `mode`, sorted by execution order. The sort is
    /// stable so equal orders keep their position in the file.
    pub fn programs_for(&self, mode: ExecutionMode) -> Vec<ProgramEntry> {
        let mut programs: Vec<ProgramEntry> = self
            .programs
            .iter()
            .filter(|p| p.enabled && p.execution_mode == mode)
            .cloned()
            .collect();
        programs.sort_by_key(|p| p.execution_order);
        programs
    }
}

/// Source of fresh settings. Monitors call [`SettingsStore::load`] on every tick.
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Config>;
}

/// Settings backed by a TOML file that is re-read on every load.
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    fn load(&self) -> Result<Config> {
        load_or_default(&self.path)
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Splits a `;`/newline separated list, trimming entries and dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split([';', '\n', '\r'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Accepts either a TOML array of strings or one delimited string.
fn deserialize_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawList {
        Joined(String),
        Items(Vec<String>),
    }

    Ok(match RawList::deserialize(deserializer)? {
        RawList::Joined(raw) => split_list(&raw),
        RawList::Items(items) => items
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    })
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, re-parses it and sends a `SettingsReloaded` event
/// carrying the parse outcome. Monitors read settings fresh on every tick, so
/// this only surfaces edits (and broken edits) to the user early.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("failed to create config watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            tracing::error!("config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!("failed to watch config directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            let outcome = load_or_default(&path).map(|_| ()).map_err(|e| format!("{e:#}"));
            if tx.send(DaemonEvent::SettingsReloaded(outcome)).await.is_err() {
                break;
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_network_interval() -> u64 {
    DEFAULT_NETWORK_INTERVAL_SECS
}

fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

fn default_trigger_interval() -> u64 {
    DEFAULT_TRIGGER_INTERVAL_SECS
}

fn default_mode() -> ExecutionMode {
    ExecutionMode::Network
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_program(name: &str, mode: ExecutionMode, order: i32, enabled: bool) -> ProgramEntry {
        ProgramEntry {
            id: 0,
            enabled,
            name: name.to_string(),
            path: PathBuf::from(format!("C:\\Tools\\{name}.exe")),
            process_name: None,
            execution_mode: mode,
            execution_order: order,
            is_folder: false,
        }
    }

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn network_config_default_values() {
        let n = NetworkConfig::default();
        assert_eq!(n.port, DEFAULT_PORT);
        assert_eq!(n.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(n.check_interval_secs, DEFAULT_NETWORK_INTERVAL_SECS);
        assert_eq!(n.retry_delay_secs, DEFAULT_RETRY_DELAY_SECS);
        assert!(n.auto_start_programs);
        assert!(!n.has_addresses());
    }

    #[test]
    fn config_default_has_no_programs_and_auto_starts() {
        let c = Config::default();
        assert!(c.programs.is_empty());
        assert!(c.general.auto_start_monitoring);
        assert_eq!(c.trigger.check_interval_secs, DEFAULT_TRIGGER_INTERVAL_SECS);
    }

    // ── effective values ──────────────────────────────────────────────────────

    #[test]
    fn zero_intervals_are_raised_to_minimum() {
        let network = NetworkConfig {
            check_interval_secs: 0,
            ..NetworkConfig::default()
        };
        let trigger = TriggerConfig {
            check_interval_secs: 0,
            ..TriggerConfig::default()
        };
        assert_eq!(network.effective_check_interval_secs(), MIN_INTERVAL_SECS);
        assert_eq!(trigger.effective_check_interval_secs(), MIN_INTERVAL_SECS);
    }

    #[test]
    fn timeout_is_clamped() {
        let zero = NetworkConfig {
            timeout_ms: 0,
            ..NetworkConfig::default()
        };
        let huge = NetworkConfig {
            timeout_ms: 10_000_000,
            ..NetworkConfig::default()
        };
        assert_eq!(zero.effective_timeout_ms(), 1);
        assert_eq!(huge.effective_timeout_ms(), MAX_TIMEOUT_MS);
    }

    #[test]
    fn zero_port_falls_back_to_default() {
        let n = NetworkConfig {
            port: 0,
            ..NetworkConfig::default()
        };
        assert_eq!(n.effective_port(), DEFAULT_PORT);
    }

    // ── programs_for ──────────────────────────────────────────────────────────

    #[test]
    fn programs_for_filters_mode_and_enabled_and_sorts() {
        let config = Config {
            programs: vec![
                make_program("c", ExecutionMode::Network, 3, true),
                make_program("a", ExecutionMode::Network, 1, true),
                make_program("off", ExecutionMode::Network, 0, false),
                make_program("t", ExecutionMode::Trigger, 0, true),
                make_program("b", ExecutionMode::Network, 2, true),
            ],
            ..Config::default()
        };
        let names: Vec<_> = config
            .programs_for(ExecutionMode::Network)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn programs_for_keeps_file_order_for_equal_orders() {
        let config = Config {
            programs: vec![
                make_program("first", ExecutionMode::Trigger, 5, true),
                make_program("second", ExecutionMode::Trigger, 5, true),
                make_program("early", ExecutionMode::Trigger, 1, true),
            ],
            ..Config::default()
        };
        let names: Vec<_> = config
            .programs_for(ExecutionMode::Trigger)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["early", "first", "second"]);
    }

    #[test]
    fn monitored_process_ignores_blank_names() {
        let mut p = make_program("x", ExecutionMode::Network, 0, true);
        assert_eq!(p.monitored_process(), None);
        p.process_name = Some("   ".to_string());
        assert_eq!(p.monitored_process(), None);
        p.process_name = Some(" Updater ".to_string());
        assert_eq!(p.monitored_process(), Some("Updater"));
    }

    #[test]
    fn execution_mode_parses_labels() {
        assert_eq!("network".parse::<ExecutionMode>().unwrap(), ExecutionMode::Network);
        assert_eq!("Trigger".parse::<ExecutionMode>().unwrap(), ExecutionMode::Trigger);
        assert_eq!(
            "launcher-only".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::LauncherOnly
        );
        assert!("sometimes".parse::<ExecutionMode>().is_err());
    }

    // ── split_list ────────────────────────────────────────────────────────────

    #[test]
    fn split_list_handles_semicolons_and_newlines() {
        assert_eq!(
            split_list(" 10.0.0.1 ;\n10.0.0.2\r\n;; 10.0.0.3 "),
            ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
        );
        assert!(split_list(" ; \n ").is_empty());
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.network.port, DEFAULT_PORT);
        assert!(config.programs.is_empty());
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[general]
auto_start_monitoring = false

[network]
ping_addresses = ["10.0.0.1", "10.0.0.2"]
http_addresses = "http://intranet/health; http://backup/health"
port = 8080
timeout_ms = 1500
check_interval_secs = 10
retry_delay_secs = 3
auto_start_programs = false

[trigger]
target_processes = "MainFrame;notepad"
check_interval_secs = 2

[[programs]]
id = 7
name = "Updater"
path = 'C:\Tools\Updater.exe'
process_name = "Updater"
execution_mode = "trigger"
execution_order = 2

[[programs]]
name = "Drop"
path = 'C:\Drop'
is_folder = true
enabled = false
execution_mode = "launcher-only"
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert!(!config.general.auto_start_monitoring);
        assert_eq!(config.network.ping_addresses, ["10.0.0.1", "10.0.0.2"]);
        assert_eq!(
            config.network.http_addresses,
            ["http://intranet/health", "http://backup/health"]
        );
        assert!(config.network.tcp_addresses.is_empty());
        assert_eq!(config.network.port, 8080);
        assert_eq!(config.network.timeout_ms, 1500);
        assert_eq!(config.network.check_interval_secs, 10);
        assert_eq!(config.network.retry_delay_secs, 3);
        assert!(!config.network.auto_start_programs);
        assert_eq!(config.trigger.target_processes, ["MainFrame", "notepad"]);
        assert_eq!(config.trigger.check_interval_secs, 2);
        assert!(config.trigger.auto_start_programs);

        assert_eq!(config.programs.len(), 2);
        let updater = &config.programs[0];
        assert_eq!(updater.id, 7);
        assert!(updater.enabled);
        assert_eq!(updater.execution_mode, ExecutionMode::Trigger);
        assert_eq!(updater.execution_order, 2);
        assert_eq!(updater.monitored_process(), Some("Updater"));
        let drop = &config.programs[1];
        assert!(drop.is_folder);
        assert!(!drop.enabled);
        assert_eq!(drop.execution_mode, ExecutionMode::LauncherOnly);
    }

    #[test]
    fn load_or_default_program_defaults_to_network_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[programs]]\nname = \"a\"\npath = \"a.exe\"\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.programs[0].execution_mode, ExecutionMode::Network);
        assert!(config.programs[0].enabled);
        assert_eq!(config.programs[0].execution_order, 0);
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn file_settings_reads_fresh_on_every_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let store = FileSettings::new(path.clone());

        std::fs::write(&path, "[trigger]\ntarget_processes = [\"a\"]\n").unwrap();
        assert_eq!(store.load().unwrap().trigger.target_processes, ["a"]);

        std::fs::write(&path, "[trigger]\ntarget_processes = [\"b\", \"c\"]\n").unwrap();
        assert_eq!(store.load().unwrap().trigger.target_processes, ["b", "c"]);
    }
}
