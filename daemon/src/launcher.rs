use anyhow::{Context, Result};
use std::path::Path;
use std::process::{Command, Stdio};

/// Starts programs and opens folders on behalf of the launch sequencer.
pub trait Launcher: Send + Sync {
    /// Spawns `path` as an independent process running in `working_dir`.
    /// Returns the new PID.
    fn start_process(&self, path: &Path, working_dir: &Path) -> Result<u32>;

    /// Opens `path` in the platform file browser.
    fn open_in_file_browser(&self, path: &Path) -> Result<()>;
}

/// Launches through `std::process::Command`.  Children are never waited on;
/// they outlive the daemon.
pub struct OsLauncher;

impl Launcher for OsLauncher {
    #[allow(clippy::zombie_processes)]
    fn start_process(&self, path: &Path, working_dir: &Path) -> Result<u32> {
        let mut cmd = Command::new(path);
        cmd.current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start {}", path.display()))?;
        Ok(child.id())
    }

    #[allow(clippy::zombie_processes)]
    fn open_in_file_browser(&self, path: &Path) -> Result<()> {
        Command::new(FILE_BROWSER)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to open folder {}", path.display()))?;
        Ok(())
    }
}

#[cfg(windows)]
const FILE_BROWSER: &str = "explorer";
#[cfg(target_os = "macos")]
const FILE_BROWSER: &str = "open";
#[cfg(not(any(windows, target_os = "macos")))]
const FILE_BROWSER: &str = "xdg-open";

#[cfg(windows)]
fn detach(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // Own process group, so a Ctrl+C aimed at the daemon does not reach it.
    cmd.process_group(0);
}

#[cfg(not(any(windows, unix)))]
fn detach(_cmd: &mut Command) {}
