use std::sync::Mutex;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

/// Read access to the OS process table.
pub trait ProcessTable: Send + Sync {
    /// PIDs of every running process whose name matches `name`.  See
    /// [`names_match`] for the comparison rules.
    fn pids_by_name(&self, name: &str) -> Vec<u32>;

    fn is_running(&self, name: &str) -> bool {
        !self.pids_by_name(name).is_empty()
    }
}

/// Process table backed by `sysinfo`, refreshed on every query.
pub struct SysinfoProcessTable {
    sys: Mutex<System>,
}

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn pids_by_name(&self, name: &str) -> Vec<u32> {
        let mut sys = self
            .sys
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());

        let mut pids: Vec<u32> = sys
            .processes()
            .iter()
            .filter(|(_, p)| names_match(&p.name().to_string_lossy(), name))
            .map(|(pid, _)| pid.as_u32())
            .collect();
        pids.sort_unstable();
        pids
    }
}

/// Compares an OS process name with a configured one.  A trailing `.exe` is
/// ignored on both sides; Windows compares case-insensitively.
pub fn names_match(process_name: &str, wanted: &str) -> bool {
    let a = strip_exe(process_name.trim());
    let b = strip_exe(wanted.trim());
    if b.is_empty() {
        return false;
    }
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn strip_exe(name: &str) -> &str {
    let len = name.len();
    if len > 4 && name.is_char_boundary(len - 4) && name[len - 4..].eq_ignore_ascii_case(".exe") {
        &name[..len - 4]
    } else {
        name
    }
}
