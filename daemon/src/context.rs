use std::sync::Arc;

use crate::config::SettingsStore;
use crate::launcher::Launcher;
use crate::probe::ReachabilityProbe;
use crate::process_table::ProcessTable;

/// External capabilities the monitors and the launch sequencer depend on.
/// Built once by the daemon and cloned into every monitor instance.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsStore>,
    pub probe: Arc<dyn ReachabilityProbe>,
    pub processes: Arc<dyn ProcessTable>,
    pub launcher: Arc<dyn Launcher>,
}
