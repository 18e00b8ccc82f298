/// Single-shot reachability tests: ICMP echo, HTTP GET and TCP connect.
///
/// A probe never fails loudly.  DNS, transport and timeout errors all collapse
/// to `false`.  Every probe is an ordinary future, so dropping it (e.g. when a
/// monitor is stopped) abandons the in-flight request; the ping child process
/// is killed on drop.
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;

/// Grace period on top of the configured timeout for the ping child process
/// to report its result.
const PING_PROCESS_SLACK: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Ping,
    Http,
    Tcp,
}

impl ProbeKind {
    /// Fixed evaluation order of the address buckets.
    pub const PRIORITY: [ProbeKind; 3] = [ProbeKind::Ping, ProbeKind::Http, ProbeKind::Tcp];

    pub fn label(self) -> &'static str {
        match self {
            ProbeKind::Ping => "Ping",
            ProbeKind::Http => "HTTP",
            ProbeKind::Tcp => "TCP",
        }
    }
}

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Returns `true` iff `address` answered within `timeout`.  `port` is only
    /// used by [`ProbeKind::Tcp`].
    async fn probe(&self, kind: ProbeKind, address: &str, timeout: Duration, port: u16) -> bool;
}

/// Probe backed by the OS `ping` binary, `reqwest` and tokio sockets.
pub struct NetProbe {
    http: reqwest::Client,
}

impl NetProbe {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("launchwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    async fn ping(&self, address: &str, timeout: Duration) -> bool {
        let mut cmd = ping_command(address, timeout);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout + PING_PROCESS_SLACK, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::debug!(address, "ping could not be spawned: {e}");
                return false;
            }
            Err(_) => return false,
        };

        output.status.success() && ping_reply_received(&String::from_utf8_lossy(&output.stdout))
    }

    async fn http(&self, url: &str, timeout: Duration) -> bool {
        match self.http.get(url).timeout(timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url, "http probe failed: {e}");
                false
            }
        }
    }

    async fn tcp(&self, address: &str, port: u16, timeout: Duration) -> bool {
        // Name resolution counts against the timeout too.
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect((address, port))).await,
            Ok(Ok(_))
        )
    }
}

#[async_trait]
impl ReachabilityProbe for NetProbe {
    async fn probe(&self, kind: ProbeKind, address: &str, timeout: Duration, port: u16) -> bool {
        let ok = match kind {
            ProbeKind::Ping => self.ping(address, timeout).await,
            ProbeKind::Http => self.http(address, timeout).await,
            ProbeKind::Tcp => self.tcp(address, port, timeout).await,
        };
        tracing::trace!(kind = kind.label(), address, ok, "probe finished");
        ok
    }
}

#[cfg(windows)]
fn ping_command(address: &str, timeout: Duration) -> Command {
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    let mut cmd = Command::new("ping");
    cmd.arg("-n")
        .arg("1")
        .arg("-w")
        .arg(timeout.as_millis().to_string())
        .arg(address)
        .creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(target_os = "macos")]
fn ping_command(address: &str, timeout: Duration) -> Command {
    let mut cmd = Command::new("ping");
    // macOS takes the reply wait in milliseconds.
    cmd.arg("-c")
        .arg("1")
        .arg("-W")
        .arg(timeout.as_millis().max(1).to_string())
        .arg(address);
    cmd
}

#[cfg(not(any(windows, target_os = "macos")))]
fn ping_command(address: &str, timeout: Duration) -> Command {
    let mut cmd = Command::new("ping");
    // iputils only accepts whole seconds.
    let secs = timeout.as_millis().div_ceil(1000).max(1);
    cmd.arg("-c").arg("1").arg("-W").arg(secs.to_string()).arg(address);
    cmd
}

/// Windows `ping` exits 0 for "Destination host unreachable" answers from a
/// gateway, so only an actual echo reply (a line with a TTL) counts.
fn ping_reply_received(stdout: &str) -> bool {
    if cfg!(windows) {
        stdout.to_ascii_lowercase().contains("ttl=")
    } else {
        true
    }
}
