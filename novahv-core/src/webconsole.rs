//! Web Console Supervisor (C10): launches/supervises WebSocket-to-VNC
//! proxies and SSH tunnels, one session per VM UUID (spec §4.10).
//!
//! Subprocess ownership follows spec §9's Design Note: every proxy/tunnel
//! is wrapped in an RAII-like holder that sends SIGTERM, then SIGKILL after
//! a grace period, on drop/close, and removes any SSH control socket.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tracing::instrument;

use novahv_common::log_success;

use crate::backend::LibvirtConnection;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{Event, EventSender};
use crate::xml;

const GRACE_PERIOD: Duration = Duration::from_millis(500);
const DEFERRED_STOP_DELAY: Duration = Duration::from_secs(2);
const REMOTE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const SSH_TUNNEL_TIMEOUT: Duration = Duration::from_secs(10);

/// RAII holder for a spawned child process: on drop, best-effort SIGTERM
/// then (after a grace period, observed on next poll) SIGKILL.
struct ManagedProcess {
    child: Child,
    pid: Pid,
}

impl ManagedProcess {
    fn spawn(mut command: Command) -> Result<Self> {
        let child = command.spawn().map_err(|e| Error::external_process("subprocess", e.to_string()))?;
        let pid = Pid::from_raw(child.id().ok_or_else(|| Error::external_process("subprocess", "missing pid"))? as i32);
        Ok(Self { child, pid })
    }

    async fn terminate(mut self) {
        let _ = signal::kill(self.pid, Signal::SIGTERM);
        match tokio::time::timeout(GRACE_PERIOD, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = signal::kill(self.pid, Signal::SIGKILL);
                let _ = self.child.wait().await;
            }
        }
    }
}

struct SshTunnel {
    control_socket: PathBuf,
    local_port: u16,
}

impl SshTunnel {
    async fn close(self) {
        let _ = Command::new("ssh").args(["-S", &self.control_socket.to_string_lossy(), "-O", "exit", "dummy"]).status().await;
        let _ = tokio::fs::remove_file(&self.control_socket).await;
    }
}

struct Session {
    proxy: Option<ManagedProcess>,
    tunnel: Option<SshTunnel>,
    local_port: u16,
    url: String,
}

/// C10: at most one active session per VM UUID.
pub struct WebConsoleSupervisor {
    sessions: RwLock<HashMap<String, Session>>,
    config: Config,
    events: EventSender,
}

impl WebConsoleSupervisor {
    pub fn new(config: Config, events: EventSender) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), config, events }
    }

    async fn allocate_local_port(&self) -> Result<u16> {
        let sessions = self.sessions.read().await;
        let used: std::collections::HashSet<u16> = sessions.values().map(|s| s.local_port).collect();
        for port in self.config.wc_port_range_start..=self.config.wc_port_range_end {
            if !used.contains(&port) {
                return Ok(port);
            }
        }
        Err(Error::Precondition("no free web-console ports remain in the configured range".into()))
    }

    fn tls_available(&self) -> bool {
        self.config
            .tls_cert_dir
            .as_ref()
            .map(|dir| std::path::Path::new(dir).join("cert.pem").exists() && std::path::Path::new(dir).join("key.pem").exists())
            .unwrap_or(false)
    }

    fn is_remote(uri: &str) -> bool {
        uri.contains("://") && !uri.contains("localhost") && !uri.starts_with("qemu:///") && !uri.starts_with("test:///")
    }

    /// Starts a session for `uuid`; requires VNC graphics with a valid port.
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn start(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<String> {
        if self.sessions.read().await.contains_key(uuid) {
            return Err(Error::Conflict(format!("a web console session is already active for '{uuid}'")));
        }

        let xml_str = conn.domain_xml(uuid).await?;
        let domain = xml::parse_domain(&xml_str)?;
        let graphics = xml::edit::get_graphics(&domain);
        if graphics.kind != crate::types::GraphicsType::Vnc {
            return Err(Error::Precondition("VM does not have VNC graphics configured".into()));
        }
        let vnc_port = graphics.port.ok_or_else(|| Error::Precondition("VNC graphics has no allocated port".into()))?;

        let local_port = self.allocate_local_port().await?;

        let session = if self.config.remote_webconsole && Self::is_remote(conn.uri()) {
            self.start_remote_execution(conn.uri(), vnc_port, local_port).await?
        } else {
            self.start_local_or_tunneled(conn.uri(), vnc_port, local_port).await?
        };

        let url = session.url.clone();
        self.sessions.write().await.insert(uuid.to_string(), session);
        log_success!("webconsole", "started console session for '{}' at {}", uuid, url);
        let _ = self.events.send(Event::WebConsole { vm_uuid: uuid.to_string(), active: true, url: Some(url.clone()) });
        Ok(url)
    }

    async fn start_local_or_tunneled(&self, uri: &str, vnc_port: u16, local_port: u16) -> Result<Session> {
        let (tunnel, target_host, target_port) = if Self::is_remote(uri) {
            let host = extract_host(uri).ok_or_else(|| Error::Invalid(format!("could not extract host from uri '{uri}'")))?;
            let control_socket = std::env::temp_dir().join(format!("novahv-wc-{}-{}.sock", host, local_port));
            let args = vec![
                "-M".to_string(),
                "-S".to_string(),
                control_socket.to_string_lossy().to_string(),
                "-f".to_string(),
                "-N".to_string(),
                "-L".to_string(),
                format!("{local_port}:127.0.0.1:{vnc_port}"),
                host.clone(),
            ];
            let status = tokio::time::timeout(SSH_TUNNEL_TIMEOUT, Command::new("ssh").args(&args).status())
                .await
                .map_err(|_| Error::Timeout(SSH_TUNNEL_TIMEOUT))?
                .map_err(|e| Error::external_process("ssh", e.to_string()))?;
            if !status.success() {
                return Err(Error::external_process("ssh", format!("tunnel setup exited with {status}")));
            }
            (Some(SshTunnel { control_socket, local_port }), "127.0.0.1".to_string(), local_port)
        } else {
            (None, "127.0.0.1".to_string(), vnc_port)
        };

        let proxy_port = local_port;
        let mut command = Command::new(&self.config.websockify_path);
        command.arg(format!("{proxy_port}")).arg(format!("{target_host}:{target_port}")).arg("--web").arg(&self.config.novnc_path);
        if self.tls_available() {
            let dir = self.config.tls_cert_dir.as_ref().unwrap();
            command.arg("--cert").arg(format!("{dir}/cert.pem")).arg("--key").arg(format!("{dir}/key.pem"));
        }
        let proxy = ManagedProcess::spawn(command)?;

        let scheme = if self.tls_available() { "wss" } else { "ws" };
        let url = format!(
            "{scheme}://127.0.0.1:{proxy_port}/vnc.html?path=websockify&quality={}&compression={}",
            self.config.vnc_quality, self.config.vnc_compression
        );
        Ok(Session { proxy: Some(proxy), tunnel, local_port: proxy_port, url })
    }

    async fn start_remote_execution(&self, uri: &str, vnc_port: u16, local_port: u16) -> Result<Session> {
        let host = extract_host(uri).ok_or_else(|| Error::Invalid(format!("could not extract host from uri '{uri}'")))?;

        let probe = tokio::time::timeout(
            REMOTE_PROBE_TIMEOUT,
            Command::new("ssh").arg(&host).arg("test -f ~/.config/novahv/cert.pem && test -f ~/.config/novahv/key.pem").status(),
        )
        .await;
        let remote_tls = matches!(probe, Ok(Ok(status)) if status.success());

        let mut remote_cmd = format!("websockify {local_port} 127.0.0.1:{vnc_port} --web /usr/share/novnc/");
        if remote_tls {
            remote_cmd.push_str(" --cert ~/.config/novahv/cert.pem --key ~/.config/novahv/key.pem");
        }
        // Non-daemon SSH so local termination kills the remote proxy too
        // (spec §9 Open Question: prefer this over relying on remote reaping).
        let proxy = ManagedProcess::spawn({
            let mut c = Command::new("ssh");
            c.arg(&host).arg(remote_cmd);
            c
        })?;

        let scheme = if remote_tls { "wss" } else { "ws" };
        let url = format!(
            "{scheme}://{host}:{local_port}/vnc.html?path=websockify&quality={}&compression={}",
            self.config.vnc_quality, self.config.vnc_compression
        );
        Ok(Session { proxy: Some(proxy), tunnel: None, local_port, url })
    }

    /// Called when the proxy's log stream emits a "client connected" line;
    /// schedules a deferred stop so the one-shot proxy exits cleanly.
    pub async fn on_client_connected(self: &Arc<Self>, uuid: String) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEFERRED_STOP_DELAY).await;
            this.stop(&uuid).await;
        });
    }

    #[instrument(skip(self), fields(uuid = %uuid))]
    pub async fn stop(&self, uuid: &str) {
        let session = self.sessions.write().await.remove(uuid);
        if let Some(session) = session {
            if let Some(proxy) = session.proxy {
                proxy.terminate().await;
            }
            if let Some(tunnel) = session.tunnel {
                tunnel.close().await;
            }
        }
        let _ = self.events.send(Event::WebConsole { vm_uuid: uuid.to_string(), active: false, url: None });
    }

    pub async fn terminate_all(&self) {
        let uuids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for uuid in uuids {
            self.stop(&uuid).await;
        }
    }
}

fn extract_host(uri: &str) -> Option<String> {
    let after_scheme = uri.split("://").nth(1)?;
    let host_part = after_scheme.split('/').next()?;
    let host = host_part.rsplit('@').next()?;
    Some(host.to_string())
}
