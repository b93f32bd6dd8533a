//! Configuration struct consumed by `Core::new`.
//!
//! `novahv-core` never reads a config file itself (YAML parsing/persistence
//! is an explicit non-goal); the embedding process builds a `Config` however
//! it likes and hands it over.

use serde::{Deserialize, Serialize};

/// A configured hypervisor host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    pub uri: String,
}

/// Top-level configuration for the VM service layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// VMs shown per page in list views.
    pub vms_per_page: u32,
    /// Info-tier cache TTL, in seconds.
    pub cache_ttl_secs: u64,
    /// XML-tier cache TTL, in seconds. Fixed at ~600s per spec §3.
    pub xml_cache_ttl_secs: u64,
    /// Connect to every configured server on startup.
    pub autoconnect_on_startup: bool,
    /// Launch the web-console proxy on the remote host instead of locally.
    pub remote_webconsole: bool,
    /// Path to the `websockify` binary.
    pub websockify_path: String,
    /// Path to the noVNC static web root.
    pub novnc_path: String,
    /// Inclusive start of the local port range used for web-console proxies.
    pub wc_port_range_start: u16,
    /// Inclusive end of the local port range used for web-console proxies.
    pub wc_port_range_end: u16,
    /// noVNC quality setting (0-9).
    pub vnc_quality: u8,
    /// noVNC compression level (0-9).
    pub vnc_compression: u8,
    /// Directory containing `cert.pem`/`key.pem`, if TLS is enabled for the
    /// web console. `None` means plain `ws://`.
    pub tls_cert_dir: Option<String>,
    /// Configured hypervisor hosts.
    pub servers: Vec<ServerEntry>,
}

impl Default for Config {
    /// Mirrors `original_source/config.py`'s `DEFAULT_CONFIG`, extended with
    /// every other default spec.md §6 enumerates.
    fn default() -> Self {
        Self {
            vms_per_page: 4,
            cache_ttl_secs: 1,
            xml_cache_ttl_secs: 600,
            autoconnect_on_startup: false,
            remote_webconsole: false,
            websockify_path: "/usr/bin/websockify".to_string(),
            novnc_path: "/usr/share/novnc/".to_string(),
            wc_port_range_start: 40000,
            wc_port_range_end: 40050,
            vnc_quality: 0,
            vnc_compression: 9,
            tls_cert_dir: None,
            servers: vec![ServerEntry {
                name: "Localhost".to_string(),
                uri: "qemu:///system".to_string(),
            }],
        }
    }
}

impl Config {
    /// Info-tier TTL used by the metadata cache (C3).
    pub fn info_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_secs.max(1))
    }

    /// XML-tier TTL used by the metadata cache (C3).
    pub fn xml_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.xml_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_source() {
        let cfg = Config::default();
        assert_eq!(cfg.vms_per_page, 4);
        assert_eq!(cfg.servers.len(), 1);
        assert_eq!(cfg.servers[0].uri, "qemu:///system");
    }
}
