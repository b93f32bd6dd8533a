//! The data model (spec §3): the typed records every other module passes
//! around instead of `HashMap<String, serde_json::Value>`-style blobs.

use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmStatus {
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareType {
    Bios,
    Uefi,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Firmware {
    pub kind: Option<FirmwareType>,
    pub path: Option<String>,
    pub secure_boot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Boot {
    pub menu_enabled: bool,
    /// Ordered device identities: resolved disk source path or NIC MAC.
    pub order: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphicsType {
    Vnc,
    Spice,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphicsListen {
    Address,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graphics {
    pub kind: GraphicsType,
    pub listen: GraphicsListen,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub auto_port: bool,
    pub password_enabled: bool,
    pub password: Option<String>,
}

impl Default for Graphics {
    fn default() -> Self {
        Self {
            kind: GraphicsType::None,
            listen: GraphicsListen::None,
            address: None,
            port: None,
            auto_port: true,
            password_enabled: false,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskBus {
    Virtio,
    Sata,
    Scsi,
    Ide,
    Usb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskDevice {
    Disk,
    Cdrom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskCache {
    None,
    Writeback,
    Writethrough,
    Directsync,
    Unsafe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskDiscard {
    Ignore,
    Unmap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskInfo {
    pub target: String,
    pub path: Option<String>,
    pub pool_volume: Option<(String, String)>,
    pub device: DiskDevice,
    pub bus: DiskBus,
    pub cache: DiskCache,
    pub discard: DiskDiscard,
    pub status: DiskStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub mac: String,
    pub network: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtiofsShare {
    pub source: String,
    pub target: String,
    pub readonly: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Tpm {
    pub model: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Rng {
    pub model: Option<String>,
    pub backend: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Watchdog {
    pub model: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct InputDevice {
    pub input_type: String,
    pub bus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceInventory {
    pub usb: Vec<String>,
    pub pci: Vec<String>,
    pub serial: Vec<String>,
    pub input: Vec<String>,
    pub controllers: Vec<String>,
}

/// Full, cached view of one VM (spec §3 `VMInfo`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    pub uuid: String,
    pub name: String,
    pub status: VmStatus,
    pub vcpu_count: u32,
    pub memory_mib: u64,
    pub machine_type: String,
    pub firmware: Firmware,
    pub cpu_model: Option<String>,
    pub video_model: Option<String>,
    pub sound_model: Option<String>,
    pub shared_memory: bool,
    pub boot: Boot,
    pub graphics: Graphics,
    pub tpm: Vec<Tpm>,
    pub rng: Rng,
    pub watchdog: Watchdog,
    pub networks: Vec<NetworkInterface>,
    pub disks: Vec<DiskInfo>,
    pub virtiofs: Vec<VirtiofsShare>,
    pub device_inventory: DeviceInventory,
    pub xml: String,
}

/// Ephemeral per-sample stats snapshot (spec §3 `VMStats`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VmStats {
    pub status: VmStatus,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    pub disk_read_kbps: f64,
    pub disk_write_kbps: f64,
    pub net_rx_kbps: f64,
    pub net_tx_kbps: f64,
    #[serde(skip, default = "Instant::now")]
    pub timestamp: Instant,
}

/// Carries the previous sample so C6 can compute deltas (spec §3 `StatCounter`).
#[derive(Debug, Clone, Copy)]
pub struct StatCounter {
    pub last_cpu_time_ns: u64,
    pub last_timestamp: Instant,
    pub last_disk_read_bytes: u64,
    pub last_disk_write_bytes: u64,
    pub last_net_rx_bytes: u64,
    pub last_net_tx_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolType {
    Dir,
    Netfs,
    Nfs,
    Iscsi,
    Rbd,
    Glusterfs,
    LogicalLvm,
    Other(String),
}

impl PoolType {
    /// Pool types the storage/migration engines treat as network-shareable
    /// (spec §4.8's "shareable type" hint: netfs/iscsi/glusterfs/rbd/nfs).
    pub fn is_shareable(&self) -> bool {
        matches!(self, PoolType::Netfs | PoolType::Nfs | PoolType::Iscsi | PoolType::Rbd | PoolType::Glusterfs)
    }

    /// Parses a libvirt `<pool type='...'>` attribute value.
    pub fn from_xml_str(s: &str) -> Self {
        match s {
            "dir" => PoolType::Dir,
            "netfs" => PoolType::Netfs,
            "nfs" => PoolType::Nfs,
            "iscsi" => PoolType::Iscsi,
            "rbd" => PoolType::Rbd,
            "glusterfs" => PoolType::Glusterfs,
            "logical" => PoolType::LogicalLvm,
            other => PoolType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePool {
    pub name: String,
    pub pool_type: PoolType,
    pub status: PoolStatus,
    pub autostart: bool,
    pub capacity_bytes: u64,
    pub allocation_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageVolume {
    pub name: String,
    pub pool: String,
    pub path: String,
    pub capacity_bytes: u64,
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkMode {
    Nat,
    Route,
    Isolated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ipv4Config {
    pub address: String,
    pub netmask: String,
    pub dhcp_range: Option<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkDef {
    pub name: String,
    pub mode: NetworkMode,
    pub active: bool,
    pub autostart: bool,
    pub ipv4: Option<Ipv4Config>,
}

/// Severity level for migration-compatibility issues (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationIssue {
    pub severity: IssueSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkAction {
    Start,
    Stop,
    ForceOff,
    Pause,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkFailure {
    pub uuid: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkResult {
    pub successes: Vec<String>,
    pub failures: Vec<BulkFailure>,
}

/// Filter/sort inputs for C4 listing operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VmFilter {
    pub status: Option<VmStatus>,
    pub text: Option<String>,
    pub selected_set: Option<std::collections::HashSet<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmSortKey {
    Name,
    Status,
    MemoryMib,
}
