//! Typed records for the subset of the libvirt domain/pool/volume/network
//! XML dialects this crate edits, deserialized with `quick_xml::de` and
//! re-serialized with `quick_xml::se` (spec §4.2's "parse into typed
//! records, serialize edits back").
//!
//! The vendor metadata namespace used to persist disabled-disk annotations.
pub const NOVAHV_NS: &str = "https://novahv.example/domain-metadata/1.0";
pub const NOVAHV_PREFIX: &str = "novahv";

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MemoryElem {
    #[serde(rename = "@unit", default = "default_unit")]
    pub unit: String,
    #[serde(rename = "$text")]
    pub value: u64,
}

fn default_unit() -> String {
    "KiB".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VcpuElem {
    #[serde(rename = "@placement", skip_serializing_if = "Option::is_none")]
    pub placement: Option<String>,
    #[serde(rename = "$text")]
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BootDevElem {
    #[serde(rename = "@dev")]
    pub dev: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TypeElem {
    #[serde(rename = "@arch", skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(rename = "@machine", skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    #[serde(rename = "$text")]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoaderElem {
    #[serde(rename = "@readonly", skip_serializing_if = "Option::is_none")]
    pub readonly: Option<String>,
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub secure: Option<String>,
    #[serde(rename = "$text", skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NvramElem {
    #[serde(rename = "$text", skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct OsElem {
    #[serde(rename = "firmware", skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    #[serde(rename = "type")]
    pub os_type: TypeElem,
    #[serde(default, rename = "boot")]
    pub boot: Vec<BootDevElem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loader: Option<LoaderElem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nvram: Option<NvramElem>,
    #[serde(rename = "bootmenu", skip_serializing_if = "Option::is_none")]
    pub bootmenu: Option<BootMenuElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BootMenuElem {
    #[serde(rename = "@enable")]
    pub enable: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CpuElem {
    #[serde(rename = "@mode", skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub model: Option<CpuModelElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CpuModelElem {
    #[serde(rename = "$text")]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FeaturesElem {
    pub acpi: Option<()>,
    pub apic: Option<()>,
}

// -- devices ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SourceElem {
    #[serde(rename = "@file", skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(rename = "@dev", skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    #[serde(rename = "@pool", skip_serializing_if = "Option::is_none")]
    pub pool: Option<String>,
    #[serde(rename = "@volume", skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(rename = "@network", skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TargetElem {
    #[serde(rename = "@dev", skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    #[serde(rename = "@bus", skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DriverElem {
    #[serde(rename = "@name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(rename = "@cache", skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    #[serde(rename = "@discard", skip_serializing_if = "Option::is_none")]
    pub discard: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BootOrderElem {
    #[serde(rename = "@order")]
    pub order: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DiskElem {
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,
    #[serde(rename = "@device", default)]
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverElem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceElem>,
    pub target: TargetElem,
    #[serde(rename = "boot", skip_serializing_if = "Option::is_none")]
    pub boot: Option<BootOrderElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MacElem {
    #[serde(rename = "@address")]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InterfaceSourceElem {
    #[serde(rename = "@network", skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ModelElem {
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InterfaceElem {
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub iface_type: Option<String>,
    pub mac: MacElem,
    pub source: InterfaceSourceElem,
    pub model: ModelElem,
    #[serde(rename = "boot", skip_serializing_if = "Option::is_none")]
    pub boot: Option<BootOrderElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ListenElem {
    #[serde(rename = "@type")]
    pub listen_type: String,
    #[serde(rename = "@address", skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GraphicsElem {
    #[serde(rename = "@type")]
    pub graphics_type: String,
    #[serde(rename = "@port", skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(rename = "@autoport", skip_serializing_if = "Option::is_none")]
    pub autoport: Option<String>,
    #[serde(rename = "@passwd", skip_serializing_if = "Option::is_none")]
    pub passwd: Option<String>,
    #[serde(default)]
    pub listen: Vec<ListenElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VideoElem {
    pub model: ModelElem,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SoundElem {
    #[serde(rename = "@model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChannelElem {
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
    #[serde(rename = "target", skip_serializing_if = "Option::is_none")]
    pub target: Option<ChannelTargetElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChannelTargetElem {
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    #[serde(rename = "@name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RedirdevElem {
    #[serde(rename = "@bus", skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub redir_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TpmElem {
    #[serde(rename = "@model", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub backend: Option<TpmBackendElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TpmBackendElem {
    #[serde(rename = "@version", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RngBackendElem {
    #[serde(rename = "@model", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RngElem {
    #[serde(rename = "@model", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub backend: Option<RngBackendElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WatchdogElem {
    #[serde(rename = "@model", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "@action", skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FilesystemSourceElem {
    #[serde(rename = "@dir", skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FilesystemTargetElem {
    #[serde(rename = "@dir")]
    pub dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FilesystemElem {
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
    #[serde(rename = "@accessmode", skip_serializing_if = "Option::is_none")]
    pub accessmode: Option<String>,
    #[serde(rename = "@readonly", skip_serializing_if = "Option::is_none")]
    pub readonly: Option<ReadonlyMarker>,
    pub driver: Option<FsDriverElem>,
    pub source: FilesystemSourceElem,
    pub target: FilesystemTargetElem,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ReadonlyMarker;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FsDriverElem {
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub driver_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct InputElem {
    #[serde(rename = "@type")]
    pub input_type: String,
    #[serde(rename = "@bus", skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ControllerElem {
    #[serde(rename = "@type")]
    pub controller_type: String,
    #[serde(rename = "@model", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HostdevElem {
    #[serde(rename = "@mode", skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub hostdev_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MemballoonElem {
    #[serde(rename = "@model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DevicesElem {
    #[serde(default, rename = "disk")]
    pub disks: Vec<DiskElem>,
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<InterfaceElem>,
    #[serde(default, rename = "graphics")]
    pub graphics: Vec<GraphicsElem>,
    #[serde(default, rename = "video")]
    pub video: Vec<VideoElem>,
    #[serde(default, rename = "sound")]
    pub sound: Vec<SoundElem>,
    #[serde(default, rename = "channel")]
    pub channels: Vec<ChannelElem>,
    #[serde(default, rename = "redirdev")]
    pub redirdevs: Vec<RedirdevElem>,
    #[serde(default, rename = "tpm")]
    pub tpm: Vec<TpmElem>,
    pub rng: Option<RngElem>,
    pub watchdog: Option<WatchdogElem>,
    #[serde(default, rename = "filesystem")]
    pub filesystems: Vec<FilesystemElem>,
    #[serde(default, rename = "input")]
    pub input: Vec<InputElem>,
    #[serde(default, rename = "controller")]
    pub controllers: Vec<ControllerElem>,
    #[serde(default, rename = "hostdev")]
    pub hostdevs: Vec<HostdevElem>,
    pub memballoon: Option<MemballoonElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DisabledDiskEntry {
    #[serde(rename = "$value")]
    pub xml: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NovahvMetadata {
    #[serde(rename = "xmlns:novahv", skip_serializing_if = "Option::is_none")]
    pub xmlns: Option<String>,
    #[serde(default, rename = "novahv:disabled-disk")]
    pub disabled_disks: Vec<DisabledDiskEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MetadataElem {
    #[serde(rename = "novahv:novahv", skip_serializing_if = "Option::is_none")]
    pub novahv: Option<NovahvMetadata>,
}

/// Shared-memory hint for VirtIO-FS, spec's "requires shared memory on the guest".
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MemoryBackingElem {
    pub access: Option<MemoryAccessElem>,
    pub source: Option<MemoryBackingSourceElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MemoryAccessElem {
    #[serde(rename = "@mode")]
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct MemoryBackingSourceElem {
    #[serde(rename = "@type")]
    pub source_type: String,
}

/// Root element: a libvirt domain definition.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename = "domain")]
pub struct DomainXml {
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub domain_type: Option<String>,
    pub name: String,
    pub uuid: String,
    pub memory: MemoryElem,
    #[serde(rename = "currentMemory", skip_serializing_if = "Option::is_none")]
    pub current_memory: Option<MemoryElem>,
    #[serde(rename = "memoryBacking", skip_serializing_if = "Option::is_none")]
    pub memory_backing: Option<MemoryBackingElem>,
    pub vcpu: VcpuElem,
    pub os: OsElem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeaturesElem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuElem>,
    pub devices: DevicesElem,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MetadataElem>,
}

/// Root element: a libvirt storage pool definition (subset).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename = "pool")]
pub struct PoolXml {
    #[serde(rename = "@type")]
    pub pool_type: String,
    pub name: String,
    pub uuid: Option<String>,
    pub capacity: Option<MemoryElem>,
    pub allocation: Option<MemoryElem>,
    pub target: Option<PoolTargetElem>,
    pub source: Option<PoolSourceElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PoolTargetElem {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PoolSourceElem {
    pub host: Option<PoolSourceHostElem>,
    pub dir: Option<PoolSourceDirElem>,
    pub device: Option<PoolSourceDeviceElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PoolSourceHostElem {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PoolSourceDirElem {
    #[serde(rename = "@path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PoolSourceDeviceElem {
    #[serde(rename = "@path")]
    pub path: String,
}

/// Root element: a libvirt storage volume definition (subset).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename = "volume")]
pub struct VolumeXml {
    pub name: String,
    pub capacity: MemoryElem,
    pub allocation: Option<MemoryElem>,
    pub target: Option<VolumeTargetElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VolumeTargetElem {
    pub path: Option<String>,
    pub format: Option<VolumeFormatElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct VolumeFormatElem {
    #[serde(rename = "@type")]
    pub format_type: String,
}

/// Root element: a libvirt network definition (subset).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename = "network")]
pub struct NetworkXml {
    pub name: String,
    pub uuid: Option<String>,
    pub forward: Option<NetworkForwardElem>,
    pub bridge: Option<NetworkBridgeElem>,
    pub mac: Option<NetworkMacElem>,
    pub domain: Option<NetworkDomainElem>,
    pub ip: Option<NetworkIpElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NetworkForwardElem {
    #[serde(rename = "@mode", skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(rename = "@dev", skip_serializing_if = "Option::is_none")]
    pub dev: Option<String>,
    pub nat: Option<NetworkNatElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NetworkNatElem {
    pub port: NetworkNatPortElem,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NetworkNatPortElem {
    #[serde(rename = "@start")]
    pub start: u32,
    #[serde(rename = "@end")]
    pub end: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NetworkBridgeElem {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@stp", skip_serializing_if = "Option::is_none")]
    pub stp: Option<String>,
    #[serde(rename = "@delay", skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NetworkMacElem {
    #[serde(rename = "@address")]
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NetworkDomainElem {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NetworkIpElem {
    #[serde(rename = "@address", skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(rename = "@netmask", skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
    pub dhcp: Option<NetworkDhcpElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NetworkDhcpElem {
    pub range: Option<NetworkDhcpRangeElem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NetworkDhcpRangeElem {
    #[serde(rename = "@start")]
    pub start: String,
    #[serde(rename = "@end")]
    pub end: String,
}
