//! Structural edits over a parsed [`super::model::DomainXml`] (spec §4.5).
//!
//! Every function here takes `&mut DomainXml` and mutates it in place;
//! callers re-serialize once with [`super::serialize_domain`]. None of them
//! touch XML text directly.

use super::model::*;
use crate::error::{Error, Result};
use crate::types::{
    Boot, DeviceInventory, DiskBus, DiskCache, DiskDevice, DiskDiscard, DiskInfo, DiskStatus, Firmware,
    FirmwareType, Graphics, GraphicsListen, GraphicsType, InputDevice, NetworkInterface, Rng, Tpm, VirtiofsShare,
    VmInfo, VmStatus, Watchdog,
};

/// Device identity used for boot-order tie-breaks: disk by resolved source
/// path, NIC by MAC (spec §4.5 "Ordering/tie-breaks").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceIdentity {
    DiskPath(String),
    NicMac(String),
}

fn disk_identity(d: &DiskElem) -> Option<String> {
    d.source.as_ref().and_then(|s| s.file.clone().or_else(|| s.dev.clone()))
}

/// Clears all legacy `<boot dev='..'/>` and per-device `<boot order='..'/>`
/// entries, then writes ordered `<boot order='i'/>` under each referenced
/// device. Calling this twice with the same `order` is a no-op on the
/// resulting XML (spec §8's idempotence law).
pub fn set_boot_info(domain: &mut DomainXml, menu_enabled: bool, order: &[DeviceIdentity]) -> Result<()> {
    domain.os.boot.clear();
    domain.os.bootmenu = Some(BootMenuElem { enable: bool_yn(menu_enabled) });
    for disk in &mut domain.devices.disks {
        disk.boot = None;
    }
    for iface in &mut domain.devices.interfaces {
        iface.boot = None;
    }

    for (i, ident) in order.iter().enumerate() {
        let position = (i + 1) as u32;
        match ident {
            DeviceIdentity::DiskPath(path) => {
                let disk = domain
                    .devices
                    .disks
                    .iter_mut()
                    .find(|d| disk_identity(d).as_deref() == Some(path.as_str()))
                    .ok_or_else(|| Error::NotFound(format!("boot device disk '{path}'")))?;
                disk.boot = Some(BootOrderElem { order: position });
            }
            DeviceIdentity::NicMac(mac) => {
                let iface = domain
                    .devices
                    .interfaces
                    .iter_mut()
                    .find(|i| i.mac.address.eq_ignore_ascii_case(mac))
                    .ok_or_else(|| Error::NotFound(format!("boot device nic '{mac}'")))?;
                iface.boot = Some(BootOrderElem { order: position });
            }
        }
    }
    Ok(())
}

fn bool_yn(b: bool) -> String {
    if b { "yes".to_string() } else { "no".to_string() }
}

/// First free target device name in `a..z` for the given bus prefix
/// (spec §4.5's target-device letter allocation).
pub fn next_free_target_dev(domain: &DomainXml, bus: DiskBus) -> Result<String> {
    let prefix = match bus {
        DiskBus::Virtio => "vd",
        DiskBus::Sata | DiskBus::Ide => "sd",
        DiskBus::Scsi => "sd",
        DiskBus::Usb => "sd",
    };
    let used: std::collections::HashSet<&str> =
        domain.devices.disks.iter().filter_map(|d| d.target.dev.as_deref()).collect();
    for c in 'a'..='z' {
        let candidate = format!("{prefix}{c}");
        if !used.contains(candidate.as_str()) {
            return Ok(candidate);
        }
    }
    Err(Error::Precondition("no free target device letters remain".into()))
}

fn bus_str(bus: DiskBus) -> &'static str {
    match bus {
        DiskBus::Virtio => "virtio",
        DiskBus::Sata => "sata",
        DiskBus::Scsi => "scsi",
        DiskBus::Ide => "ide",
        DiskBus::Usb => "usb",
    }
}

fn cache_str(c: DiskCache) -> &'static str {
    match c {
        DiskCache::None => "none",
        DiskCache::Writeback => "writeback",
        DiskCache::Writethrough => "writethrough",
        DiskCache::Directsync => "directsync",
        DiskCache::Unsafe => "unsafe",
    }
}

fn discard_str(d: DiskDiscard) -> &'static str {
    match d {
        DiskDiscard::Ignore => "ignore",
        DiskDiscard::Unmap => "unmap",
    }
}

/// Adds a `<disk>` element attached by file path or pool/volume reference.
pub fn add_disk(
    domain: &mut DomainXml,
    target: String,
    device: DiskDevice,
    bus: DiskBus,
    source_file: Option<String>,
    source_pool_volume: Option<(String, String)>,
    format: Option<String>,
) {
    let source = if let Some(file) = source_file {
        Some(SourceElem { file: Some(file), dev: None, pool: None, volume: None, network: None })
    } else if let Some((pool, volume)) = source_pool_volume {
        Some(SourceElem { file: None, dev: None, pool: Some(pool), volume: Some(volume), network: None })
    } else {
        None
    };
    domain.devices.disks.push(DiskElem {
        disk_type: Some(if source.as_ref().map(|s| s.pool.is_some()).unwrap_or(false) { "volume" } else { "file" }.to_string()),
        device: match device {
            DiskDevice::Disk => "disk".to_string(),
            DiskDevice::Cdrom => "cdrom".to_string(),
        },
        driver: Some(DriverElem { name: Some("qemu".to_string()), format, cache: None, discard: None }),
        source,
        target: TargetElem { dev: Some(target), bus: Some(bus_str(bus).to_string()) },
        boot: None,
    });
}

fn matches_identifier(disk: &DiskElem, identifier: &str) -> bool {
    disk.target.dev.as_deref() == Some(identifier)
        || disk.source.as_ref().map(|s| s.file.as_deref() == Some(identifier)).unwrap_or(false)
        || disk
            .source
            .as_ref()
            .map(|s| s.volume.as_deref() == Some(identifier))
            .unwrap_or(false)
}

/// Removes a disk matched by target name, file path, or volume name.
/// Returns `true` if a warning should be surfaced because only a stray
/// vendor-metadata entry (not a live `<devices>` entry) was found.
pub fn remove_disk(domain: &mut DomainXml, identifier: &str) -> Result<bool> {
    let before = domain.devices.disks.len();
    domain.devices.disks.retain(|d| !matches_identifier(d, identifier));
    if domain.devices.disks.len() != before {
        return Ok(false);
    }
    // Not in <devices>; check the disabled-disks metadata subtree.
    if let Some(meta) = domain.metadata.as_mut().and_then(|m| m.novahv.as_mut()) {
        let before = meta.disabled_disks.len();
        meta.disabled_disks.retain(|e| !e.xml.contains(identifier));
        if meta.disabled_disks.len() != before {
            return Ok(true);
        }
    }
    Err(Error::NotFound(format!("disk '{identifier}'")))
}

fn ensure_metadata(domain: &mut DomainXml) -> &mut NovahvMetadata {
    domain
        .metadata
        .get_or_insert_with(MetadataElem::default)
        .novahv
        .get_or_insert_with(|| NovahvMetadata { xmlns: Some(NOVAHV_NS.to_string()), disabled_disks: Vec::new() })
}

/// Moves the `<disk>` element matching `identifier` into the vendor
/// metadata subtree, stopped-VM only per spec; caller enforces that.
pub fn disable_disk(domain: &mut DomainXml, identifier: &str) -> Result<()> {
    let pos = domain
        .devices
        .disks
        .iter()
        .position(|d| matches_identifier(d, identifier))
        .ok_or_else(|| Error::NotFound(format!("disk '{identifier}'")))?;
    let disk = domain.devices.disks.remove(pos);
    let xml = super::serialize_domain_fragment(&disk)?;
    ensure_metadata(domain).disabled_disks.push(DisabledDiskEntry { xml });
    Ok(())
}

/// Moves a previously-disabled disk back into `<devices>`.
pub fn enable_disk(domain: &mut DomainXml, identifier: &str) -> Result<()> {
    let meta = domain
        .metadata
        .as_mut()
        .and_then(|m| m.novahv.as_mut())
        .ok_or_else(|| Error::NotFound(format!("disabled disk '{identifier}'")))?;
    let pos = meta
        .disabled_disks
        .iter()
        .position(|e| e.xml.contains(identifier))
        .ok_or_else(|| Error::NotFound(format!("disabled disk '{identifier}'")))?;
    let entry = meta.disabled_disks.remove(pos);
    let disk: DiskElem = quick_xml::de::from_str(&entry.xml)
        .map_err(|e| Error::Invalid(format!("corrupt disabled-disk metadata: {e}")))?;
    domain.devices.disks.push(disk);
    Ok(())
}

/// Sets cache/discard/bus on an existing disk, stopped-VM only per spec.
pub fn set_disk_properties(
    domain: &mut DomainXml,
    identifier: &str,
    cache: Option<DiskCache>,
    discard: Option<DiskDiscard>,
    bus: Option<DiskBus>,
) -> Result<()> {
    let disk = domain
        .devices
        .disks
        .iter_mut()
        .find(|d| matches_identifier(d, identifier))
        .ok_or_else(|| Error::NotFound(format!("disk '{identifier}'")))?;
    let driver = disk.driver.get_or_insert_with(DriverElem::default);
    if let Some(c) = cache {
        driver.cache = Some(cache_str(c).to_string());
    }
    if let Some(d) = discard {
        driver.discard = Some(discard_str(d).to_string());
    }
    if let Some(b) = bus {
        disk.target.bus = Some(bus_str(b).to_string());
    }
    Ok(())
}

pub fn add_network_interface(domain: &mut DomainXml, mac: String, network: String, model: String) {
    domain.devices.interfaces.push(InterfaceElem {
        iface_type: Some("network".to_string()),
        mac: MacElem { address: mac },
        source: InterfaceSourceElem { network: Some(network) },
        model: ModelElem { model_type: Some(model) },
        boot: None,
    });
}

pub fn remove_network_interface(domain: &mut DomainXml, mac: &str) -> Result<()> {
    let before = domain.devices.interfaces.len();
    domain.devices.interfaces.retain(|i| !i.mac.address.eq_ignore_ascii_case(mac));
    if domain.devices.interfaces.len() == before {
        return Err(Error::NotFound(format!("network interface '{mac}'")));
    }
    Ok(())
}

/// `updateDeviceFlags`-driven change of network and/or model for an
/// existing interface, may apply live per spec §4.5.
pub fn change_vm_network(domain: &mut DomainXml, mac: &str, new_network: &str, new_model: Option<&str>) -> Result<()> {
    let iface = domain
        .devices
        .interfaces
        .iter_mut()
        .find(|i| i.mac.address.eq_ignore_ascii_case(mac))
        .ok_or_else(|| Error::NotFound(format!("network interface '{mac}'")))?;
    iface.source.network = Some(new_network.to_string());
    if let Some(m) = new_model {
        iface.model.model_type = Some(m.to_string());
    }
    Ok(())
}

pub fn set_vcpu(domain: &mut DomainXml, n: u32) {
    domain.vcpu.count = n;
}

pub fn set_memory_mib(domain: &mut DomainXml, mib: u64) {
    domain.memory = MemoryElem { unit: "MiB".to_string(), value: mib };
    domain.current_memory = Some(MemoryElem { unit: "MiB".to_string(), value: mib });
}

/// Stopped-only per spec.
pub fn set_machine_type(domain: &mut DomainXml, machine: &str) {
    domain.os.os_type.machine = Some(machine.to_string());
}

/// `path == None` switches to BIOS and removes `<nvram>` (spec §4.5).
pub fn set_uefi_file(domain: &mut DomainXml, path: Option<String>, secure_boot: bool) {
    match path {
        Some(p) => {
            domain.os.loader = Some(LoaderElem {
                readonly: Some("yes".to_string()),
                secure: Some(bool_yn(secure_boot)),
                path: Some(p),
            });
        }
        None => {
            domain.os.loader = None;
            domain.os.nvram = None;
        }
    }
}

pub fn set_graphics(domain: &mut DomainXml, graphics: &Graphics) {
    domain.devices.graphics.clear();
    if matches!(graphics.kind, GraphicsType::None) {
        return;
    }
    let graphics_type = match graphics.kind {
        GraphicsType::Vnc => "vnc",
        GraphicsType::Spice => "spice",
        GraphicsType::None => unreachable!(),
    };
    let listen = match graphics.listen {
        GraphicsListen::Address => vec![ListenElem {
            listen_type: "address".to_string(),
            address: graphics.address.clone(),
        }],
        GraphicsListen::None => Vec::new(),
    };
    domain.devices.graphics.push(GraphicsElem {
        graphics_type: graphics_type.to_string(),
        port: if graphics.auto_port { Some(-1) } else { graphics.port.map(|p| p as i32) },
        autoport: Some(bool_yn(graphics.auto_port)),
        passwd: if graphics.password_enabled { graphics.password.clone() } else { None },
        listen,
    });
}

pub fn get_graphics(domain: &DomainXml) -> Graphics {
    match domain.devices.graphics.first() {
        None => Graphics::default(),
        Some(g) => Graphics {
            kind: match g.graphics_type.as_str() {
                "vnc" => GraphicsType::Vnc,
                "spice" => GraphicsType::Spice,
                _ => GraphicsType::None,
            },
            listen: if g.listen.first().map(|l| l.listen_type == "address").unwrap_or(false) {
                GraphicsListen::Address
            } else {
                GraphicsListen::None
            },
            address: g.listen.first().and_then(|l| l.address.clone()),
            port: g.port.filter(|p| *p >= 0).map(|p| p as u16),
            auto_port: g.autoport.as_deref() == Some("yes"),
            password_enabled: g.passwd.is_some(),
            password: g.passwd.clone(),
        },
    }
}

/// True if the domain has SPICE channels, redirdevs, SPICE audio, or QXL
/// video beyond the primary SPICE graphics element (spec §4.5
/// `CheckForOtherSpiceDevices`).
pub fn has_other_spice_devices(domain: &DomainXml) -> bool {
    let spice_channels = domain.devices.channels.iter().any(|c| c.channel_type.as_deref() == Some("spicevmc"));
    let has_redirdev = !domain.devices.redirdevs.is_empty();
    let qxl_video = domain.devices.video.iter().any(|v| v.model.model_type.as_deref() == Some("qxl"));
    spice_channels || has_redirdev || qxl_video
}

/// Removes SPICE channels/redirdevs, falls back QXL video to virtio, and
/// ensures a VNC graphics element exists if none remains after the switch.
pub fn remove_spice_devices(domain: &mut DomainXml) {
    domain.devices.channels.retain(|c| c.channel_type.as_deref() != Some("spicevmc"));
    domain.devices.redirdevs.clear();
    for v in &mut domain.devices.video {
        if v.model.model_type.as_deref() == Some("qxl") {
            v.model.model_type = Some("virtio".to_string());
        }
    }
    domain.devices.graphics.retain(|g| g.graphics_type != "spice");
    if domain.devices.graphics.is_empty() {
        domain.devices.graphics.push(GraphicsElem {
            graphics_type: "vnc".to_string(),
            port: Some(-1),
            autoport: Some("yes".to_string()),
            passwd: None,
            listen: Vec::new(),
        });
    }
}

pub fn set_tpm(domain: &mut DomainXml, tpm: Option<&Tpm>) {
    domain.devices.tpm.clear();
    if let Some(t) = tpm {
        domain.devices.tpm.push(TpmElem {
            model: t.model.clone(),
            backend: t.version.as_ref().map(|v| TpmBackendElem { version: Some(v.clone()) }),
        });
    }
}

pub fn set_rng(domain: &mut DomainXml, rng: Option<&Rng>) {
    domain.devices.rng = rng.map(|r| RngElem {
        model: r.model.clone(),
        backend: r.backend.as_ref().map(|b| RngBackendElem { model: Some(b.clone()) }),
    });
}

pub fn set_watchdog(domain: &mut DomainXml, watchdog: Option<&Watchdog>) {
    domain.devices.watchdog = watchdog.map(|w| WatchdogElem { model: w.model.clone(), action: w.action.clone() });
}

pub fn set_input(domain: &mut DomainXml, input: &[InputDevice]) {
    domain.devices.input = input.iter().map(|i| InputElem { input_type: i.input_type.clone(), bus: i.bus.clone() }).collect();
}

/// Stopped-only per spec.
pub fn add_virtiofs(domain: &mut DomainXml, source: String, target: String, readonly: bool) {
    domain.devices.filesystems.push(FilesystemElem {
        fs_type: Some("mount".to_string()),
        accessmode: Some("passthrough".to_string()),
        readonly: if readonly { Some(ReadonlyMarker) } else { None },
        driver: Some(FsDriverElem { driver_type: Some("virtiofs".to_string()) }),
        source: FilesystemSourceElem { dir: Some(source) },
        target: FilesystemTargetElem { dir: target },
    });
    domain.memory_backing = Some(MemoryBackingElem {
        access: Some(MemoryAccessElem { mode: "shared".to_string() }),
        source: None,
    });
}

pub fn remove_virtiofs(domain: &mut DomainXml, target: &str) -> Result<()> {
    let before = domain.devices.filesystems.len();
    domain.devices.filesystems.retain(|f| f.target.dir != target);
    if domain.devices.filesystems.len() == before {
        return Err(Error::NotFound(format!("virtiofs share '{target}'")));
    }
    if domain.devices.filesystems.is_empty() {
        domain.memory_backing = None;
    }
    Ok(())
}

/// Builds the full cached [`VmInfo`] view from parsed XML plus its current
/// run state (spec §4.4, C4 composing over C2+C3).
pub fn to_vm_info(domain: &DomainXml, status: VmStatus, xml: String) -> VmInfo {
    let disks = domain
        .devices
        .disks
        .iter()
        .map(|d| DiskInfo {
            target: d.target.dev.clone().unwrap_or_default(),
            path: d.source.as_ref().and_then(|s| s.file.clone().or_else(|| s.dev.clone())),
            pool_volume: d.source.as_ref().and_then(|s| Some((s.pool.clone()?, s.volume.clone()?))),
            device: if d.device == "cdrom" { DiskDevice::Cdrom } else { DiskDevice::Disk },
            bus: parse_bus(d.target.bus.as_deref().unwrap_or("virtio")),
            cache: parse_cache(d.driver.as_ref().and_then(|dr| dr.cache.as_deref()).unwrap_or("none")),
            discard: parse_discard(d.driver.as_ref().and_then(|dr| dr.discard.as_deref()).unwrap_or("ignore")),
            status: DiskStatus::Enabled,
        })
        .chain(
            domain
                .metadata
                .as_ref()
                .and_then(|m| m.novahv.as_ref())
                .into_iter()
                .flat_map(|m| &m.disabled_disks)
                .filter_map(|e| quick_xml::de::from_str::<DiskElem>(&e.xml).ok())
                .map(|d| DiskInfo {
                    target: d.target.dev.clone().unwrap_or_default(),
                    path: d.source.as_ref().and_then(|s| s.file.clone().or_else(|| s.dev.clone())),
                    pool_volume: d.source.as_ref().and_then(|s| Some((s.pool.clone()?, s.volume.clone()?))),
                    device: if d.device == "cdrom" { DiskDevice::Cdrom } else { DiskDevice::Disk },
                    bus: parse_bus(d.target.bus.as_deref().unwrap_or("virtio")),
                    cache: DiskCache::None,
                    discard: DiskDiscard::Ignore,
                    status: DiskStatus::Disabled,
                }),
        )
        .collect();

    let networks = domain
        .devices
        .interfaces
        .iter()
        .map(|i| NetworkInterface {
            mac: i.mac.address.clone(),
            network: i.source.network.clone().unwrap_or_default(),
            model: i.model.model_type.clone().unwrap_or_default(),
        })
        .collect();

    let virtiofs = domain
        .devices
        .filesystems
        .iter()
        .map(|f| VirtiofsShare {
            source: f.source.dir.clone().unwrap_or_default(),
            target: f.target.dir.clone(),
            readonly: f.readonly.is_some(),
        })
        .collect();

    let mut boot_order: Vec<String> = domain
        .devices
        .disks
        .iter()
        .filter_map(|d| d.boot.as_ref().map(|b| (b.order, disk_identity(d).unwrap_or_default())))
        .chain(
            domain
                .devices
                .interfaces
                .iter()
                .filter_map(|i| i.boot.as_ref().map(|b| (b.order, i.mac.address.clone()))),
        )
        .collect::<Vec<_>>()
        .into_iter()
        .collect::<std::collections::BTreeMap<_, _>>()
        .into_values()
        .collect();
    boot_order.dedup();

    VmInfo {
        uuid: domain.uuid.clone(),
        name: domain.name.clone(),
        status,
        vcpu_count: domain.vcpu.count,
        memory_mib: convert_to_mib(domain.memory.value, &domain.memory.unit),
        machine_type: domain.os.os_type.machine.clone().unwrap_or_default(),
        firmware: Firmware {
            kind: Some(if domain.os.loader.is_some() { FirmwareType::Uefi } else { FirmwareType::Bios }),
            path: domain.os.loader.as_ref().and_then(|l| l.path.clone()),
            secure_boot: domain.os.loader.as_ref().and_then(|l| l.secure.as_deref()) == Some("yes"),
        },
        cpu_model: domain.cpu.as_ref().and_then(|c| c.model.as_ref()).map(|m| m.value.clone()),
        video_model: domain.devices.video.first().and_then(|v| v.model.model_type.clone()),
        sound_model: domain.devices.sound.first().map(|s| s.model.clone()),
        shared_memory: domain.memory_backing.is_some(),
        boot: Boot { menu_enabled: domain.os.bootmenu.as_ref().map(|b| b.enable == "yes").unwrap_or(false), order: boot_order },
        graphics: get_graphics(domain),
        tpm: domain
            .devices
            .tpm
            .iter()
            .map(|t| Tpm { model: t.model.clone(), version: t.backend.as_ref().and_then(|b| b.version.clone()) })
            .collect(),
        rng: domain
            .devices
            .rng
            .as_ref()
            .map(|r| Rng { model: r.model.clone(), backend: r.backend.as_ref().and_then(|b| b.model.clone()) })
            .unwrap_or_default(),
        watchdog: domain
            .devices
            .watchdog
            .as_ref()
            .map(|w| Watchdog { model: w.model.clone(), action: w.action.clone() })
            .unwrap_or_default(),
        networks,
        disks,
        virtiofs,
        device_inventory: DeviceInventory {
            usb: domain.devices.controllers.iter().filter(|c| c.controller_type == "usb").map(|c| c.model.clone().unwrap_or_default()).collect(),
            pci: domain.devices.hostdevs.iter().filter(|h| h.hostdev_type.as_deref() == Some("pci")).map(|_| "pci-hostdev".to_string()).collect(),
            serial: Vec::new(),
            input: domain.devices.input.iter().map(|i| i.input_type.clone()).collect(),
            controllers: domain.devices.controllers.iter().map(|c| c.controller_type.clone()).collect(),
        },
        xml,
    }
}

fn convert_to_mib(value: u64, unit: &str) -> u64 {
    match unit.to_ascii_lowercase().as_str() {
        "kib" | "k" => value / 1024,
        "mib" | "m" => value,
        "gib" | "g" => value * 1024,
        "bytes" | "b" => value / (1024 * 1024),
        _ => value / 1024,
    }
}

fn parse_bus(s: &str) -> DiskBus {
    match s {
        "sata" => DiskBus::Sata,
        "scsi" => DiskBus::Scsi,
        "ide" => DiskBus::Ide,
        "usb" => DiskBus::Usb,
        _ => DiskBus::Virtio,
    }
}

fn parse_cache(s: &str) -> DiskCache {
    match s {
        "writeback" => DiskCache::Writeback,
        "writethrough" => DiskCache::Writethrough,
        "directsync" => DiskCache::Directsync,
        "unsafe" => DiskCache::Unsafe,
        _ => DiskCache::None,
    }
}

fn parse_discard(s: &str) -> DiskDiscard {
    match s {
        "unmap" => DiskDiscard::Unmap,
        _ => DiskDiscard::Ignore,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::{parse_domain, serialize_domain};

    fn sample() -> DomainXml {
        parse_domain(
            r#"<domain type="kvm"><name>vm-a</name><uuid>u</uuid><memory unit="KiB">1048576</memory><vcpu>1</vcpu>
<os><type arch="x86_64">hvm</type></os>
<devices>
<disk type="file" device="disk"><source file="/a.qcow2"/><target dev="vda" bus="virtio"/></disk>
<interface type="network"><mac address="52:54:00:00:00:01"/><source network="default"/><model type="virtio"/></interface>
</devices></domain>"#,
        )
        .unwrap()
    }

    #[test]
    fn boot_info_is_idempotent() {
        let mut d = sample();
        let order = vec![DeviceIdentity::DiskPath("/a.qcow2".to_string())];
        set_boot_info(&mut d, true, &order).unwrap();
        let once = serialize_domain(&d).unwrap();
        set_boot_info(&mut d, true, &order).unwrap();
        let twice = serialize_domain(&d).unwrap();
        assert_eq!(once, twice);
        assert_eq!(d.devices.disks[0].boot.as_ref().unwrap().order, 1);
    }

    #[test]
    fn disable_then_enable_restores_disk() {
        let mut d = sample();
        let before = serialize_domain(&d).unwrap();
        disable_disk(&mut d, "vda").unwrap();
        assert!(d.devices.disks.is_empty());
        enable_disk(&mut d, "/a.qcow2").unwrap();
        assert_eq!(d.devices.disks.len(), 1);
        let after = serialize_domain(&d).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn next_free_target_skips_used_letters() {
        let d = sample();
        assert_eq!(next_free_target_dev(&d, DiskBus::Virtio).unwrap(), "vdb");
    }

    #[test]
    fn add_then_remove_virtiofs_is_noop() {
        let mut d = sample();
        let before = serialize_domain(&d).unwrap();
        add_virtiofs(&mut d, "/host/share".to_string(), "share0".to_string(), false);
        remove_virtiofs(&mut d, "share0").unwrap();
        let after = serialize_domain(&d).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn spice_cleanup_falls_back_qxl_and_adds_vnc() {
        let mut d = sample();
        d.devices.graphics.push(GraphicsElem { graphics_type: "spice".to_string(), port: Some(-1), autoport: Some("yes".to_string()), passwd: None, listen: Vec::new() });
        d.devices.video.push(VideoElem { model: ModelElem { model_type: Some("qxl".to_string()) } });
        d.devices.channels.push(ChannelElem { channel_type: Some("spicevmc".to_string()), target: None });
        assert!(has_other_spice_devices(&d));
        remove_spice_devices(&mut d);
        assert!(!has_other_spice_devices(&d));
        assert_eq!(d.devices.video[0].model.model_type.as_deref(), Some("virtio"));
        assert_eq!(d.devices.graphics.len(), 1);
        assert_eq!(d.devices.graphics[0].graphics_type, "vnc");
    }
}
