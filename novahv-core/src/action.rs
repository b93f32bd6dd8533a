//! VM Action Service (C5): mutating operations expressed as XML transforms
//! plus live/config flags (spec §4.5).
//!
//! Every mutation follows the same pattern: read XML, transform the parsed
//! struct in memory, `defineXML`, then optionally issue a live-update call.
//! Live-update failure never rolls back the persistent change — it's
//! reported as [`Error::PartialSuccess`].

use std::sync::Arc;
use tracing::instrument;

use crate::backend::{DomainRunState, LibvirtConnection, UndefineFlags};
use crate::cache::MetadataCache;
use crate::error::{Error, Result};
use crate::types::{DiskBus, DiskCache, DiskDevice, DiskDiscard, Graphics, InputDevice, Rng, Tpm, Watchdog};
use crate::xml::{self, edit::DeviceIdentity};
use novahv_common::{log_success, log_vm, log_warn};

/// C5: every method takes the connection it should act on; the caller
/// (typically C11 wrapping a worker) is responsible for resolving `uuid`'s
/// connection from C1 first.
pub struct VmActionService {
    cache: Arc<MetadataCache>,
}

impl VmActionService {
    pub fn new(cache: Arc<MetadataCache>) -> Self {
        Self { cache }
    }

    async fn read_write(
        &self,
        conn: &dyn LibvirtConnection,
        uuid: &str,
        f: impl FnOnce(&mut xml::model::DomainXml) -> Result<()>,
    ) -> Result<()> {
        let xml_str = conn.domain_xml(uuid).await?;
        let mut domain = xml::parse_domain(&xml_str)?;
        f(&mut domain)?;
        let serialized = xml::serialize_domain(&domain)?;
        conn.define_xml(&serialized).await?;
        self.cache.invalidate_vm(uuid).await;
        Ok(())
    }

    async fn is_active(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<bool> {
        Ok(matches!(conn.domain_info(uuid).await?.state, DomainRunState::Running | DomainRunState::Paused))
    }

    async fn require_stopped(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<()> {
        if self.is_active(conn, uuid).await? {
            return Err(Error::Precondition("VM must be stopped for this operation".into()));
        }
        Ok(())
    }

    // -- lifecycle ---------------------------------------------------------

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn start(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<()> {
        conn.domain_create(uuid).await?;
        self.cache.invalidate_vm(uuid).await;
        log_vm!("start", uuid, "VM started");
        Ok(())
    }

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn shutdown(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<()> {
        if !self.is_active(conn, uuid).await? {
            return Err(Error::Precondition("VM is not active".into()));
        }
        conn.domain_shutdown(uuid).await?;
        self.cache.invalidate_vm(uuid).await;
        log_vm!("shutdown", uuid, "graceful shutdown requested");
        Ok(())
    }

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn force_off(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<()> {
        conn.domain_destroy(uuid).await?;
        self.cache.invalidate_vm(uuid).await;
        log_vm!("force_off", uuid, "VM forcefully destroyed");
        Ok(())
    }

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn pause(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<()> {
        conn.domain_suspend(uuid).await?;
        self.cache.invalidate_vm(uuid).await;
        Ok(())
    }

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn resume(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<()> {
        conn.domain_resume(uuid).await?;
        self.cache.invalidate_vm(uuid).await;
        Ok(())
    }

    /// Destroy if active, undefine with `SNAPSHOTS_METADATA` (and `NVRAM` if
    /// requested), then delete backing volumes of enabled disks that resolve
    /// to a managed pool volume. Unmanaged disks are skipped with a warning
    /// (spec §4.5 `Delete`).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn delete(
        &self,
        conn: &dyn LibvirtConnection,
        uuid: &str,
        delete_storage: bool,
        delete_nvram: bool,
    ) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        if self.is_active(conn, uuid).await? {
            conn.domain_destroy(uuid).await?;
        }
        let xml_str = conn.domain_xml(uuid).await?;
        let domain = xml::parse_domain(&xml_str)?;

        conn.domain_undefine(uuid, UndefineFlags { snapshots_metadata: true, nvram: delete_nvram }).await?;

        if delete_storage {
            for disk in &domain.devices.disks {
                if let Some((pool, volume)) = disk.source.as_ref().and_then(|s| Some((s.pool.clone()?, s.volume.clone()?))) {
                    if let Err(e) = conn.delete_volume(&pool, &volume).await {
                        warnings.push(format!("could not delete managed volume {pool}/{volume}: {e}"));
                    }
                } else {
                    warnings.push(format!(
                        "disk '{}' is not a managed pool volume; skipped",
                        disk.target.dev.clone().unwrap_or_default()
                    ));
                }
            }
        }
        self.cache.remove(uuid).await;
        log_vm!("delete", uuid, "VM deleted ({} warnings)", warnings.len());
        for w in &warnings {
            log_warn!("action", "{}", w);
        }
        Ok(warnings)
    }

    // -- disks ---------------------------------------------------------

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn add_disk(
        &self,
        conn: &dyn LibvirtConnection,
        uuid: &str,
        path: Option<String>,
        pool_volume: Option<(String, String)>,
        device: DiskDevice,
        bus: DiskBus,
        create: bool,
        size_gb: Option<u64>,
        format: Option<String>,
    ) -> Result<()> {
        if create {
            let (pool, _) = pool_volume.clone().ok_or_else(|| {
                Error::Invalid("creating a disk requires a target pool/volume name".into())
            })?;
            let size_gb = size_gb.ok_or_else(|| Error::Invalid("sizeGB is required when create=true".into()))?;
            let fmt = format.clone().unwrap_or_else(|| "qcow2".to_string());
            let vol_name = pool_volume.as_ref().map(|(_, v)| v.clone()).unwrap_or_default();
            let vol_xml = xml::serialize_volume(&xml::model::VolumeXml {
                name: vol_name,
                capacity: xml::model::MemoryElem { unit: "GiB".to_string(), value: size_gb },
                allocation: None,
                target: Some(xml::model::VolumeTargetElem {
                    path: None,
                    format: Some(xml::model::VolumeFormatElem { format_type: fmt.clone() }),
                }),
            })?;
            conn.create_volume_xml(&pool, &vol_xml).await?;
        }

        self.read_write(conn, uuid, |domain| {
            let target = xml::edit::next_free_target_dev(domain, bus)?;
            xml::edit::add_disk(domain, target, device, bus, path.clone(), pool_volume.clone(), format.clone());
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn remove_disk(&self, conn: &dyn LibvirtConnection, uuid: &str, identifier: &str) -> Result<bool> {
        let mut was_stray = false;
        self.read_write(conn, uuid, |domain| {
            was_stray = xml::edit::remove_disk(domain, identifier)?;
            Ok(())
        })
        .await?;
        if was_stray {
            log_warn!("action", "removed '{}' from metadata only; no matching managed pool entry", identifier);
        }
        Ok(was_stray)
    }

    /// Requires VM stopped (spec §4.5).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn enable_disk(&self, conn: &dyn LibvirtConnection, uuid: &str, identifier: &str) -> Result<()> {
        self.require_stopped(conn, uuid).await?;
        self.read_write(conn, uuid, |domain| xml::edit::enable_disk(domain, identifier)).await
    }

    /// Requires VM stopped (spec §4.5).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn disable_disk(&self, conn: &dyn LibvirtConnection, uuid: &str, identifier: &str) -> Result<()> {
        self.require_stopped(conn, uuid).await?;
        self.read_write(conn, uuid, |domain| xml::edit::disable_disk(domain, identifier)).await
    }

    /// Requires VM stopped (spec §4.5).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_disk_properties(
        &self,
        conn: &dyn LibvirtConnection,
        uuid: &str,
        identifier: &str,
        cache: Option<DiskCache>,
        discard: Option<DiskDiscard>,
        bus: Option<DiskBus>,
    ) -> Result<()> {
        self.require_stopped(conn, uuid).await?;
        self.read_write(conn, uuid, |domain| xml::edit::set_disk_properties(domain, identifier, cache, discard, bus)).await
    }

    // -- network interfaces ---------------------------------------------

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn add_network_interface(&self, conn: &dyn LibvirtConnection, uuid: &str, network: String, model: String) -> Result<()> {
        let mac = random_mac();
        self.read_write(conn, uuid, |domain| {
            xml::edit::add_network_interface(domain, mac.clone(), network.clone(), model.clone());
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn remove_network_interface(&self, conn: &dyn LibvirtConnection, uuid: &str, mac: &str) -> Result<()> {
        self.read_write(conn, uuid, |domain| xml::edit::remove_network_interface(domain, mac)).await
    }

    /// Uses `updateDeviceFlags`; may apply live (spec §4.5).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn change_vm_network(
        &self,
        conn: &dyn LibvirtConnection,
        uuid: &str,
        mac: &str,
        new_network: &str,
        new_model: Option<&str>,
    ) -> Result<()> {
        let xml_str = conn.domain_xml(uuid).await?;
        let mut domain = xml::parse_domain(&xml_str)?;
        xml::edit::change_vm_network(&mut domain, mac, new_network, new_model)?;
        let serialized = xml::serialize_domain(&domain)?;
        conn.define_xml(&serialized).await?;
        self.cache.invalidate_vm(uuid).await;

        if self.is_active(conn, uuid).await? {
            let iface = domain
                .devices
                .interfaces
                .iter()
                .find(|i| i.mac.address.eq_ignore_ascii_case(mac))
                .ok_or_else(|| Error::NotFound(format!("network interface '{mac}'")))?;
            let iface_xml = quick_xml::se::to_string(iface)
                .map_err(|e| Error::Invalid(format!("failed to serialize interface fragment: {e}")))?;
            if let Err(e) = conn.update_device(uuid, &iface_xml, true).await {
                return Err(Error::PartialSuccess(format!("persistent network change applied, live update failed: {e}")));
            }
        }
        Ok(())
    }

    // -- cpu / memory ------------------------------------------------------

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_vcpu(&self, conn: &dyn LibvirtConnection, uuid: &str, n: u32) -> Result<()> {
        self.read_write(conn, uuid, |domain| {
            xml::edit::set_vcpu(domain, n);
            Ok(())
        })
        .await?;
        if self.is_active(conn, uuid).await? {
            if let Err(e) = conn.set_vcpus(uuid, n, true).await {
                return Err(Error::PartialSuccess(format!("persistent vCPU change applied, live update failed: {e}")));
            }
        }
        Ok(())
    }

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_memory(&self, conn: &dyn LibvirtConnection, uuid: &str, mib: u64) -> Result<()> {
        self.read_write(conn, uuid, |domain| {
            xml::edit::set_memory_mib(domain, mib);
            Ok(())
        })
        .await?;
        if self.is_active(conn, uuid).await? {
            if let Err(e) = conn.set_memory_mib(uuid, mib, true).await {
                return Err(Error::PartialSuccess(format!("persistent memory change applied, live update failed: {e}")));
            }
        }
        Ok(())
    }

    // -- firmware / machine ------------------------------------------------

    /// Stopped only (spec §4.5).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_machine_type(&self, conn: &dyn LibvirtConnection, uuid: &str, machine: &str) -> Result<()> {
        self.require_stopped(conn, uuid).await?;
        self.read_write(conn, uuid, |domain| {
            xml::edit::set_machine_type(domain, machine);
            Ok(())
        })
        .await
    }

    /// Stopped only; `path == None` switches to BIOS and removes `<nvram>`.
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_uefi_file(&self, conn: &dyn LibvirtConnection, uuid: &str, path: Option<String>, secure_boot: bool) -> Result<()> {
        self.require_stopped(conn, uuid).await?;
        self.read_write(conn, uuid, |domain| {
            xml::edit::set_uefi_file(domain, path.clone(), secure_boot);
            Ok(())
        })
        .await
    }

    // -- boot ---------------------------------------------------------------

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_boot_info(&self, conn: &dyn LibvirtConnection, uuid: &str, menu_enabled: bool, order: Vec<DeviceIdentity>) -> Result<()> {
        self.read_write(conn, uuid, |domain| xml::edit::set_boot_info(domain, menu_enabled, &order)).await
    }

    // -- graphics ------------------------------------------------------------

    /// Stopped only. On SPICE→VNC, cleans up any remaining SPICE-only
    /// devices first (spec §4.5).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_vm_graphics(&self, conn: &dyn LibvirtConnection, uuid: &str, graphics: Graphics) -> Result<()> {
        self.require_stopped(conn, uuid).await?;
        self.read_write(conn, uuid, |domain| {
            let switching_away_from_spice =
                domain.devices.graphics.iter().any(|g| g.graphics_type == "spice") && graphics.kind != crate::types::GraphicsType::Spice;
            if switching_away_from_spice && xml::edit::has_other_spice_devices(domain) {
                xml::edit::remove_spice_devices(domain);
            }
            xml::edit::set_graphics(domain, &graphics);
            Ok(())
        })
        .await
    }

    pub async fn get_vm_graphics(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<Graphics> {
        let xml_str = conn.domain_xml(uuid).await?;
        let domain = xml::parse_domain(&xml_str)?;
        Ok(xml::edit::get_graphics(&domain))
    }

    pub async fn check_for_other_spice_devices(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<bool> {
        let xml_str = conn.domain_xml(uuid).await?;
        let domain = xml::parse_domain(&xml_str)?;
        Ok(xml::edit::has_other_spice_devices(&domain))
    }

    // -- tpm / rng / watchdog ------------------------------------------------

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_tpm(&self, conn: &dyn LibvirtConnection, uuid: &str, tpm: Option<Tpm>) -> Result<()> {
        self.read_write(conn, uuid, |domain| {
            xml::edit::set_tpm(domain, tpm.as_ref());
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_rng(&self, conn: &dyn LibvirtConnection, uuid: &str, rng: Option<Rng>) -> Result<()> {
        self.read_write(conn, uuid, |domain| {
            xml::edit::set_rng(domain, rng.as_ref());
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_watchdog(&self, conn: &dyn LibvirtConnection, uuid: &str, watchdog: Option<Watchdog>) -> Result<()> {
        self.read_write(conn, uuid, |domain| {
            xml::edit::set_watchdog(domain, watchdog.as_ref());
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn set_input(&self, conn: &dyn LibvirtConnection, uuid: &str, input: Vec<InputDevice>) -> Result<()> {
        self.read_write(conn, uuid, |domain| {
            xml::edit::set_input(domain, &input);
            Ok(())
        })
        .await
    }

    // -- virtiofs ------------------------------------------------------------

    /// Stopped only (spec §4.5).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn add_virtiofs(&self, conn: &dyn LibvirtConnection, uuid: &str, source: String, target: String, readonly: bool) -> Result<()> {
        self.require_stopped(conn, uuid).await?;
        self.read_write(conn, uuid, |domain| {
            xml::edit::add_virtiofs(domain, source.clone(), target.clone(), readonly);
            Ok(())
        })
        .await
    }

    /// Stopped only (spec §4.5).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn remove_virtiofs(&self, conn: &dyn LibvirtConnection, uuid: &str, target: &str) -> Result<()> {
        self.require_stopped(conn, uuid).await?;
        self.read_write(conn, uuid, |domain| xml::edit::remove_virtiofs(domain, target)).await
    }

    /// Destructive machine-type migration i440fx → q35: strips PCI address
    /// bindings that can't be rehomed before re-defining. Refuses if the
    /// guest has devices this crate cannot safely rehome (Open Question in
    /// spec §9, resolved here: hostdev passthrough devices block the switch
    /// since their PCI address is guest-ABI-visible).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn migrate_machine_type_to_q35(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<()> {
        self.require_stopped(conn, uuid).await?;
        self.read_write(conn, uuid, |domain| {
            if !domain.devices.hostdevs.is_empty() {
                return Err(Error::Precondition(
                    "cannot retopologize to q35: guest has hostdev passthrough devices that cannot be rehomed".into(),
                ));
            }
            xml::edit::set_machine_type(domain, "pc-q35-8.0");
            log_success!("action", "migrated VM to q35 topology");
            Ok(())
        })
        .await
    }
}

pub(crate) fn random_mac() -> String {
    use rand::Rng as _;
    let mut rng = rand::thread_rng();
    format!(
        "52:54:00:{:02x}:{:02x}:{:02x}",
        rng.gen::<u8>(),
        rng.gen::<u8>(),
        rng.gen::<u8>()
    )
}
