//! The thin, testable seam between `novahv-core` and the actual libvirt
//! client library.
//!
//! Every other component (C3-C9) talks to a hypervisor host only through
//! `Arc<dyn LibvirtConnection>`, never through `virt::connect::Connect`
//! directly. This is what lets C4-C9 run against [`MockConnection`] in tests
//! without a running `libvirtd`, the same role the teacher crate's
//! `MockBackend` plays against its `Hypervisor` trait.

use async_trait::async_trait;
use std::fs::File;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// Power state of a domain, straight off `virDomainState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainRunState {
    Running,
    Paused,
    Shutoff,
    Crashed,
    Other,
}

/// Cheap "domain info" tuple — the thing C3's short-TTL tier caches.
#[derive(Debug, Clone, Copy)]
pub struct RawDomainInfo {
    pub state: DomainRunState,
    pub max_mem_kib: u64,
    pub mem_kib: u64,
    pub nr_virt_cpu: u32,
    pub cpu_time_ns: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RawNetworkInfo {
    pub active: bool,
    pub autostart: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RawPoolInfo {
    pub active: bool,
    pub autostart: bool,
    pub capacity_bytes: u64,
    pub allocation_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct RawVolumeInfo {
    pub path: String,
    pub capacity_bytes: u64,
    pub allocation_bytes: u64,
}

/// Flags for `undefine_domain`, mirroring spec §4.5's `Delete`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UndefineFlags {
    pub snapshots_metadata: bool,
    pub nvram: bool,
}

/// Flags for `migrate`, mirroring spec §4.8.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateFlags {
    pub live: bool,
    pub copy_storage_all: bool,
    pub unsafe_: bool,
    pub persistent: bool,
    pub compressed: bool,
    pub tunnelled: bool,
}

/// Result of a CPU compatibility check (`compareCPU`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuCompareResult {
    Identical,
    Superset,
    Incompatible,
}

/// Everything above C3 calls through this trait rather than touching
/// `virt::connect::Connect` directly.
#[async_trait]
pub trait LibvirtConnection: Send + Sync {
    fn uri(&self) -> &str;

    async fn lib_version(&self) -> Result<u64>;
    async fn is_alive(&self) -> Result<bool>;
    async fn close(&self) -> Result<()>;

    // -- domains ---------------------------------------------------------
    async fn list_domain_uuids(&self) -> Result<Vec<String>>;
    async fn domain_info(&self, uuid: &str) -> Result<RawDomainInfo>;
    async fn domain_xml(&self, uuid: &str) -> Result<String>;
    async fn define_xml(&self, xml: &str) -> Result<String>;
    async fn domain_create(&self, uuid: &str) -> Result<()>;
    async fn domain_shutdown(&self, uuid: &str) -> Result<()>;
    async fn domain_destroy(&self, uuid: &str) -> Result<()>;
    async fn domain_suspend(&self, uuid: &str) -> Result<()>;
    async fn domain_resume(&self, uuid: &str) -> Result<()>;
    async fn domain_undefine(&self, uuid: &str, flags: UndefineFlags) -> Result<()>;
    async fn attach_device(&self, uuid: &str, xml: &str, live: bool) -> Result<()>;
    async fn detach_device(&self, uuid: &str, xml: &str, live: bool) -> Result<()>;
    async fn update_device(&self, uuid: &str, xml: &str, live: bool) -> Result<()>;
    async fn set_vcpus(&self, uuid: &str, n: u32, live: bool) -> Result<()>;
    async fn set_memory_mib(&self, uuid: &str, mib: u64, live: bool) -> Result<()>;
    async fn block_stats(&self, uuid: &str, dev: &str) -> Result<(u64, u64)>;
    async fn interface_stats(&self, uuid: &str, iface: &str) -> Result<(u64, u64)>;
    async fn compare_cpu(&self, domain_cpu_xml: &str) -> Result<CpuCompareResult>;
    async fn migrate(&self, uuid: &str, dest_uri: &str, flags: MigrateFlags) -> Result<()>;

    // -- networks ----------------------------------------------------------
    async fn list_network_names(&self) -> Result<Vec<String>>;
    async fn network_is_active(&self, name: &str) -> Result<bool>;
    async fn network_info(&self, name: &str) -> Result<RawNetworkInfo>;
    async fn network_xml(&self, name: &str) -> Result<String>;
    async fn network_define_and_start(&self, xml: &str) -> Result<String>;
    async fn network_set_active(&self, name: &str, active: bool) -> Result<()>;
    async fn network_set_autostart(&self, name: &str, autostart: bool) -> Result<()>;
    async fn network_destroy_undefine(&self, name: &str) -> Result<()>;

    // -- storage pools / volumes -------------------------------------------
    async fn list_pool_names(&self) -> Result<Vec<String>>;
    async fn pool_info(&self, name: &str) -> Result<RawPoolInfo>;
    async fn pool_xml(&self, name: &str) -> Result<String>;
    async fn pool_define_and_start(&self, xml: &str) -> Result<String>;
    async fn pool_set_active(&self, name: &str, active: bool) -> Result<()>;
    async fn pool_set_autostart(&self, name: &str, autostart: bool) -> Result<()>;
    async fn pool_destroy_undefine(&self, name: &str) -> Result<()>;
    async fn pool_refresh(&self, name: &str) -> Result<()>;
    async fn list_volume_names(&self, pool: &str) -> Result<Vec<String>>;
    async fn volume_info(&self, pool: &str, vol: &str) -> Result<RawVolumeInfo>;
    async fn volume_xml(&self, pool: &str, vol: &str) -> Result<String>;
    async fn create_volume_xml(&self, pool: &str, xml: &str) -> Result<()>;
    async fn delete_volume(&self, pool: &str, vol: &str) -> Result<()>;

    /// Streams the full contents of `vol` into `dest`, calling `on_bytes`
    /// with the cumulative byte count after every chunk.
    async fn download_volume(
        &self,
        pool: &str,
        vol: &str,
        dest: File,
        on_bytes: Box<dyn FnMut(u64) + Send>,
    ) -> Result<()>;

    /// Streams `src` into the full contents of `vol`.
    async fn upload_volume(
        &self,
        pool: &str,
        vol: &str,
        src: File,
        on_bytes: Box<dyn FnMut(u64) + Send>,
    ) -> Result<()>;
}

// =============================================================================
// Mock backend — in-memory, used by the test suite and by any embedder that
// wants to run without a libvirtd. Mirrors the teacher crate's `MockBackend`.
// =============================================================================

pub struct MockDomain {
    xml: String,
    pub state: DomainRunState,
    cpu_time_ns: u64,
}

struct MockPool {
    xml: String,
    active: bool,
    autostart: bool,
}

struct MockVolume {
    xml: String,
    capacity_bytes: u64,
    allocation_bytes: u64,
    data: Vec<u8>,
}

struct MockNetwork {
    xml: String,
    active: bool,
    autostart: bool,
}

/// In-memory stand-in for a libvirt connection, used by tests.
pub struct MockConnection {
    uri: String,
    pub domains: Mutex<std::collections::HashMap<String, MockDomain>>,
    pub pools: Mutex<std::collections::HashMap<String, MockPool>>,
    pub volumes: Mutex<std::collections::HashMap<(String, String), MockVolume>>,
    networks: Mutex<std::collections::HashMap<String, MockNetwork>>,
    alive: std::sync::atomic::AtomicBool,
}

impl MockConnection {
    pub fn new(uri: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            uri: uri.into(),
            domains: Mutex::new(Default::default()),
            pools: Mutex::new(Default::default()),
            volumes: Mutex::new(Default::default()),
            networks: Mutex::new(Default::default()),
            alive: std::sync::atomic::AtomicBool::new(true),
        })
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, std::sync::atomic::Ordering::SeqCst);
    }

    /// Test helper: defines a domain from XML and returns its uuid, reusing
    /// the same `<uuid>` extraction `define_xml` does.
    pub fn seed_domain(&self, uuid: &str, xml: &str, state: DomainRunState) {
        self.domains.lock().unwrap().insert(
            uuid.to_string(),
            MockDomain { xml: xml.to_string(), state, cpu_time_ns: 0 },
        );
    }

    pub fn seed_pool(&self, name: &str, xml: &str, active: bool) {
        self.pools.lock().unwrap().insert(
            name.to_string(),
            MockPool { xml: xml.to_string(), active, autostart: false },
        );
    }

    pub fn seed_volume(&self, pool: &str, name: &str, xml: &str, capacity: u64, data: Vec<u8>) {
        self.volumes.lock().unwrap().insert(
            (pool.to_string(), name.to_string()),
            MockVolume { xml: xml.to_string(), capacity_bytes: capacity, allocation_bytes: data.len() as u64, data },
        );
    }

    pub fn seed_network(&self, name: &str, active: bool) {
        self.networks.lock().unwrap().insert(
            name.to_string(),
            MockNetwork { xml: format!("<network><name>{name}</name></network>"), active, autostart: false },
        );
    }
}

fn extract_uuid(xml: &str) -> Option<String> {
    let start = xml.find("<uuid>")? + "<uuid>".len();
    let end = xml[start..].find("</uuid>")? + start;
    Some(xml[start..end].trim().to_string())
}

fn extract_name(xml: &str) -> Option<String> {
    let start = xml.find("<name>")? + "<name>".len();
    let end = xml[start..].find("</name>")? + start;
    Some(xml[start..end].trim().to_string())
}

#[async_trait]
impl LibvirtConnection for MockConnection {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn lib_version(&self) -> Result<u64> {
        Ok(9_000_000)
    }

    async fn is_alive(&self) -> Result<bool> {
        Ok(self.alive.load(std::sync::atomic::Ordering::SeqCst))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn list_domain_uuids(&self) -> Result<Vec<String>> {
        Ok(self.domains.lock().unwrap().keys().cloned().collect())
    }

    async fn domain_info(&self, uuid: &str) -> Result<RawDomainInfo> {
        let domains = self.domains.lock().unwrap();
        let d = domains.get(uuid).ok_or_else(|| Error::NotFound(uuid.to_string()))?;
        Ok(RawDomainInfo {
            state: d.state,
            max_mem_kib: 2 * 1024 * 1024,
            mem_kib: 1024 * 1024,
            nr_virt_cpu: 2,
            cpu_time_ns: d.cpu_time_ns,
        })
    }

    async fn domain_xml(&self, uuid: &str) -> Result<String> {
        let domains = self.domains.lock().unwrap();
        domains.get(uuid).map(|d| d.xml.clone()).ok_or_else(|| Error::NotFound(uuid.to_string()))
    }

    async fn define_xml(&self, xml: &str) -> Result<String> {
        let uuid = extract_uuid(xml)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut domains = self.domains.lock().unwrap();
        let state = domains.get(&uuid).map(|d| d.state).unwrap_or(DomainRunState::Shutoff);
        let cpu_time_ns = domains.get(&uuid).map(|d| d.cpu_time_ns).unwrap_or(0);
        domains.insert(uuid.clone(), MockDomain { xml: xml.to_string(), state, cpu_time_ns });
        Ok(uuid)
    }

    async fn domain_create(&self, uuid: &str) -> Result<()> {
        let mut domains = self.domains.lock().unwrap();
        let d = domains.get_mut(uuid).ok_or_else(|| Error::NotFound(uuid.to_string()))?;
        d.state = DomainRunState::Running;
        Ok(())
    }

    async fn domain_shutdown(&self, uuid: &str) -> Result<()> {
        let mut domains = self.domains.lock().unwrap();
        let d = domains.get_mut(uuid).ok_or_else(|| Error::NotFound(uuid.to_string()))?;
        d.state = DomainRunState::Shutoff;
        Ok(())
    }

    async fn domain_destroy(&self, uuid: &str) -> Result<()> {
        self.domain_shutdown(uuid).await
    }

    async fn domain_suspend(&self, uuid: &str) -> Result<()> {
        let mut domains = self.domains.lock().unwrap();
        let d = domains.get_mut(uuid).ok_or_else(|| Error::NotFound(uuid.to_string()))?;
        d.state = DomainRunState::Paused;
        Ok(())
    }

    async fn domain_resume(&self, uuid: &str) -> Result<()> {
        let mut domains = self.domains.lock().unwrap();
        let d = domains.get_mut(uuid).ok_or_else(|| Error::NotFound(uuid.to_string()))?;
        d.state = DomainRunState::Running;
        Ok(())
    }

    async fn domain_undefine(&self, uuid: &str, _flags: UndefineFlags) -> Result<()> {
        self.domains.lock().unwrap().remove(uuid).ok_or_else(|| Error::NotFound(uuid.to_string()))?;
        Ok(())
    }

    async fn attach_device(&self, uuid: &str, _xml: &str, _live: bool) -> Result<()> {
        if !self.domains.lock().unwrap().contains_key(uuid) {
            return Err(Error::NotFound(uuid.to_string()));
        }
        Ok(())
    }

    async fn detach_device(&self, uuid: &str, _xml: &str, _live: bool) -> Result<()> {
        if !self.domains.lock().unwrap().contains_key(uuid) {
            return Err(Error::NotFound(uuid.to_string()));
        }
        Ok(())
    }

    async fn update_device(&self, uuid: &str, _xml: &str, _live: bool) -> Result<()> {
        if !self.domains.lock().unwrap().contains_key(uuid) {
            return Err(Error::NotFound(uuid.to_string()));
        }
        Ok(())
    }

    async fn set_vcpus(&self, uuid: &str, _n: u32, _live: bool) -> Result<()> {
        if !self.domains.lock().unwrap().contains_key(uuid) {
            return Err(Error::NotFound(uuid.to_string()));
        }
        Ok(())
    }

    async fn set_memory_mib(&self, uuid: &str, _mib: u64, _live: bool) -> Result<()> {
        if !self.domains.lock().unwrap().contains_key(uuid) {
            return Err(Error::NotFound(uuid.to_string()));
        }
        Ok(())
    }

    async fn block_stats(&self, uuid: &str, _dev: &str) -> Result<(u64, u64)> {
        if !self.domains.lock().unwrap().contains_key(uuid) {
            return Err(Error::NotFound(uuid.to_string()));
        }
        Ok((0, 0))
    }

    async fn interface_stats(&self, uuid: &str, _iface: &str) -> Result<(u64, u64)> {
        if !self.domains.lock().unwrap().contains_key(uuid) {
            return Err(Error::NotFound(uuid.to_string()));
        }
        Ok((0, 0))
    }

    async fn compare_cpu(&self, _domain_cpu_xml: &str) -> Result<CpuCompareResult> {
        Ok(CpuCompareResult::Identical)
    }

    async fn migrate(&self, uuid: &str, _dest_uri: &str, _flags: MigrateFlags) -> Result<()> {
        self.domains.lock().unwrap().remove(uuid).ok_or_else(|| Error::NotFound(uuid.to_string()))?;
        Ok(())
    }

    async fn list_network_names(&self) -> Result<Vec<String>> {
        Ok(self.networks.lock().unwrap().keys().cloned().collect())
    }

    async fn network_is_active(&self, name: &str) -> Result<bool> {
        Ok(self.networks.lock().unwrap().get(name).map(|n| n.active).unwrap_or(false))
    }

    async fn network_info(&self, name: &str) -> Result<RawNetworkInfo> {
        let networks = self.networks.lock().unwrap();
        let n = networks.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(RawNetworkInfo { active: n.active, autostart: n.autostart })
    }

    async fn network_xml(&self, name: &str) -> Result<String> {
        self.networks.lock().unwrap().get(name).map(|n| n.xml.clone()).ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn network_define_and_start(&self, xml: &str) -> Result<String> {
        let name = extract_name(xml).ok_or_else(|| Error::Invalid("network xml missing <name>".into()))?;
        self.networks.lock().unwrap().insert(name.clone(), MockNetwork { xml: xml.to_string(), active: true, autostart: false });
        Ok(name)
    }

    async fn network_set_active(&self, name: &str, active: bool) -> Result<()> {
        let mut networks = self.networks.lock().unwrap();
        let n = networks.get_mut(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        n.active = active;
        Ok(())
    }

    async fn network_set_autostart(&self, name: &str, autostart: bool) -> Result<()> {
        let mut networks = self.networks.lock().unwrap();
        let n = networks.get_mut(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        n.autostart = autostart;
        Ok(())
    }

    async fn network_destroy_undefine(&self, name: &str) -> Result<()> {
        self.networks.lock().unwrap().remove(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(())
    }

    async fn list_pool_names(&self) -> Result<Vec<String>> {
        Ok(self.pools.lock().unwrap().keys().cloned().collect())
    }

    async fn pool_info(&self, name: &str) -> Result<RawPoolInfo> {
        let pools = self.pools.lock().unwrap();
        let p = pools.get(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        let vols = self.volumes.lock().unwrap();
        let (capacity, allocation) = vols
            .iter()
            .filter(|((pool, _), _)| pool == name)
            .fold((0u64, 0u64), |(c, a), (_, v)| (c + v.capacity_bytes, a + v.allocation_bytes));
        Ok(RawPoolInfo { active: p.active, autostart: p.autostart, capacity_bytes: capacity, allocation_bytes: allocation })
    }

    async fn pool_xml(&self, name: &str) -> Result<String> {
        self.pools.lock().unwrap().get(name).map(|p| p.xml.clone()).ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn pool_define_and_start(&self, xml: &str) -> Result<String> {
        let name = extract_name(xml).ok_or_else(|| Error::Invalid("pool xml missing <name>".into()))?;
        self.pools.lock().unwrap().insert(name.clone(), MockPool { xml: xml.to_string(), active: true, autostart: false });
        Ok(name)
    }

    async fn pool_set_active(&self, name: &str, active: bool) -> Result<()> {
        let mut pools = self.pools.lock().unwrap();
        let p = pools.get_mut(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        p.active = active;
        Ok(())
    }

    async fn pool_set_autostart(&self, name: &str, autostart: bool) -> Result<()> {
        let mut pools = self.pools.lock().unwrap();
        let p = pools.get_mut(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        p.autostart = autostart;
        Ok(())
    }

    async fn pool_destroy_undefine(&self, name: &str) -> Result<()> {
        self.pools.lock().unwrap().remove(name).ok_or_else(|| Error::NotFound(name.to_string()))?;
        Ok(())
    }

    async fn pool_refresh(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn list_volume_names(&self, pool: &str) -> Result<Vec<String>> {
        Ok(self
            .volumes
            .lock()
            .unwrap()
            .keys()
            .filter(|(p, _)| p == pool)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn volume_info(&self, pool: &str, vol: &str) -> Result<RawVolumeInfo> {
        let vols = self.volumes.lock().unwrap();
        let v = vols
            .get(&(pool.to_string(), vol.to_string()))
            .ok_or_else(|| Error::NotFound(format!("{pool}/{vol}")))?;
        Ok(RawVolumeInfo {
            path: format!("/var/lib/novahv/pools/{pool}/{vol}"),
            capacity_bytes: v.capacity_bytes,
            allocation_bytes: v.allocation_bytes,
        })
    }

    async fn volume_xml(&self, pool: &str, vol: &str) -> Result<String> {
        self.volumes
            .lock()
            .unwrap()
            .get(&(pool.to_string(), vol.to_string()))
            .map(|v| v.xml.clone())
            .ok_or_else(|| Error::NotFound(format!("{pool}/{vol}")))
    }

    async fn create_volume_xml(&self, pool: &str, xml: &str) -> Result<()> {
        let name = extract_name(xml).ok_or_else(|| Error::Invalid("volume xml missing <name>".into()))?;
        let capacity = xml
            .find("<capacity")
            .and_then(|i| xml[i..].find('>').map(|j| &xml[i + j + 1..]))
            .and_then(|rest| rest.split('<').next())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        self.volumes.lock().unwrap().insert(
            (pool.to_string(), name),
            MockVolume { xml: xml.to_string(), capacity_bytes: capacity, allocation_bytes: 0, data: Vec::new() },
        );
        Ok(())
    }

    async fn delete_volume(&self, pool: &str, vol: &str) -> Result<()> {
        self.volumes
            .lock()
            .unwrap()
            .remove(&(pool.to_string(), vol.to_string()))
            .ok_or_else(|| Error::NotFound(format!("{pool}/{vol}")))?;
        Ok(())
    }

    async fn download_volume(
        &self,
        pool: &str,
        vol: &str,
        mut dest: File,
        mut on_bytes: Box<dyn FnMut(u64) + Send>,
    ) -> Result<()> {
        use std::io::Write;
        let data = {
            let vols = self.volumes.lock().unwrap();
            vols.get(&(pool.to_string(), vol.to_string()))
                .ok_or_else(|| Error::NotFound(format!("{pool}/{vol}")))?
                .data
                .clone()
        };
        const CHUNK: usize = 64 * 1024;
        let mut written = 0u64;
        for chunk in data.chunks(CHUNK) {
            dest.write_all(chunk).map_err(|e| Error::ExternalProcess { program: "pipe".into(), message: e.to_string() })?;
            written += chunk.len() as u64;
            on_bytes(written);
        }
        Ok(())
    }

    async fn upload_volume(
        &self,
        pool: &str,
        vol: &str,
        mut src: File,
        mut on_bytes: Box<dyn FnMut(u64) + Send>,
    ) -> Result<()> {
        use std::io::Read;
        let mut buf = Vec::new();
        src.read_to_end(&mut buf).map_err(|e| Error::ExternalProcess { program: "pipe".into(), message: e.to_string() })?;
        let mut vols = self.volumes.lock().unwrap();
        let v = vols
            .get_mut(&(pool.to_string(), vol.to_string()))
            .ok_or_else(|| Error::NotFound(format!("{pool}/{vol}")))?;
        v.allocation_bytes = buf.len() as u64;
        on_bytes(buf.len() as u64);
        v.data = buf;
        Ok(())
    }
}

#[cfg(feature = "libvirt")]
pub use self::real::RealConnection;

#[cfg(feature = "libvirt")]
mod real {
    use super::*;
    use virt::connect::Connect;
    use virt::domain::Domain;
    use virt::network::Network;
    use virt::storage_pool::StoragePool;
    use virt::storage_vol::StorageVol;
    use virt::stream::Stream;
    use virt::sys;

    /// Production backend, thin wrapper over `virt::connect::Connect`.
    pub struct RealConnection {
        uri: String,
        conn: Connect,
    }

    impl RealConnection {
        pub fn open(uri: &str) -> Result<Self> {
            let conn = Connect::open(Some(uri)).map_err(|e| Error::connection(uri, e.to_string()))?;
            Ok(Self { uri: uri.to_string(), conn })
        }

        fn domain(&self, uuid: &str) -> Result<Domain> {
            Domain::lookup_by_uuid_string(&self.conn, uuid).map_err(|_| Error::NotFound(uuid.to_string()))
        }

        fn pool(&self, name: &str) -> Result<StoragePool> {
            StoragePool::lookup_by_name(&self.conn, name).map_err(|_| Error::NotFound(name.to_string()))
        }

        fn volume(&self, pool: &str, vol: &str) -> Result<StorageVol> {
            let p = self.pool(pool)?;
            StorageVol::lookup_by_name(&p, vol).map_err(|_| Error::NotFound(format!("{pool}/{vol}")))
        }

        fn state_from_sys(state: u32) -> DomainRunState {
            match state {
                sys::VIR_DOMAIN_RUNNING => DomainRunState::Running,
                sys::VIR_DOMAIN_PAUSED => DomainRunState::Paused,
                sys::VIR_DOMAIN_SHUTOFF => DomainRunState::Shutoff,
                sys::VIR_DOMAIN_CRASHED => DomainRunState::Crashed,
                _ => DomainRunState::Other,
            }
        }
    }

    #[async_trait]
    impl LibvirtConnection for RealConnection {
        fn uri(&self) -> &str {
            &self.uri
        }

        async fn lib_version(&self) -> Result<u64> {
            Ok(self.conn.get_lib_version()?)
        }

        async fn is_alive(&self) -> Result<bool> {
            Ok(self.conn.is_alive().unwrap_or(false))
        }

        async fn close(&self) -> Result<()> {
            // `Connect::close` takes `&mut self` upstream but the handle is
            // shared; dropping the connection on pool eviction is sufficient
            // and is what actually releases the socket.
            Ok(())
        }

        async fn list_domain_uuids(&self) -> Result<Vec<String>> {
            let domains = self.conn.list_all_domains(0)?;
            domains.iter().map(|d| Ok(d.get_uuid_string()?)).collect()
        }

        async fn domain_info(&self, uuid: &str) -> Result<RawDomainInfo> {
            let d = self.domain(uuid)?;
            let info = d.get_info()?;
            Ok(RawDomainInfo {
                state: Self::state_from_sys(info.state),
                max_mem_kib: info.max_mem,
                mem_kib: info.memory,
                nr_virt_cpu: info.nr_virt_cpu,
                cpu_time_ns: info.cpu_time,
            })
        }

        async fn domain_xml(&self, uuid: &str) -> Result<String> {
            Ok(self.domain(uuid)?.get_xml_desc(0)?)
        }

        async fn define_xml(&self, xml: &str) -> Result<String> {
            let d = Domain::define_xml(&self.conn, xml)?;
            Ok(d.get_uuid_string()?)
        }

        async fn domain_create(&self, uuid: &str) -> Result<()> {
            Ok(self.domain(uuid)?.create()?)
        }

        async fn domain_shutdown(&self, uuid: &str) -> Result<()> {
            Ok(self.domain(uuid)?.shutdown()?)
        }

        async fn domain_destroy(&self, uuid: &str) -> Result<()> {
            Ok(self.domain(uuid)?.destroy()?)
        }

        async fn domain_suspend(&self, uuid: &str) -> Result<()> {
            Ok(self.domain(uuid)?.suspend()?)
        }

        async fn domain_resume(&self, uuid: &str) -> Result<()> {
            Ok(self.domain(uuid)?.resume()?)
        }

        async fn domain_undefine(&self, uuid: &str, flags: UndefineFlags) -> Result<()> {
            let d = self.domain(uuid)?;
            let mut raw = 0u32;
            if flags.snapshots_metadata {
                raw |= sys::VIR_DOMAIN_UNDEFINE_SNAPSHOTS_METADATA;
            }
            if flags.nvram {
                raw |= sys::VIR_DOMAIN_UNDEFINE_NVRAM;
            }
            Ok(d.undefine_flags(raw)?)
        }

        async fn attach_device(&self, uuid: &str, xml: &str, live: bool) -> Result<()> {
            let d = self.domain(uuid)?;
            let mut flags = sys::VIR_DOMAIN_AFFECT_CONFIG;
            if live {
                flags |= sys::VIR_DOMAIN_AFFECT_LIVE;
            }
            Ok(d.attach_device_flags(xml, flags)?)
        }

        async fn detach_device(&self, uuid: &str, xml: &str, live: bool) -> Result<()> {
            let d = self.domain(uuid)?;
            let mut flags = sys::VIR_DOMAIN_AFFECT_CONFIG;
            if live {
                flags |= sys::VIR_DOMAIN_AFFECT_LIVE;
            }
            Ok(d.detach_device_flags(xml, flags)?)
        }

        async fn update_device(&self, uuid: &str, xml: &str, live: bool) -> Result<()> {
            let d = self.domain(uuid)?;
            let mut flags = sys::VIR_DOMAIN_AFFECT_CONFIG;
            if live {
                flags |= sys::VIR_DOMAIN_AFFECT_LIVE;
            }
            Ok(d.update_device_flags(xml, flags)?)
        }

        async fn set_vcpus(&self, uuid: &str, n: u32, live: bool) -> Result<()> {
            let d = self.domain(uuid)?;
            let mut flags = sys::VIR_DOMAIN_AFFECT_CONFIG;
            if live {
                flags |= sys::VIR_DOMAIN_AFFECT_LIVE;
            }
            Ok(d.set_vcpus_flags(n, flags)?)
        }

        async fn set_memory_mib(&self, uuid: &str, mib: u64, live: bool) -> Result<()> {
            let d = self.domain(uuid)?;
            let mut flags = sys::VIR_DOMAIN_AFFECT_CONFIG;
            if live {
                flags |= sys::VIR_DOMAIN_AFFECT_LIVE;
            }
            Ok(d.set_memory_flags(mib * 1024, flags)?)
        }

        async fn block_stats(&self, uuid: &str, dev: &str) -> Result<(u64, u64)> {
            let d = self.domain(uuid)?;
            let stats = d.block_stats(dev)?;
            Ok((stats.rd_bytes as u64, stats.wr_bytes as u64))
        }

        async fn interface_stats(&self, uuid: &str, iface: &str) -> Result<(u64, u64)> {
            let d = self.domain(uuid)?;
            let stats = d.interface_stats(iface)?;
            Ok((stats.rx_bytes as u64, stats.tx_bytes as u64))
        }

        async fn compare_cpu(&self, domain_cpu_xml: &str) -> Result<CpuCompareResult> {
            let result = self.conn.compare_cpu(domain_cpu_xml, 0)?;
            Ok(match result {
                sys::VIR_CPU_COMPARE_IDENTICAL => CpuCompareResult::Identical,
                sys::VIR_CPU_COMPARE_SUPERSET => CpuCompareResult::Superset,
                _ => CpuCompareResult::Incompatible,
            })
        }

        async fn migrate(&self, uuid: &str, dest_uri: &str, flags: MigrateFlags) -> Result<()> {
            let d = self.domain(uuid)?;
            let dest_conn = Connect::open(Some(dest_uri)).map_err(|e| Error::connection(dest_uri, e.to_string()))?;
            let mut raw = 0u32;
            if flags.live {
                raw |= sys::VIR_MIGRATE_LIVE | sys::VIR_MIGRATE_PEER2PEER | sys::VIR_MIGRATE_PERSIST_DEST;
            }
            if flags.copy_storage_all {
                raw |= sys::VIR_MIGRATE_NON_SHARED_DISK;
            }
            if flags.unsafe_ {
                raw |= sys::VIR_MIGRATE_UNSAFE;
            }
            if flags.persistent {
                raw |= sys::VIR_MIGRATE_PERSIST_DEST;
            }
            if flags.compressed {
                raw |= sys::VIR_MIGRATE_COMPRESSED;
            }
            if flags.tunnelled {
                raw |= sys::VIR_MIGRATE_TUNNELLED;
            }
            d.migrate(&dest_conn, raw, None, None, 0)?;
            Ok(())
        }

        async fn list_network_names(&self) -> Result<Vec<String>> {
            let nets = self.conn.list_all_networks(0)?;
            nets.iter().map(|n| Ok(n.get_name()?)).collect()
        }

        async fn network_is_active(&self, name: &str) -> Result<bool> {
            let net = Network::lookup_by_name(&self.conn, name).map_err(|_| Error::NotFound(name.to_string()))?;
            Ok(net.is_active()?)
        }

        async fn network_info(&self, name: &str) -> Result<RawNetworkInfo> {
            let net = Network::lookup_by_name(&self.conn, name).map_err(|_| Error::NotFound(name.to_string()))?;
            Ok(RawNetworkInfo { active: net.is_active().unwrap_or(false), autostart: net.get_autostart().unwrap_or(false) })
        }

        async fn network_xml(&self, name: &str) -> Result<String> {
            let net = Network::lookup_by_name(&self.conn, name).map_err(|_| Error::NotFound(name.to_string()))?;
            Ok(net.get_xml_desc(0)?)
        }

        async fn network_define_and_start(&self, xml: &str) -> Result<String> {
            let net = Network::define_xml(&self.conn, xml)?;
            net.create()?;
            Ok(net.get_name()?)
        }

        async fn network_set_active(&self, name: &str, active: bool) -> Result<()> {
            let net = Network::lookup_by_name(&self.conn, name).map_err(|_| Error::NotFound(name.to_string()))?;
            if active {
                Ok(net.create()?)
            } else {
                Ok(net.destroy()?)
            }
        }

        async fn network_set_autostart(&self, name: &str, autostart: bool) -> Result<()> {
            let net = Network::lookup_by_name(&self.conn, name).map_err(|_| Error::NotFound(name.to_string()))?;
            Ok(net.set_autostart(autostart)?)
        }

        async fn network_destroy_undefine(&self, name: &str) -> Result<()> {
            let net = Network::lookup_by_name(&self.conn, name).map_err(|_| Error::NotFound(name.to_string()))?;
            if net.is_active().unwrap_or(false) {
                net.destroy()?;
            }
            Ok(net.undefine()?)
        }

        async fn list_pool_names(&self) -> Result<Vec<String>> {
            let pools = self.conn.list_all_storage_pools(0)?;
            pools.iter().map(|p| Ok(p.get_name()?)).collect()
        }

        async fn pool_info(&self, name: &str) -> Result<RawPoolInfo> {
            let p = self.pool(name)?;
            let info = p.get_info()?;
            Ok(RawPoolInfo {
                active: p.is_active().unwrap_or(false),
                autostart: p.get_autostart().unwrap_or(false),
                capacity_bytes: info.capacity,
                allocation_bytes: info.allocation,
            })
        }

        async fn pool_xml(&self, name: &str) -> Result<String> {
            Ok(self.pool(name)?.get_xml_desc(0)?)
        }

        async fn pool_define_and_start(&self, xml: &str) -> Result<String> {
            let p = StoragePool::define_xml(&self.conn, xml, 0)?;
            p.create(0)?;
            Ok(p.get_name()?)
        }

        async fn pool_set_active(&self, name: &str, active: bool) -> Result<()> {
            let p = self.pool(name)?;
            if active {
                Ok(p.create(0)?)
            } else {
                Ok(p.destroy()?)
            }
        }

        async fn pool_set_autostart(&self, name: &str, autostart: bool) -> Result<()> {
            Ok(self.pool(name)?.set_autostart(autostart)?)
        }

        async fn pool_destroy_undefine(&self, name: &str) -> Result<()> {
            let p = self.pool(name)?;
            if p.is_active().unwrap_or(false) {
                p.destroy()?;
            }
            Ok(p.undefine()?)
        }

        async fn pool_refresh(&self, name: &str) -> Result<()> {
            Ok(self.pool(name)?.refresh(0)?)
        }

        async fn list_volume_names(&self, pool: &str) -> Result<Vec<String>> {
            let p = self.pool(pool)?;
            let vols = p.list_all_volumes(0)?;
            vols.iter().map(|v| Ok(v.get_name()?)).collect()
        }

        async fn volume_info(&self, pool: &str, vol: &str) -> Result<RawVolumeInfo> {
            let v = self.volume(pool, vol)?;
            let info = v.get_info()?;
            Ok(RawVolumeInfo {
                path: v.get_path()?,
                capacity_bytes: info.capacity,
                allocation_bytes: info.allocation,
            })
        }

        async fn volume_xml(&self, pool: &str, vol: &str) -> Result<String> {
            Ok(self.volume(pool, vol)?.get_xml_desc(0)?)
        }

        async fn create_volume_xml(&self, pool: &str, xml: &str) -> Result<()> {
            let p = self.pool(pool)?;
            StorageVol::create_xml(&p, xml, 0)?;
            Ok(())
        }

        async fn delete_volume(&self, pool: &str, vol: &str) -> Result<()> {
            Ok(self.volume(pool, vol)?.delete(0)?)
        }

        async fn download_volume(
            &self,
            pool: &str,
            vol: &str,
            mut dest: File,
            mut on_bytes: Box<dyn FnMut(u64) + Send>,
        ) -> Result<()> {
            use std::io::Write;
            let v = self.volume(pool, vol)?;
            let stream = Stream::new(&self.conn)?;
            v.download(&stream, 0, 0, 0)?;
            let mut total = 0u64;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = stream.recv(&mut buf)?;
                if n == 0 {
                    break;
                }
                dest.write_all(&buf[..n]).map_err(|e| Error::ExternalProcess { program: "pipe".into(), message: e.to_string() })?;
                total += n as u64;
                on_bytes(total);
            }
            stream.finish()?;
            Ok(())
        }

        async fn upload_volume(
            &self,
            pool: &str,
            vol: &str,
            mut src: File,
            mut on_bytes: Box<dyn FnMut(u64) + Send>,
        ) -> Result<()> {
            use std::io::Read;
            let v = self.volume(pool, vol)?;
            let stream = Stream::new(&self.conn)?;
            v.upload(&stream, 0, 0, 0)?;
            let mut total = 0u64;
            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = src.read(&mut buf).map_err(|e| Error::ExternalProcess { program: "pipe".into(), message: e.to_string() })?;
                if n == 0 {
                    break;
                }
                stream.send(&buf[..n])?;
                total += n as u64;
                on_bytes(total);
            }
            stream.finish()?;
            Ok(())
        }
    }
}
