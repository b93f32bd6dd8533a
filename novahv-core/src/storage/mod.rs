//! Storage Engine (C7): pool/volume inventory and management, the
//! cross-pool streaming volume move (spec §4.7), and network definition
//! CRUD (spec §3 `NetworkDef`).

pub mod move_volume;
pub mod network;

use std::sync::Arc;
use tracing::instrument;

use crate::backend::LibvirtConnection;
use crate::error::{Error, Result};
use crate::types::{Ipv4Config, NetworkDef, NetworkMode, PoolStatus, PoolType, StoragePool, StorageVolume};
use crate::xml;
use novahv_common::log_storage;

pub use move_volume::MoveVolumeOutcome;

fn pool_type_from_xml(pool: &xml::model::PoolXml) -> PoolType {
    PoolType::from_xml_str(&pool.pool_type)
}

/// C7: storage pool/volume CRUD and the cross-pool move orchestration.
pub struct StorageEngine;

impl StorageEngine {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip(self, conn))]
    pub async fn list_pools(&self, conn: &dyn LibvirtConnection) -> Result<Vec<StoragePool>> {
        let names = conn.list_pool_names().await?;
        let mut pools = Vec::with_capacity(names.len());
        for name in names {
            let info = conn.pool_info(&name).await?;
            let xml_str = conn.pool_xml(&name).await?;
            let parsed = xml::parse_pool(&xml_str)?;
            pools.push(StoragePool {
                name,
                pool_type: pool_type_from_xml(&parsed),
                status: if info.active { PoolStatus::Active } else { PoolStatus::Inactive },
                autostart: info.autostart,
                capacity_bytes: info.capacity_bytes,
                allocation_bytes: info.allocation_bytes,
            });
        }
        Ok(pools)
    }

    #[instrument(skip(self, conn))]
    pub async fn list_volumes(&self, conn: &dyn LibvirtConnection, pool: &str) -> Result<Vec<StorageVolume>> {
        let names = conn.list_volume_names(pool).await?;
        let mut volumes = Vec::with_capacity(names.len());
        for name in names {
            let info = conn.volume_info(pool, &name).await?;
            let xml_str = conn.volume_xml(pool, &name).await?;
            let parsed = xml::parse_volume(&xml_str)?;
            volumes.push(StorageVolume {
                name,
                pool: pool.to_string(),
                path: info.path,
                capacity_bytes: info.capacity_bytes,
                format: parsed.target.and_then(|t| t.format).map(|f| f.format_type).unwrap_or_default(),
            });
        }
        Ok(volumes)
    }

    #[instrument(skip(self, conn))]
    pub async fn create_pool(&self, conn: &dyn LibvirtConnection, name: &str, pool_type: &str, target_path: &str) -> Result<()> {
        let xml_str = xml::serialize_pool(&xml::model::PoolXml {
            pool_type: pool_type.to_string(),
            name: name.to_string(),
            uuid: None,
            capacity: None,
            allocation: None,
            target: Some(xml::model::PoolTargetElem { path: target_path.to_string() }),
            source: None,
        })?;
        conn.pool_define_and_start(&xml_str).await?;
        log_storage!("create_pool", "created pool '{}'", name);
        Ok(())
    }

    pub async fn set_pool_active(&self, conn: &dyn LibvirtConnection, name: &str, active: bool) -> Result<()> {
        conn.pool_set_active(name, active).await
    }

    pub async fn set_pool_autostart(&self, conn: &dyn LibvirtConnection, name: &str, autostart: bool) -> Result<()> {
        conn.pool_set_autostart(name, autostart).await
    }

    /// Destroy if active, then undefine (spec §4.7 `DeletePool`).
    #[instrument(skip(self, conn))]
    pub async fn delete_pool(&self, conn: &dyn LibvirtConnection, name: &str) -> Result<()> {
        let info = conn.pool_info(name).await?;
        if info.active {
            conn.pool_set_active(name, false).await?;
        }
        conn.pool_destroy_undefine(name).await?;
        log_storage!("delete_pool", "deleted pool '{}'", name);
        Ok(())
    }

    #[instrument(skip(self, conn))]
    pub async fn create_volume(&self, conn: &dyn LibvirtConnection, pool: &str, name: &str, size_gb: u64, format: &str) -> Result<()> {
        let xml_str = xml::serialize_volume(&xml::model::VolumeXml {
            name: name.to_string(),
            capacity: xml::model::MemoryElem { unit: "GiB".to_string(), value: size_gb },
            allocation: None,
            target: Some(xml::model::VolumeTargetElem {
                path: None,
                format: Some(xml::model::VolumeFormatElem { format_type: format.to_string() }),
            }),
        })?;
        conn.create_volume_xml(pool, &xml_str).await?;
        log_storage!("create_volume", "created volume '{}/{}' ({} GiB, {})", pool, name, size_gb, format);
        Ok(())
    }

    #[instrument(skip(self, conn))]
    pub async fn delete_volume(&self, conn: &dyn LibvirtConnection, pool: &str, name: &str) -> Result<()> {
        conn.delete_volume(pool, name).await?;
        log_storage!("delete_volume", "deleted volume '{}/{}'", pool, name);
        Ok(())
    }

    // -- networks (spec §3 `NetworkDef`, §8 subnet overlap / DHCP checks) ---

    #[instrument(skip(self, conn))]
    pub async fn list_networks(&self, conn: &dyn LibvirtConnection) -> Result<Vec<NetworkDef>> {
        network::list_networks(conn).await
    }

    #[instrument(skip(self, conn, ipv4))]
    pub async fn create_network(
        &self,
        conn: &dyn LibvirtConnection,
        name: &str,
        mode: NetworkMode,
        forward_dev: Option<&str>,
        ipv4: Option<&Ipv4Config>,
        domain_name: Option<&str>,
    ) -> Result<()> {
        network::create_network(conn, name, mode, forward_dev, ipv4, domain_name).await
    }

    #[instrument(skip(self, conn))]
    pub async fn delete_network(&self, conn: &dyn LibvirtConnection, name: &str) -> Result<()> {
        network::delete_network(conn, name).await
    }

    pub async fn set_network_active(&self, conn: &dyn LibvirtConnection, name: &str, active: bool) -> Result<()> {
        network::set_network_active(conn, name, active).await
    }

    pub async fn set_network_autostart(&self, conn: &dyn LibvirtConnection, name: &str, autostart: bool) -> Result<()> {
        network::set_network_autostart(conn, name, autostart).await
    }

    #[instrument(skip(self, conn))]
    pub async fn get_vms_using_network(&self, conn: &dyn LibvirtConnection, name: &str) -> Result<Vec<String>> {
        network::get_vms_using_network(conn, name).await
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns `Ok(())` if `temp_dir` has at least `needed_bytes` free, used as
/// the volume-move pre-flight check (spec §4.7, §8 boundary behavior).
pub fn check_free_space(temp_dir: &std::path::Path, needed_bytes: u64) -> Result<()> {
    let stat = nix::sys::statvfs::statvfs(temp_dir)
        .map_err(|e| Error::external_process("statvfs", e.to_string()))?;
    let available = stat.blocks_available() as u64 * stat.fragment_size();
    if available < needed_bytes {
        return Err(Error::Precondition(format!(
            "insufficient free space in temp dir: need {needed_bytes} bytes, have {available}"
        )));
    }
    Ok(())
}
