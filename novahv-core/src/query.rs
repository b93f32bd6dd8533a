//! VM Query Service (C4): read-only composition of full `VmInfo` views.

use std::sync::Arc;
use tracing::instrument;

use crate::backend::{DomainRunState, LibvirtConnection};
use crate::cache::MetadataCache;
use crate::error::{Error, Result};
use crate::types::{VmFilter, VmInfo, VmSortKey, VmStatus};
use crate::xml;

fn run_state_to_status(state: DomainRunState) -> VmStatus {
    match state {
        DomainRunState::Running => VmStatus::Running,
        DomainRunState::Paused => VmStatus::Paused,
        _ => VmStatus::Stopped,
    }
}

/// C4: composes `VmInfo` from C3 (cache) + C2 (XML parsing). Never mutates.
pub struct VmQueryService {
    cache: Arc<MetadataCache>,
}

impl VmQueryService {
    pub fn new(cache: Arc<MetadataCache>) -> Self {
        Self { cache }
    }

    /// Tolerates a domain deleted concurrently by returning `Error::NotFound`
    /// rather than panicking or propagating a raw hypervisor error.
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn get_vm_details(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<VmInfo> {
        let (info, xml_str) = self.cache.get_info_and_xml(conn, uuid).await?;
        let domain = xml::parse_domain(&xml_str)?;
        Ok(xml::edit::to_vm_info(&domain, run_state_to_status(info.state), xml_str))
    }

    /// Lists every domain on `conn`, applying `filter` and `sort` in memory.
    #[instrument(skip(self, conn, filter))]
    pub async fn list_vms(
        &self,
        conn: &dyn LibvirtConnection,
        filter: &VmFilter,
        sort: VmSortKey,
    ) -> Result<Vec<VmInfo>> {
        let uuids = conn.list_domain_uuids().await?;
        let mut vms = Vec::with_capacity(uuids.len());
        for uuid in uuids {
            match self.get_vm_details(conn, &uuid).await {
                Ok(vm) => vms.push(vm),
                Err(Error::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        if let Some(status) = filter.status {
            vms.retain(|v| v.status == status);
        }
        if let Some(text) = &filter.text {
            let needle = text.to_lowercase();
            vms.retain(|v| v.name.to_lowercase().contains(&needle) || v.uuid.contains(text.as_str()));
        }
        if let Some(selected) = &filter.selected_set {
            vms.retain(|v| selected.contains(&v.uuid));
        }

        match sort {
            VmSortKey::Name => vms.sort_by(|a, b| a.name.cmp(&b.name)),
            VmSortKey::Status => vms.sort_by_key(|v| v.status as u8),
            VmSortKey::MemoryMib => vms.sort_by_key(|v| v.memory_mib),
        }
        Ok(vms)
    }
}
