//! Migration Engine (C8): compatibility scoring and live/offline domain
//! migration (spec §4.8).

use std::sync::Arc;
use tracing::instrument;

use crate::backend::{CpuCompareResult, LibvirtConnection, MigrateFlags};
use crate::error::Result;
use crate::types::{IssueSeverity, MigrationIssue, PoolType};
use crate::xml;
use novahv_common::log_vm;

pub struct MigrationEngine;

impl MigrationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Runs every check from spec §4.8 and returns the accumulated issues;
    /// never raises — the caller decides whether to proceed based on
    /// whether any `Error` severity issue is present.
    #[instrument(skip(self, src_conn, dst_conn), fields(uuid = %uuid))]
    pub async fn check_migration_compatibility(
        &self,
        src_conn: &dyn LibvirtConnection,
        dst_conn: &dyn LibvirtConnection,
        uuid: &str,
        is_live: bool,
    ) -> Result<Vec<MigrationIssue>> {
        let mut issues = Vec::new();
        let xml_str = src_conn.domain_xml(uuid).await?;
        let domain = xml::parse_domain(&xml_str)?;

        // Name clash on destination.
        if let Ok(dst_uuids) = dst_conn.list_domain_uuids().await {
            for dst_uuid in dst_uuids {
                if let Ok(dst_xml) = dst_conn.domain_xml(&dst_uuid).await {
                    if let Ok(dst_domain) = xml::parse_domain(&dst_xml) {
                        if dst_domain.name == domain.name {
                            let active = matches!(
                                dst_conn.domain_info(&dst_uuid).await.map(|i| i.state),
                                Ok(crate::backend::DomainRunState::Running | crate::backend::DomainRunState::Paused)
                            );
                            issues.push(MigrationIssue {
                                severity: if active { IssueSeverity::Error } else { IssueSeverity::Warning },
                                message: format!("a domain named '{}' already exists on the destination", domain.name),
                            });
                        }
                    }
                }
            }
        }

        // CPU compatibility via the library's compare API.
        if let Some(cpu) = &domain.cpu {
            let cpu_xml = quick_xml::se::to_string(cpu).unwrap_or_default();
            match dst_conn.compare_cpu(&cpu_xml).await {
                Ok(CpuCompareResult::Incompatible) => issues.push(MigrationIssue {
                    severity: IssueSeverity::Error,
                    message: "destination CPU is not compatible with the guest's CPU model".to_string(),
                }),
                Ok(_) => {}
                Err(e) => issues.push(MigrationIssue {
                    severity: IssueSeverity::Warning,
                    message: format!("could not verify CPU compatibility: {e}"),
                }),
            }
        }

        // Each interface's network must exist and be active on destination.
        for iface in &domain.devices.interfaces {
            if let Some(network) = &iface.source.network {
                match dst_conn.network_is_active(network).await {
                    Ok(true) => {}
                    Ok(false) => issues.push(MigrationIssue {
                        severity: IssueSeverity::Error,
                        message: format!("network '{network}' exists but is not active on the destination"),
                    }),
                    Err(_) => issues.push(MigrationIssue {
                        severity: IssueSeverity::Error,
                        message: format!("network '{network}' does not exist on the destination"),
                    }),
                }
            }
        }

        // Live-only blockers.
        if is_live {
            for disk in &domain.devices.disks {
                if disk.target.bus.as_deref() == Some("sata") {
                    issues.push(MigrationIssue {
                        severity: IssueSeverity::Error,
                        message: "guest has a SATA disk, which is NOT migratable live".to_string(),
                    });
                }
            }
            if !domain.devices.filesystems.is_empty() {
                issues.push(MigrationIssue {
                    severity: IssueSeverity::Error,
                    message: "guest has filesystem passthrough devices, which are NOT migratable live".to_string(),
                });
            }
            if !domain.devices.hostdevs.is_empty() {
                issues.push(MigrationIssue {
                    severity: IssueSeverity::Error,
                    message: "guest has PCI/USB hostdev passthrough devices, which are NOT migratable live".to_string(),
                });
            }
        }

        // Disk source paths as INFO reminders.
        for disk in &domain.devices.disks {
            if let Some(path) = disk.source.as_ref().and_then(|s| s.file.clone().or_else(|| s.dev.clone())) {
                issues.push(MigrationIssue { severity: IssueSeverity::Info, message: format!("disk source '{path}' must exist on the destination host") });
            }
            if let Some((pool, _)) = disk.source.as_ref().and_then(|s| Some((s.pool.clone()?, s.volume.clone()?))) {
                match dst_conn.pool_info(&pool).await {
                    Ok(info) if info.active => {
                        let xml_str = dst_conn.pool_xml(&pool).await.unwrap_or_default();
                        let shareable = xml::parse_pool(&xml_str)
                            .ok()
                            .map(|p| PoolType::from_xml_str(&p.pool_type).is_shareable())
                            .unwrap_or(false);
                        if !shareable {
                            issues.push(MigrationIssue {
                                severity: IssueSeverity::Warning,
                                message: format!("pool '{pool}' on destination is not a shareable storage type"),
                            });
                        }
                    }
                    _ => issues.push(MigrationIssue {
                        severity: IssueSeverity::Warning,
                        message: format!("pool '{pool}' is missing or inactive on the destination"),
                    }),
                }
            }
        }

        Ok(issues)
    }

    /// Live path: `LIVE | PEER2PEER | PERSIST_DEST` ORed with requested
    /// flags. Offline path: `defineXML` on destination then `undefine` on
    /// source (spec §4.8).
    #[instrument(skip(self, src_conn, dst_conn), fields(uuid = %uuid))]
    pub async fn migrate(
        &self,
        src_conn: &dyn LibvirtConnection,
        dst_conn: &dyn LibvirtConnection,
        uuid: &str,
        is_live: bool,
        mut flags: MigrateFlags,
    ) -> Result<()> {
        if is_live {
            flags.live = true;
            flags.persistent = true;
            src_conn.migrate(uuid, dst_conn.uri(), flags).await?;
        } else {
            let xml_str = src_conn.domain_xml(uuid).await?;
            dst_conn.define_xml(&xml_str).await?;
            src_conn.domain_undefine(uuid, crate::backend::UndefineFlags::default()).await?;
        }
        log_vm!("migrate", uuid, "migration to '{}' completed (live={})", dst_conn.uri(), is_live);
        Ok(())
    }
}

impl Default for MigrationEngine {
    fn default() -> Self {
        Self::new()
    }
}
