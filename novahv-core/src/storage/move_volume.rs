//! Cross-pool volume move (spec §4.7), the centerpiece of the Storage
//! Engine: stream bytes source→destination through an in-process OS pipe
//! driven by two concurrent blocking tasks, never buffering the whole
//! volume in memory.
//!
//! Grounded in spec §9's Design Note: "Pipes between Python threads for
//! volume move: use an OS pipe with two goroutines/tasks; errors propagate
//! via a shared error slot checked after both complete; always delete
//! partial destination on failure."

use std::fs::File;
use std::os::unix::io::FromRawFd;
use std::sync::Arc;

use novahv_common::{log_error, log_storage};

use crate::backend::LibvirtConnection;
use crate::error::{Error, Result};
use crate::events::{Event, EventSender, Severity};
use crate::xml;

pub struct MoveVolumeOutcome {
    pub updated_vm_names: Vec<String>,
}

fn log_progress(events: &EventSender, operation_id: &str, percent: u8, message: impl Into<String>) {
    let _ = events.send(Event::Progress { operation_id: operation_id.to_string(), percent, message: message.into() });
}

fn log_line(events: &EventSender, operation_id: &str, severity: Severity, message: impl Into<String>) {
    let _ = events.send(Event::Log { operation_id: operation_id.to_string(), severity, message: message.into() });
}

/// Moves `vol_name` from `src_pool` to `dst_pool` on the same connection
/// (both pools must be reachable from `conn`), optionally renaming it, and
/// rewrites every offline VM that referenced it.
///
/// `list_all_domains` is supplied by the caller (C4/C1) so this function
/// stays a pure orchestration routine independent of how domains are
/// enumerated.
pub async fn move_volume(
    conn: Arc<dyn LibvirtConnection>,
    src_pool: &str,
    dst_pool: &str,
    vol_name: &str,
    new_vol_name: Option<&str>,
    domain_uuids: &[String],
    temp_dir: &std::path::Path,
    events: EventSender,
    operation_id: &str,
) -> Result<MoveVolumeOutcome> {
    let dst_name = new_vol_name.unwrap_or(vol_name).to_string();

    // 1. Pre-flight: not in use by any running VM.
    let mut offline_referencing_vms = Vec::new();
    for uuid in domain_uuids {
        let info = conn.domain_info(uuid).await?;
        let xml_str = conn.domain_xml(uuid).await?;
        let domain = xml::parse_domain(&xml_str)?;
        let references = domain.devices.disks.iter().any(|d| {
            d.source
                .as_ref()
                .map(|s| {
                    s.volume.as_deref() == Some(vol_name)
                        || s.file.as_deref().map(|f| f.contains(vol_name)).unwrap_or(false)
                        || s.dev.as_deref().map(|dev| dev.contains(vol_name)).unwrap_or(false)
                })
                .unwrap_or(false)
        });
        if references {
            if matches!(info.state, crate::backend::DomainRunState::Running | crate::backend::DomainRunState::Paused) {
                let msg = format!("volume '{vol_name}' is in use by running VM '{uuid}'");
                log_line(&events, operation_id, Severity::Error, &msg);
                return Err(Error::Precondition(msg));
            }
            offline_referencing_vms.push(uuid.clone());
        }
    }

    // 2. Pre-flight: temp-dir free space.
    let vol_info = conn.volume_info(src_pool, vol_name).await?;
    let vol_xml_str = conn.volume_xml(src_pool, vol_name).await?;
    let vol_xml = xml::parse_volume(&vol_xml_str)?;
    let format = vol_xml.target.as_ref().and_then(|t| t.format.clone()).map(|f| f.format_type).unwrap_or_else(|| "qcow2".to_string());
    super::check_free_space(temp_dir, vol_info.capacity_bytes)?;

    // 3. Create destination volume with source's declared format/capacity.
    let create_xml = xml::serialize_volume(&xml::model::VolumeXml {
        name: dst_name.clone(),
        capacity: xml::model::MemoryElem { unit: "bytes".to_string(), value: vol_info.capacity_bytes },
        allocation: None,
        target: Some(xml::model::VolumeTargetElem {
            path: None,
            format: Some(xml::model::VolumeFormatElem { format_type: format.clone() }),
        }),
    })?;
    conn.create_volume_xml(dst_pool, &create_xml).await?;
    log_storage!("move_volume", "created destination volume '{}/{}'", dst_pool, dst_name);

    let result = stream_via_pipe(conn.clone(), src_pool, vol_name, dst_pool, &dst_name, vol_info.capacity_bytes, events.clone(), operation_id).await;

    if let Err(e) = result {
        log_line(&events, operation_id, Severity::Error, format!("volume stream failed: {e}; cleaning up destination"));
        if let Err(cleanup_err) = conn.delete_volume(dst_pool, &dst_name).await {
            log_error!("storage", cleanup_err, "failed to clean up partial destination volume '{}/{}'", dst_pool, dst_name);
        }
        return Err(e);
    }

    // 6. Refresh destination pool.
    conn.pool_refresh(dst_pool).await?;

    // 7. Rewrite every offline VM that referenced the old volume.
    let mut updated_vm_names = Vec::new();
    for uuid in &offline_referencing_vms {
        let xml_str = conn.domain_xml(uuid).await?;
        let mut domain = xml::parse_domain(&xml_str)?;
        let mut changed = false;
        for disk in &mut domain.devices.disks {
            if let Some(source) = &mut disk.source {
                if source.volume.as_deref() == Some(vol_name) {
                    source.pool = Some(dst_pool.to_string());
                    source.volume = Some(dst_name.clone());
                    changed = true;
                } else if source.file.as_deref().map(|f| f.contains(vol_name)).unwrap_or(false) {
                    let new_path = conn.volume_info(dst_pool, &dst_name).await?.path;
                    source.file = Some(new_path);
                    changed = true;
                } else if source.dev.as_deref().map(|dev| dev.contains(vol_name)).unwrap_or(false) {
                    let new_path = conn.volume_info(dst_pool, &dst_name).await?.path;
                    source.dev = Some(new_path);
                    changed = true;
                }
            }
        }
        if changed {
            let serialized = xml::serialize_domain(&domain)?;
            conn.define_xml(&serialized).await?;
            updated_vm_names.push(domain.name.clone());
        }
    }

    // 8. Delete source volume, refresh source pool.
    conn.delete_volume(src_pool, vol_name).await?;
    conn.pool_refresh(src_pool).await?;

    log_progress(&events, operation_id, 100, "move complete");
    log_storage!("move_volume", "moved '{}/{}' -> '{}/{}', updated {} VM(s)", src_pool, vol_name, dst_pool, dst_name, updated_vm_names.len());

    Ok(MoveVolumeOutcome { updated_vm_names })
}

/// Streams bytes from `src_pool/vol_name` to `dst_pool/dst_name` using two
/// `spawn_blocking` tasks connected by a `pipe(2)`. Either side's error
/// aborts both; progress is split 0-50% (download) / 50-100% (upload).
async fn stream_via_pipe(
    conn: Arc<dyn LibvirtConnection>,
    src_pool: &str,
    vol_name: &str,
    dst_pool: &str,
    dst_name: &str,
    capacity_bytes: u64,
    events: EventSender,
    operation_id: &str,
) -> Result<()> {
    let (read_fd, write_fd) = nix::unistd::pipe().map_err(|e| Error::external_process("pipe", e.to_string()))?;
    let read_end = unsafe { File::from_raw_fd(read_fd) };
    let write_end = unsafe { File::from_raw_fd(write_fd) };

    let error_slot: Arc<std::sync::Mutex<Option<Error>>> = Arc::new(std::sync::Mutex::new(None));

    let src_conn = conn.clone();
    let src_pool = src_pool.to_string();
    let vol_name_owned = vol_name.to_string();
    let download_events = events.clone();
    let download_op = operation_id.to_string();
    let download_error_slot = error_slot.clone();
    let download = tokio::spawn(async move {
        let on_bytes: Box<dyn FnMut(u64) + Send> = Box::new(move |written| {
            let percent = ((written as f64 / capacity_bytes.max(1) as f64) * 50.0).min(50.0) as u8;
            log_progress(&download_events, &download_op, percent, "downloading source volume");
        });
        if let Err(e) = src_conn.download_volume(&src_pool, &vol_name_owned, write_end, on_bytes).await {
            *download_error_slot.lock().unwrap() = Some(e);
        }
    });

    let dst_conn = conn.clone();
    let dst_pool = dst_pool.to_string();
    let dst_name_owned = dst_name.to_string();
    let upload_events = events.clone();
    let upload_op = operation_id.to_string();
    let upload_error_slot = error_slot.clone();
    let upload = tokio::spawn(async move {
        let on_bytes: Box<dyn FnMut(u64) + Send> = Box::new(move |written| {
            let percent = 50 + ((written as f64 / capacity_bytes.max(1) as f64) * 50.0).min(50.0) as u8;
            log_progress(&upload_events, &upload_op, percent, "uploading to destination volume");
        });
        if let Err(e) = dst_conn.upload_volume(&dst_pool, &dst_name_owned, read_end, on_bytes).await {
            *upload_error_slot.lock().unwrap() = Some(e);
        }
    });

    let (download_result, upload_result) = tokio::join!(download, upload);
    download_result.map_err(|e| Error::external_process("download worker", e.to_string()))?;
    upload_result.map_err(|e| Error::external_process("upload worker", e.to_string()))?;

    if let Some(e) = error_slot.lock().unwrap().take() {
        return Err(e);
    }
    Ok(())
}
