//! End-to-end scenarios from spec.md §8 "Testable Properties", each built
//! directly against [`MockConnection`] so they run without a live libvirtd.

use std::sync::Arc;

use novahv_core::action::VmActionService;
use novahv_core::backend::{DomainRunState, LibvirtConnection, MockConnection};
use novahv_core::bulk::BulkOrchestrator;
use novahv_core::cache::MetadataCache;
use novahv_core::events;
use novahv_core::migration::MigrationEngine;
use novahv_core::query::VmQueryService;
use novahv_core::storage;
use novahv_core::types::{BulkAction, IssueSeverity, VmFilter, VmSortKey, VmStatus};

fn vm_xml(name: &str, uuid: &str, disk_file: Option<&str>, bus: &str) -> String {
    let disk_source = disk_file.map(|f| format!(r#"<source file="{f}"/>"#)).unwrap_or_default();
    format!(
        r#"<domain type="kvm">
  <name>{name}</name>
  <uuid>{uuid}</uuid>
  <memory unit="KiB">2097152</memory>
  <vcpu>2</vcpu>
  <os>
    <type arch="x86_64" machine="pc-q35-8.0">hvm</type>
    <boot dev="hd"/>
  </os>
  <devices>
    <disk type="file" device="disk">
      <driver name="qemu" type="qcow2"/>
      {disk_source}
      <target dev="vda" bus="{bus}"/>
    </disk>
    <interface type="network">
      <mac address="52:54:00:aa:bb:cc"/>
      <source network="default"/>
      <model type="virtio"/>
    </interface>
    <graphics type="vnc" port="-1" autoport="yes"/>
  </devices>
</domain>"#
    )
}

fn new_cache() -> Arc<MetadataCache> {
    Arc::new(MetadataCache::new(std::time::Duration::from_secs(1), std::time::Duration::from_secs(600)))
}

/// Scenario 1: starting a stopped VM flips its status to Running on the
/// next read (spec §8 scenario 1).
#[tokio::test]
async fn start_stopped_vm_reports_running() {
    let conn = MockConnection::new("test:///default");
    conn.seed_domain("u-vm-a", &vm_xml("vm-a", "u-vm-a", Some("/var/lib/novahv/images/vm-a.qcow2"), "virtio"), DomainRunState::Shutoff);

    let cache = new_cache();
    let actions = VmActionService::new(cache.clone());
    let query = VmQueryService::new(cache);

    let conn_ref: &dyn LibvirtConnection = conn.as_ref();
    actions.start(conn_ref, "u-vm-a").await.unwrap();

    let details = query.get_vm_details(conn_ref, "u-vm-a").await.unwrap();
    assert_eq!(details.status, VmStatus::Running);
}

/// Scenario 2: bulk graceful stop across three VMs where one is already
/// stopped succeeds for the other two and fails with a "not active"
/// message for the third (spec §8 scenario 2).
#[tokio::test]
async fn bulk_stop_reports_per_vm_success_and_failure() {
    let conn = MockConnection::new("test:///default");
    conn.seed_domain("u-a", &vm_xml("vm-a", "u-a", None, "virtio"), DomainRunState::Running);
    conn.seed_domain("u-b", &vm_xml("vm-b", "u-b", None, "virtio"), DomainRunState::Running);
    conn.seed_domain("u-c", &vm_xml("vm-c", "u-c", None, "virtio"), DomainRunState::Shutoff);

    let cache = new_cache();
    let actions = Arc::new(VmActionService::new(cache));
    let (events_tx, _events_rx) = events::channel();
    let orchestrator = BulkOrchestrator::new(actions, events_tx);

    let conn_ref: &dyn LibvirtConnection = conn.as_ref();
    let result = orchestrator
        .perform_bulk_action(conn_ref, "op-1", &["u-a".to_string(), "u-b".to_string(), "u-c".to_string()], BulkAction::Stop, false)
        .await;

    assert_eq!(result.successes, vec!["u-a".to_string(), "u-b".to_string()]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].uuid, "u-c");
    assert!(result.failures[0].message.contains("not active"), "message was: {}", result.failures[0].message);
}

/// Scenario 3: moving a volume referenced only by an offline VM rewrites
/// that VM's disk to the new location and leaves the source pool empty
/// (spec §8 scenario 3).
#[tokio::test]
async fn move_volume_across_pools_updates_offline_vm() {
    let conn: Arc<MockConnection> = MockConnection::new("test:///default");
    conn.seed_pool("A", r#"<pool type="dir"><name>A</name><target><path>/data/A</path></target></pool>"#, true);
    conn.seed_pool("B", r#"<pool type="dir"><name>B</name><target><path>/data/B</path></target></pool>"#, true);
    let ten_gib = 10u64 * 1024 * 1024 * 1024;
    conn.seed_volume(
        "A",
        "disk1.qcow2",
        r#"<volume><name>disk1.qcow2</name><capacity unit="bytes">10737418240</capacity><target><format type="qcow2"/></target></volume>"#,
        ten_gib,
        vec![0xAB; 1024],
    );
    conn.seed_domain("u-x", &vm_xml("vm-x", "u-x", Some("/data/A/disk1.qcow2"), "virtio"), DomainRunState::Shutoff);

    let temp_dir = tempfile::tempdir().unwrap();
    let (events_tx, _events_rx) = events::channel();
    let conn_dyn: Arc<dyn LibvirtConnection> = conn.clone();

    let outcome = storage::move_volume::move_volume(
        conn_dyn,
        "A",
        "B",
        "disk1.qcow2",
        Some("disk1.qcow2"),
        &["u-x".to_string()],
        temp_dir.path(),
        events_tx,
        "op-move-1",
    )
    .await
    .unwrap();

    assert_eq!(outcome.updated_vm_names, vec!["vm-x".to_string()]);
    assert!(conn.volume_info("A", "disk1.qcow2").await.is_err());
    let dst_info = conn.volume_info("B", "disk1.qcow2").await.unwrap();
    assert_eq!(dst_info.capacity_bytes, ten_gib);

    let cache = new_cache();
    let query = VmQueryService::new(cache);
    let conn_ref: &dyn LibvirtConnection = conn.as_ref();
    let details = query.get_vm_details(conn_ref, "u-x").await.unwrap();
    assert_eq!(details.disks[0].path.as_deref(), Some(dst_info.path.as_str()));
}

/// Scenario 4: a move attempted while the referencing VM is running fails
/// before the destination volume is created and leaves pools unchanged
/// (spec §8 scenario 4).
#[tokio::test]
async fn move_volume_refuses_when_vm_is_running() {
    let conn: Arc<MockConnection> = MockConnection::new("test:///default");
    conn.seed_pool("A", r#"<pool type="dir"><name>A</name><target><path>/data/A</path></target></pool>"#, true);
    conn.seed_pool("B", r#"<pool type="dir"><name>B</name><target><path>/data/B</path></target></pool>"#, true);
    conn.seed_volume(
        "A",
        "disk1.qcow2",
        r#"<volume><name>disk1.qcow2</name><capacity unit="bytes">10737418240</capacity><target><format type="qcow2"/></target></volume>"#,
        10u64 * 1024 * 1024 * 1024,
        vec![0xAB; 1024],
    );
    conn.seed_domain("u-x", &vm_xml("vm-x", "u-x", Some("/data/A/disk1.qcow2"), "virtio"), DomainRunState::Running);

    let temp_dir = tempfile::tempdir().unwrap();
    let (events_tx, _events_rx) = events::channel();
    let conn_dyn: Arc<dyn LibvirtConnection> = conn.clone();

    let err = storage::move_volume::move_volume(
        conn_dyn,
        "A",
        "B",
        "disk1.qcow2",
        Some("disk1.qcow2"),
        &["u-x".to_string()],
        temp_dir.path(),
        events_tx,
        "op-move-2",
    )
    .await
    .unwrap_err();

    assert!(matches!(err, novahv_core::error::Error::Precondition(_)));
    assert!(conn.volume_info("A", "disk1.qcow2").await.is_ok());
    assert!(conn.volume_info("B", "disk1.qcow2").await.is_err());
}

/// Scenario 5: switching a SPICE VM with lingering SPICE devices to VNC
/// cleans up the channel/video/graphics elements in one call (spec §8
/// scenario 5).
#[tokio::test]
async fn spice_to_vnc_switch_cleans_up_spice_devices() {
    let xml = r#"<domain type="kvm">
  <name>vm-spice</name>
  <uuid>u-spice</uuid>
  <memory unit="KiB">2097152</memory>
  <vcpu>2</vcpu>
  <os>
    <type arch="x86_64" machine="pc-q35-8.0">hvm</type>
    <boot dev="hd"/>
  </os>
  <devices>
    <graphics type="spice" port="-1" autoport="yes"/>
    <channel type="spicevmc">
      <target type="virtio" name="com.redhat.spice.0"/>
    </channel>
    <video>
      <model type="qxl"/>
    </video>
  </devices>
</domain>"#;
    let conn = MockConnection::new("test:///default");
    conn.seed_domain("u-spice", xml, DomainRunState::Shutoff);
    let conn_ref: &dyn LibvirtConnection = conn.as_ref();

    let actions = VmActionService::new(new_cache());
    assert!(actions.check_for_other_spice_devices(conn_ref, "u-spice").await.unwrap());

    let vnc = novahv_core::types::Graphics {
        kind: novahv_core::types::GraphicsType::Vnc,
        listen: novahv_core::types::GraphicsListen::Address,
        address: Some("0.0.0.0".to_string()),
        port: None,
        auto_port: true,
        password_enabled: false,
        password: None,
    };
    actions.set_vm_graphics(conn_ref, "u-spice", vnc).await.unwrap();

    let result = actions.get_vm_graphics(conn_ref, "u-spice").await.unwrap();
    assert_eq!(result.kind, novahv_core::types::GraphicsType::Vnc);
    assert_eq!(result.address.as_deref(), Some("0.0.0.0"));

    let final_xml = conn.domain_xml("u-spice").await.unwrap();
    let domain = novahv_core::xml::parse_domain(&final_xml).unwrap();
    assert_eq!(domain.devices.graphics.len(), 1);
    assert!(domain.devices.channels.is_empty());
    assert_eq!(domain.devices.video[0].model.model_type.as_deref(), Some("virtio"));
}

/// Scenario 6: a live migration pre-flight against a guest with a SATA
/// disk surfaces an ERROR-severity blocker (spec §8 scenario 6).
#[tokio::test]
async fn live_migration_preflight_blocks_on_sata_disk() {
    let src = MockConnection::new("qemu+ssh://host-a/system");
    let dst = MockConnection::new("qemu+ssh://host-b/system");
    src.seed_domain("u-sata", &vm_xml("vm-sata", "u-sata", Some("/data/a/disk.qcow2"), "sata"), DomainRunState::Running);

    let engine = MigrationEngine::new();
    let src_ref: &dyn LibvirtConnection = src.as_ref();
    let dst_ref: &dyn LibvirtConnection = dst.as_ref();
    let issues = engine.check_migration_compatibility(src_ref, dst_ref, "u-sata", true).await.unwrap();

    let blocker = issues.iter().find(|i| i.severity == IssueSeverity::Error && i.message.contains("SATA disk"));
    assert!(blocker.is_some(), "expected a SATA-disk live-migration blocker, got: {issues:?}");
    assert!(blocker.unwrap().message.contains("NOT migratable live"));
}

/// Sanity check on `list_vms` filtering/sorting used by the scenarios
/// above's setup: filtering by status only returns matching VMs.
#[tokio::test]
async fn list_vms_filters_by_status() {
    let conn = MockConnection::new("test:///default");
    conn.seed_domain("u-a", &vm_xml("vm-a", "u-a", None, "virtio"), DomainRunState::Running);
    conn.seed_domain("u-b", &vm_xml("vm-b", "u-b", None, "virtio"), DomainRunState::Shutoff);

    let query = VmQueryService::new(new_cache());
    let conn_ref: &dyn LibvirtConnection = conn.as_ref();
    let filter = VmFilter { status: Some(VmStatus::Running), text: None, selected_set: None };
    let vms = query.list_vms(conn_ref, &filter, VmSortKey::Name).await.unwrap();

    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].name, "vm-a");
}
