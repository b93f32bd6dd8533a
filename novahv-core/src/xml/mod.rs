//! XML Model Helpers (C2): parse hypervisor XML into the typed records in
//! [`model`], and serialize structural edits back.
//!
//! Edits never touch XML text directly — every operation in [`edit`] mutates
//! a parsed [`model::DomainXml`] and the result is re-serialized in one
//! shot, which is what makes them idempotent re-writes rather than
//! text-level splicing (spec §4.2).

pub mod edit;
pub mod model;

use crate::error::{Error, Result};
use model::{DiskElem, DomainXml, NetworkXml, PoolXml, VolumeXml};

pub fn parse_domain(xml: &str) -> Result<DomainXml> {
    quick_xml::de::from_str(xml).map_err(|e| Error::Invalid(format!("malformed domain XML: {e}")))
}

pub fn serialize_domain(domain: &DomainXml) -> Result<String> {
    quick_xml::se::to_string(domain).map_err(|e| Error::Invalid(format!("failed to serialize domain XML: {e}")))
}

pub fn parse_pool(xml: &str) -> Result<PoolXml> {
    quick_xml::de::from_str(xml).map_err(|e| Error::Invalid(format!("malformed pool XML: {e}")))
}

pub fn serialize_pool(pool: &PoolXml) -> Result<String> {
    quick_xml::se::to_string(pool).map_err(|e| Error::Invalid(format!("failed to serialize pool XML: {e}")))
}

pub fn parse_volume(xml: &str) -> Result<VolumeXml> {
    quick_xml::de::from_str(xml).map_err(|e| Error::Invalid(format!("malformed volume XML: {e}")))
}

pub fn serialize_volume(vol: &VolumeXml) -> Result<String> {
    quick_xml::se::to_string(vol).map_err(|e| Error::Invalid(format!("failed to serialize volume XML: {e}")))
}

pub fn parse_network(xml: &str) -> Result<NetworkXml> {
    quick_xml::de::from_str(xml).map_err(|e| Error::Invalid(format!("malformed network XML: {e}")))
}

pub fn serialize_network(network: &NetworkXml) -> Result<String> {
    quick_xml::se::to_string(network).map_err(|e| Error::Invalid(format!("failed to serialize network XML: {e}")))
}

/// Serializes a single `<disk>` fragment for storage in the vendor
/// disabled-disks metadata subtree (spec §4.2's "disabled disks" annotation).
pub(crate) fn serialize_domain_fragment(disk: &DiskElem) -> Result<String> {
    quick_xml::se::to_string(disk).map_err(|e| Error::Invalid(format!("failed to serialize disk fragment: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<domain type="kvm">
  <name>vm-a</name>
  <uuid>11111111-1111-1111-1111-111111111111</uuid>
  <memory unit="KiB">2097152</memory>
  <vcpu>2</vcpu>
  <os>
    <type arch="x86_64" machine="pc-q35-8.0">hvm</type>
    <boot dev="hd"/>
  </os>
  <devices>
    <disk type="file" device="disk">
      <driver name="qemu" type="qcow2"/>
      <source file="/var/lib/libvirt/images/vm-a.qcow2"/>
      <target dev="vda" bus="virtio"/>
    </disk>
    <interface type="network">
      <mac address="52:54:00:aa:bb:cc"/>
      <source network="default"/>
      <model type="virtio"/>
    </interface>
    <graphics type="vnc" port="-1" autoport="yes"/>
  </devices>
</domain>"#;

    #[test]
    fn round_trips_through_parse_and_serialize() {
        let parsed = parse_domain(SAMPLE).unwrap();
        assert_eq!(parsed.name, "vm-a");
        assert_eq!(parsed.devices.disks.len(), 1);
        assert_eq!(parsed.devices.interfaces[0].mac.address, "52:54:00:aa:bb:cc");
        let serialized = serialize_domain(&parsed).unwrap();
        let reparsed = parse_domain(&serialized).unwrap();
        assert_eq!(parsed, reparsed);
    }
}
