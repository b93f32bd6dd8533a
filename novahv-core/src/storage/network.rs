//! Network definition CRUD (spec §3 `NetworkDef`), folded into the Storage
//! Engine rather than split out as its own component.
//!
//! Grounded in the teacher's `network_manager.py`: NAT/routed networks get
//! a generated bridge name and MAC plus a `<nat><port start='1024'
//! end='65535'/></nat>` block, and creation always validates the DHCP range
//! and checks for subnet overlap against every existing network before
//! calling `networkDefineXML` (spec §8's Conflict/Invalid boundary
//! behaviors).

use std::net::Ipv4Addr;

use crate::action::random_mac;
use crate::backend::LibvirtConnection;
use crate::error::{Error, Result};
use crate::types::{Ipv4Config, NetworkDef, NetworkMode};
use crate::xml;
use crate::xml::model::{
    NetworkBridgeElem, NetworkDhcpElem, NetworkDhcpRangeElem, NetworkDomainElem, NetworkForwardElem, NetworkIpElem,
    NetworkMacElem, NetworkNatElem, NetworkNatPortElem, NetworkXml,
};
use novahv_common::log_network;

fn parse_ipv4(addr: &str) -> Result<u32> {
    addr.parse::<Ipv4Addr>().map(u32::from).map_err(|_| Error::Invalid(format!("invalid IPv4 address '{addr}'")))
}

/// Returns `(network_address, broadcast_address)` for `address/netmask`.
fn network_range(address: &str, netmask: &str) -> Result<(u32, u32)> {
    let addr = parse_ipv4(address)?;
    let mask = parse_ipv4(netmask)?;
    let network = addr & mask;
    Ok((network, network | !mask))
}

fn ranges_overlap(a: (u32, u32), b: (u32, u32)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

/// DHCP range start must be < end and both within the network (spec §8).
fn validate_dhcp_range(ipv4: &Ipv4Config) -> Result<()> {
    let Some((start, end)) = &ipv4.dhcp_range else {
        return Ok(());
    };
    let start_addr = parse_ipv4(start)?;
    let end_addr = parse_ipv4(end)?;
    if start_addr >= end_addr {
        return Err(Error::Invalid(format!("dhcp range start '{start}' must be before end '{end}'")));
    }
    let (lo, hi) = network_range(&ipv4.address, &ipv4.netmask)?;
    if start_addr < lo || start_addr > hi || end_addr < lo || end_addr > hi {
        return Err(Error::Invalid(format!(
            "dhcp range {start}-{end} falls outside network {}/{}",
            ipv4.address, ipv4.netmask
        )));
    }
    Ok(())
}

/// A network whose CIDR overlaps any existing libvirt-managed network CIDR
/// fails with `Conflict` (spec §8).
async fn check_subnet_overlap(conn: &dyn LibvirtConnection, candidate: &Ipv4Config) -> Result<()> {
    let candidate_range = network_range(&candidate.address, &candidate.netmask)?;
    for name in conn.list_network_names().await? {
        let xml_str = match conn.network_xml(&name).await {
            Ok(x) => x,
            Err(_) => continue,
        };
        let Ok(parsed) = xml::parse_network(&xml_str) else { continue };
        let Some(ip) = parsed.ip else { continue };
        let (Some(address), Some(netmask)) = (ip.address, ip.netmask) else { continue };
        let Ok(existing_range) = network_range(&address, &netmask) else { continue };
        if ranges_overlap(candidate_range, existing_range) {
            return Err(Error::Conflict(format!(
                "network '{}/{}' overlaps existing network '{name}' ({address}/{netmask})",
                candidate.address, candidate.netmask
            )));
        }
    }
    Ok(())
}

fn network_mode_str(mode: NetworkMode) -> &'static str {
    match mode {
        NetworkMode::Nat => "nat",
        NetworkMode::Route => "route",
        NetworkMode::Isolated => "isolated",
    }
}

pub async fn list_networks(conn: &dyn LibvirtConnection) -> Result<Vec<NetworkDef>> {
    let mut defs = Vec::new();
    for name in conn.list_network_names().await? {
        let xml_str = conn.network_xml(&name).await?;
        let parsed = xml::parse_network(&xml_str)?;
        let info = conn.network_info(&name).await?;
        let mode = match parsed.forward.as_ref().and_then(|f| f.mode.as_deref()) {
            Some("nat") => NetworkMode::Nat,
            Some("route") => NetworkMode::Route,
            _ => NetworkMode::Isolated,
        };
        let ipv4 = parsed.ip.map(|ip| Ipv4Config {
            address: ip.address.unwrap_or_default(),
            netmask: ip.netmask.unwrap_or_default(),
            dhcp_range: ip.dhcp.and_then(|d| d.range).map(|r| (r.start, r.end)),
        });
        defs.push(NetworkDef { name, mode, active: info.active, autostart: info.autostart, ipv4 });
    }
    Ok(defs)
}

/// Creates a NAT/routed/isolated network (spec §3 `NetworkDef`), validating
/// the DHCP range and checking for subnet overlap first.
pub async fn create_network(
    conn: &dyn LibvirtConnection,
    name: &str,
    mode: NetworkMode,
    forward_dev: Option<&str>,
    ipv4: Option<&Ipv4Config>,
    domain_name: Option<&str>,
) -> Result<()> {
    if let Some(cfg) = ipv4 {
        validate_dhcp_range(cfg)?;
        check_subnet_overlap(conn, cfg).await?;
    }

    let forward = (!matches!(mode, NetworkMode::Isolated)).then(|| NetworkForwardElem {
        mode: Some(network_mode_str(mode).to_string()),
        dev: forward_dev.map(|d| d.to_string()),
        nat: matches!(mode, NetworkMode::Nat).then(|| NetworkNatElem { port: NetworkNatPortElem { start: 1024, end: 65535 } }),
    });

    let network_xml = NetworkXml {
        name: name.to_string(),
        uuid: None,
        forward,
        bridge: Some(NetworkBridgeElem { name: name.to_string(), stp: Some("on".to_string()), delay: Some("0".to_string()) }),
        mac: Some(NetworkMacElem { address: random_mac() }),
        domain: domain_name.map(|d| NetworkDomainElem { name: d.to_string() }),
        ip: ipv4.map(|cfg| NetworkIpElem {
            address: Some(cfg.address.clone()),
            netmask: Some(cfg.netmask.clone()),
            dhcp: cfg.dhcp_range.as_ref().map(|(start, end)| NetworkDhcpElem {
                range: Some(NetworkDhcpRangeElem { start: start.clone(), end: end.clone() }),
            }),
        }),
    };

    let xml_str = xml::serialize_network(&network_xml)?;
    conn.network_define_and_start(&xml_str).await?;
    conn.network_set_autostart(name, true).await?;
    log_network!("create_network", "created network '{}' (mode={})", name, network_mode_str(mode));
    Ok(())
}

/// Destroy if active, then undefine (mirrors `delete_pool`).
pub async fn delete_network(conn: &dyn LibvirtConnection, name: &str) -> Result<()> {
    if conn.network_is_active(name).await.unwrap_or(false) {
        conn.network_set_active(name, false).await?;
    }
    conn.network_destroy_undefine(name).await?;
    log_network!("delete_network", "deleted network '{}'", name);
    Ok(())
}

pub async fn set_network_active(conn: &dyn LibvirtConnection, name: &str, active: bool) -> Result<()> {
    conn.network_set_active(name, active).await
}

pub async fn set_network_autostart(conn: &dyn LibvirtConnection, name: &str, autostart: bool) -> Result<()> {
    conn.network_set_autostart(name, autostart).await
}

/// Scans every domain's `<devices>/<interface type='network'>` for a
/// reference to `network_name`.
pub async fn get_vms_using_network(conn: &dyn LibvirtConnection, network_name: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for uuid in conn.list_domain_uuids().await? {
        let xml_str = conn.domain_xml(&uuid).await?;
        let Ok(domain) = xml::parse_domain(&xml_str) else { continue };
        if domain.devices.interfaces.iter().any(|i| i.source.network.as_deref() == Some(network_name)) {
            names.push(domain.name);
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockConnection;

    fn cfg(address: &str, netmask: &str, dhcp: Option<(&str, &str)>) -> Ipv4Config {
        Ipv4Config { address: address.to_string(), netmask: netmask.to_string(), dhcp_range: dhcp.map(|(s, e)| (s.to_string(), e.to_string())) }
    }

    #[tokio::test]
    async fn create_network_rejects_invalid_dhcp_range() {
        let conn = MockConnection::new("test:///");
        let ipv4 = cfg("192.168.100.1", "255.255.255.0", Some(("192.168.100.200", "192.168.100.100")));
        let err = create_network(conn.as_ref(), "br-test", NetworkMode::Nat, None, Some(&ipv4), None).await.unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn create_network_rejects_dhcp_range_outside_network() {
        let conn = MockConnection::new("test:///");
        let ipv4 = cfg("192.168.100.1", "255.255.255.0", Some(("10.0.0.100", "10.0.0.200")));
        let err = create_network(conn.as_ref(), "br-test", NetworkMode::Nat, None, Some(&ipv4), None).await.unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn create_network_rejects_subnet_overlap() {
        let conn = MockConnection::new("test:///");
        conn.seed_network("existing", true);
        conn.network_define_and_start(
            &xml::serialize_network(&NetworkXml {
                name: "existing".to_string(),
                ip: Some(NetworkIpElem { address: Some("192.168.100.1".to_string()), netmask: Some("255.255.255.0".to_string()), dhcp: None }),
                ..Default::default()
            })
            .unwrap(),
        )
        .await
        .unwrap();

        let ipv4 = cfg("192.168.100.128", "255.255.255.0", None);
        let err = create_network(conn.as_ref(), "br-test", NetworkMode::Nat, None, Some(&ipv4), None).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn create_network_succeeds_with_disjoint_subnet() {
        let conn = MockConnection::new("test:///");
        conn.network_define_and_start(
            &xml::serialize_network(&NetworkXml {
                name: "existing".to_string(),
                ip: Some(NetworkIpElem { address: Some("192.168.100.1".to_string()), netmask: Some("255.255.255.0".to_string()), dhcp: None }),
                ..Default::default()
            })
            .unwrap(),
        )
        .await
        .unwrap();

        let ipv4 = cfg("192.168.200.1", "255.255.255.0", Some(("192.168.200.10", "192.168.200.100")));
        create_network(conn.as_ref(), "br-test", NetworkMode::Nat, Some("eth0"), Some(&ipv4), Some("br-test.local")).await.unwrap();
        let nets = list_networks(conn.as_ref()).await.unwrap();
        assert!(nets.iter().any(|n| n.name == "br-test" && n.autostart));
    }

    #[tokio::test]
    async fn get_vms_using_network_finds_referencing_domain() {
        let conn = MockConnection::new("test:///");
        conn.seed_domain(
            "u1",
            r#"<domain><name>vm-a</name><uuid>u1</uuid><devices><interface type="network"><mac address="52:54:00:00:00:01"/><source network="br-test"/><model type="virtio"/></interface></devices></domain>"#,
            crate::backend::DomainRunState::Shutoff,
        );
        let users = get_vms_using_network(conn.as_ref(), "br-test").await.unwrap();
        assert_eq!(users, vec!["vm-a".to_string()]);
    }
}
