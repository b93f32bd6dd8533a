//! Stats Engine (C6): rolling CPU/memory/disk/net rates from monotonic
//! counters (spec §4.6).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::backend::{DomainRunState, LibvirtConnection};
use crate::cache::MetadataCache;
use crate::error::Result;
use crate::types::{StatCounter, VmStats, VmStatus};
use crate::xml;

const HISTORY_LEN: usize = 20;
const NANOS_PER_SECOND: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, Default)]
pub struct VmHistory {
    pub cpu: VecDeque<f64>,
    pub mem: VecDeque<f64>,
    pub disk_total_kbps: VecDeque<f64>,
    pub net_total_kbps: VecDeque<f64>,
}

fn push_bounded(dq: &mut VecDeque<f64>, value: f64) {
    dq.push_back(value);
    if dq.len() > HISTORY_LEN {
        dq.pop_front();
    }
}

/// C6: one [`StatCounter`] + rolling [`VmHistory`] per VM, keyed by UUID.
/// Restart-safe: a fresh `StatsEngine` simply treats every VM as a first
/// sample, emitting a zero-rate sample rather than a spurious spike.
pub struct StatsEngine {
    cache: Arc<MetadataCache>,
    counters: RwLock<HashMap<String, StatCounter>>,
    history: RwLock<HashMap<String, VmHistory>>,
    total_memory_kib: u64,
}

impl StatsEngine {
    pub fn new(cache: Arc<MetadataCache>, total_memory_kib: u64) -> Self {
        Self { cache, counters: RwLock::new(HashMap::new()), history: RwLock::new(HashMap::new()), total_memory_kib }
    }

    /// One sampling tick for one VM. Returns `None` if the domain is not
    /// active (spec: "stats are not emitted" and its counter is dropped).
    ///
    /// Per-device counters are parsed once from the C3-cached XML
    /// (revalidated by the cache's own TTL/invalidation), not from a fresh
    /// `XMLDesc` call per VM per tick (spec §4.6 point 4).
    #[instrument(skip(self, conn), fields(uuid = %uuid))]
    pub async fn sample(&self, conn: &dyn LibvirtConnection, uuid: &str) -> Result<Option<VmStats>> {
        let info = conn.domain_info(uuid).await?;
        if !matches!(info.state, DomainRunState::Running) {
            self.counters.write().await.remove(uuid);
            return Ok(None);
        }

        let xml_str = self.cache.get_xml(conn, uuid).await?;
        let domain = xml::parse_domain(&xml_str)?;
        let mut disk_read = 0u64;
        let mut disk_write = 0u64;
        for disk in &domain.devices.disks {
            if let Some(dev) = &disk.target.dev {
                if let Ok((rd, wr)) = conn.block_stats(uuid, dev).await {
                    disk_read += rd;
                    disk_write += wr;
                }
            }
        }
        let mut net_rx = 0u64;
        let mut net_tx = 0u64;
        for (i, _iface) in domain.devices.interfaces.iter().enumerate() {
            let target = format!("vnet{i}");
            if let Ok((rx, tx)) = conn.interface_stats(uuid, &target).await {
                net_rx += rx;
                net_tx += tx;
            }
        }

        let now = Instant::now();
        let mut counters = self.counters.write().await;
        let prev = counters.get(uuid).copied();

        let (cpu_percent, disk_read_kbps, disk_write_kbps, net_rx_kbps, net_tx_kbps) = match prev {
            None => (0.0, 0.0, 0.0, 0.0, 0.0),
            Some(prev) => {
                let dt = now.duration_since(prev.last_timestamp).as_secs_f64().max(0.001);
                let cpu_delta = info.cpu_time_ns.saturating_sub(prev.last_cpu_time_ns) as f64;
                let cpu_percent =
                    (cpu_delta / (dt * NANOS_PER_SECOND * info.nr_virt_cpu.max(1) as f64) * 100.0).max(0.0);
                let disk_read_kbps = disk_read.saturating_sub(prev.last_disk_read_bytes) as f64 / dt / 1024.0;
                let disk_write_kbps = disk_write.saturating_sub(prev.last_disk_write_bytes) as f64 / dt / 1024.0;
                let net_rx_kbps = net_rx.saturating_sub(prev.last_net_rx_bytes) as f64 / dt / 1024.0;
                let net_tx_kbps = net_tx.saturating_sub(prev.last_net_tx_bytes) as f64 / dt / 1024.0;
                (cpu_percent.max(0.0), disk_read_kbps.max(0.0), disk_write_kbps.max(0.0), net_rx_kbps.max(0.0), net_tx_kbps.max(0.0))
            }
        };

        counters.insert(
            uuid.to_string(),
            StatCounter {
                last_cpu_time_ns: info.cpu_time_ns,
                last_timestamp: now,
                last_disk_read_bytes: disk_read,
                last_disk_write_bytes: disk_write,
                last_net_rx_bytes: net_rx,
                last_net_tx_bytes: net_tx,
            },
        );
        drop(counters);

        let mem_percent = if self.total_memory_kib > 0 {
            (info.mem_kib as f64 / self.total_memory_kib as f64) * 100.0
        } else {
            0.0
        };

        let stats = VmStats {
            status: VmStatus::Running,
            cpu_percent,
            mem_percent,
            disk_read_kbps,
            disk_write_kbps,
            net_rx_kbps,
            net_tx_kbps,
            timestamp: now,
        };

        let mut history = self.history.write().await;
        let h = history.entry(uuid.to_string()).or_default();
        push_bounded(&mut h.cpu, cpu_percent);
        push_bounded(&mut h.mem, mem_percent);
        push_bounded(&mut h.disk_total_kbps, disk_read_kbps + disk_write_kbps);
        push_bounded(&mut h.net_total_kbps, net_rx_kbps + net_tx_kbps);

        Ok(Some(stats))
    }

    pub async fn history(&self, uuid: &str) -> Option<VmHistory> {
        self.history.read().await.get(uuid).cloned()
    }

    pub async fn drop_vm(&self, uuid: &str) {
        self.counters.write().await.remove(uuid);
        self.history.write().await.remove(uuid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockConnection;

    #[tokio::test]
    async fn first_sample_is_zero_rate() {
        let cache = Arc::new(MetadataCache::new(std::time::Duration::from_secs(600), std::time::Duration::from_secs(600)));
        let engine = StatsEngine::new(cache, 8 * 1024 * 1024);
        let conn = MockConnection::new("test:///");
        conn.seed_domain("u1", "<domain><name>x</name><uuid>u1</uuid><devices/></domain>", DomainRunState::Running);
        let stats = engine.sample(conn.as_ref(), "u1").await.unwrap().unwrap();
        assert_eq!(stats.cpu_percent, 0.0);
    }

    #[tokio::test]
    async fn inactive_domain_yields_no_sample_and_drops_counter() {
        let cache = Arc::new(MetadataCache::new(std::time::Duration::from_secs(600), std::time::Duration::from_secs(600)));
        let engine = StatsEngine::new(cache, 8 * 1024 * 1024);
        let conn = MockConnection::new("test:///");
        conn.seed_domain("u1", "<domain><name>x</name><uuid>u1</uuid><devices/></domain>", DomainRunState::Running);
        engine.sample(conn.as_ref(), "u1").await.unwrap();
        conn.domains.lock().unwrap().get_mut("u1").unwrap().state = DomainRunState::Shutoff;
        let sample = engine.sample(conn.as_ref(), "u1").await.unwrap();
        assert!(sample.is_none());
    }

    #[tokio::test]
    async fn cpu_percent_never_negative_on_counter_reset() {
        let cache = Arc::new(MetadataCache::new(std::time::Duration::from_secs(600), std::time::Duration::from_secs(600)));
        let engine = StatsEngine::new(cache, 8 * 1024 * 1024);
        let conn = MockConnection::new("test:///");
        conn.seed_domain("u1", "<domain><name>x</name><uuid>u1</uuid><devices/></domain>", DomainRunState::Running);
        engine.sample(conn.as_ref(), "u1").await.unwrap();
        // cpu_time_ns resetting to 0 must clamp to zero, not underflow/negative.
        let stats = engine.sample(conn.as_ref(), "u1").await.unwrap().unwrap();
        assert!(stats.cpu_percent >= 0.0);
    }
}
