#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use partmap_cluster::{BrokerMeta, BrokerMetaMap};

use crate::throttle::ThrottledReplicas;
use crate::MetadataError;

/// Telemetry for one broker as reported by the metrics backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMetrics {
    pub instance_type: String,
    /// Outbound network throughput, MB/s.
    pub net_tx: f64,
    /// Free storage, bytes.
    pub storage_free: f64,
}

pub type BrokerMetricsMap = BTreeMap<i32, BrokerMetrics>;

/// Read surface of the metrics backend. Fetches may run concurrently behind
/// this interface but must have returned before a planning pass begins.
pub trait MetricsCollector {
    fn get_broker_metrics(&self) -> Result<BrokerMetricsMap, MetadataError>;
}

/// Per-instance-type network bandwidth ceilings, MB/s.
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    limits: BTreeMap<String, f64>,
}

impl Limits {
    pub fn new(limits: BTreeMap<String, f64>) -> Self {
        Self { limits }
    }

    /// The stock storage-dense instance profiles.
    pub fn default_instances() -> Self {
        Self::new(
            [
                (String::from("d2.xlarge"), 60.0),
                (String::from("d2.2xlarge"), 120.0),
                (String::from("d2.4xlarge"), 240.0),
            ]
            .into_iter()
            .collect(),
        )
    }

    /// Free outbound bandwidth for a broker: its instance-type ceiling minus
    /// current throughput. An unknown instance type is a per-broker error and
    /// never affects other brokers.
    pub fn headroom(&self, id: i32, metrics: &BrokerMetrics) -> Result<f64, MetadataError> {
        match self.limits.get(&metrics.instance_type) {
            Some(ceiling) => Ok(ceiling - metrics.net_tx),
            None => Err(MetadataError::UnknownInstanceType {
                id,
                instance_type: metrics.instance_type.clone(),
            }),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::default_instances()
    }
}

/// The throttled leader with the highest outbound throughput, i.e. the
/// broker constraining replication. Leaders without positive throughput are
/// never selected.
pub fn highest_leader_net_tx(
    throttled: &ThrottledReplicas,
    metrics: &BrokerMetricsMap,
) -> Option<i32> {
    let mut top: Option<(i32, f64)> = None;
    for &id in &throttled.leaders {
        let Some(broker) = metrics.get(&id) else {
            continue;
        };
        let high_water = top.map(|(_, net_tx)| net_tx).unwrap_or(0.0);
        if broker.net_tx > high_water {
            top = Some((id, broker.net_tx));
        }
    }
    top.map(|(id, _)| id)
}

/// Overlays telemetry storage onto the store-derived broker view. Brokers
/// without telemetry keep the store's figure.
pub fn broker_meta_with_metrics(
    meta: &BrokerMetaMap,
    metrics: &BrokerMetricsMap,
) -> BrokerMetaMap {
    meta.iter()
        .map(|(&id, entry)| {
            let storage_free = metrics
                .get(&id)
                .map(|broker| broker.storage_free)
                .unwrap_or(entry.storage_free);
            (
                id,
                BrokerMeta {
                    locality: entry.locality.clone(),
                    storage_free,
                },
            )
        })
        .collect()
}
