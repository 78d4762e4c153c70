#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

use partmap_cluster::{BrokerMetaMap, Partition, PartitionMap, PartitionMetaMap};

mod metrics;
mod throttle;
mod wire;

pub use metrics::{
    broker_meta_with_metrics, highest_leader_net_tx, BrokerMetrics, BrokerMetricsMap, Limits,
    MetricsCollector,
};
pub use throttle::{
    brokers_from_throttle_list, throttled_replicas_from_configs, ThrottledReplicas,
    FOLLOWER_THROTTLED_REPLICAS_KEY, LEADER_THROTTLED_REPLICAS_KEY,
};
pub use wire::{partition_map_from_string, partition_map_to_string, WIRE_VERSION};

#[derive(Debug)]
pub enum MetadataError {
    Wire(serde_json::Error),
    UnsupportedWireVersion(i32),
    DuplicatePartition { topic: String, partition: i32 },
    InvalidReplicaId { topic: String, partition: i32, id: i32 },
    InvalidThrottleEntry(String),
    MetricsMissing { id: i32 },
    UnknownInstanceType { id: i32, instance_type: String },
    Store(String),
    Aggregate(Vec<MetadataError>),
}

impl Display for MetadataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wire(err) => write!(f, "partition map decode error: {err}"),
            Self::UnsupportedWireVersion(version) => {
                write!(f, "unsupported partition map version: {version}")
            }
            Self::DuplicatePartition { topic, partition } => {
                write!(f, "duplicate entry for {topic} p{partition}")
            }
            Self::InvalidReplicaId { topic, partition, id } => {
                write!(f, "invalid replica ID {id} for {topic} p{partition}")
            }
            Self::InvalidThrottleEntry(entry) => {
                write!(f, "invalid throttled replica entry: {entry}")
            }
            Self::MetricsMissing { id } => {
                write!(f, "broker {id} not found in the broker metrics map")
            }
            Self::UnknownInstanceType { id, instance_type } => {
                write!(f, "broker {id} has unknown instance type: {instance_type}")
            }
            Self::Store(reason) => write!(f, "metadata store error: {reason}"),
            Self::Aggregate(errors) => {
                write!(f, "{} metadata errors:", errors.len())?;
                for err in errors {
                    write!(f, " {err};")?;
                }
                Ok(())
            }
        }
    }
}

impl Error for MetadataError {}

impl From<serde_json::Error> for MetadataError {
    fn from(value: serde_json::Error) -> Self {
        Self::Wire(value)
    }
}

/// One topic's config as stored in the metadata registry. The throttled
/// replica lists live under well-known keys in `config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub version: i32,
    pub config: BTreeMap<String, String>,
}

/// Ongoing reassignments: topic to partition to pending replica list.
pub type Reassignments = BTreeMap<String, BTreeMap<i32, Vec<i32>>>;

/// Read surface of the metadata store the planning core consumes. The store
/// may fetch concurrently behind this interface, but every call must have
/// returned before a planning pass begins.
pub trait MetadataStore {
    fn get_topic_config(&self, topic: &str) -> Result<TopicConfig, MetadataError>;

    fn get_reassignments(&self) -> Result<Reassignments, MetadataError>;

    /// Replica assignments for one topic, keyed by partition.
    fn get_replica_assignments(&self, topic: &str)
        -> Result<BTreeMap<i32, Vec<i32>>, MetadataError>;

    fn get_broker_meta(&self) -> Result<BrokerMetaMap, MetadataError>;

    fn get_partition_meta(&self) -> Result<PartitionMetaMap, MetadataError>;
}

/// Builds a partition map from the store's view of the given topics, sorted
/// by (topic, partition).
pub fn partition_map_from_metadata<S>(
    store: &S,
    topics: &[String],
) -> Result<PartitionMap, MetadataError>
where
    S: MetadataStore + ?Sized,
{
    let mut partitions = Vec::new();
    for topic in topics {
        let assignments = store.get_replica_assignments(topic)?;
        for (partition, replicas) in assignments {
            partitions.push(Partition::new(topic.clone(), partition, replicas));
        }
    }
    Ok(PartitionMap::from_partitions(partitions))
}
