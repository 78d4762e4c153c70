#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use partmap_cluster::{Partition, PartitionMap};

use crate::MetadataError;

pub const WIRE_VERSION: i32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct WirePartitionMap {
    version: i32,
    partitions: Vec<WirePartition>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePartition {
    topic: String,
    partition: i32,
    replicas: Vec<i32>,
}

/// Parses the metadata store's JSON partition map shape. Entries are sorted
/// by (topic, partition); duplicate entries and non-positive replica IDs are
/// rejected.
pub fn partition_map_from_string(text: &str) -> Result<PartitionMap, MetadataError> {
    let wire: WirePartitionMap = serde_json::from_str(text)?;
    if wire.version != WIRE_VERSION {
        return Err(MetadataError::UnsupportedWireVersion(wire.version));
    }

    let mut seen: BTreeSet<(String, i32)> = BTreeSet::new();
    let mut partitions = Vec::with_capacity(wire.partitions.len());
    for entry in wire.partitions {
        if !seen.insert((entry.topic.clone(), entry.partition)) {
            return Err(MetadataError::DuplicatePartition {
                topic: entry.topic,
                partition: entry.partition,
            });
        }
        if let Some(&id) = entry.replicas.iter().find(|&&id| id <= 0) {
            return Err(MetadataError::InvalidReplicaId {
                topic: entry.topic,
                partition: entry.partition,
                id,
            });
        }
        partitions.push(Partition::new(entry.topic, entry.partition, entry.replicas));
    }

    Ok(PartitionMap::from_partitions(partitions))
}

/// Serializes a partition map back to the wire shape, preserving input
/// ordering.
pub fn partition_map_to_string(pm: &PartitionMap) -> Result<String, MetadataError> {
    let wire = WirePartitionMap {
        version: WIRE_VERSION,
        partitions: pm
            .partitions
            .iter()
            .map(|p| WirePartition {
                topic: p.topic.clone(),
                partition: p.partition,
                replicas: p.replicas.clone(),
            })
            .collect(),
    };
    Ok(serde_json::to_string(&wire)?)
}
