#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Placeholder broker ID occupying a replica slot that has not been assigned
/// yet. Stub slots are produced by `PartitionMap::strip` and
/// `PartitionMap::set_replication` and are only ever consumed by the rebuild
/// planner; they never appear in serialized maps.
pub const STUB_BROKER_ID: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    UnknownPartitionSize { topic: String, partition: i32 },
}

impl Display for MetaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownPartitionSize { topic, partition } => {
                write!(f, "no size metadata for {topic} p{partition}")
            }
        }
    }
}

impl Error for MetaError {}

/// One partition of one topic. The replica set is ordered; the first entry
/// is the leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub topic: String,
    pub partition: i32,
    pub replicas: Vec<i32>,
}

impl Partition {
    pub fn new(topic: impl Into<String>, partition: i32, replicas: Vec<i32>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            replicas,
        }
    }

    pub fn has_replica(&self, id: i32) -> bool {
        self.replicas.contains(&id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UseStats {
    pub leader: u32,
    pub follower: u32,
}

/// Ordered catalog of partitions and their replica sets. Construction sorts
/// by (topic, partition); every transform preserves the resulting order so
/// that planning outputs are reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartitionMap {
    pub partitions: Vec<Partition>,
}

impl PartitionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_partitions(mut partitions: Vec<Partition>) -> Self {
        partitions.sort_by(|a, b| a.topic.cmp(&b.topic).then(a.partition.cmp(&b.partition)));
        Self { partitions }
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Returns a copy with every replica slot reset to the stub ID, making
    /// every slot subject to selection on the next rebuild.
    pub fn strip(&self) -> Self {
        let partitions = self
            .partitions
            .iter()
            .map(|p| Partition {
                topic: p.topic.clone(),
                partition: p.partition,
                replicas: vec![STUB_BROKER_ID; p.replicas.len()],
            })
            .collect();
        Self { partitions }
    }

    /// Normalizes every replica set to length `replication`. Shorter sets are
    /// extended with stub slots; longer sets lose tail replicas first so that
    /// leadership is preserved. A `replication` of 0 leaves the map untouched.
    pub fn set_replication(&mut self, replication: usize) {
        if replication == 0 {
            return;
        }
        for partition in &mut self.partitions {
            if partition.replicas.len() < replication {
                partition.replicas.resize(replication, STUB_BROKER_ID);
            } else {
                partition.replicas.truncate(replication);
            }
        }
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for partition in &self.partitions {
            if topics.last() != Some(&partition.topic) {
                topics.push(partition.topic.clone());
            }
        }
        topics
    }

    pub fn replica_sets(&self, topic: &str) -> BTreeMap<i32, Vec<i32>> {
        self.partitions
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| (p.partition, p.replicas.clone()))
            .collect()
    }

    /// All broker IDs referenced by the map, stub slots excluded.
    pub fn broker_ids_used(&self) -> BTreeSet<i32> {
        self.partitions
            .iter()
            .flat_map(|p| p.replicas.iter().copied())
            .filter(|&id| id != STUB_BROKER_ID)
            .collect()
    }

    /// Leadership and followership counts per broker.
    pub fn use_stats(&self) -> BTreeMap<i32, UseStats> {
        let mut stats: BTreeMap<i32, UseStats> = BTreeMap::new();
        for partition in &self.partitions {
            for (position, &id) in partition.replicas.iter().enumerate() {
                if id == STUB_BROKER_ID {
                    continue;
                }
                let entry = stats.entry(id).or_default();
                if position == 0 {
                    entry.leader += 1;
                } else {
                    entry.follower += 1;
                }
            }
        }
        stats
    }

    /// Whether two maps carry the same partitions with the same replica
    /// membership, ignoring replica order within each set.
    pub fn equivalent(&self, other: &Self) -> bool {
        if self.partitions.len() != other.partitions.len() {
            return false;
        }
        self.partitions.iter().zip(&other.partitions).all(|(a, b)| {
            let a_set: BTreeSet<i32> = a.replicas.iter().copied().collect();
            let b_set: BTreeSet<i32> = b.replicas.iter().copied().collect();
            a.topic == b.topic
                && a.partition == b.partition
                && a.replicas.len() == b.replicas.len()
                && a_set == b_set
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartitionMeta {
    pub size: f64,
}

/// Side table from (topic, partition) to partition size in bytes. Only the
/// storage-aware paths consult it; a missing entry there is a hard error.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartitionMetaMap {
    sizes: BTreeMap<String, BTreeMap<i32, PartitionMeta>>,
}

impl PartitionMetaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, topic: impl Into<String>, partition: i32, size: f64) {
        self.sizes
            .entry(topic.into())
            .or_default()
            .insert(partition, PartitionMeta { size });
    }

    pub fn size(&self, partition: &Partition) -> Result<f64, MetaError> {
        self.sizes
            .get(&partition.topic)
            .and_then(|by_partition| by_partition.get(&partition.partition))
            .map(|meta| meta.size)
            .ok_or_else(|| MetaError::UnknownPartitionSize {
                topic: partition.topic.clone(),
                partition: partition.partition,
            })
    }
}

/// Broker ID to assigned-partitions index, derived from a partition map.
/// The rebalance planner walks it to enumerate offload candidates and unmaps
/// partitions as relocations are planned.
#[derive(Debug, Clone, Default)]
pub struct Mappings {
    assignments: BTreeMap<i32, Vec<Partition>>,
}

impl Mappings {
    pub fn from_partition_map(pm: &PartitionMap) -> Self {
        let mut assignments: BTreeMap<i32, Vec<Partition>> = BTreeMap::new();
        for partition in &pm.partitions {
            for &id in &partition.replicas {
                if id == STUB_BROKER_ID {
                    continue;
                }
                assignments.entry(id).or_default().push(partition.clone());
            }
        }
        Self { assignments }
    }

    /// The broker's largest assigned partitions, size descending, capped at
    /// `limit`. Ties break by topic then partition for a stable order.
    pub fn largest_partitions(
        &self,
        id: i32,
        limit: usize,
        meta: &PartitionMetaMap,
    ) -> Result<Vec<Partition>, MetaError> {
        let Some(assigned) = self.assignments.get(&id) else {
            return Ok(Vec::new());
        };

        let mut sized: Vec<(f64, &Partition)> = Vec::with_capacity(assigned.len());
        for partition in assigned {
            sized.push((meta.size(partition)?, partition));
        }
        sized.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.topic.cmp(&b.1.topic))
                .then(a.1.partition.cmp(&b.1.partition))
        });

        Ok(sized
            .into_iter()
            .take(limit)
            .map(|(_, partition)| partition.clone())
            .collect())
    }

    pub fn remove(&mut self, id: i32, partition: &Partition) {
        if let Some(assigned) = self.assignments.get_mut(&id) {
            assigned.retain(|p| !(p.topic == partition.topic && p.partition == partition.partition));
        }
    }

    pub fn assigned(&self, id: i32) -> &[Partition] {
        self.assignments
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
