#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use partmap_cluster::{
    best_candidate, BrokerRegistry, BrokerStatus, Constraints, Mappings, MetaError, Partition,
    PartitionMap, PartitionMetaMap, SelectionStrategy,
};

use crate::leader::optimize_leaders;
use crate::PlanError;

pub const BYTES_PER_GB: f64 = 1_073_741_824.0;

#[derive(Debug, Clone)]
pub struct RebalanceParams {
    /// Fractional band around the arithmetic storage mean that sources and
    /// destinations must stay within.
    pub tolerance: f64,
    /// Ratio below the harmonic mean at which a broker becomes an offload
    /// target. 0 targets all non-new brokers.
    pub storage_threshold: f64,
    /// Absolute free-storage threshold in GB; overrides `storage_threshold`
    /// when positive.
    pub storage_threshold_gb: f64,
    /// Cap on partitions considered per source broker per pass.
    pub top_partitions_limit: usize,
    /// Restrict destinations to the source broker's locality.
    pub locality_scoped: bool,
    pub optimize_leaders: bool,
}

impl Default for RebalanceParams {
    fn default() -> Self {
        Self {
            tolerance: 0.10,
            storage_threshold: 0.20,
            storage_threshold_gb: 0.0,
            top_partitions_limit: 30,
            locality_scoped: false,
            optimize_leaders: false,
        }
    }
}

/// Ordered chains of (source, destination) broker pairs keyed by topic and
/// partition. Applied in recorded order, the chain rewrites a replica set
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelocationPlan {
    moves: BTreeMap<String, BTreeMap<i32, Vec<(i32, i32)>>>,
}

impl RelocationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, partition: &Partition, source: i32, destination: i32) {
        self.moves
            .entry(partition.topic.clone())
            .or_default()
            .entry(partition.partition)
            .or_default()
            .push((source, destination));
    }

    pub fn planned(&self, topic: &str, partition: i32) -> Option<&[(i32, i32)]> {
        self.moves
            .get(topic)
            .and_then(|by_partition| by_partition.get(&partition))
            .map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.moves.values().all(|by_partition| by_partition.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relocation {
    pub partition: Partition,
    pub destination: i32,
}

#[derive(Debug, Clone)]
pub struct RebalancePlan {
    pub map: PartitionMap,
    pub plan: RelocationPlan,
    pub relocations: BTreeMap<i32, Vec<Relocation>>,
    pub offload_targets: Vec<i32>,
}

impl RebalancePlan {
    /// Total bytes scheduled to move.
    pub fn total_volume(&self, meta: &PartitionMetaMap) -> Result<f64, MetaError> {
        let mut total = 0.0;
        for relocations in self.relocations.values() {
            for relocation in relocations {
                total += meta.size(&relocation.partition)?;
            }
        }
        Ok(total)
    }
}

/// Rebalance permits broker additions only; replacements and missing
/// brokers are rejected up front.
pub fn validate_brokers(status: &BrokerStatus) -> Result<(), PlanError> {
    if status.replace > 0 || status.missing > 0 || status.old_missing > 0 {
        return Err(PlanError::RebalanceWithRemovals {
            replace: status.replace,
            missing: status.missing + status.old_missing,
        });
    }
    Ok(())
}

/// Brokers to offload partitions from, ascending by ID. An absolute GB
/// threshold takes precedence; otherwise brokers a threshold ratio below the
/// harmonic mean are targeted, and a zero ratio targets every non-new broker.
pub fn offload_targets(registry: &BrokerRegistry, params: &RebalanceParams) -> Vec<i32> {
    if params.storage_threshold_gb > 0.0 {
        let limit = params.storage_threshold_gb * BYTES_PER_GB;
        return registry.filter(|b| !b.new && !b.missing && b.storage_free < limit);
    }
    if params.storage_threshold == 0.0 {
        return registry.filter(|b| !b.new && !b.missing);
    }
    registry.below_mean(params.storage_threshold, registry.harmonic_mean())
}

/// Plans a minimal set of partition movements off overloaded brokers.
///
/// Passes sweep the offload targets from most to least overloaded. Each
/// source may contribute at most one relocation per pass; a source that
/// produces nothing is retired. The loop ends when every source is retired.
pub fn rebalance(
    pm: &PartitionMap,
    registry: &mut BrokerRegistry,
    meta: &PartitionMetaMap,
    params: &RebalanceParams,
) -> Result<RebalancePlan, PlanError> {
    let targets = offload_targets(registry, params);
    let target_set: BTreeSet<i32> = targets.iter().copied().collect();

    let mut mappings = Mappings::from_partition_map(pm);
    let mut plan = RelocationPlan::new();
    let mut relocations: BTreeMap<i32, Vec<Relocation>> = BTreeMap::new();

    let mut active = target_set.clone();
    while !active.is_empty() {
        let mut sources: Vec<i32> = active.iter().copied().collect();
        // Most overloaded first; free storage ascending, ties by ID.
        sources.sort_by(|&a, &b| {
            let free_of = |id: i32| {
                registry
                    .get(id)
                    .map(|broker| broker.storage_free)
                    .unwrap_or(0.0)
            };
            free_of(a).total_cmp(&free_of(b)).then(a.cmp(&b))
        });

        for source in sources {
            let planned = plan_relocations_for_broker(
                registry,
                &mut mappings,
                meta,
                &mut plan,
                &mut relocations,
                source,
                &target_set,
                params,
            )?;
            if planned == 0 {
                active.remove(&source);
            }
        }
    }

    let mut map = pm.clone();
    apply_relocation_plan(&mut map, &plan);
    if params.optimize_leaders {
        optimize_leaders(&mut map);
    }

    Ok(RebalancePlan {
        map,
        plan,
        relocations,
        offload_targets: targets,
    })
}

#[allow(clippy::too_many_arguments)]
fn plan_relocations_for_broker(
    registry: &mut BrokerRegistry,
    mappings: &mut Mappings,
    meta: &PartitionMetaMap,
    plan: &mut RelocationPlan,
    relocations: &mut BTreeMap<i32, Vec<Relocation>>,
    source: i32,
    offload_targets: &BTreeSet<i32>,
    params: &RebalanceParams,
) -> Result<usize, PlanError> {
    // Arithmetic mean anchors the tolerance band.
    let mean = registry.mean();
    let top = mappings.largest_partitions(source, params.top_partitions_limit, meta)?;
    let Some(source_locality) = registry.get(source).map(|b| b.locality.clone()) else {
        return Ok(0);
    };

    let mut planned = 0;
    for partition in top {
        let size = meta.size(&partition)?;

        let destination = if params.locality_scoped {
            locality_scoped_destination(registry, &partition, source, &source_locality, offload_targets)
        } else {
            constrained_destination(registry, &partition, source, offload_targets)
        };
        let Some(destination) = destination else {
            return Ok(planned);
        };

        let Some(source_free) = registry.get(source).map(|b| b.storage_free + size) else {
            return Ok(planned);
        };
        let Some(destination_free) = registry.get(destination).map(|b| b.storage_free - size)
        else {
            continue;
        };

        // Reject moves that would push either endpoint outside the band.
        if source_free > mean * (1.0 + params.tolerance) {
            continue;
        }
        if destination_free < mean * (1.0 - params.tolerance) {
            continue;
        }

        plan.add(&partition, source, destination);
        relocations.entry(source).or_default().push(Relocation {
            partition: partition.clone(),
            destination,
        });
        if let Some(broker) = registry.get_mut(source) {
            broker.storage_free = source_free;
        }
        if let Some(broker) = registry.get_mut(destination) {
            broker.storage_free = destination_free;
        }
        mappings.remove(source, &partition);
        planned += 1;

        // One relocation per source per pass keeps the sweep fair.
        break;
    }

    Ok(planned)
}

fn locality_scoped_destination(
    registry: &BrokerRegistry,
    partition: &Partition,
    source: i32,
    source_locality: &str,
    offload_targets: &BTreeSet<i32>,
) -> Option<i32> {
    let mut candidates = registry.filter(|b| !b.missing);
    candidates.sort_by(|&a, &b| {
        let free_of = |id: i32| {
            registry
                .get(id)
                .map(|broker| broker.storage_free)
                .unwrap_or(0.0)
        };
        free_of(b).total_cmp(&free_of(a)).then(a.cmp(&b))
    });

    candidates.into_iter().find(|&id| {
        id != source
            && !offload_targets.contains(&id)
            && !partition.has_replica(id)
            && registry
                .get(id)
                .map(|broker| broker.locality == source_locality)
                .unwrap_or(false)
    })
}

fn constrained_destination(
    registry: &mut BrokerRegistry,
    partition: &Partition,
    source: i32,
    offload_targets: &BTreeSet<i32>,
) -> Option<i32> {
    let co_replicas: Vec<i32> = partition
        .replicas
        .iter()
        .copied()
        .filter(|&id| id != source)
        .collect();
    let mut constraints = Constraints::merge(registry, &co_replicas);
    // Offload targets are fenced off by ID only, leaving their racks open.
    for &id in offload_targets {
        constraints.ban_id(id);
    }

    let candidates = registry.filter(|b| !b.missing);
    best_candidate(
        registry,
        &candidates,
        &mut constraints,
        SelectionStrategy::Storage,
        0,
    )
    .ok()
}

/// Walks the map once, rewriting each replica through its planned chain of
/// (source, destination) pairs in recorded order. Positions are preserved, so
/// a relocated leader slot stays the leader slot.
pub fn apply_relocation_plan(pm: &mut PartitionMap, plan: &RelocationPlan) {
    for partition in &mut pm.partitions {
        let Some(pairs) = plan.planned(&partition.topic, partition.partition) else {
            continue;
        };
        for replica in &mut partition.replicas {
            for &(source, destination) in pairs {
                if *replica == source {
                    *replica = destination;
                }
            }
        }
    }
}
