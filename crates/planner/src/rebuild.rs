#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::str::FromStr;

use partmap_cluster::{
    best_candidate, BrokerRegistry, Constraints, Partition, PartitionMap, PartitionMetaMap,
    SelectionStrategy, STUB_BROKER_ID,
};

use crate::affinity::{substitution_affinities, SubstitutionAffinities};
use crate::leader::optimize_leaders;
use crate::PlanError;

/// Post-placement optimization applied to a rebuilt map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimization {
    Distribution,
    Leadership,
}

impl Optimization {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Distribution => "distribution",
            Self::Leadership => "leadership",
        }
    }
}

impl FromStr for Optimization {
    type Err = PlanError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "distribution" => Ok(Self::Distribution),
            "leadership" => Ok(Self::Leadership),
            other => Err(PlanError::InvalidInput(format!(
                "unknown optimization: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RebuildParams {
    pub strategy: SelectionStrategy,
    pub optimization: Optimization,
    pub partition_size_factor: f64,
    pub min_unique_rack_ids: usize,
    pub affinities: Option<SubstitutionAffinities>,
}

impl Default for RebuildParams {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::Count,
            optimization: Optimization::Distribution,
            partition_size_factor: 1.0,
            min_unique_rack_ids: 0,
            affinities: None,
        }
    }
}

/// Rebuilds a partition map against the registry. Surviving replicas are
/// kept in place; stub and replace-marked slots are filled by the candidate
/// selector, honoring per-set constraints and, when present, forced affinity
/// substitutions. Returns the new map plus accumulated warnings.
pub fn rebuild(
    pm: &PartitionMap,
    registry: &mut BrokerRegistry,
    meta: &PartitionMetaMap,
    params: &RebuildParams,
) -> Result<(PartitionMap, Vec<String>), PlanError> {
    let candidates = registry.filter(|b| !b.missing && !b.replace);

    let mut warnings = Vec::new();
    let mut partitions = Vec::with_capacity(pm.partitions.len());
    let mut pass: u64 = 0;

    for partition in &pm.partitions {
        pass += 1;

        let mut constraints = Constraints::merge(registry, &partition.replicas);
        if params.strategy == SelectionStrategy::Storage {
            let size = meta.size(partition)?;
            constraints.set_request_size(size * params.partition_size_factor);
        }

        let mut replicas = Vec::with_capacity(partition.replicas.len());
        for &id in &partition.replicas {
            let keep = id != STUB_BROKER_ID
                && registry.get(id).map(|b| !b.replace).unwrap_or(false);
            if keep {
                replicas.push(id);
                continue;
            }

            if let Some(substitute) = forced_substitute(registry, params, id, &constraints) {
                if let Some(broker) = registry.get_mut(substitute) {
                    constraints.add(broker);
                    broker.used += 1;
                }
                replicas.push(substitute);
                continue;
            }

            match best_candidate(registry, &candidates, &mut constraints, params.strategy, pass) {
                Ok(chosen) => replicas.push(chosen),
                Err(err) => warnings.push(format!(
                    "{} p{}: no suitable broker for replica slot: {err}",
                    partition.topic, partition.partition
                )),
            }
        }

        if replicas.len() != partition.replicas.len() {
            warnings.push(format!(
                "{} p{}: configured for {} replicas, only {} could be placed",
                partition.topic,
                partition.partition,
                partition.replicas.len(),
                replicas.len()
            ));
        }

        if params.min_unique_rack_ids > 0 {
            let localities: BTreeSet<&str> = replicas
                .iter()
                .filter_map(|&id| registry.get(id))
                .map(|b| b.locality.as_str())
                .collect();
            if localities.len() < params.min_unique_rack_ids {
                warnings.push(format!(
                    "{} p{}: replica set spans {} unique rack IDs, {} required",
                    partition.topic,
                    partition.partition,
                    localities.len(),
                    params.min_unique_rack_ids
                ));
            }
        }

        partitions.push(Partition::new(
            partition.topic.clone(),
            partition.partition,
            replicas,
        ));
    }

    for id in registry.filter(|b| b.new && b.used == 0) {
        warnings.push(format!("Broker {id} is unused"));
    }

    let mut map = PartitionMap { partitions };
    if params.optimization == Optimization::Leadership {
        optimize_leaders(&mut map);
    }

    Ok((map, warnings))
}

fn forced_substitute(
    registry: &BrokerRegistry,
    params: &RebuildParams,
    outgoing: i32,
    constraints: &Constraints,
) -> Option<i32> {
    if outgoing == STUB_BROKER_ID {
        return None;
    }
    let substitute = params.affinities.as_ref()?.get(outgoing)?;
    let broker = registry.get(substitute)?;
    constraints.passes(broker).ok()?;
    Some(substitute)
}

/// Full rebuild request: what `rebuild` needs plus the orchestration flags
/// the operator surface exposes.
#[derive(Debug, Clone)]
pub struct RebuildRequest {
    pub strategy: SelectionStrategy,
    pub optimization: Optimization,
    pub force_rebuild: bool,
    pub replication: usize,
    pub partition_size_factor: f64,
    pub min_unique_rack_ids: usize,
    pub sub_affinity: bool,
}

impl Default for RebuildRequest {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::Count,
            optimization: Optimization::Distribution,
            force_rebuild: false,
            replication: 0,
            partition_size_factor: 1.0,
            min_unique_rack_ids: 0,
            sub_affinity: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RebuildOutcome {
    pub map: PartitionMap,
    pub warnings: Vec<String>,
}

/// Plans a rebuild end to end.
///
/// A force rebuild strips the input so every slot is subject to selection;
/// under the storage strategy the registry is first refunded the storage of
/// all existing placements so they are not double-counted. An incremental
/// rebuild only refunds brokers marked for replacement and leaves surviving
/// placements alone, minimizing churn.
pub fn plan_rebuild(
    pm: &PartitionMap,
    registry: &mut BrokerRegistry,
    meta: &PartitionMetaMap,
    request: &RebuildRequest,
) -> Result<RebuildOutcome, PlanError> {
    let mut warnings = Vec::new();

    let mut affinities = None;
    if request.sub_affinity && !request.force_rebuild {
        let (resolved, affinity_warnings) = substitution_affinities(registry, pm);
        warnings.extend(affinity_warnings);
        if !resolved.is_empty() {
            affinities = Some(resolved);
        }
    }

    let mut input = pm.clone();
    input.set_replication(request.replication);

    let params = RebuildParams {
        strategy: request.strategy,
        optimization: request.optimization,
        partition_size_factor: request.partition_size_factor,
        min_unique_rack_ids: request.min_unique_rack_ids,
        affinities,
    };

    let (map, rebuild_warnings) = if request.force_rebuild {
        if let Some(broker) = registry.iter().find(|b| b.missing) {
            return Err(PlanError::MissingBroker { id: broker.id });
        }
        if request.strategy == SelectionStrategy::Storage {
            registry.sub_storage(pm, meta, |_| true)?;
        }
        rebuild(&input.strip(), registry, meta, &params)?
    } else {
        if request.strategy == SelectionStrategy::Storage {
            registry.sub_storage(pm, meta, |b| b.replace)?;
        }
        rebuild(&input, registry, meta, &params)?
    };
    warnings.extend(rebuild_warnings);

    Ok(RebuildOutcome { map, warnings })
}

/// Prepends each partition's current leader to the rebuilt replica set when
/// it is not already a member, producing a phase-1 map that keeps leadership
/// stable while the reassignment catches up.
pub fn phased_reassignment(current: &PartitionMap, rebuilt: &PartitionMap) -> PartitionMap {
    let mut phased = rebuilt.clone();
    for topic in rebuilt.topics() {
        let original_sets = current.replica_sets(&topic);
        for partition in &mut phased.partitions {
            if partition.topic != topic {
                continue;
            }
            let Some(original) = original_sets.get(&partition.partition) else {
                continue;
            };
            let Some(&leader) = original.first() else {
                continue;
            };
            if leader != STUB_BROKER_ID && !partition.replicas.contains(&leader) {
                partition.replicas.insert(0, leader);
            }
        }
    }
    phased
}
