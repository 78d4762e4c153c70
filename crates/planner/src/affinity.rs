#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use partmap_cluster::{BrokerRegistry, Constraints, PartitionMap};

use crate::PlanError;

/// A 1:1 pairing of replaced brokers to substitutes from the new-broker
/// pool, used to preserve per-broker locality characteristics across a
/// rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubstitutionAffinities {
    map: BTreeMap<i32, i32>,
}

impl SubstitutionAffinities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, replaced: i32) -> Option<i32> {
        self.map.get(&replaced).copied()
    }

    pub fn insert(&mut self, replaced: i32, substitute: i32) {
        self.map.insert(replaced, substitute);
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.map.iter().map(|(&replaced, &substitute)| (replaced, substitute))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Pairs each replaced broker with a substitute, reporting the brokers that
/// could not be paired as warnings. Planning continues without a forced
/// substitution for unpaired brokers.
pub fn substitution_affinities(
    registry: &BrokerRegistry,
    pm: &PartitionMap,
) -> (SubstitutionAffinities, Vec<String>) {
    let mut affinities = SubstitutionAffinities::new();
    let mut warnings = Vec::new();
    for (replaced, substitute) in resolve(registry, pm) {
        match substitute {
            Some(id) => affinities.insert(replaced, id),
            None => warnings.push(format!(
                "no substitution affinity could be resolved for broker {replaced}"
            )),
        }
    }
    (affinities, warnings)
}

/// As `substitution_affinities`, but the first unpairable broker is a typed
/// error instead of a warning.
pub fn substitution_affinities_strict(
    registry: &BrokerRegistry,
    pm: &PartitionMap,
) -> Result<SubstitutionAffinities, PlanError> {
    let mut affinities = SubstitutionAffinities::new();
    for (replaced, substitute) in resolve(registry, pm) {
        match substitute {
            Some(id) => affinities.insert(replaced, id),
            None => return Err(PlanError::AffinityUnresolved { id: replaced }),
        }
    }
    Ok(affinities)
}

fn resolve(registry: &BrokerRegistry, pm: &PartitionMap) -> Vec<(i32, Option<i32>)> {
    let new_ids = registry.filter(|b| b.new);
    let mut taken: BTreeSet<i32> = BTreeSet::new();

    registry
        .filter(|b| b.replace)
        .into_iter()
        .map(|replaced| {
            let substitute = find_substitute(registry, pm, replaced, &new_ids, &taken);
            if let Some(id) = substitute {
                taken.insert(id);
            }
            (replaced, substitute)
        })
        .collect()
}

fn find_substitute(
    registry: &BrokerRegistry,
    pm: &PartitionMap,
    replaced: i32,
    new_ids: &[i32],
    taken: &BTreeSet<i32>,
) -> Option<i32> {
    let broker = registry.get(replaced)?;

    if !broker.missing && !broker.locality.is_empty() {
        return new_ids.iter().copied().find(|&id| {
            !taken.contains(&id)
                && registry
                    .get(id)
                    .map(|candidate| candidate.locality == broker.locality)
                    .unwrap_or(false)
        });
    }

    // The replaced broker's locality is unknown. Infer a compatible
    // substitute from the localities of the replicas it cohabits with: any
    // new broker that would satisfy those replica sets can stand in.
    let mut co_resident: Vec<i32> = Vec::new();
    for partition in &pm.partitions {
        if !partition.has_replica(replaced) {
            continue;
        }
        co_resident.extend(partition.replicas.iter().copied().filter(|&id| id != replaced));
    }
    let constraints = Constraints::merge(registry, &co_resident);

    new_ids.iter().copied().find(|&id| {
        !taken.contains(&id)
            && registry
                .get(id)
                .map(|candidate| constraints.passes(candidate).is_ok())
                .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use partmap_cluster::{Broker, Partition, PartitionMap};

    fn registry_with(brokers: Vec<Broker>) -> BrokerRegistry {
        let mut registry = BrokerRegistry::new();
        for broker in brokers {
            registry.insert(broker);
        }
        registry
    }

    #[test]
    fn replaced_broker_binds_to_same_locality_substitute() {
        let mut registry = registry_with(vec![
            Broker::new(1001, "a", 0.0),
            Broker::new(1004, "a", 0.0),
            Broker::new(1005, "b", 0.0),
        ]);
        registry.get_mut(1001).expect("broker 1001").replace = true;
        registry.get_mut(1004).expect("broker 1004").new = true;
        registry.get_mut(1005).expect("broker 1005").new = true;

        let pm = PartitionMap::from_partitions(vec![Partition::new("orders", 0, vec![1001])]);
        let (affinities, warnings) = substitution_affinities(&registry, &pm);

        assert!(warnings.is_empty());
        assert_eq!(affinities.get(1001), Some(1004));
    }

    #[test]
    fn substitutes_are_assigned_at_most_once() {
        let mut registry = registry_with(vec![
            Broker::new(1001, "a", 0.0),
            Broker::new(1002, "a", 0.0),
            Broker::new(1004, "a", 0.0),
        ]);
        registry.get_mut(1001).expect("broker 1001").replace = true;
        registry.get_mut(1002).expect("broker 1002").replace = true;
        registry.get_mut(1004).expect("broker 1004").new = true;

        let pm = PartitionMap::from_partitions(vec![Partition::new(
            "orders",
            0,
            vec![1001, 1002],
        )]);
        let (affinities, warnings) = substitution_affinities(&registry, &pm);

        // Only one substitute exists, so one of the two stays unresolved.
        assert_eq!(affinities.len(), 1);
        assert_eq!(affinities.get(1001), Some(1004));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("1002"));
    }

    #[test]
    fn missing_broker_locality_is_inferred_from_co_residents() {
        let mut registry = registry_with(vec![
            Broker::new(1002, "b", 100.0),
            Broker::new(1003, "c", 100.0),
            Broker::new(1004, "b", 100.0),
            Broker::new(1005, "a", 100.0),
        ]);
        let mut vanished = Broker::new(1001, "", 0.0);
        vanished.missing = true;
        vanished.replace = true;
        registry.insert(vanished);
        registry.get_mut(1004).expect("broker 1004").new = true;
        registry.get_mut(1005).expect("broker 1005").new = true;

        let pm = PartitionMap::from_partitions(vec![Partition::new(
            "orders",
            0,
            vec![1001, 1002, 1003],
        )]);
        let (affinities, warnings) = substitution_affinities(&registry, &pm);

        // 1004 shares locality b with a co-resident replica, so only 1005
        // satisfies the inferred constraints.
        assert!(warnings.is_empty());
        assert_eq!(affinities.get(1001), Some(1005));
    }

    #[test]
    fn strict_resolution_fails_on_first_unresolved_broker() {
        let mut registry = registry_with(vec![Broker::new(1001, "a", 0.0)]);
        registry.get_mut(1001).expect("broker 1001").replace = true;

        let pm = PartitionMap::from_partitions(vec![Partition::new("orders", 0, vec![1001])]);
        let err = substitution_affinities_strict(&registry, &pm)
            .expect_err("no new brokers to substitute");
        assert_eq!(err, PlanError::AffinityUnresolved { id: 1001 });
    }
}
