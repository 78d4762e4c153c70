use std::collections::BTreeSet;

use partmap_cluster::{
    Broker, BrokerMeta, BrokerMetaMap, BrokerRegistry, Partition, PartitionMap, PartitionMetaMap,
};
use partmap_planner::{rebalance, validate_brokers, PlanError, RebalanceParams};

fn registry_with(brokers: Vec<Broker>) -> BrokerRegistry {
    let mut registry = BrokerRegistry::new();
    for broker in brokers {
        registry.insert(broker);
    }
    registry
}

fn assert_no_duplicate_replicas(pm: &PartitionMap) {
    for partition in &pm.partitions {
        let unique: BTreeSet<i32> = partition.replicas.iter().copied().collect();
        assert_eq!(
            unique.len(),
            partition.replicas.len(),
            "duplicate replica in {} p{}: {:?}",
            partition.topic,
            partition.partition,
            partition.replicas
        );
    }
}

#[test]
fn overloaded_destination_rejects_the_relocation() {
    // Brokers at 100/100/20; only 1003 falls below the harmonic-mean
    // threshold. Moving its 40-unit partition would leave the destination at
    // 60, under the lower tolerance bound of 66, so nothing moves.
    let mut registry = registry_with(vec![
        Broker::new(1001, "a", 100.0),
        Broker::new(1002, "b", 100.0),
        Broker::new(1003, "c", 20.0),
    ]);
    let pm = PartitionMap::from_partitions(vec![
        Partition::new("events", 0, vec![1003]),
        Partition::new("events", 1, vec![1001]),
    ]);
    let mut sizes = PartitionMetaMap::new();
    sizes.insert("events", 0, 40.0);
    sizes.insert("events", 1, 40.0);

    let plan = rebalance(&pm, &mut registry, &sizes, &RebalanceParams::default())
        .expect("rebalance plans");

    assert_eq!(plan.offload_targets, vec![1003]);
    assert!(plan.plan.is_empty());
    assert!(plan.relocations.is_empty());
    assert_eq!(plan.map, pm);
}

#[test]
fn source_leaving_the_band_rejects_the_relocation() {
    // Mean is 110 with a [99, 121] band. Offloading the 85-unit partition
    // would lift the source to 125, over the upper bound, even though the
    // destination stays comfortably inside the band.
    let mut registry = registry_with(vec![
        Broker::new(1001, "a", 40.0),
        Broker::new(1002, "b", 200.0),
        Broker::new(1003, "c", 90.0),
    ]);
    let pm = PartitionMap::from_partitions(vec![Partition::new("events", 0, vec![1001])]);
    let mut sizes = PartitionMetaMap::new();
    sizes.insert("events", 0, 85.0);

    let params = RebalanceParams {
        storage_threshold: 0.2,
        ..RebalanceParams::default()
    };
    let plan = rebalance(&pm, &mut registry, &sizes, &params).expect("rebalance plans");

    assert!(plan.offload_targets.contains(&1001));
    assert!(plan.plan.is_empty());
    assert_eq!(plan.map, pm);
}

#[test]
fn relocation_moves_a_partition_inside_the_band() {
    let mut registry = registry_with(vec![
        Broker::new(1001, "a", 20.0),
        Broker::new(1002, "b", 150.0),
        Broker::new(1003, "c", 130.0),
    ]);
    let pm = PartitionMap::from_partitions(vec![
        Partition::new("events", 0, vec![1001]),
        Partition::new("events", 1, vec![1003]),
    ]);
    let mut sizes = PartitionMetaMap::new();
    sizes.insert("events", 0, 50.0);
    sizes.insert("events", 1, 10.0);

    let plan = rebalance(&pm, &mut registry, &sizes, &RebalanceParams::default())
        .expect("rebalance plans");

    assert_eq!(plan.offload_targets, vec![1001]);
    let moved = plan.relocations.get(&1001).expect("one relocation planned");
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].destination, 1002);
    assert_eq!(plan.map.partitions[0].replicas, vec![1002]);
    // The untouched partition stays put.
    assert_eq!(plan.map.partitions[1].replicas, vec![1003]);

    // Storage was settled on both ends.
    let source = registry.get(1001).expect("broker 1001");
    let destination = registry.get(1002).expect("broker 1002");
    assert!((source.storage_free - 70.0).abs() < 1e-9);
    assert!((destination.storage_free - 100.0).abs() < 1e-9);

    let volume = plan.total_volume(&sizes).expect("sizes are known");
    assert!((volume - 50.0).abs() < 1e-9);
    assert_no_duplicate_replicas(&plan.map);
}

#[test]
fn one_relocation_per_source_per_pass() {
    // The source holds two partitions that both fit the band; fairness means
    // they leave in separate passes, and storage accounting from the first
    // move shapes the second destination choice.
    let mut registry = registry_with(vec![
        Broker::new(1001, "a", 10.0),
        Broker::new(1002, "b", 120.0),
        Broker::new(1003, "c", 110.0),
    ]);
    let pm = PartitionMap::from_partitions(vec![
        Partition::new("events", 0, vec![1001]),
        Partition::new("events", 1, vec![1001]),
    ]);
    let mut sizes = PartitionMetaMap::new();
    sizes.insert("events", 0, 30.0);
    sizes.insert("events", 1, 25.0);

    let params = RebalanceParams {
        tolerance: 0.5,
        ..RebalanceParams::default()
    };
    let plan = rebalance(&pm, &mut registry, &sizes, &params).expect("rebalance plans");

    let moved = plan.relocations.get(&1001).expect("relocations planned");
    assert_eq!(moved.len(), 2);
    // Largest partition first, to the most-free broker at that time.
    assert_eq!(moved[0].partition.partition, 0);
    assert_eq!(moved[0].destination, 1002);
    // By the second pass 1002 has dropped to 90, so 1003 leads.
    assert_eq!(moved[1].partition.partition, 1);
    assert_eq!(moved[1].destination, 1003);
    assert_no_duplicate_replicas(&plan.map);
}

#[test]
fn locality_scoped_destinations_share_the_source_rack() {
    let mut registry = registry_with(vec![
        Broker::new(1001, "a", 20.0),
        Broker::new(1002, "a", 150.0),
        Broker::new(1003, "b", 400.0),
    ]);
    let pm = PartitionMap::from_partitions(vec![Partition::new("events", 0, vec![1001])]);
    let mut sizes = PartitionMetaMap::new();
    sizes.insert("events", 0, 50.0);

    let params = RebalanceParams {
        locality_scoped: true,
        tolerance: 0.8,
        ..RebalanceParams::default()
    };
    let plan = rebalance(&pm, &mut registry, &sizes, &params).expect("rebalance plans");

    // 1003 has far more free storage but sits in another rack.
    let moved = plan.relocations.get(&1001).expect("one relocation planned");
    assert_eq!(moved[0].destination, 1002);
    assert_eq!(plan.map.partitions[0].replicas, vec![1002]);
}

#[test]
fn destination_never_duplicates_an_existing_replica() {
    // The only storage-rich broker already holds a replica; the plan must
    // fall through to a less attractive destination rather than double up.
    let mut registry = registry_with(vec![
        Broker::new(1001, "a", 20.0),
        Broker::new(1002, "b", 300.0),
        Broker::new(1003, "c", 140.0),
    ]);
    let pm = PartitionMap::from_partitions(vec![Partition::new(
        "events",
        0,
        vec![1001, 1002],
    )]);
    let mut sizes = PartitionMetaMap::new();
    sizes.insert("events", 0, 40.0);

    let params = RebalanceParams {
        tolerance: 0.9,
        ..RebalanceParams::default()
    };
    let plan = rebalance(&pm, &mut registry, &sizes, &params).expect("rebalance plans");

    let moved = plan.relocations.get(&1001).expect("one relocation planned");
    assert_eq!(moved[0].destination, 1003);
    assert_eq!(plan.map.partitions[0].replicas, vec![1003, 1002]);
    assert_no_duplicate_replicas(&plan.map);
}

#[test]
fn rebalance_validation_rejects_broker_removals() {
    let pm = PartitionMap::from_partitions(vec![Partition::new("events", 0, vec![1001, 1002])]);
    let meta: BrokerMetaMap = [
        (
            1001,
            BrokerMeta {
                locality: String::from("a"),
                storage_free: 100.0,
            },
        ),
        (
            1002,
            BrokerMeta {
                locality: String::from("b"),
                storage_free: 100.0,
            },
        ),
    ]
    .into_iter()
    .collect();
    let mut registry = BrokerRegistry::from_partition_map(&pm, &meta);

    // Dropping 1001 from the list marks it for replacement.
    let (status, _) = registry.update(&[1002], &meta);
    let err = validate_brokers(&status).expect_err("removals are not allowed");
    assert_eq!(
        err,
        PlanError::RebalanceWithRemovals {
            replace: 1,
            missing: 0,
        }
    );
}

#[test]
fn identical_inputs_produce_identical_relocation_plans() {
    let build = || {
        let mut registry = registry_with(vec![
            Broker::new(1001, "a", 15.0),
            Broker::new(1002, "b", 140.0),
            Broker::new(1003, "c", 120.0),
            Broker::new(1004, "a", 25.0),
        ]);
        let pm = PartitionMap::from_partitions(vec![
            Partition::new("events", 0, vec![1001]),
            Partition::new("events", 1, vec![1004]),
            Partition::new("events", 2, vec![1001]),
        ]);
        let mut sizes = PartitionMetaMap::new();
        sizes.insert("events", 0, 30.0);
        sizes.insert("events", 1, 20.0);
        sizes.insert("events", 2, 10.0);

        let params = RebalanceParams {
            tolerance: 0.6,
            ..RebalanceParams::default()
        };
        rebalance(&pm, &mut registry, &sizes, &params).expect("rebalance plans")
    };

    let first = build();
    let second = build();
    assert_eq!(first.map, second.map);
    assert_eq!(first.plan, second.plan);
    assert_eq!(first.offload_targets, second.offload_targets);
    assert_no_duplicate_replicas(&first.map);
}
