#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use partmap_cluster::{PartitionMap, STUB_BROKER_ID};

/// Rotates replica sets to equalize per-broker leadership counts without
/// changing membership. Each topic is balanced independently: while some
/// partition is led by a broker holding at least two more leaderships than
/// one of its followers, the follower is swapped into the leader slot. Every
/// swap strictly decreases the spread of leadership counts, so the climb
/// terminates.
pub fn optimize_leaders(pm: &mut PartitionMap) {
    for topic in pm.topics() {
        optimize_topic(pm, &topic);
    }
}

fn optimize_topic(pm: &mut PartitionMap, topic: &str) {
    let indices: Vec<usize> = pm
        .partitions
        .iter()
        .enumerate()
        .filter(|(_, p)| p.topic == topic)
        .map(|(index, _)| index)
        .collect();

    // Every replica-set member participates in the count, so brokers that
    // currently lead nothing still attract leadership.
    let mut counts: BTreeMap<i32, i64> = BTreeMap::new();
    for &index in &indices {
        for &id in &pm.partitions[index].replicas {
            if id != STUB_BROKER_ID {
                counts.entry(id).or_insert(0);
            }
        }
        if let Some(&leader) = pm.partitions[index].replicas.first() {
            if leader != STUB_BROKER_ID {
                *counts.entry(leader).or_insert(0) += 1;
            }
        }
    }

    loop {
        let Some((index, position)) = find_swap(pm, &indices, &counts) else {
            break;
        };
        let partition = &mut pm.partitions[index];
        let leader = partition.replicas[0];
        let follower = partition.replicas[position];
        partition.replicas.swap(0, position);
        if let Some(count) = counts.get_mut(&leader) {
            *count -= 1;
        }
        if let Some(count) = counts.get_mut(&follower) {
            *count += 1;
        }
    }
}

/// First partition (in map order) whose leader out-leads one of its
/// followers by two or more, paired with the lowest-count follower position.
fn find_swap(
    pm: &PartitionMap,
    indices: &[usize],
    counts: &BTreeMap<i32, i64>,
) -> Option<(usize, usize)> {
    for &index in indices {
        let partition = &pm.partitions[index];
        if partition.replicas.len() < 2 {
            continue;
        }
        let leader = partition.replicas[0];
        if leader == STUB_BROKER_ID {
            continue;
        }
        let leader_count = *counts.get(&leader)?;

        let mut best: Option<(i64, usize)> = None;
        for (position, &id) in partition.replicas.iter().enumerate().skip(1) {
            if id == STUB_BROKER_ID {
                continue;
            }
            let Some(&count) = counts.get(&id) else {
                continue;
            };
            if best.map(|(lowest, _)| count < lowest).unwrap_or(true) {
                best = Some((count, position));
            }
        }

        if let Some((count, position)) = best {
            if leader_count - count >= 2 {
                return Some((index, position));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use partmap_cluster::Partition;

    fn leader_counts(pm: &PartitionMap) -> BTreeMap<i32, u32> {
        pm.use_stats()
            .into_iter()
            .map(|(id, stats)| (id, stats.leader))
            .collect()
    }

    fn spread(counts: &BTreeMap<i32, u32>) -> u32 {
        let max = counts.values().copied().max().unwrap_or(0);
        let min = counts.values().copied().min().unwrap_or(0);
        max - min
    }

    #[test]
    fn leadership_is_spread_across_brokers() {
        let mut pm = PartitionMap::from_partitions(vec![
            Partition::new("orders", 0, vec![1001, 1002, 1003]),
            Partition::new("orders", 1, vec![1001, 1002, 1003]),
            Partition::new("orders", 2, vec![1001, 1003, 1002]),
        ]);
        optimize_leaders(&mut pm);

        let counts = leader_counts(&pm);
        assert!(spread(&counts) <= 1, "counts still skewed: {counts:?}");

        // Membership never changes.
        for partition in &pm.partitions {
            let mut members = partition.replicas.clone();
            members.sort_unstable();
            assert_eq!(members, vec![1001, 1002, 1003]);
        }
    }

    #[test]
    fn topics_are_balanced_independently() {
        let mut pm = PartitionMap::from_partitions(vec![
            Partition::new("orders", 0, vec![1001, 1002]),
            Partition::new("orders", 1, vec![1001, 1002]),
            Partition::new("audit", 0, vec![1003, 1004]),
            Partition::new("audit", 1, vec![1003, 1004]),
        ]);
        optimize_leaders(&mut pm);

        let counts = leader_counts(&pm);
        assert_eq!(counts[&1001], 1);
        assert_eq!(counts[&1002], 1);
        assert_eq!(counts[&1003], 1);
        assert_eq!(counts[&1004], 1);
    }

    #[test]
    fn balanced_map_is_untouched() {
        let mut pm = PartitionMap::from_partitions(vec![
            Partition::new("orders", 0, vec![1001, 1002]),
            Partition::new("orders", 1, vec![1002, 1001]),
        ]);
        let before = pm.clone();
        optimize_leaders(&mut pm);
        assert_eq!(pm, before);
    }

    #[test]
    fn single_replica_partitions_are_skipped() {
        let mut pm = PartitionMap::from_partitions(vec![
            Partition::new("orders", 0, vec![1001]),
            Partition::new("orders", 1, vec![1001]),
        ]);
        let before = pm.clone();
        optimize_leaders(&mut pm);
        assert_eq!(pm, before);
    }
}
