#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use crate::metrics::BrokerMetricsMap;
use crate::{MetadataError, TopicConfig};

pub const LEADER_THROTTLED_REPLICAS_KEY: &str = "leader.replication.throttled.replicas";
pub const FOLLOWER_THROTTLED_REPLICAS_KEY: &str = "follower.replication.throttled.replicas";

/// Brokers participating in an ongoing reassignment, as leaders or
/// followers. Deduplicated, ascending by ID.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ThrottledReplicas {
    pub leaders: Vec<i32>,
    pub followers: Vec<i32>,
}

/// Parses a comma-separated `<partition>:<broker>` throttled replica list
/// into broker IDs. An empty list yields no IDs.
pub fn brokers_from_throttle_list(list: &str) -> Result<Vec<i32>, MetadataError> {
    let mut ids = Vec::new();
    if list.is_empty() {
        return Ok(ids);
    }
    for entry in list.split(',') {
        let Some((_, broker)) = entry.split_once(':') else {
            return Err(MetadataError::InvalidThrottleEntry(entry.to_string()));
        };
        let id: i32 = broker
            .parse()
            .map_err(|_| MetadataError::InvalidThrottleEntry(entry.to_string()))?;
        ids.push(id);
    }
    Ok(ids)
}

/// Assembles the throttled leader and follower broker sets from a group of
/// topic configs, joined against the broker metrics map. Per-topic failures
/// (malformed entries, brokers absent from metrics) are accumulated and
/// surfaced together.
pub fn throttled_replicas_from_configs(
    metrics: &BrokerMetricsMap,
    configs: &BTreeMap<String, TopicConfig>,
) -> Result<ThrottledReplicas, MetadataError> {
    let mut leaders: BTreeSet<i32> = BTreeSet::new();
    let mut followers: BTreeSet<i32> = BTreeSet::new();
    let mut errors: Vec<MetadataError> = Vec::new();

    for config in configs.values() {
        collect_list(
            config,
            LEADER_THROTTLED_REPLICAS_KEY,
            metrics,
            &mut leaders,
            &mut errors,
        );
        collect_list(
            config,
            FOLLOWER_THROTTLED_REPLICAS_KEY,
            metrics,
            &mut followers,
            &mut errors,
        );
    }

    if !errors.is_empty() {
        return Err(MetadataError::Aggregate(errors));
    }

    Ok(ThrottledReplicas {
        leaders: leaders.into_iter().collect(),
        followers: followers.into_iter().collect(),
    })
}

fn collect_list(
    config: &TopicConfig,
    key: &str,
    metrics: &BrokerMetricsMap,
    sink: &mut BTreeSet<i32>,
    errors: &mut Vec<MetadataError>,
) {
    let Some(list) = config.config.get(key) else {
        return;
    };
    match brokers_from_throttle_list(list) {
        Ok(ids) => {
            for id in ids {
                if metrics.contains_key(&id) {
                    sink.insert(id);
                } else {
                    errors.push(MetadataError::MetricsMissing { id });
                }
            }
        }
        Err(err) => errors.push(err),
    }
}
