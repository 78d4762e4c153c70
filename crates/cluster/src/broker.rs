#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use crate::partition::{MetaError, PartitionMap, PartitionMetaMap, STUB_BROKER_ID};

/// One broker as seen by a single planning pass. All fields are mutated only
/// by the planners during that pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Broker {
    pub id: i32,
    pub locality: String,
    pub storage_free: f64,
    pub used: u32,
    pub new: bool,
    pub missing: bool,
    pub replace: bool,
}

impl Broker {
    pub fn new(id: i32, locality: impl Into<String>, storage_free: f64) -> Self {
        Self {
            id,
            locality: locality.into(),
            storage_free,
            used: 0,
            new: false,
            missing: false,
            replace: false,
        }
    }

    fn from_meta(id: i32, meta: &BrokerMeta) -> Self {
        Self::new(id, meta.locality.clone(), meta.storage_free)
    }

    fn unregistered(id: i32) -> Self {
        Self {
            missing: true,
            ..Self::new(id, "", 0.0)
        }
    }
}

/// The metadata-store view of one broker: rack label plus storage telemetry.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMeta {
    pub locality: String,
    pub storage_free: f64,
}

pub type BrokerMetaMap = BTreeMap<i32, BrokerMeta>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BrokerStatus {
    pub new: usize,
    pub missing: usize,
    pub old_missing: usize,
    pub replace: usize,
}

impl BrokerStatus {
    pub fn changes(&self) -> bool {
        self.new + self.missing + self.old_missing + self.replace > 0
    }
}

/// Flat registry of brokers keyed by ID. Partitions refer to brokers only by
/// ID; the registry is the single owner of broker state within a pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BrokerRegistry {
    brokers: BTreeMap<i32, Broker>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the set of brokers currently holding any replica. Brokers
    /// referenced by the map but absent from the metadata view are inserted
    /// with `missing` set.
    pub fn from_partition_map(pm: &PartitionMap, meta: &BrokerMetaMap) -> Self {
        let mut brokers = BTreeMap::new();
        for partition in &pm.partitions {
            for &id in &partition.replicas {
                if id == STUB_BROKER_ID || brokers.contains_key(&id) {
                    continue;
                }
                let broker = match meta.get(&id) {
                    Some(m) => Broker::from_meta(id, m),
                    None => Broker::unregistered(id),
                };
                brokers.insert(id, broker);
            }
        }
        Self { brokers }
    }

    pub fn insert(&mut self, broker: Broker) {
        self.brokers.insert(broker.id, broker);
    }

    pub fn get(&self, id: i32) -> Option<&Broker> {
        self.brokers.get(&id)
    }

    pub fn get_mut(&mut self, id: i32) -> Option<&mut Broker> {
        self.brokers.get_mut(&id)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.brokers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.brokers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Broker> {
        self.brokers.values()
    }

    pub fn ids(&self) -> Vec<i32> {
        self.brokers.keys().copied().collect()
    }

    /// Diffs the operator-supplied broker list against the registry.
    ///
    /// IDs in the list but not in the registry are inserted as `new` when the
    /// metadata view knows them, and counted `missing` when it does not. IDs
    /// in the registry but not in the list are marked for replacement.
    /// Registry brokers that have dropped out of the metadata view keep
    /// `missing` and are marked for replacement as well (`old_missing`).
    pub fn update(&mut self, ids: &[i32], meta: &BrokerMetaMap) -> (BrokerStatus, Vec<String>) {
        let mut status = BrokerStatus::default();
        let mut messages = Vec::new();
        let provided: BTreeSet<i32> = ids.iter().copied().collect();

        for broker in self.brokers.values_mut() {
            match meta.get(&broker.id) {
                Some(m) => {
                    broker.locality = m.locality.clone();
                    broker.storage_free = m.storage_free;
                    broker.missing = false;
                }
                None => {
                    broker.missing = true;
                    broker.replace = true;
                    status.old_missing += 1;
                    messages.push(format!(
                        "Broker {} is no longer registered in the metadata store, marking for replacement",
                        broker.id
                    ));
                }
            }
        }

        for broker in self.brokers.values_mut() {
            if broker.replace || provided.contains(&broker.id) {
                continue;
            }
            broker.replace = true;
            status.replace += 1;
            messages.push(format!("Broker {} marked for removal", broker.id));
        }

        for &id in &provided {
            if self.brokers.contains_key(&id) {
                continue;
            }
            let Some(m) = meta.get(&id) else {
                status.missing += 1;
                messages.push(format!("Broker {id} not found in the metadata store"));
                continue;
            };
            let mut broker = Broker::from_meta(id, m);
            broker.new = true;
            self.brokers.insert(id, broker);
            status.new += 1;
            messages.push(format!("New broker {id}"));
        }

        (status, messages)
    }

    /// IDs of brokers matching the predicate, ascending. Predicates are
    /// consumed synchronously within a pass, never stored.
    pub fn filter<F>(&self, predicate: F) -> Vec<i32>
    where
        F: Fn(&Broker) -> bool,
    {
        self.brokers
            .values()
            .filter(|b| predicate(b))
            .map(|b| b.id)
            .collect()
    }

    /// Arithmetic mean of free storage over non-missing brokers.
    pub fn mean(&self) -> f64 {
        let mut total = 0.0;
        let mut count = 0.0;
        for broker in self.brokers.values() {
            if broker.missing || broker.storage_free <= 0.0 {
                continue;
            }
            total += broker.storage_free;
            count += 1.0;
        }
        if count == 0.0 {
            return 0.0;
        }
        total / count
    }

    /// Harmonic mean of free storage over non-missing brokers. Biased toward
    /// the minimum, which makes it a robust reference for below-average
    /// selection under skewed distributions.
    pub fn harmonic_mean(&self) -> f64 {
        let mut reciprocals = 0.0;
        let mut count = 0.0;
        for broker in self.brokers.values() {
            if broker.missing || broker.storage_free <= 0.0 {
                continue;
            }
            reciprocals += 1.0 / broker.storage_free;
            count += 1.0;
        }
        if count == 0.0 {
            return 0.0;
        }
        count / reciprocals
    }

    /// IDs of non-new brokers whose free storage sits at least
    /// `ratio * reference_mean` below `reference_mean`, ascending.
    pub fn below_mean(&self, ratio: f64, reference_mean: f64) -> Vec<i32> {
        if reference_mean <= 0.0 {
            return Vec::new();
        }
        self.brokers
            .values()
            .filter(|b| {
                !b.new && !b.missing && reference_mean - b.storage_free >= ratio * reference_mean
            })
            .map(|b| b.id)
            .collect()
    }

    /// Refunds each matching broker the size of every partition currently
    /// assigned to it, so a subsequent storage-aware rebuild does not count
    /// existing placements twice.
    pub fn sub_storage<F>(
        &mut self,
        pm: &PartitionMap,
        meta: &PartitionMetaMap,
        predicate: F,
    ) -> Result<(), MetaError>
    where
        F: Fn(&Broker) -> bool,
    {
        for partition in &pm.partitions {
            let size = meta.size(partition)?;
            for &id in &partition.replicas {
                let Some(broker) = self.brokers.get_mut(&id) else {
                    continue;
                };
                if predicate(broker) {
                    broker.storage_free += size;
                }
            }
        }
        Ok(())
    }
}
