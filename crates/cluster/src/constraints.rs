#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::broker::{Broker, BrokerRegistry};
use crate::partition::STUB_BROKER_ID;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintViolation {
    StorageExhausted { locality: String },
    LocalityExhausted { locality: String },
    IdInReplicaSet { id: i32 },
}

impl Display for ConstraintViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StorageExhausted { locality } => {
                write!(f, "locality {locality} exhausted of storage capacity")
            }
            Self::LocalityExhausted { locality } => {
                write!(f, "locality {locality} exhausted of available brokers")
            }
            Self::IdInReplicaSet { id } => write!(f, "ID {id} already in replica set"),
        }
    }
}

impl Error for ConstraintViolation {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    InvalidStrategy(String),
    Exhausted(ConstraintViolation),
    NoBrokers,
}

impl Display for SelectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStrategy(token) => write!(f, "invalid selection method: {token}"),
            Self::Exhausted(violation) => write!(f, "{violation}"),
            Self::NoBrokers => write!(f, "no candidate brokers"),
        }
    }
}

impl Error for SelectionError {}

/// How the candidate selector orders brokers before walking them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    Count,
    Storage,
}

impl SelectionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Storage => "storage",
        }
    }
}

impl FromStr for SelectionStrategy {
    type Err = SelectionError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "count" => Ok(Self::Count),
            "storage" => Ok(Self::Storage),
            other => Err(SelectionError::InvalidStrategy(other.to_string())),
        }
    }
}

/// Cumulative exclusion record for a single replica slot being filled:
/// brokers already chosen for the set are excluded by ID and locality, and
/// the pending placement's size is charged against candidates.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Constraints {
    request_size: f64,
    localities: BTreeSet<String>,
    ids: BTreeSet<i32>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds constraints from the non-replace members of a replica set, so
    /// vacated slots can be refilled with candidates sharing the outgoing
    /// broker's attributes.
    pub fn merge(registry: &BrokerRegistry, replicas: &[i32]) -> Self {
        let mut constraints = Self::new();
        for &id in replicas {
            if id == STUB_BROKER_ID {
                continue;
            }
            let Some(broker) = registry.get(id) else {
                continue;
            };
            if broker.replace {
                continue;
            }
            constraints.ids.insert(broker.id);
            if !broker.locality.is_empty() {
                constraints.localities.insert(broker.locality.clone());
            }
        }
        constraints
    }

    pub fn set_request_size(&mut self, size: f64) {
        self.request_size = size;
    }

    pub fn request_size(&self) -> f64 {
        self.request_size
    }

    /// Excludes an ID without excluding its locality.
    pub fn ban_id(&mut self, id: i32) {
        self.ids.insert(id);
    }

    /// Checks are ordered so the reported violation names the most material
    /// cause: storage exhaustion, then locality, then ID.
    pub fn passes(&self, broker: &Broker) -> Result<(), ConstraintViolation> {
        if broker.storage_free - self.request_size < 0.0 {
            return Err(ConstraintViolation::StorageExhausted {
                locality: broker.locality.clone(),
            });
        }
        if self.localities.contains(&broker.locality) {
            return Err(ConstraintViolation::LocalityExhausted {
                locality: broker.locality.clone(),
            });
        }
        if self.ids.contains(&broker.id) {
            return Err(ConstraintViolation::IdInReplicaSet { id: broker.id });
        }
        Ok(())
    }

    /// Absorbs a chosen broker: its ID and locality join the forbidden sets
    /// and the request size is deducted from its free storage.
    pub fn add(&mut self, broker: &mut Broker) {
        broker.storage_free -= self.request_size;
        if !broker.locality.is_empty() {
            self.localities.insert(broker.locality.clone());
        }
        self.ids.insert(broker.id);
    }
}

/// Orders `candidates` by the given strategy and returns the first broker
/// passing the constraints. The chosen broker is absorbed into the
/// constraints and its use counter incremented. On exhaustion the last
/// violation observed is returned, surfacing the dominant reason nothing fit.
pub fn best_candidate(
    registry: &mut BrokerRegistry,
    candidates: &[i32],
    constraints: &mut Constraints,
    strategy: SelectionStrategy,
    pass: u64,
) -> Result<i32, SelectionError> {
    let mut ordered: Vec<i32> = candidates
        .iter()
        .copied()
        .filter(|&id| registry.contains(id))
        .collect();

    match strategy {
        SelectionStrategy::Count => sort_pseudo_shuffle(registry, &mut ordered, pass),
        SelectionStrategy::Storage => sort_by_storage(registry, &mut ordered),
    }

    let mut last_violation = None;
    for id in ordered {
        let Some(broker) = registry.get(id) else {
            continue;
        };
        match constraints.passes(broker) {
            Ok(()) => {
                let Some(broker) = registry.get_mut(id) else {
                    continue;
                };
                constraints.add(broker);
                broker.used += 1;
                return Ok(id);
            }
            Err(violation) => last_violation = Some(violation),
        }
    }

    Err(match last_violation {
        Some(violation) => SelectionError::Exhausted(violation),
        None => SelectionError::NoBrokers,
    })
}

/// Sort by use count ascending, shuffling runs of equal counts with a
/// generator seeded by the pass value. Equal seeds produce equal orders, so
/// placement spread stays reproducible across runs.
fn sort_pseudo_shuffle(registry: &BrokerRegistry, ids: &mut [i32], seed: u64) {
    let used_of = |id: i32| registry.get(id).map(|b| b.used).unwrap_or(0);
    ids.sort_by_key(|&id| (used_of(id), id));

    let mut rng = StdRng::seed_from_u64(seed);
    let mut start = 0;
    while start < ids.len() {
        let used = used_of(ids[start]);
        let mut end = start + 1;
        while end < ids.len() && used_of(ids[end]) == used {
            end += 1;
        }
        ids[start..end].shuffle(&mut rng);
        start = end;
    }
}

fn sort_by_storage(registry: &BrokerRegistry, ids: &mut [i32]) {
    let storage_of = |id: i32| registry.get(id).map(|b| b.storage_free).unwrap_or(0.0);
    ids.sort_by(|&a, &b| storage_of(b).total_cmp(&storage_of(a)).then(a.cmp(&b)));
}
