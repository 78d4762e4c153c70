#![forbid(unsafe_code)]

mod broker;
mod constraints;
mod partition;

pub use broker::{Broker, BrokerMeta, BrokerMetaMap, BrokerRegistry, BrokerStatus};
pub use constraints::{
    best_candidate, ConstraintViolation, Constraints, SelectionError, SelectionStrategy,
};
pub use partition::{
    Mappings, MetaError, Partition, PartitionMap, PartitionMeta, PartitionMetaMap, UseStats,
    STUB_BROKER_ID,
};
