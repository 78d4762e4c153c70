#![forbid(unsafe_code)]

use std::error::Error;
use std::fmt::{Display, Formatter};

use partmap_cluster::{MetaError, SelectionError};

mod affinity;
mod leader;
mod rebalance;
mod rebuild;

pub use affinity::{
    substitution_affinities, substitution_affinities_strict, SubstitutionAffinities,
};
pub use leader::optimize_leaders;
pub use rebalance::{
    apply_relocation_plan, offload_targets, rebalance, validate_brokers, RebalanceParams,
    RebalancePlan, Relocation, RelocationPlan, BYTES_PER_GB,
};
pub use rebuild::{
    phased_reassignment, plan_rebuild, rebuild, Optimization, RebuildOutcome, RebuildParams,
    RebuildRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    InvalidInput(String),
    MissingMetadata(MetaError),
    Selection(SelectionError),
    MissingBroker { id: i32 },
    RebalanceWithRemovals { replace: usize, missing: usize },
    AffinityUnresolved { id: i32 },
}

impl Display for PlanError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(reason) => write!(f, "invalid input: {reason}"),
            Self::MissingMetadata(err) => write!(f, "{err}"),
            Self::Selection(err) => write!(f, "{err}"),
            Self::MissingBroker { id } => {
                write!(f, "broker {id} is referenced by the partition map but not registered")
            }
            Self::RebalanceWithRemovals { replace, missing } => write!(
                f,
                "rebalance only allows broker additions ({replace} marked for replacement, {missing} missing)"
            ),
            Self::AffinityUnresolved { id } => {
                write!(f, "no substitution affinity could be resolved for broker {id}")
            }
        }
    }
}

impl Error for PlanError {}

impl From<MetaError> for PlanError {
    fn from(value: MetaError) -> Self {
        Self::MissingMetadata(value)
    }
}

impl From<SelectionError> for PlanError {
    fn from(value: SelectionError) -> Self {
        Self::Selection(value)
    }
}
