use crate::domain::lifecycle::BlockState;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetirementStep {
    Lookup,
    Revalidate,
    TransferTasks,
    TransferHarvests,
    ReleaseArea,
    DeletePendingTasks,
    DeleteVirtualBlock,
    RecomputeParentState,
    Persist,
}

impl RetirementStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Revalidate => "revalidate",
            Self::TransferTasks => "transfer_tasks",
            Self::TransferHarvests => "transfer_harvests",
            Self::ReleaseArea => "release_area",
            Self::DeletePendingTasks => "delete_pending_tasks",
            Self::DeleteVirtualBlock => "delete_virtual_block",
            Self::RecomputeParentState => "recompute_parent_state",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for RetirementStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error(
        "insufficient area on block {block_id}: requested {requested:.2} m2, available {available:.2} m2"
    )]
    InsufficientArea {
        block_id: String,
        requested: f64,
        available: f64,
    },
    #[error("transition rejected for block {block_id}: {from} -> {to} ({reason})")]
    TransitionRejected {
        block_id: String,
        from: BlockState,
        to: BlockState,
        reason: String,
    },
    #[error("retirement of virtual block {virtual_block_id} failed at {step}: {reason}")]
    RetirementFailed {
        virtual_block_id: String,
        step: RetirementStep,
        reason: String,
    },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("area ledger violation on block {block_id}: {reason}")]
    LedgerViolation { block_id: String, reason: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error(
        "block {block_id} still owns {dependents} planting(s) or virtual block(s); deletion requires cascade confirmation"
    )]
    CascadeRequired { block_id: String, dependents: usize },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn rejected(
        block_id: impl Into<String>,
        from: BlockState,
        to: BlockState,
        reason: impl Into<String>,
    ) -> Self {
        Self::TransitionRejected {
            block_id: block_id.into(),
            from,
            to,
            reason: reason.into(),
        }
    }
}
