use crate::domain::area_ledger::ClaimOwner;
use crate::domain::error::DomainError;
use crate::domain::farm_state::{FarmState, FarmTransaction};
use crate::domain::models::{Occupancy, Planting};
use crate::domain::pending_guard::{self, ConflictResolution, GuardDecision, PendingTaskSummary};
use crate::domain::retirement;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    Empty,
    Planned,
    Planted,
    Fruiting,
    Harvesting,
    Cleaning,
    Partial,
}

impl BlockState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Planned => "planned",
            Self::Planted => "planted",
            Self::Fruiting => "fruiting",
            Self::Harvesting => "harvesting",
            Self::Cleaning => "cleaning",
            Self::Partial => "partial",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "empty" => Some(Self::Empty),
            "planned" => Some(Self::Planned),
            "planted" | "growing" => Some(Self::Planted),
            "fruiting" => Some(Self::Fruiting),
            "harvesting" => Some(Self::Harvesting),
            "cleaning" => Some(Self::Cleaning),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns why `from -> to` is not an edge of the lifecycle, or `None` when it is.
pub fn edge_rejection(from: BlockState, to: BlockState) -> Option<&'static str> {
    use BlockState::*;

    if from == to {
        return Some("block is already in the requested state");
    }
    if from == Partial || to == Partial {
        return Some("partial is derived from virtual block occupancy");
    }
    match (from, to) {
        (Empty, Planned)
        | (Empty, Planted)
        | (Planned, Planted)
        | (Planned, Empty)
        | (Planted, Fruiting)
        | (Planted, Harvesting)
        | (Fruiting, Harvesting)
        | (Harvesting, Cleaning)
        | (Cleaning, Empty) => None,
        _ => Some("transition is not part of the block lifecycle"),
    }
}

pub fn check_transition(block_id: &str, from: BlockState, to: BlockState) -> Result<(), DomainError> {
    match edge_rejection(from, to) {
        Some(reason) => Err(DomainError::rejected(block_id, from, to, reason)),
        None => Ok(()),
    }
}

/// First state of a new planting: planned for a future date, planted otherwise.
pub fn entry_state(planned_date: NaiveDate, today: NaiveDate) -> BlockState {
    if planned_date > today {
        BlockState::Planned
    } else {
        BlockState::Planted
    }
}

pub fn check_entry(
    block_id: &str,
    state: BlockState,
    planned_date: NaiveDate,
    today: NaiveDate,
) -> Result<(), DomainError> {
    check_transition(block_id, BlockState::Empty, state)?;
    let expected = entry_state(planned_date, today);
    if state != expected {
        let reason = match state {
            BlockState::Planned => format!("planned date {planned_date} must be after {today}"),
            _ => format!("planting date {planned_date} is after {today}"),
        };
        return Err(DomainError::rejected(block_id, BlockState::Empty, state, reason));
    }
    Ok(())
}

fn advance_planting(
    block_id: &str,
    planting: &mut Planting,
    to: BlockState,
    today: NaiveDate,
) -> Result<(), DomainError> {
    check_transition(block_id, planting.state, to)?;
    if to == BlockState::Planted {
        if planting.planned_date > today {
            return Err(DomainError::rejected(
                block_id,
                planting.state,
                to,
                format!("planting date {} is after {today}", planting.planned_date),
            ));
        }
        planting.planted_date = Some(today);
    }
    planting.state = to;
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransitionOutcome {
    Applied {
        block_id: String,
        from: BlockState,
        to: BlockState,
        forced: bool,
    },
    PendingTasksConflict {
        block_id: String,
        from: BlockState,
        target: BlockState,
        pending_tasks: Vec<PendingTaskSummary>,
    },
    Cancelled {
        block_id: String,
        state: BlockState,
        pending_tasks: Vec<PendingTaskSummary>,
    },
}

/// Validates a transition without touching state and returns the current state.
pub fn preflight(state: &FarmState, block_id: &str, target: BlockState) -> Result<BlockState, DomainError> {
    if let Some(block) = state.virtual_block(block_id) {
        let from = block.state();
        check_transition(block_id, from, target)?;
        return Ok(from);
    }

    let block = state
        .physical_block(block_id)
        .ok_or_else(|| DomainError::not_found("block", block_id))?;
    let from = block.state();
    match &block.occupancy {
        Occupancy::Empty if matches!(target, BlockState::Planned | BlockState::Planted) => {
            Err(DomainError::rejected(
                block_id,
                from,
                target,
                "an empty block is planted through a planting commitment",
            ))
        }
        Occupancy::Partial { .. } => Err(DomainError::rejected(
            block_id,
            from,
            target,
            "state of a block hosting virtual blocks is derived from its children",
        )),
        _ => {
            check_transition(block_id, from, target)?;
            Ok(from)
        }
    }
}

/// Moves a block to `target`. Entering `empty` releases the committed area;
/// for a virtual block that is its retirement.
pub fn apply_transition(
    transaction: &mut FarmTransaction,
    block_id: &str,
    target: BlockState,
    today: NaiveDate,
) -> Result<BlockState, DomainError> {
    let from = preflight(transaction.state(), block_id, target)?;

    if let Some(block) = transaction.state().virtual_block(block_id).cloned() {
        if target == BlockState::Empty {
            retirement::execute(transaction, block_id)?;
            return Ok(from);
        }
        let mut block = block;
        advance_planting(block_id, &mut block.planting, target, today)?;
        transaction.put_virtual(block);
        return Ok(from);
    }

    let mut block = transaction
        .state()
        .physical_block(block_id)
        .cloned()
        .ok_or_else(|| DomainError::not_found("block", block_id))?;
    let Occupancy::DirectlyPlanted(mut planting) = block.occupancy.clone() else {
        return Err(DomainError::rejected(
            block_id,
            from,
            target,
            "block has no planting to advance",
        ));
    };

    if target == BlockState::Empty {
        block.ledger.release(&ClaimOwner::Direct, planting.area_m2)?;
        block.occupancy = Occupancy::Empty;
    } else {
        advance_planting(block_id, &mut planting, target, today)?;
        block.occupancy = Occupancy::DirectlyPlanted(planting);
    }
    transaction.put_physical(block);
    Ok(from)
}

/// Manual transition request: consults the pending-work guard before applying.
pub fn request_transition(
    transaction: &mut FarmTransaction,
    block_id: &str,
    target: BlockState,
    resolution: ConflictResolution,
    today: NaiveDate,
) -> Result<TransitionOutcome, DomainError> {
    let from = preflight(transaction.state(), block_id, target)?;

    let decision = pending_guard::check(block_id, from, target, transaction.state().tasks_for(block_id));
    let forced = match (decision, resolution) {
        (GuardDecision::Clear, _) => false,
        (GuardDecision::Warn(pending_tasks), ConflictResolution::Unresolved) => {
            return Ok(TransitionOutcome::PendingTasksConflict {
                block_id: block_id.to_string(),
                from,
                target,
                pending_tasks,
            });
        }
        (GuardDecision::Warn(pending_tasks), ConflictResolution::Cancel) => {
            return Ok(TransitionOutcome::Cancelled {
                block_id: block_id.to_string(),
                state: from,
                pending_tasks,
            });
        }
        (GuardDecision::Warn(_), ConflictResolution::Force) => true,
    };

    apply_transition(transaction, block_id, target, today)?;
    Ok(TransitionOutcome::Applied {
        block_id: block_id.to_string(),
        from,
        to: target,
        forced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{PhysicalBlock, ScheduledTask, TaskStatus, TaskType};
    use chrono::{DateTime, Utc};

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn planting(state: BlockState, planned: &str) -> Planting {
        Planting {
            crop_id: "crop-lettuce".to_string(),
            crop_name: "Lettuce".to_string(),
            plant_count: 100,
            area_m2: 400.0,
            state,
            planned_date: date(planned),
            planted_date: None,
            expected_harvest_date: date("2026-06-01"),
            expected_cleaning_date: date("2026-06-08"),
            predicted_yield_kg: 50.0,
            predicted_revenue: 0.0,
        }
    }

    fn planted_state(state: BlockState) -> FarmState {
        let mut block = PhysicalBlock::new(
            "pb-1",
            "farm-1",
            "A1",
            1_000.0,
            200,
            fixed_time("2026-02-16T08:00:00Z"),
        )
        .expect("valid block");
        block
            .ledger
            .reserve(ClaimOwner::Direct, 400.0)
            .expect("reserve");
        block.occupancy = Occupancy::DirectlyPlanted(planting(state, "2026-03-01"));
        FarmState::from_records(vec![block], Vec::new(), Vec::new(), Vec::new())
    }

    fn pending_task(task_type: TaskType) -> ScheduledTask {
        ScheduledTask {
            id: "tsk-1".to_string(),
            block_id: "pb-1".to_string(),
            title: "Start harvest".to_string(),
            task_type,
            scheduled_date: date("2026-05-30"),
            status: TaskStatus::Pending,
            completed_at: None,
            origin_virtual_block: None,
            created_at: fixed_time("2026-02-16T08:00:00Z"),
        }
    }

    #[test]
    fn lifecycle_edges_match_the_crop_cycle() {
        use BlockState::*;
        let allowed = [
            (Empty, Planned),
            (Empty, Planted),
            (Planned, Planted),
            (Planned, Empty),
            (Planted, Fruiting),
            (Planted, Harvesting),
            (Fruiting, Harvesting),
            (Harvesting, Cleaning),
            (Cleaning, Empty),
        ];
        for (from, to) in allowed {
            assert_eq!(edge_rejection(from, to), None, "{from} -> {to}");
        }
        for (from, to) in [
            (Empty, Harvesting),
            (Harvesting, Empty),
            (Cleaning, Planted),
            (Empty, Partial),
            (Partial, Empty),
            (Planted, Planted),
        ] {
            assert!(edge_rejection(from, to).is_some(), "{from} -> {to}");
        }
    }

    #[test]
    fn invalid_edge_names_the_disallowed_transition() {
        let error = check_transition("pb-1", BlockState::Empty, BlockState::Harvesting)
            .expect_err("empty -> harvesting is invalid");
        match error {
            DomainError::TransitionRejected { block_id, from, to, .. } => {
                assert_eq!(block_id, "pb-1");
                assert_eq!(from, BlockState::Empty);
                assert_eq!(to, BlockState::Harvesting);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn entry_state_depends_on_planned_date() {
        let today = date("2026-03-01");
        assert_eq!(entry_state(date("2026-03-02"), today), BlockState::Planned);
        assert_eq!(entry_state(today, today), BlockState::Planted);
        assert!(check_entry("pb-1", BlockState::Planned, today, today).is_err());
        assert!(check_entry("pb-1", BlockState::Planted, date("2026-02-20"), today).is_ok());
    }

    #[test]
    fn planned_block_cannot_be_planted_before_its_date() {
        let state = planted_state(BlockState::Planned);
        let mut transaction = FarmTransaction::begin(&state);
        let result = apply_transition(&mut transaction, "pb-1", BlockState::Planted, date("2026-02-20"));
        assert!(matches!(result, Err(DomainError::TransitionRejected { .. })));

        apply_transition(&mut transaction, "pb-1", BlockState::Planted, date("2026-03-01"))
            .expect("planting date reached");
        let block = transaction.state().physical_block("pb-1").expect("block");
        assert_eq!(block.state(), BlockState::Planted);
        assert_eq!(
            block.direct_planting().and_then(|planting| planting.planted_date),
            Some(date("2026-03-01"))
        );
    }

    #[test]
    fn cleaning_to_empty_releases_direct_claim_once() {
        let state = planted_state(BlockState::Cleaning);
        let mut transaction = FarmTransaction::begin(&state);
        apply_transition(&mut transaction, "pb-1", BlockState::Empty, date("2026-06-08"))
            .expect("clean out");

        let block = transaction.state().physical_block("pb-1").expect("block");
        assert_eq!(block.state(), BlockState::Empty);
        assert_eq!(block.available_area(), 1_000.0);

        let again = apply_transition(&mut transaction, "pb-1", BlockState::Empty, date("2026-06-08"));
        assert!(again.is_err());
        assert_eq!(
            transaction
                .state()
                .physical_block("pb-1")
                .expect("block")
                .available_area(),
            1_000.0
        );
    }

    #[test]
    fn empty_physical_block_cannot_be_moved_manually() {
        let state = FarmState::from_records(
            vec![PhysicalBlock::new("pb-1", "farm-1", "A1", 1_000.0, 10, fixed_time("2026-02-16T08:00:00Z"))
                .expect("valid block")],
            Vec::new(),
            Vec::new(),
            Vec::new(),
        );
        assert!(preflight(&state, "pb-1", BlockState::Planned).is_err());
        assert!(preflight(&state, "pb-1", BlockState::Harvesting).is_err());
        assert!(matches!(
            preflight(&state, "missing", BlockState::Harvesting),
            Err(DomainError::NotFound { .. })
        ));
    }

    #[test]
    fn pending_harvest_task_requires_resolution() {
        let mut state = planted_state(BlockState::Planted);
        state.apply(&crate::domain::farm_state::Mutation::PutTask(pending_task(
            TaskType::HarvestStart,
        )));
        let today = date("2026-05-01");

        let mut transaction = FarmTransaction::begin(&state);
        let outcome = request_transition(
            &mut transaction,
            "pb-1",
            BlockState::Harvesting,
            ConflictResolution::Unresolved,
            today,
        )
        .expect("request");
        let TransitionOutcome::PendingTasksConflict { pending_tasks, .. } = outcome else {
            panic!("expected conflict, got {outcome:?}");
        };
        assert_eq!(pending_tasks.len(), 1);
        assert_eq!(pending_tasks[0].task_id, "tsk-1");
        assert!(transaction.is_empty());

        let cancelled = request_transition(
            &mut transaction,
            "pb-1",
            BlockState::Harvesting,
            ConflictResolution::Cancel,
            today,
        )
        .expect("cancel");
        assert!(matches!(cancelled, TransitionOutcome::Cancelled { .. }));
        assert_eq!(transaction.state().block_state("pb-1"), Some(BlockState::Planted));

        let forced = request_transition(
            &mut transaction,
            "pb-1",
            BlockState::Harvesting,
            ConflictResolution::Force,
            today,
        )
        .expect("force");
        assert!(matches!(forced, TransitionOutcome::Applied { forced: true, .. }));
        assert_eq!(transaction.state().block_state("pb-1"), Some(BlockState::Harvesting));
        assert!(transaction.state().task("tsk-1").expect("task").is_pending());
    }

    #[test]
    fn invalid_edge_is_rejected_before_the_guard_runs() {
        let mut state = planted_state(BlockState::Planted);
        state.apply(&crate::domain::farm_state::Mutation::PutTask(pending_task(
            TaskType::Cleaning,
        )));
        let mut transaction = FarmTransaction::begin(&state);
        let result = request_transition(
            &mut transaction,
            "pb-1",
            BlockState::Empty,
            ConflictResolution::Unresolved,
            date("2026-05-01"),
        );
        assert!(matches!(result, Err(DomainError::TransitionRejected { .. })));
    }
}
