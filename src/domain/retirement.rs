use crate::domain::area_ledger::ClaimOwner;
use crate::domain::error::{DomainError, RetirementStep};
use crate::domain::farm_state::{FarmState, FarmTransaction};
use crate::domain::lifecycle::BlockState;
use crate::domain::models::{Occupancy, PhysicalBlock, VirtualBlock};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetirementPreview {
    pub virtual_block_id: String,
    pub virtual_block_code: String,
    pub parent_block_id: String,
    pub parent_block_code: String,
    pub tasks_to_transfer: usize,
    pub tasks_to_delete: usize,
    pub harvests_to_transfer: usize,
    pub area_to_return_m2: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetirementResult {
    pub virtual_block_id: String,
    pub virtual_block_code: String,
    pub parent_block_id: String,
    pub tasks_transferred: usize,
    pub tasks_deleted: usize,
    pub harvests_transferred: usize,
    pub area_returned_m2: f64,
    pub parent_state: BlockState,
    pub parent_available_area_m2: f64,
}

/// Counts what retiring `virtual_block_id` would move, delete and release.
pub fn preview(state: &FarmState, virtual_block_id: &str) -> Result<RetirementPreview, DomainError> {
    let block = state
        .virtual_block(virtual_block_id)
        .ok_or_else(|| DomainError::not_found("virtual block", virtual_block_id))?;
    let parent = state
        .physical_block(&block.parent_id)
        .ok_or_else(|| DomainError::not_found("block", block.parent_id.as_str()))?;
    let (completed, pending): (Vec<_>, Vec<_>) = state
        .tasks_for(virtual_block_id)
        .partition(|task| !task.is_pending());

    Ok(RetirementPreview {
        virtual_block_id: block.id.clone(),
        virtual_block_code: block.code.clone(),
        parent_block_id: parent.id.clone(),
        parent_block_code: parent.code.clone(),
        tasks_to_transfer: completed.len(),
        tasks_to_delete: pending.len(),
        harvests_to_transfer: state.harvests_for(virtual_block_id).count(),
        area_to_return_m2: block.committed_area(),
    })
}

/// Retires a virtual block into its parent. Every step runs against the
/// transaction's working copy; any failure leaves the caller to drop it.
pub fn execute(
    transaction: &mut FarmTransaction,
    virtual_block_id: &str,
) -> Result<RetirementResult, DomainError> {
    let fail = |step: RetirementStep, reason: String| DomainError::RetirementFailed {
        virtual_block_id: virtual_block_id.to_string(),
        step,
        reason,
    };

    let block = transaction
        .state()
        .virtual_block(virtual_block_id)
        .cloned()
        .ok_or_else(|| fail(RetirementStep::Lookup, "virtual block does not exist".to_string()))?;

    let mut parent = revalidate(transaction.state(), &block)
        .map_err(|reason| fail(RetirementStep::Revalidate, reason))?;

    let (completed, pending): (Vec<_>, Vec<_>) = transaction
        .state()
        .tasks_for(virtual_block_id)
        .cloned()
        .partition(|task| !task.is_pending());
    let harvests = transaction
        .state()
        .harvests_for(virtual_block_id)
        .cloned()
        .collect::<Vec<_>>();

    let tasks_transferred = completed.len();
    for mut task in completed {
        task.block_id = parent.id.clone();
        task.origin_virtual_block = Some(block.code.clone());
        transaction.put_task(task);
    }

    let harvests_transferred = harvests.len();
    for mut harvest in harvests {
        harvest.block_id = parent.id.clone();
        harvest.origin_virtual_block = Some(block.code.clone());
        transaction.put_harvest(harvest);
    }

    let area_returned_m2 = block.committed_area();
    parent
        .ledger
        .release(&ClaimOwner::Virtual(block.id.clone()), area_returned_m2)
        .map_err(|error| fail(RetirementStep::ReleaseArea, error.to_string()))?;

    let tasks_deleted = pending.len();
    for task in &pending {
        transaction.delete_task(&task.id);
    }

    transaction.delete_virtual(&block.id);
    if transaction.state().virtual_block(&block.id).is_some() {
        return Err(fail(
            RetirementStep::DeleteVirtualBlock,
            "virtual block is still present".to_string(),
        ));
    }

    let remaining = parent
        .children()
        .iter()
        .filter(|child_id| child_id.as_str() != block.id)
        .cloned()
        .collect::<Vec<_>>();
    parent.occupancy = if remaining.is_empty() {
        Occupancy::Empty
    } else {
        Occupancy::Partial {
            children: remaining,
        }
    };
    parent
        .validate()
        .map_err(|reason| fail(RetirementStep::RecomputeParentState, reason))?;
    let parent_state = parent.state();
    let parent_available_area_m2 = parent.available_area();
    let parent_block_id = parent.id.clone();
    transaction.put_physical(parent);

    Ok(RetirementResult {
        virtual_block_id: block.id,
        virtual_block_code: block.code,
        parent_block_id,
        tasks_transferred,
        tasks_deleted,
        harvests_transferred,
        area_returned_m2,
        parent_state,
        parent_available_area_m2,
    })
}

fn revalidate(state: &FarmState, block: &VirtualBlock) -> Result<PhysicalBlock, String> {
    let parent = state
        .physical_block(&block.parent_id)
        .cloned()
        .ok_or_else(|| format!("parent block {} does not exist", block.parent_id))?;
    if !parent.children().iter().any(|child_id| child_id == &block.id) {
        return Err(format!("parent block {} does not list {}", parent.id, block.id));
    }
    let claim = parent.ledger.claim(&ClaimOwner::Virtual(block.id.clone()));
    if claim != Some(block.committed_area()) {
        return Err(format!(
            "parent claim {claim:?} does not match planting area {:.2} m2",
            block.committed_area()
        ));
    }
    Ok(parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::farm_state::Mutation;
    use crate::domain::models::{
        HarvestRecord, Planting, QualityGrade, ScheduledTask, TaskStatus, TaskType,
    };
    use chrono::{DateTime, NaiveDate, Utc};

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn planting(area_m2: f64) -> Planting {
        Planting {
            crop_id: "crop-pepper".to_string(),
            crop_name: "Pepper".to_string(),
            plant_count: 50,
            area_m2,
            state: BlockState::Cleaning,
            planned_date: date("2026-03-01"),
            planted_date: Some(date("2026-03-01")),
            expected_harvest_date: date("2026-06-01"),
            expected_cleaning_date: date("2026-06-08"),
            predicted_yield_kg: 120.0,
            predicted_revenue: 360.0,
        }
    }

    fn task(id: &str, status: TaskStatus) -> ScheduledTask {
        ScheduledTask {
            id: id.to_string(),
            block_id: "vb-1".to_string(),
            title: format!("Task {id}"),
            task_type: TaskType::General,
            scheduled_date: date("2026-05-01"),
            status,
            completed_at: (status == TaskStatus::Completed)
                .then(|| fixed_time("2026-05-01T10:00:00Z")),
            origin_virtual_block: None,
            created_at: fixed_time("2026-02-16T08:00:00Z"),
        }
    }

    /// Parent of 2000 m2 with one 500 m2 child that has three completed
    /// tasks, two pending tasks and one harvest.
    fn scenario(extra_child: bool) -> FarmState {
        let mut parent = PhysicalBlock::new(
            "pb-1",
            "farm-1",
            "A1",
            2_000.0,
            500,
            fixed_time("2026-02-16T08:00:00Z"),
        )
        .expect("valid block");
        let mut children = Vec::new();
        let mut virtual_blocks = Vec::new();
        let mut ids = vec!["vb-1"];
        if extra_child {
            ids.push("vb-2");
        }
        for id in ids {
            parent
                .ledger
                .reserve(ClaimOwner::Virtual(id.to_string()), 500.0)
                .expect("reserve");
            children.push(id.to_string());
            virtual_blocks.push(VirtualBlock {
                id: id.to_string(),
                code: parent.next_virtual_code(),
                parent_id: "pb-1".to_string(),
                planting: planting(500.0),
                created_at: fixed_time("2026-02-16T08:00:00Z"),
            });
        }
        parent.occupancy = Occupancy::Partial { children };

        let tasks = vec![
            task("t1", TaskStatus::Completed),
            task("t2", TaskStatus::Completed),
            task("t3", TaskStatus::Completed),
            task("t4", TaskStatus::Pending),
            task("t5", TaskStatus::InProgress),
        ];
        let harvests = vec![HarvestRecord {
            id: "hv-1".to_string(),
            block_id: "vb-1".to_string(),
            harvest_date: date("2026-06-02"),
            quantity_kg: 42.5,
            grade: QualityGrade::A,
            notes: None,
            recorded_at: fixed_time("2026-06-02T12:00:00Z"),
            origin_virtual_block: None,
        }];
        FarmState::from_records(vec![parent], virtual_blocks, tasks, harvests)
    }

    #[test]
    fn retirement_moves_history_and_returns_area() {
        let state = scenario(false);
        let mut transaction = FarmTransaction::begin(&state);
        let result = execute(&mut transaction, "vb-1").expect("retire");

        assert_eq!(result.tasks_transferred, 3);
        assert_eq!(result.tasks_deleted, 2);
        assert_eq!(result.harvests_transferred, 1);
        assert_eq!(result.area_returned_m2, 500.0);
        assert_eq!(result.parent_state, BlockState::Empty);
        assert_eq!(result.parent_available_area_m2, 2_000.0);

        let working = transaction.state();
        assert!(working.virtual_block("vb-1").is_none());
        let moved = working.tasks_for("pb-1").collect::<Vec<_>>();
        assert_eq!(moved.len(), 3);
        assert!(moved
            .iter()
            .all(|task| task.origin_virtual_block.as_deref() == Some("A1-V1")));
        assert!(working.task("t4").is_none());
        assert!(working.task("t5").is_none());
        let harvest = working.harvests_for("pb-1").next().expect("harvest moved");
        assert_eq!(harvest.quantity_kg, 42.5);
        assert_eq!(harvest.origin_virtual_block.as_deref(), Some("A1-V1"));
        assert_eq!(working.tasks_for("vb-1").count(), 0);
    }

    #[test]
    fn parent_stays_partial_while_other_children_remain() {
        let state = scenario(true);
        let mut transaction = FarmTransaction::begin(&state);
        let result = execute(&mut transaction, "vb-1").expect("retire");

        assert_eq!(result.parent_state, BlockState::Partial);
        assert_eq!(result.parent_available_area_m2, 1_500.0);
        let parent = transaction.state().physical_block("pb-1").expect("parent");
        assert_eq!(parent.children().to_vec(), vec!["vb-2".to_string()]);
    }

    #[test]
    fn second_retirement_fails_at_lookup() {
        let state = scenario(false);
        let mut transaction = FarmTransaction::begin(&state);
        execute(&mut transaction, "vb-1").expect("first retirement");
        let recorded = transaction.mutations().len();

        let error = execute(&mut transaction, "vb-1").expect_err("already retired");
        assert!(matches!(
            error,
            DomainError::RetirementFailed {
                step: RetirementStep::Lookup,
                ..
            }
        ));
        assert_eq!(transaction.mutations().len(), recorded);
        assert_eq!(
            transaction
                .state()
                .physical_block("pb-1")
                .expect("parent")
                .available_area(),
            2_000.0
        );
    }

    #[test]
    fn mismatched_claim_fails_revalidation() {
        let mut state = scenario(false);
        let mut parent = state.physical_block("pb-1").cloned().expect("parent");
        parent
            .ledger
            .release(&ClaimOwner::Virtual("vb-1".to_string()), 500.0)
            .expect("release");
        parent
            .ledger
            .reserve(ClaimOwner::Virtual("vb-1".to_string()), 400.0)
            .expect("reserve");
        state.apply(&Mutation::PutPhysicalBlock(parent));

        let mut transaction = FarmTransaction::begin(&state);
        let error = execute(&mut transaction, "vb-1").expect_err("claim drifted");
        assert!(matches!(
            error,
            DomainError::RetirementFailed {
                step: RetirementStep::Revalidate,
                ..
            }
        ));
    }

    #[test]
    fn repeated_previews_agree_and_leave_state_unchanged() {
        let state = scenario(false);
        let snapshot = state.clone();
        let preview = preview(&state, "vb-1").expect("preview");
        for _ in 0..3 {
            assert_eq!(super::preview(&state, "vb-1").expect("preview"), preview);
        }

        assert_eq!(preview.virtual_block_code, "A1-V1");
        assert_eq!(preview.parent_block_code, "A1");
        assert_eq!(preview.tasks_to_transfer, 3);
        assert_eq!(preview.tasks_to_delete, 2);
        assert_eq!(preview.harvests_to_transfer, 1);
        assert_eq!(preview.area_to_return_m2, 500.0);
        assert_eq!(state, snapshot);
        assert!(matches!(
            super::preview(&state, "vb-404"),
            Err(DomainError::NotFound { .. })
        ));
    }

    #[test]
    fn execute_recounts_when_preview_is_stale() {
        let state = scenario(false);
        let preview = preview(&state, "vb-1").expect("preview");

        let mut changed = state.clone();
        changed.apply(&Mutation::DeleteTask("t4".to_string()));
        let mut transaction = FarmTransaction::begin(&changed);
        let result = execute(&mut transaction, "vb-1").expect("retire");

        assert_eq!(preview.tasks_to_delete, 2);
        assert_eq!(result.tasks_deleted, 1);
    }
}
