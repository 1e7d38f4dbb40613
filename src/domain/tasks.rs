use crate::domain::error::DomainError;
use crate::domain::farm_state::{FarmState, FarmTransaction};
use crate::domain::lifecycle::{self, BlockState};
use crate::domain::models::{next_id, ScheduledTask, TaskStatus, TaskType};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTask {
    pub block_id: String,
    pub title: String,
    pub task_type: TaskType,
    pub scheduled_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum TaskEffect {
    None,
    Applied {
        from: BlockState,
        to: BlockState,
    },
    /// The block already left the state this task would have moved it from.
    Skipped {
        target: BlockState,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskCompletion {
    pub task: ScheduledTask,
    pub effect: TaskEffect,
}

pub fn schedule_task(
    transaction: &mut FarmTransaction,
    input: &NewTask,
    now: DateTime<Utc>,
) -> Result<ScheduledTask, DomainError> {
    if !transaction.state().contains_block(&input.block_id) {
        return Err(DomainError::not_found("block", input.block_id.as_str()));
    }
    let task = ScheduledTask {
        id: next_id("tsk"),
        block_id: input.block_id.clone(),
        title: input.title.trim().to_string(),
        task_type: input.task_type,
        scheduled_date: input.scheduled_date,
        status: TaskStatus::Pending,
        completed_at: None,
        origin_virtual_block: None,
        created_at: now,
    };
    task.validate().map_err(DomainError::Validation)?;
    transaction.put_task(task.clone());
    Ok(task)
}

pub fn start_task(
    transaction: &mut FarmTransaction,
    task_id: &str,
) -> Result<ScheduledTask, DomainError> {
    let mut task = transaction
        .state()
        .task(task_id)
        .cloned()
        .ok_or_else(|| DomainError::not_found("task", task_id))?;
    if task.status != TaskStatus::Pending {
        return Err(DomainError::validation(format!(
            "task {task_id} cannot start from status {}",
            task.status.as_str()
        )));
    }
    task.status = TaskStatus::InProgress;
    transaction.put_task(task.clone());
    Ok(task)
}

/// Completes a task, then applies its lifecycle effect. The completion is
/// recorded first so that a retiring effect re-parents the task as completed.
pub fn complete_task(
    transaction: &mut FarmTransaction,
    task_id: &str,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<TaskCompletion, DomainError> {
    let mut task = transaction
        .state()
        .task(task_id)
        .cloned()
        .ok_or_else(|| DomainError::not_found("task", task_id))?;
    if !task.is_pending() {
        return Err(DomainError::validation(format!(
            "task {task_id} is already completed"
        )));
    }
    task.status = TaskStatus::Completed;
    task.completed_at = Some(now);
    transaction.put_task(task.clone());

    let Some(target) = task.task_type.expected_effect() else {
        return Ok(TaskCompletion {
            task,
            effect: TaskEffect::None,
        });
    };
    let current = transaction
        .state()
        .block_state(&task.block_id)
        .ok_or_else(|| DomainError::not_found("block", task.block_id.as_str()))?;
    let effect = if !task.task_type.advances_from(current) {
        TaskEffect::Skipped {
            target,
            reason: format!(
                "{} task does not advance a block in state {current}",
                task.task_type.as_str()
            ),
        }
    } else {
        match lifecycle::apply_transition(transaction, &task.block_id, target, today) {
            Ok(from) => TaskEffect::Applied { from, to: target },
            Err(DomainError::TransitionRejected { reason, .. }) => {
                TaskEffect::Skipped { target, reason }
            }
            Err(error) => return Err(error),
        }
    };

    let task = transaction
        .state()
        .task(task_id)
        .cloned()
        .unwrap_or(task);
    Ok(TaskCompletion { task, effect })
}

/// Pending tasks ordered by scheduled date, optionally for one block.
pub fn pending_tasks(state: &FarmState, block_id: Option<&str>) -> Vec<ScheduledTask> {
    let mut tasks = state
        .tasks()
        .filter(|task| task.is_pending())
        .filter(|task| block_id.is_none_or(|id| task.block_id == id))
        .cloned()
        .collect::<Vec<_>>();
    tasks.sort_by(|left, right| {
        left.scheduled_date
            .cmp(&right.scheduled_date)
            .then_with(|| left.id.cmp(&right.id))
    });
    tasks
}
