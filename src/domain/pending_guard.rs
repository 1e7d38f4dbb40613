use crate::domain::lifecycle::BlockState;
use crate::domain::models::{ScheduledTask, TaskType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingTaskSummary {
    pub task_id: String,
    pub title: String,
    pub task_type: TaskType,
    pub scheduled_date: NaiveDate,
}

impl From<&ScheduledTask> for PendingTaskSummary {
    fn from(task: &ScheduledTask) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            task_type: task.task_type,
            scheduled_date: task.scheduled_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Clear,
    Warn(Vec<PendingTaskSummary>),
}

/// How the operator answered a flagged transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    #[default]
    Unresolved,
    Force,
    Cancel,
}

impl ConflictResolution {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "unresolved" | "none" => Some(Self::Unresolved),
            "force" => Some(Self::Force),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// Flags a manual `from -> target` transition when pending work on the same
/// block would itself make that move. Never mutates anything.
pub fn check<'a>(
    block_id: &str,
    from: BlockState,
    target: BlockState,
    tasks: impl IntoIterator<Item = &'a ScheduledTask>,
) -> GuardDecision {
    let mut pending = tasks
        .into_iter()
        .filter(|task| task.block_id == block_id)
        .filter(|task| task.is_pending())
        .filter(|task| task.task_type.expected_effect() == Some(target))
        .filter(|task| task.task_type.advances_from(from))
        .map(PendingTaskSummary::from)
        .collect::<Vec<_>>();

    if pending.is_empty() {
        return GuardDecision::Clear;
    }
    pending.sort_by(|left, right| {
        left.scheduled_date
            .cmp(&right.scheduled_date)
            .then_with(|| left.task_id.cmp(&right.task_id))
    });
    GuardDecision::Warn(pending)
}
