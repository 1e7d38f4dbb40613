use crate::domain::area_ledger::AreaLedger;
use crate::domain::error::DomainError;
use crate::domain::lifecycle::BlockState;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Planting {
    pub crop_id: String,
    pub crop_name: String,
    pub plant_count: u32,
    pub area_m2: f64,
    pub state: BlockState,
    pub planned_date: NaiveDate,
    pub planted_date: Option<NaiveDate>,
    pub expected_harvest_date: NaiveDate,
    pub expected_cleaning_date: NaiveDate,
    pub predicted_yield_kg: f64,
    pub predicted_revenue: f64,
}

impl Planting {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.crop_id, "planting.crop_id")?;
        if self.plant_count == 0 {
            return Err("planting.plant_count must be > 0".to_string());
        }
        if !self.area_m2.is_finite() || self.area_m2 <= 0.0 {
            return Err("planting.area_m2 must be > 0".to_string());
        }
        if matches!(self.state, BlockState::Empty | BlockState::Partial) {
            return Err(format!("planting.state cannot be {}", self.state));
        }
        if self.expected_harvest_date < self.planned_date {
            return Err("planting.expected_harvest_date must be >= planting.planned_date".to_string());
        }
        if self.expected_cleaning_date < self.expected_harvest_date {
            return Err(
                "planting.expected_cleaning_date must be >= planting.expected_harvest_date"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// What a physical block's area is currently used for. Direct planting and
/// virtual children are mutually exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Occupancy {
    Empty,
    DirectlyPlanted(Planting),
    Partial { children: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhysicalBlock {
    pub id: String,
    pub farm_id: String,
    pub code: String,
    pub max_plants: u32,
    pub ledger: AreaLedger,
    pub occupancy: Occupancy,
    pub virtual_sequence: u32,
    pub created_at: DateTime<Utc>,
}

impl PhysicalBlock {
    pub fn new(
        id: impl Into<String>,
        farm_id: impl Into<String>,
        code: impl Into<String>,
        total_area_m2: f64,
        max_plants: u32,
        created_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let id = id.into();
        let block = Self {
            ledger: AreaLedger::new(id.clone(), total_area_m2)?,
            id,
            farm_id: farm_id.into(),
            code: code.into(),
            max_plants,
            occupancy: Occupancy::Empty,
            virtual_sequence: 0,
            created_at,
        };
        block.validate().map_err(DomainError::Validation)?;
        Ok(block)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "block.id")?;
        validate_non_empty(&self.farm_id, "block.farm_id")?;
        validate_non_empty(&self.code, "block.code")?;
        if self.max_plants == 0 {
            return Err("block.max_plants must be > 0".to_string());
        }
        match &self.occupancy {
            Occupancy::DirectlyPlanted(planting) => planting.validate()?,
            Occupancy::Partial { children } if children.is_empty() => {
                return Err("block.occupancy partial requires at least one child".to_string());
            }
            _ => {}
        }
        Ok(())
    }

    pub fn state(&self) -> BlockState {
        match &self.occupancy {
            Occupancy::Empty => BlockState::Empty,
            Occupancy::DirectlyPlanted(planting) => planting.state,
            Occupancy::Partial { .. } => BlockState::Partial,
        }
    }

    pub fn total_area(&self) -> f64 {
        self.ledger.total_area()
    }

    pub fn committed_area(&self) -> f64 {
        self.ledger.committed_area()
    }

    pub fn available_area(&self) -> f64 {
        self.ledger.available_area()
    }

    pub fn direct_planting(&self) -> Option<&Planting> {
        match &self.occupancy {
            Occupancy::DirectlyPlanted(planting) => Some(planting),
            _ => None,
        }
    }

    pub fn children(&self) -> &[String] {
        match &self.occupancy {
            Occupancy::Partial { children } => children,
            _ => &[],
        }
    }

    pub fn next_virtual_code(&mut self) -> String {
        self.virtual_sequence = self.virtual_sequence.saturating_add(1);
        format!("{}-V{}", self.code, self.virtual_sequence)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VirtualBlock {
    pub id: String,
    pub code: String,
    pub parent_id: String,
    pub planting: Planting,
    pub created_at: DateTime<Utc>,
}

impl VirtualBlock {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "virtual_block.id")?;
        validate_non_empty(&self.code, "virtual_block.code")?;
        validate_non_empty(&self.parent_id, "virtual_block.parent_id")?;
        self.planting.validate()
    }

    pub fn state(&self) -> BlockState {
        self.planting.state
    }

    pub fn committed_area(&self) -> f64 {
        self.planting.area_m2
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Planting,
    HarvestStart,
    HarvestEnd,
    Cleaning,
    General,
}

impl TaskType {
    /// State the block moves to when a task of this type completes.
    pub fn expected_effect(self) -> Option<BlockState> {
        match self {
            Self::Planting => Some(BlockState::Planted),
            Self::HarvestStart => Some(BlockState::Harvesting),
            Self::HarvestEnd => Some(BlockState::Cleaning),
            Self::Cleaning => Some(BlockState::Empty),
            Self::General => None,
        }
    }

    /// Whether completing a task of this type advances a block currently in `state`.
    pub fn advances_from(self, state: BlockState) -> bool {
        match self {
            Self::Planting => state == BlockState::Planned,
            Self::HarvestStart => matches!(state, BlockState::Planted | BlockState::Fruiting),
            Self::HarvestEnd => state == BlockState::Harvesting,
            Self::Cleaning => state == BlockState::Cleaning,
            Self::General => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planting => "planting",
            Self::HarvestStart => "harvest_start",
            Self::HarvestEnd => "harvest_end",
            Self::Cleaning => "cleaning",
            Self::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn is_pending(self) -> bool {
        self != Self::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: String,
    pub block_id: String,
    pub title: String,
    pub task_type: TaskType,
    pub scheduled_date: NaiveDate,
    pub status: TaskStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub origin_virtual_block: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledTask {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.block_id, "task.block_id")?;
        validate_non_empty(&self.title, "task.title")?;
        match (self.status, self.completed_at) {
            (TaskStatus::Completed, None) => {
                Err("task.completed_at is required for completed tasks".to_string())
            }
            (TaskStatus::Pending | TaskStatus::InProgress, Some(_)) => {
                Err("task.completed_at must be empty for pending tasks".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    A,
    B,
    C,
    Reject,
}

impl QualityGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
            Self::Reject => "reject",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarvestRecord {
    pub id: String,
    pub block_id: String,
    pub harvest_date: NaiveDate,
    pub quantity_kg: f64,
    pub grade: QualityGrade,
    pub notes: Option<String>,
    pub recorded_at: DateTime<Utc>,
    pub origin_virtual_block: Option<String>,
}

impl HarvestRecord {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "harvest.id")?;
        validate_non_empty(&self.block_id, "harvest.block_id")?;
        if !self.quantity_kg.is_finite() || self.quantity_kg <= 0.0 {
            return Err("harvest.quantity_kg must be > 0".to_string());
        }
        Ok(())
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
