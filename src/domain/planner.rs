use crate::domain::area_ledger::ClaimOwner;
use crate::domain::error::DomainError;
use crate::domain::farm_state::{FarmState, FarmTransaction};
use crate::domain::lifecycle::{self, BlockState};
use crate::domain::models::{next_id, Occupancy, PhysicalBlock, Planting, VirtualBlock};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_HARVEST_DURATION_DAYS: u32 = 7;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CropProfile {
    pub id: String,
    pub name: String,
    pub yield_per_plant_kg: f64,
    pub waste_percent: f64,
    pub revenue_per_kg: Option<f64>,
    pub total_cycle_days: u32,
    pub harvest_duration_days: Option<u32>,
}

impl CropProfile {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("crop.id must not be empty".to_string());
        }
        if !self.yield_per_plant_kg.is_finite() || self.yield_per_plant_kg < 0.0 {
            return Err("crop.yield_per_plant_kg must be >= 0".to_string());
        }
        if !(0.0..=100.0).contains(&self.waste_percent) {
            return Err("crop.waste_percent must be within 0..=100".to_string());
        }
        if let Some(price) = self.revenue_per_kg {
            if !price.is_finite() || price < 0.0 {
                return Err("crop.revenue_per_kg must be >= 0".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlantingRequest {
    pub crop: CropProfile,
    pub plant_count: i64,
    pub planned_date: Option<NaiveDate>,
    /// Supplied by the caller from the crop's spacing.
    pub area_per_plant_m2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlantingPreview {
    pub block_id: String,
    pub block_code: String,
    pub crop_id: String,
    pub crop_name: String,
    pub plant_count: u32,
    pub area_required_m2: f64,
    pub available_area_m2: f64,
    pub predicted_yield_kg: f64,
    pub predicted_revenue: f64,
    pub planned_date: NaiveDate,
    pub harvest_date: NaiveDate,
    pub cleaning_date: NaiveDate,
    pub utilization_percent: f64,
    pub initial_state: BlockState,
}

impl PlantingPreview {
    pub fn to_planting(&self) -> Planting {
        Planting {
            crop_id: self.crop_id.clone(),
            crop_name: self.crop_name.clone(),
            plant_count: self.plant_count,
            area_m2: self.area_required_m2,
            state: self.initial_state,
            planned_date: self.planned_date,
            planted_date: (self.initial_state == BlockState::Planted).then_some(self.planned_date),
            expected_harvest_date: self.harvest_date,
            expected_cleaning_date: self.cleaning_date,
            predicted_yield_kg: self.predicted_yield_kg,
            predicted_revenue: self.predicted_revenue,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlantingTarget {
    Direct,
    Virtual,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CommittedPlanting {
    pub block_id: String,
    pub virtual_block_id: Option<String>,
    pub virtual_block_code: Option<String>,
    pub state: BlockState,
    pub area_committed_m2: f64,
    pub available_area_m2: f64,
    pub planting: Planting,
}

#[derive(Debug, Clone)]
pub struct PlantingPlanner {
    default_harvest_duration_days: u32,
}

impl Default for PlantingPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_HARVEST_DURATION_DAYS)
    }
}

impl PlantingPlanner {
    pub fn new(default_harvest_duration_days: u32) -> Self {
        Self {
            default_harvest_duration_days,
        }
    }

    pub fn plan_for(
        &self,
        state: &FarmState,
        block_id: &str,
        request: &PlantingRequest,
        today: NaiveDate,
    ) -> Result<PlantingPreview, DomainError> {
        let block = state
            .physical_block(block_id)
            .ok_or_else(|| DomainError::not_found("block", block_id))?;
        self.plan(block, state.committed_plants(block_id), request, today)
    }

    /// Pure projection. The area check is a dry-run: nothing is reserved until commit.
    pub fn plan(
        &self,
        block: &PhysicalBlock,
        committed_plants: u32,
        request: &PlantingRequest,
        today: NaiveDate,
    ) -> Result<PlantingPreview, DomainError> {
        if request.plant_count <= 0 {
            return Err(DomainError::validation(format!(
                "plant_count must be a positive integer (got {})",
                request.plant_count
            )));
        }
        let planned_date = request
            .planned_date
            .ok_or_else(|| DomainError::validation("planned_date is required"))?;
        request.crop.validate().map_err(DomainError::Validation)?;
        if !request.area_per_plant_m2.is_finite() || request.area_per_plant_m2 <= 0.0 {
            return Err(DomainError::validation("area_per_plant_m2 must be > 0"));
        }

        let plant_count = u32::try_from(request.plant_count).map_err(|_| {
            DomainError::validation(format!("plant_count {} is too large", request.plant_count))
        })?;
        check_plant_capacity(block, committed_plants, plant_count)?;

        let area_required_m2 = f64::from(plant_count) * request.area_per_plant_m2;
        block.ledger.check_reserve(area_required_m2)?;

        let crop = &request.crop;
        let predicted_yield_kg =
            crop.yield_per_plant_kg * f64::from(plant_count) * (1.0 - crop.waste_percent / 100.0);
        let predicted_revenue = crop
            .revenue_per_kg
            .map(|price| predicted_yield_kg * price)
            .unwrap_or(0.0);
        let harvest_date = add_days(planned_date, crop.total_cycle_days)?;
        let cleaning_date = add_days(
            harvest_date,
            crop.harvest_duration_days
                .unwrap_or(self.default_harvest_duration_days),
        )?;

        Ok(PlantingPreview {
            block_id: block.id.clone(),
            block_code: block.code.clone(),
            crop_id: crop.id.clone(),
            crop_name: crop.name.clone(),
            plant_count,
            area_required_m2,
            available_area_m2: block.available_area(),
            predicted_yield_kg,
            predicted_revenue,
            planned_date,
            harvest_date,
            cleaning_date,
            utilization_percent: f64::from(plant_count) / f64::from(block.max_plants) * 100.0,
            initial_state: lifecycle::entry_state(planned_date, today),
        })
    }

    /// Commits a previewed planting. Capacity and area are re-checked against the
    /// current state; the planting itself is built from the previewed figures.
    pub fn commit(
        &self,
        transaction: &mut FarmTransaction,
        preview: &PlantingPreview,
        target: PlantingTarget,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<CommittedPlanting, DomainError> {
        let block_id = preview.block_id.as_str();
        let mut block = transaction
            .state()
            .physical_block(block_id)
            .cloned()
            .ok_or_else(|| DomainError::not_found("block", block_id))?;
        lifecycle::check_entry(block_id, preview.initial_state, preview.planned_date, today)?;
        check_plant_capacity(
            &block,
            transaction.state().committed_plants(block_id),
            preview.plant_count,
        )?;

        let planting = preview.to_planting();
        let (virtual_block_id, virtual_block_code) = match target {
            PlantingTarget::Direct => {
                if !matches!(block.occupancy, Occupancy::Empty) {
                    return Err(DomainError::rejected(
                        block_id,
                        block.state(),
                        preview.initial_state,
                        "block already hosts a planting or virtual blocks",
                    ));
                }
                block
                    .ledger
                    .reserve(ClaimOwner::Direct, preview.area_required_m2)?;
                block.occupancy = Occupancy::DirectlyPlanted(planting.clone());
                transaction.put_physical(block.clone());
                (None, None)
            }
            PlantingTarget::Virtual => {
                let mut children = match &block.occupancy {
                    Occupancy::Empty => Vec::new(),
                    Occupancy::Partial { children } => children.clone(),
                    Occupancy::DirectlyPlanted(_) => {
                        return Err(DomainError::rejected(
                            block_id,
                            block.state(),
                            preview.initial_state,
                            "block is planted directly and cannot host virtual blocks",
                        ));
                    }
                };
                let virtual_id = next_id("vb");
                block.ledger.reserve(
                    ClaimOwner::Virtual(virtual_id.clone()),
                    preview.area_required_m2,
                )?;
                let code = block.next_virtual_code();
                children.push(virtual_id.clone());
                block.occupancy = Occupancy::Partial { children };

                transaction.put_virtual(VirtualBlock {
                    id: virtual_id.clone(),
                    code: code.clone(),
                    parent_id: block.id.clone(),
                    planting: planting.clone(),
                    created_at: now,
                });
                transaction.put_physical(block.clone());
                (Some(virtual_id), Some(code))
            }
        };

        Ok(CommittedPlanting {
            block_id: block.id.clone(),
            virtual_block_id,
            virtual_block_code,
            state: planting.state,
            area_committed_m2: planting.area_m2,
            available_area_m2: block.available_area(),
            planting,
        })
    }
}

fn check_plant_capacity(
    block: &PhysicalBlock,
    committed_plants: u32,
    plant_count: u32,
) -> Result<(), DomainError> {
    if plant_count > block.max_plants {
        return Err(DomainError::validation(format!(
            "plant_count {plant_count} exceeds block {} maximum of {} plants",
            block.id, block.max_plants
        )));
    }
    let free = block.max_plants.saturating_sub(committed_plants);
    if plant_count > free {
        return Err(DomainError::validation(format!(
            "plant_count {plant_count} exceeds free capacity of block {}: {free} of {} plants free",
            block.id, block.max_plants
        )));
    }
    Ok(())
}

fn add_days(date: NaiveDate, days: u32) -> Result<NaiveDate, DomainError> {
    date.checked_add_days(Days::new(u64::from(days)))
        .ok_or_else(|| DomainError::validation(format!("date {date} + {days} days is out of range")))
}
