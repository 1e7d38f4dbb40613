use crate::domain::error::DomainError;
use crate::domain::farm_state::{FarmState, FarmTransaction};
use crate::domain::lifecycle::BlockState;
use crate::domain::models::{next_id, HarvestRecord, QualityGrade};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewHarvest {
    pub block_id: String,
    pub harvest_date: NaiveDate,
    pub quantity_kg: f64,
    pub grade: QualityGrade,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct HarvestTotals {
    pub records: usize,
    pub total_kg: f64,
    pub by_grade_kg: BTreeMap<String, f64>,
}

/// Harvests are only recorded against a block that is fruiting or harvesting.
pub fn record_harvest(
    transaction: &mut FarmTransaction,
    input: &NewHarvest,
    now: DateTime<Utc>,
) -> Result<HarvestRecord, DomainError> {
    let state = transaction
        .state()
        .block_state(&input.block_id)
        .ok_or_else(|| DomainError::not_found("block", input.block_id.as_str()))?;
    if !matches!(state, BlockState::Fruiting | BlockState::Harvesting) {
        return Err(DomainError::validation(format!(
            "block {} is {state}; harvests are recorded while fruiting or harvesting",
            input.block_id
        )));
    }

    let record = HarvestRecord {
        id: next_id("hv"),
        block_id: input.block_id.clone(),
        harvest_date: input.harvest_date,
        quantity_kg: input.quantity_kg,
        grade: input.grade,
        notes: input
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_string),
        recorded_at: now,
        origin_virtual_block: None,
    };
    record.validate().map_err(DomainError::Validation)?;
    transaction.put_harvest(record.clone());
    Ok(record)
}

/// Harvests owned by a block, oldest first.
pub fn harvests_for(state: &FarmState, block_id: &str) -> Vec<HarvestRecord> {
    let mut records = state.harvests_for(block_id).cloned().collect::<Vec<_>>();
    records.sort_by(|left, right| {
        left.harvest_date
            .cmp(&right.harvest_date)
            .then_with(|| left.recorded_at.cmp(&right.recorded_at))
    });
    records
}

pub fn totals(records: &[HarvestRecord]) -> HarvestTotals {
    records
        .iter()
        .fold(HarvestTotals::default(), |mut totals, record| {
            totals.records += 1;
            totals.total_kg += record.quantity_kg;
            *totals
                .by_grade_kg
                .entry(record.grade.as_str().to_string())
                .or_insert(0.0) += record.quantity_kg;
            totals
        })
}
