use crate::domain::error::DomainError;
use crate::domain::farm_state::FarmTransaction;
use crate::domain::models::{next_id, PhysicalBlock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewBlock {
    pub farm_id: String,
    pub code: String,
    pub total_area_m2: f64,
    pub max_plants: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlockDeletion {
    pub block_id: String,
    pub virtual_blocks_removed: usize,
    pub tasks_removed: usize,
    pub harvests_removed: usize,
    pub area_released_m2: f64,
}

pub fn create_block(
    transaction: &mut FarmTransaction,
    input: &NewBlock,
    now: DateTime<Utc>,
) -> Result<PhysicalBlock, DomainError> {
    let code = input.code.trim();
    let duplicate = transaction
        .state()
        .physical_blocks()
        .any(|block| block.farm_id == input.farm_id && block.code.eq_ignore_ascii_case(code));
    if duplicate {
        return Err(DomainError::validation(format!(
            "block code {code} already exists on farm {}",
            input.farm_id
        )));
    }

    let block = PhysicalBlock::new(
        next_id("pb"),
        input.farm_id.trim(),
        code,
        input.total_area_m2,
        input.max_plants,
        now,
    )?;
    transaction.put_physical(block.clone());
    Ok(block)
}

/// Changes the area budget or plant capacity. Neither may drop below what is committed.
pub fn resize_block(
    transaction: &mut FarmTransaction,
    block_id: &str,
    total_area_m2: f64,
    max_plants: Option<u32>,
) -> Result<PhysicalBlock, DomainError> {
    let mut block = transaction
        .state()
        .physical_block(block_id)
        .cloned()
        .ok_or_else(|| DomainError::not_found("block", block_id))?;
    block.ledger.set_total_area(total_area_m2)?;

    if let Some(max_plants) = max_plants {
        let committed = transaction.state().committed_plants(block_id);
        if max_plants < committed {
            return Err(DomainError::validation(format!(
                "block {block_id} has {committed} plants committed; max_plants {max_plants} is too small"
            )));
        }
        block.max_plants = max_plants;
    }
    block.validate().map_err(DomainError::Validation)?;
    transaction.put_physical(block.clone());
    Ok(block)
}

/// Deletes a physical block with its tasks and harvests. A block that still
/// owns a planting or virtual blocks is only removed when `cascade` is set.
pub fn delete_block(
    transaction: &mut FarmTransaction,
    block_id: &str,
    cascade: bool,
) -> Result<BlockDeletion, DomainError> {
    let block = transaction
        .state()
        .physical_block(block_id)
        .cloned()
        .ok_or_else(|| DomainError::not_found("block", block_id))?;
    let children = block.children().to_vec();
    let dependents = children.len() + usize::from(block.direct_planting().is_some());
    if dependents > 0 && !cascade {
        return Err(DomainError::CascadeRequired {
            block_id: block_id.to_string(),
            dependents,
        });
    }

    let owners = children
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(block_id))
        .collect::<Vec<_>>();
    let mut tasks_removed = 0;
    let mut harvests_removed = 0;
    for owner in &owners {
        let task_ids = transaction
            .state()
            .tasks_for(owner)
            .map(|task| task.id.clone())
            .collect::<Vec<_>>();
        let harvest_ids = transaction
            .state()
            .harvests_for(owner)
            .map(|harvest| harvest.id.clone())
            .collect::<Vec<_>>();
        tasks_removed += task_ids.len();
        harvests_removed += harvest_ids.len();
        for task_id in &task_ids {
            transaction.delete_task(task_id);
        }
        for harvest_id in &harvest_ids {
            transaction.delete_harvest(harvest_id);
        }
    }
    for child_id in &children {
        transaction.delete_virtual(child_id);
    }
    transaction.delete_physical(block_id);

    Ok(BlockDeletion {
        block_id: block_id.to_string(),
        virtual_blocks_removed: children.len(),
        tasks_removed,
        harvests_removed,
        area_released_m2: block.committed_area(),
    })
}
