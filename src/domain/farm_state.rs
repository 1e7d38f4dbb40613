use crate::domain::lifecycle::BlockState;
use crate::domain::models::{HarvestRecord, PhysicalBlock, ScheduledTask, VirtualBlock};
use std::collections::BTreeMap;

/// One persisted change. A transaction's mutations are replayed by the
/// repository inside a single storage transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    PutPhysicalBlock(PhysicalBlock),
    DeletePhysicalBlock(String),
    PutVirtualBlock(VirtualBlock),
    DeleteVirtualBlock(String),
    PutTask(ScheduledTask),
    DeleteTask(String),
    PutHarvest(HarvestRecord),
    DeleteHarvest(String),
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PutPhysicalBlock(_) => "put_physical_block",
            Self::DeletePhysicalBlock(_) => "delete_physical_block",
            Self::PutVirtualBlock(_) => "put_virtual_block",
            Self::DeleteVirtualBlock(_) => "delete_virtual_block",
            Self::PutTask(_) => "put_task",
            Self::DeleteTask(_) => "delete_task",
            Self::PutHarvest(_) => "put_harvest",
            Self::DeleteHarvest(_) => "delete_harvest",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FarmState {
    physical_blocks: BTreeMap<String, PhysicalBlock>,
    virtual_blocks: BTreeMap<String, VirtualBlock>,
    tasks: BTreeMap<String, ScheduledTask>,
    harvests: BTreeMap<String, HarvestRecord>,
}

impl FarmState {
    pub fn from_records(
        physical_blocks: Vec<PhysicalBlock>,
        virtual_blocks: Vec<VirtualBlock>,
        tasks: Vec<ScheduledTask>,
        harvests: Vec<HarvestRecord>,
    ) -> Self {
        Self {
            physical_blocks: physical_blocks
                .into_iter()
                .map(|block| (block.id.clone(), block))
                .collect(),
            virtual_blocks: virtual_blocks
                .into_iter()
                .map(|block| (block.id.clone(), block))
                .collect(),
            tasks: tasks.into_iter().map(|task| (task.id.clone(), task)).collect(),
            harvests: harvests
                .into_iter()
                .map(|harvest| (harvest.id.clone(), harvest))
                .collect(),
        }
    }

    pub fn physical_block(&self, block_id: &str) -> Option<&PhysicalBlock> {
        self.physical_blocks.get(block_id)
    }

    pub fn virtual_block(&self, block_id: &str) -> Option<&VirtualBlock> {
        self.virtual_blocks.get(block_id)
    }

    pub fn physical_blocks(&self) -> impl Iterator<Item = &PhysicalBlock> {
        self.physical_blocks.values()
    }

    pub fn virtual_blocks(&self) -> impl Iterator<Item = &VirtualBlock> {
        self.virtual_blocks.values()
    }

    pub fn task(&self, task_id: &str) -> Option<&ScheduledTask> {
        self.tasks.get(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &ScheduledTask> {
        self.tasks.values()
    }

    pub fn harvests(&self) -> impl Iterator<Item = &HarvestRecord> {
        self.harvests.values()
    }

    pub fn tasks_for<'a>(&'a self, block_id: &'a str) -> impl Iterator<Item = &'a ScheduledTask> {
        self.tasks.values().filter(move |task| task.block_id == block_id)
    }

    pub fn harvests_for<'a>(
        &'a self,
        block_id: &'a str,
    ) -> impl Iterator<Item = &'a HarvestRecord> {
        self.harvests
            .values()
            .filter(move |harvest| harvest.block_id == block_id)
    }

    pub fn contains_block(&self, block_id: &str) -> bool {
        self.physical_blocks.contains_key(block_id) || self.virtual_blocks.contains_key(block_id)
    }

    pub fn block_state(&self, block_id: &str) -> Option<BlockState> {
        if let Some(block) = self.virtual_blocks.get(block_id) {
            return Some(block.state());
        }
        self.physical_blocks.get(block_id).map(PhysicalBlock::state)
    }

    /// Plants committed on a physical block, directly or through its children.
    pub fn committed_plants(&self, block_id: &str) -> u32 {
        let Some(block) = self.physical_blocks.get(block_id) else {
            return 0;
        };
        let direct = block
            .direct_planting()
            .map(|planting| planting.plant_count)
            .unwrap_or(0);
        block
            .children()
            .iter()
            .filter_map(|child_id| self.virtual_blocks.get(child_id))
            .fold(direct, |total, child| {
                total.saturating_add(child.planting.plant_count)
            })
    }

    pub fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::PutPhysicalBlock(block) => {
                self.physical_blocks.insert(block.id.clone(), block.clone());
            }
            Mutation::DeletePhysicalBlock(block_id) => {
                self.physical_blocks.remove(block_id);
            }
            Mutation::PutVirtualBlock(block) => {
                self.virtual_blocks.insert(block.id.clone(), block.clone());
            }
            Mutation::DeleteVirtualBlock(block_id) => {
                self.virtual_blocks.remove(block_id);
            }
            Mutation::PutTask(task) => {
                self.tasks.insert(task.id.clone(), task.clone());
            }
            Mutation::DeleteTask(task_id) => {
                self.tasks.remove(task_id);
            }
            Mutation::PutHarvest(harvest) => {
                self.harvests.insert(harvest.id.clone(), harvest.clone());
            }
            Mutation::DeleteHarvest(harvest_id) => {
                self.harvests.remove(harvest_id);
            }
        }
    }
}

/// Working copy of the farm state plus the change set that produced it.
/// Dropping a transaction discards every change made through it.
#[derive(Debug, Clone)]
pub struct FarmTransaction {
    working: FarmState,
    mutations: Vec<Mutation>,
}

impl FarmTransaction {
    pub fn begin(state: &FarmState) -> Self {
        Self {
            working: state.clone(),
            mutations: Vec::new(),
        }
    }

    pub fn state(&self) -> &FarmState {
        &self.working
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn record(&mut self, mutation: Mutation) {
        self.working.apply(&mutation);
        self.mutations.push(mutation);
    }

    pub fn put_physical(&mut self, block: PhysicalBlock) {
        self.record(Mutation::PutPhysicalBlock(block));
    }

    pub fn delete_physical(&mut self, block_id: &str) {
        self.record(Mutation::DeletePhysicalBlock(block_id.to_string()));
    }

    pub fn put_virtual(&mut self, block: VirtualBlock) {
        self.record(Mutation::PutVirtualBlock(block));
    }

    pub fn delete_virtual(&mut self, block_id: &str) {
        self.record(Mutation::DeleteVirtualBlock(block_id.to_string()));
    }

    pub fn put_task(&mut self, task: ScheduledTask) {
        self.record(Mutation::PutTask(task));
    }

    pub fn delete_task(&mut self, task_id: &str) {
        self.record(Mutation::DeleteTask(task_id.to_string()));
    }

    pub fn put_harvest(&mut self, harvest: HarvestRecord) {
        self.record(Mutation::PutHarvest(harvest));
    }

    pub fn delete_harvest(&mut self, harvest_id: &str) {
        self.record(Mutation::DeleteHarvest(harvest_id.to_string()));
    }

    pub fn into_parts(self) -> (FarmState, Vec<Mutation>) {
        (self.working, self.mutations)
    }
}
