use crate::application::bootstrap::{bootstrap_workspace, BootstrapResult};
use crate::domain::blocks::{self, BlockDeletion, NewBlock};
use crate::domain::error::{DomainError, RetirementStep};
use crate::domain::farm_state::{FarmState, FarmTransaction, Mutation};
use crate::domain::harvests::{self, HarvestTotals, NewHarvest};
use crate::domain::lifecycle::{self, BlockState, TransitionOutcome};
use crate::domain::models::{HarvestRecord, PhysicalBlock, QualityGrade, ScheduledTask, TaskType, VirtualBlock};
use crate::domain::pending_guard::ConflictResolution;
use crate::domain::planner::{CommittedPlanting, PlantingPlanner, PlantingPreview, PlantingRequest, PlantingTarget};
use crate::domain::retirement::{self, RetirementPreview, RetirementResult};
use crate::domain::tasks::{self, NewTask, TaskCompletion, TaskEffect};
use crate::infrastructure::config::{load_engine_config, EngineConfig};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::farm_repository::{FarmRepository, SqliteFarmRepository};
use crate::infrastructure::logging::init_logging;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct AppState {
    config: EngineConfig,
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    planner: PlantingPlanner,
    repository: Arc<dyn FarmRepository>,
    runtime: Mutex<FarmState>,
    now_provider: NowProvider,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = load_engine_config(&bootstrap.config_dir)?;
        init_logging(&bootstrap.logs_dir, &config.log_filter)?;
        let repository = Arc::new(SqliteFarmRepository::new(&bootstrap.database_path));
        Self::from_parts(bootstrap, config, repository)
    }

    pub fn from_parts(
        bootstrap: BootstrapResult,
        config: EngineConfig,
        repository: Arc<dyn FarmRepository>,
    ) -> Result<Self, InfraError> {
        let snapshot = repository.load_snapshot()?;
        tracing::info!(
            workspace = %bootstrap.workspace_root.display(),
            physical_blocks = snapshot.physical_blocks().count(),
            virtual_blocks = snapshot.virtual_blocks().count(),
            "farm state loaded"
        );
        Ok(Self {
            planner: PlantingPlanner::new(config.default_harvest_duration_days),
            config,
            config_dir: bootstrap.config_dir,
            database_path: bootstrap.database_path,
            logs_dir: bootstrap.logs_dir,
            repository,
            runtime: Mutex::new(snapshot),
            now_provider: Arc::new(Utc::now),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_provider)()
    }

    /// Calendar date in the configured farm timezone.
    pub fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.config.timezone).date_naive()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        tracing::info!(command, "{message}");
    }

    pub fn log_error(&self, command: &str, message: &str) {
        tracing::error!(command, "{message}");
    }

    fn log_warn(&self, command: &str, message: &str) {
        tracing::warn!(command, "{message}");
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlockSummary {
    pub block: PhysicalBlock,
    pub state: BlockState,
    pub available_area_m2: f64,
    pub committed_plants: u32,
    pub virtual_blocks: Vec<VirtualBlock>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BlockAreaResponse {
    pub block_id: String,
    pub total_area_m2: f64,
    pub committed_area_m2: f64,
    pub available_area_m2: f64,
    pub utilization_percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HarvestListResponse {
    pub block_id: String,
    pub records: Vec<HarvestRecord>,
    pub totals: HarvestTotals,
}

pub fn create_block_impl(
    state: &AppState,
    farm_id: String,
    code: String,
    total_area_m2: f64,
    max_plants: u32,
) -> Result<BlockSummary, InfraError> {
    let farm_id = required_input(&farm_id, "farm_id")?;
    let input = NewBlock {
        farm_id: farm_id.to_string(),
        code,
        total_area_m2,
        max_plants,
    };
    let now = state.now();
    let (block_id, summary) = run_transaction(state, "create_block", |transaction| {
        let block = blocks::create_block(transaction, &input, now)?;
        Ok((block.id.clone(), summarize(transaction.state(), &block)))
    })?;
    state.log_info(
        "create_block",
        &format!("created block_id={block_id} total_area_m2={total_area_m2}"),
    );
    Ok(summary)
}

pub fn resize_block_impl(
    state: &AppState,
    block_id: String,
    total_area_m2: f64,
    max_plants: Option<u32>,
) -> Result<BlockSummary, InfraError> {
    let block_id = required_input(&block_id, "block_id")?;
    let summary = run_transaction(state, "resize_block", |transaction| {
        let block = blocks::resize_block(transaction, block_id, total_area_m2, max_plants)?;
        Ok(summarize(transaction.state(), &block))
    })?;
    state.log_info(
        "resize_block",
        &format!("resized block_id={block_id} total_area_m2={total_area_m2}"),
    );
    Ok(summary)
}

pub fn delete_block_impl(state: &AppState, block_id: String, cascade: bool) -> Result<BlockDeletion, InfraError> {
    let block_id = required_input(&block_id, "block_id")?;
    let deletion = run_transaction(state, "delete_block", |transaction| {
        blocks::delete_block(transaction, block_id, cascade)
    })?;
    state.log_info(
        "delete_block",
        &format!(
            "deleted block_id={block_id} virtual_blocks={} tasks={} harvests={}",
            deletion.virtual_blocks_removed, deletion.tasks_removed, deletion.harvests_removed
        ),
    );
    Ok(deletion)
}

pub fn list_blocks_impl(state: &AppState, farm_id: Option<String>) -> Result<Vec<BlockSummary>, InfraError> {
    let farm_id = farm_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let runtime = lock_runtime(state)?;
    let mut blocks = runtime
        .physical_blocks()
        .filter(|block| farm_id.is_none_or(|farm_id| block.farm_id == farm_id))
        .map(|block| summarize(&runtime, block))
        .collect::<Vec<_>>();
    blocks.sort_by(|left, right| {
        left.block
            .farm_id
            .cmp(&right.block.farm_id)
            .then_with(|| left.block.code.cmp(&right.block.code))
    });
    Ok(blocks)
}

pub fn get_block_area_impl(state: &AppState, block_id: String) -> Result<BlockAreaResponse, InfraError> {
    let block_id = required_input(&block_id, "block_id")?;
    let runtime = lock_runtime(state)?;
    let block = runtime
        .physical_block(block_id)
        .ok_or_else(|| DomainError::not_found("block", block_id))?;
    Ok(BlockAreaResponse {
        block_id: block.id.clone(),
        total_area_m2: block.total_area(),
        committed_area_m2: block.committed_area(),
        available_area_m2: block.available_area(),
        utilization_percent: block.ledger.utilization() * 100.0,
    })
}

pub fn preview_planting_impl(
    state: &AppState,
    block_id: String,
    request: PlantingRequest,
) -> Result<PlantingPreview, InfraError> {
    let block_id = required_input(&block_id, "block_id")?;
    let today = state.today();
    let runtime = lock_runtime(state)?;
    let preview = state.planner.plan_for(&runtime, block_id, &request, today)?;
    Ok(preview)
}

pub fn commit_planting_impl(
    state: &AppState,
    preview: PlantingPreview,
    target: String,
) -> Result<CommittedPlanting, InfraError> {
    let target = parse_planting_target(&target)?;
    let today = state.today();
    let now = state.now();
    let committed = run_transaction(state, "commit_planting", |transaction| {
        state.planner.commit(transaction, &preview, target, today, now)
    })?;
    state.log_info(
        "commit_planting",
        &format!(
            "committed block_id={} virtual_block_id={} area_m2={} state={}",
            committed.block_id,
            committed.virtual_block_id.as_deref().unwrap_or("-"),
            committed.area_committed_m2,
            committed.state
        ),
    );
    Ok(committed)
}

pub fn transition_block_impl(
    state: &AppState,
    block_id: String,
    target_state: String,
    resolution: Option<String>,
) -> Result<TransitionOutcome, InfraError> {
    let block_id = required_input(&block_id, "block_id")?;
    let target = parse_block_state(&target_state)?;
    let resolution = match resolution.as_deref() {
        None => ConflictResolution::Unresolved,
        Some(value) => ConflictResolution::parse(value).ok_or_else(|| {
            DomainError::validation(format!("unsupported resolution: {value}"))
        })?,
    };
    let today = state.today();
    let outcome = run_transaction(state, "transition_block", |transaction| {
        lifecycle::request_transition(transaction, block_id, target, resolution, today)
    })?;

    match &outcome {
        TransitionOutcome::Applied { from, to, forced, .. } => state.log_info(
            "transition_block",
            &format!("block_id={block_id} {from} -> {to} forced={forced}"),
        ),
        TransitionOutcome::PendingTasksConflict { pending_tasks, .. } => state.log_warn(
            "transition_block",
            &format!(
                "block_id={block_id} -> {target} awaits resolution; pending_tasks={}",
                pending_tasks.len()
            ),
        ),
        TransitionOutcome::Cancelled { .. } => state.log_info(
            "transition_block",
            &format!("block_id={block_id} -> {target} cancelled by operator"),
        ),
    }
    Ok(outcome)
}

pub fn schedule_task_impl(
    state: &AppState,
    block_id: String,
    title: String,
    task_type: String,
    scheduled_date: String,
) -> Result<ScheduledTask, InfraError> {
    let input = NewTask {
        block_id: required_input(&block_id, "block_id")?.to_string(),
        title,
        task_type: parse_task_type(&task_type)?,
        scheduled_date: parse_date_input(&scheduled_date, "scheduled_date")?,
    };
    let now = state.now();
    let task = run_transaction(state, "schedule_task", |transaction| {
        tasks::schedule_task(transaction, &input, now)
    })?;
    state.log_info(
        "schedule_task",
        &format!("scheduled task_id={} block_id={}", task.id, task.block_id),
    );
    Ok(task)
}

pub fn start_task_impl(state: &AppState, task_id: String) -> Result<ScheduledTask, InfraError> {
    let task_id = required_input(&task_id, "task_id")?;
    let task = run_transaction(state, "start_task", |transaction| {
        tasks::start_task(transaction, task_id)
    })?;
    state.log_info("start_task", &format!("started task_id={task_id}"));
    Ok(task)
}

pub fn complete_task_impl(state: &AppState, task_id: String) -> Result<TaskCompletion, InfraError> {
    let task_id = required_input(&task_id, "task_id")?;
    let today = state.today();
    let now = state.now();
    let completion = run_transaction(state, "complete_task", |transaction| {
        tasks::complete_task(transaction, task_id, today, now)
    })?;

    match &completion.effect {
        TaskEffect::Skipped { target, reason } => state.log_warn(
            "complete_task",
            &format!("completed task_id={task_id}; skipped transition to {target}: {reason}"),
        ),
        TaskEffect::Applied { from, to } => state.log_info(
            "complete_task",
            &format!(
                "completed task_id={task_id}; block_id={} {from} -> {to}",
                completion.task.block_id
            ),
        ),
        TaskEffect::None => state.log_info("complete_task", &format!("completed task_id={task_id}")),
    }
    Ok(completion)
}

pub fn list_pending_tasks_impl(
    state: &AppState,
    block_id: Option<String>,
) -> Result<Vec<ScheduledTask>, InfraError> {
    let block_id = block_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let runtime = lock_runtime(state)?;
    Ok(tasks::pending_tasks(&runtime, block_id))
}

pub fn record_harvest_impl(
    state: &AppState,
    block_id: String,
    harvest_date: String,
    quantity_kg: f64,
    grade: String,
    notes: Option<String>,
) -> Result<HarvestRecord, InfraError> {
    let input = NewHarvest {
        block_id: required_input(&block_id, "block_id")?.to_string(),
        harvest_date: parse_date_input(&harvest_date, "harvest_date")?,
        quantity_kg,
        grade: parse_quality_grade(&grade)?,
        notes,
    };
    let now = state.now();
    let record = run_transaction(state, "record_harvest", |transaction| {
        harvests::record_harvest(transaction, &input, now)
    })?;
    state.log_info(
        "record_harvest",
        &format!(
            "recorded harvest_id={} block_id={} quantity_kg={}",
            record.id, record.block_id, record.quantity_kg
        ),
    );
    Ok(record)
}

pub fn list_harvests_impl(state: &AppState, block_id: String) -> Result<HarvestListResponse, InfraError> {
    let block_id = required_input(&block_id, "block_id")?;
    let runtime = lock_runtime(state)?;
    let records = harvests::harvests_for(&runtime, block_id);
    Ok(HarvestListResponse {
        block_id: block_id.to_string(),
        totals: harvests::totals(&records),
        records,
    })
}

pub fn preview_retirement_impl(
    state: &AppState,
    virtual_block_id: String,
) -> Result<RetirementPreview, InfraError> {
    let virtual_block_id = required_input(&virtual_block_id, "virtual_block_id")?;
    let runtime = lock_runtime(state)?;
    Ok(retirement::preview(&runtime, virtual_block_id)?)
}

/// Retires a virtual block. Storage failures surface as a retirement failure
/// at the persist step; the in-memory state is left untouched.
pub fn execute_retirement_impl(
    state: &AppState,
    virtual_block_id: String,
) -> Result<RetirementResult, InfraError> {
    let virtual_block_id = required_input(&virtual_block_id, "virtual_block_id")?;
    let result = run_transaction(state, "execute_retirement", |transaction| {
        retirement::execute(transaction, virtual_block_id)
    })?;

    state.log_info(
        "execute_retirement",
        &format!(
            "retired virtual_block_id={virtual_block_id} tasks_transferred={} tasks_deleted={} harvests_transferred={} area_returned_m2={}",
            result.tasks_transferred,
            result.tasks_deleted,
            result.harvests_transferred,
            result.area_returned_m2
        ),
    );
    Ok(result)
}

/// Runs `operation` against a working copy while holding the runtime lock,
/// then persists its change set before publishing the new state. A storage
/// failure while retiring a virtual block is reported as a retirement failure.
fn run_transaction<T>(
    state: &AppState,
    command: &str,
    operation: impl FnOnce(&mut FarmTransaction) -> Result<T, DomainError>,
) -> Result<T, InfraError> {
    let mut runtime = lock_runtime(state)?;
    let mut transaction = FarmTransaction::begin(&runtime);
    let value = match operation(&mut transaction) {
        Ok(value) => value,
        Err(error) => {
            state.log_error(command, &error.to_string());
            return Err(error.into());
        }
    };
    let retired = retired_virtual_block(transaction.mutations());
    if let Err(error) = persist(state, &mut runtime, transaction) {
        let error = match retired {
            Some(virtual_block_id) => InfraError::from(DomainError::RetirementFailed {
                virtual_block_id,
                step: RetirementStep::Persist,
                reason: error.to_string(),
            }),
            None => error,
        };
        state.log_error(command, &error.to_string());
        return Err(error);
    }
    Ok(value)
}

/// Virtual block removed by a change set that keeps its parent. Cascade
/// deletes drop the parent too and are not retirements.
fn retired_virtual_block(mutations: &[Mutation]) -> Option<String> {
    if mutations
        .iter()
        .any(|mutation| matches!(mutation, Mutation::DeletePhysicalBlock(_)))
    {
        return None;
    }
    mutations.iter().find_map(|mutation| match mutation {
        Mutation::DeleteVirtualBlock(id) => Some(id.clone()),
        _ => None,
    })
}

fn persist(
    state: &AppState,
    runtime: &mut MutexGuard<'_, FarmState>,
    transaction: FarmTransaction,
) -> Result<(), InfraError> {
    let (working, mutations) = transaction.into_parts();
    if mutations.is_empty() {
        return Ok(());
    }
    state.repository.apply(&mutations)?;
    **runtime = working;
    tracing::debug!(mutations = mutations.len(), "farm transaction committed");
    Ok(())
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, FarmState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("runtime lock poisoned: {error}")))
}

fn summarize(farm: &FarmState, block: &PhysicalBlock) -> BlockSummary {
    BlockSummary {
        state: block.state(),
        available_area_m2: block.available_area(),
        committed_plants: farm.committed_plants(&block.id),
        virtual_blocks: block
            .children()
            .iter()
            .filter_map(|child_id| farm.virtual_block(child_id).cloned())
            .collect(),
        block: block.clone(),
    }
}

fn required_input<'a>(value: &'a str, field_name: &str) -> Result<&'a str, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::validation(format!("{field_name} must not be empty")).into());
    }
    Ok(value)
}

fn parse_date_input(value: &str, field_name: &str) -> Result<NaiveDate, InfraError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|error| {
        DomainError::validation(format!("{field_name} must be YYYY-MM-DD: {error}")).into()
    })
}

fn parse_block_state(value: &str) -> Result<BlockState, InfraError> {
    BlockState::parse(value)
        .ok_or_else(|| DomainError::validation(format!("unsupported block state: {value}")).into())
}

fn parse_planting_target(value: &str) -> Result<PlantingTarget, InfraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "direct" => Ok(PlantingTarget::Direct),
        "virtual" => Ok(PlantingTarget::Virtual),
        _ => Err(DomainError::validation(format!("unsupported planting target: {value}")).into()),
    }
}

fn parse_task_type(value: &str) -> Result<TaskType, InfraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "planting" => Ok(TaskType::Planting),
        "harvest_start" => Ok(TaskType::HarvestStart),
        "harvest_end" => Ok(TaskType::HarvestEnd),
        "cleaning" => Ok(TaskType::Cleaning),
        "general" => Ok(TaskType::General),
        _ => Err(DomainError::validation(format!("unsupported task type: {value}")).into()),
    }
}

fn parse_quality_grade(value: &str) -> Result<QualityGrade, InfraError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "a" => Ok(QualityGrade::A),
        "b" => Ok(QualityGrade::B),
        "c" => Ok(QualityGrade::C),
        "reject" => Ok(QualityGrade::Reject),
        _ => Err(DomainError::validation(format!("unsupported quality grade: {value}")).into()),
    }
}
