pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{bootstrap_workspace, BootstrapResult};
pub use application::commands::{
    commit_planting_impl, complete_task_impl, create_block_impl, delete_block_impl,
    execute_retirement_impl, get_block_area_impl, list_blocks_impl, list_harvests_impl,
    list_pending_tasks_impl, preview_planting_impl, preview_retirement_impl, record_harvest_impl,
    resize_block_impl, schedule_task_impl, start_task_impl, transition_block_impl, AppState,
    BlockAreaResponse, BlockSummary, HarvestListResponse, NowProvider,
};
pub use domain::error::{DomainError, RetirementStep};
pub use domain::lifecycle::{BlockState, TransitionOutcome};
pub use domain::planner::{CropProfile, PlantingPreview, PlantingRequest, PlantingTarget};
pub use infrastructure::error::InfraError;
