pub mod area_ledger;
pub mod blocks;
pub mod error;
pub mod farm_state;
pub mod harvests;
pub mod lifecycle;
pub mod models;
pub mod pending_guard;
pub mod planner;
pub mod retirement;
pub mod tasks;
