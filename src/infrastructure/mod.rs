pub mod config;
pub mod error;
pub mod farm_repository;
pub mod logging;
pub mod storage;
