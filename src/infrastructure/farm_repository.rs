use crate::domain::farm_state::{FarmState, Mutation};
use crate::domain::models::{HarvestRecord, PhysicalBlock, ScheduledTask, VirtualBlock};
use crate::infrastructure::error::InfraError;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable home of the farm state. `apply` persists one transaction's
/// change set; it either stores every mutation or none of them.
pub trait FarmRepository: Send + Sync {
    fn load_snapshot(&self) -> Result<FarmState, InfraError>;
    fn apply(&self, mutations: &[Mutation]) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteFarmRepository {
    db_path: PathBuf,
}

impl SqliteFarmRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl FarmRepository for SqliteFarmRepository {
    fn load_snapshot(&self) -> Result<FarmState, InfraError> {
        let connection = self.connect()?;
        let physical_blocks: Vec<PhysicalBlock> =
            load_payloads(&connection, "SELECT payload FROM physical_blocks ORDER BY id")?;
        let virtual_blocks: Vec<VirtualBlock> =
            load_payloads(&connection, "SELECT payload FROM virtual_blocks ORDER BY id")?;
        let tasks: Vec<ScheduledTask> =
            load_payloads(&connection, "SELECT payload FROM scheduled_tasks ORDER BY id")?;
        let harvests: Vec<HarvestRecord> =
            load_payloads(&connection, "SELECT payload FROM harvest_records ORDER BY id")?;
        Ok(FarmState::from_records(
            physical_blocks,
            virtual_blocks,
            tasks,
            harvests,
        ))
    }

    fn apply(&self, mutations: &[Mutation]) -> Result<(), InfraError> {
        if mutations.is_empty() {
            return Ok(());
        }
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        let updated_at = Utc::now().to_rfc3339();
        for mutation in mutations {
            apply_mutation(&transaction, mutation, &updated_at)?;
        }
        transaction.commit()?;
        Ok(())
    }
}

fn load_payloads<T: DeserializeOwned>(connection: &Connection, sql: &str) -> Result<Vec<T>, InfraError> {
    let mut statement = connection.prepare(sql)?;
    let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
    let mut records = Vec::new();
    for row in rows {
        let payload = row?;
        records.push(serde_json::from_str(&payload)?);
    }
    Ok(records)
}

fn apply_mutation(connection: &Connection, mutation: &Mutation, updated_at: &str) -> Result<(), InfraError> {
    match mutation {
        Mutation::PutPhysicalBlock(block) => {
            connection.execute(
                "INSERT INTO physical_blocks (id, farm_id, code, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   farm_id = excluded.farm_id,
                   code = excluded.code,
                   payload = excluded.payload,
                   updated_at = excluded.updated_at",
                params![
                    block.id,
                    block.farm_id,
                    block.code,
                    serde_json::to_string(block)?,
                    updated_at
                ],
            )?;
        }
        Mutation::DeletePhysicalBlock(block_id) => {
            connection.execute("DELETE FROM physical_blocks WHERE id = ?1", params![block_id])?;
        }
        Mutation::PutVirtualBlock(block) => {
            connection.execute(
                "INSERT INTO virtual_blocks (id, parent_id, code, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   parent_id = excluded.parent_id,
                   code = excluded.code,
                   payload = excluded.payload,
                   updated_at = excluded.updated_at",
                params![
                    block.id,
                    block.parent_id,
                    block.code,
                    serde_json::to_string(block)?,
                    updated_at
                ],
            )?;
        }
        Mutation::DeleteVirtualBlock(block_id) => {
            connection.execute("DELETE FROM virtual_blocks WHERE id = ?1", params![block_id])?;
        }
        Mutation::PutTask(task) => {
            connection.execute(
                "INSERT INTO scheduled_tasks (id, block_id, status, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   block_id = excluded.block_id,
                   status = excluded.status,
                   payload = excluded.payload,
                   updated_at = excluded.updated_at",
                params![
                    task.id,
                    task.block_id,
                    task.status.as_str(),
                    serde_json::to_string(task)?,
                    updated_at
                ],
            )?;
        }
        Mutation::DeleteTask(task_id) => {
            connection.execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![task_id])?;
        }
        Mutation::PutHarvest(harvest) => {
            connection.execute(
                "INSERT INTO harvest_records (id, block_id, harvest_date, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   block_id = excluded.block_id,
                   harvest_date = excluded.harvest_date,
                   payload = excluded.payload,
                   updated_at = excluded.updated_at",
                params![
                    harvest.id,
                    harvest.block_id,
                    harvest.harvest_date.to_string(),
                    serde_json::to_string(harvest)?,
                    updated_at
                ],
            )?;
        }
        Mutation::DeleteHarvest(harvest_id) => {
            connection.execute("DELETE FROM harvest_records WHERE id = ?1", params![harvest_id])?;
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryFarmRepository {
    state: Mutex<FarmState>,
}

impl FarmRepository for InMemoryFarmRepository {
    fn load_snapshot(&self) -> Result<FarmState, InfraError> {
        let state = self
            .state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("farm repository lock poisoned: {error}")))?;
        Ok(state.clone())
    }

    fn apply(&self, mutations: &[Mutation]) -> Result<(), InfraError> {
        let mut state = self
            .state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("farm repository lock poisoned: {error}")))?;
        for mutation in mutations {
            state.apply(mutation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::area_ledger::ClaimOwner;
    use crate::domain::lifecycle::BlockState;
    use crate::domain::models::{Occupancy, Planting, QualityGrade, TaskStatus, TaskType};
    use crate::infrastructure::storage::initialize_database;
    use chrono::{DateTime, NaiveDate};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DB: AtomicUsize = AtomicUsize::new(0);

    struct TempDatabase {
        dir: PathBuf,
        path: PathBuf,
    }

    impl TempDatabase {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DB.fetch_add(1, Ordering::Relaxed);
            let dir = std::env::temp_dir().join(format!(
                "fieldblock-repository-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&dir).expect("create temp dir");
            let path = dir.join("fieldblock.sqlite");
            initialize_database(&path).expect("initialize database");
            Self { dir, path }
        }
    }

    impl Drop for TempDatabase {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn block(id: &str, code: &str) -> PhysicalBlock {
        PhysicalBlock::new(id, "farm-1", code, 1_000.0, 100, fixed_time("2026-02-16T08:00:00Z"))
            .expect("valid block")
    }

    fn sample_mutations() -> Vec<Mutation> {
        let mut parent = block("pb-1", "A1");
        parent
            .ledger
            .reserve(ClaimOwner::Virtual("vb-1".to_string()), 250.0)
            .expect("reserve");
        parent.occupancy = Occupancy::Partial {
            children: vec!["vb-1".to_string()],
        };
        let code = parent.next_virtual_code();
        vec![
            Mutation::PutPhysicalBlock(parent),
            Mutation::PutVirtualBlock(VirtualBlock {
                id: "vb-1".to_string(),
                code,
                parent_id: "pb-1".to_string(),
                planting: Planting {
                    crop_id: "crop-corn".to_string(),
                    crop_name: "Corn".to_string(),
                    plant_count: 25,
                    area_m2: 250.0,
                    state: BlockState::Harvesting,
                    planned_date: date("2026-03-01"),
                    planted_date: Some(date("2026-03-01")),
                    expected_harvest_date: date("2026-06-01"),
                    expected_cleaning_date: date("2026-06-08"),
                    predicted_yield_kg: 80.0,
                    predicted_revenue: 0.0,
                },
                created_at: fixed_time("2026-02-16T08:00:00Z"),
            }),
            Mutation::PutTask(ScheduledTask {
                id: "tsk-1".to_string(),
                block_id: "vb-1".to_string(),
                title: "End harvest".to_string(),
                task_type: TaskType::HarvestEnd,
                scheduled_date: date("2026-06-07"),
                status: TaskStatus::Pending,
                completed_at: None,
                origin_virtual_block: None,
                created_at: fixed_time("2026-02-16T08:00:00Z"),
            }),
            Mutation::PutHarvest(HarvestRecord {
                id: "hv-1".to_string(),
                block_id: "vb-1".to_string(),
                harvest_date: date("2026-06-02"),
                quantity_kg: 12.5,
                grade: QualityGrade::B,
                notes: Some("first pick".to_string()),
                recorded_at: fixed_time("2026-06-02T10:00:00Z"),
                origin_virtual_block: None,
            }),
        ]
    }

    #[test]
    fn sqlite_snapshot_matches_replayed_mutations() {
        let database = TempDatabase::new();
        let repository = SqliteFarmRepository::new(&database.path);
        let mutations = sample_mutations();
        repository.apply(&mutations).expect("apply");

        let mut expected = FarmState::default();
        for mutation in &mutations {
            expected.apply(mutation);
        }
        assert_eq!(repository.load_snapshot().expect("load"), expected);

        repository
            .apply(&[
                Mutation::DeleteTask("tsk-1".to_string()),
                Mutation::DeleteHarvest("hv-1".to_string()),
            ])
            .expect("delete");
        let reloaded = repository.load_snapshot().expect("reload");
        assert!(reloaded.task("tsk-1").is_none());
        assert_eq!(reloaded.harvests().count(), 0);
        assert!(reloaded.virtual_block("vb-1").is_some());
    }

    #[test]
    fn sqlite_apply_is_all_or_nothing() {
        let database = TempDatabase::new();
        let repository = SqliteFarmRepository::new(&database.path);
        let result = repository.apply(&[
            Mutation::PutPhysicalBlock(block("pb-1", "A1")),
            Mutation::PutPhysicalBlock(block("pb-2", "A1")),
        ]);

        assert!(matches!(result, Err(InfraError::Sqlite(_))));
        assert_eq!(
            repository
                .load_snapshot()
                .expect("load")
                .physical_blocks()
                .count(),
            0
        );
    }

    #[test]
    fn in_memory_repository_applies_mutations() {
        let repository = InMemoryFarmRepository::default();
        repository.apply(&sample_mutations()).expect("apply");
        let snapshot = repository.load_snapshot().expect("load");
        assert_eq!(snapshot.block_state("pb-1"), Some(BlockState::Partial));
        assert_eq!(snapshot.tasks_for("vb-1").count(), 1);
    }
}
