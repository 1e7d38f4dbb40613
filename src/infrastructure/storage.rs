use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::path::Path;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    apply_schema(&connection)
}

pub fn apply_schema(connection: &Connection) -> Result<(), InfraError> {
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_every_record_table_and_is_idempotent() {
        let connection = Connection::open_in_memory().expect("open in-memory database");
        apply_schema(&connection).expect("apply schema");
        apply_schema(&connection).expect("apply schema twice");

        let mut statement = connection
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .expect("prepare");
        let tables = statement
            .query_map([], |row| row.get::<_, String>(0))
            .expect("query")
            .collect::<Result<Vec<_>, _>>()
            .expect("collect");
        assert_eq!(
            tables,
            vec![
                "harvest_records".to_string(),
                "physical_blocks".to_string(),
                "scheduled_tasks".to_string(),
                "virtual_blocks".to_string(),
            ]
        );
    }
}
