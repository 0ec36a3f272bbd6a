//! Database schema constants.
//!
//! This module contains all SQL schema definitions for the SQLite storage
//! backend: the queue table, the activity (history) table, the task
//! characteristics side-table and the task input blobs.

/// SQL schema for creating the ce_queue table.
pub const CREATE_CE_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ce_queue (
    uuid TEXT PRIMARY KEY,
    task_type TEXT NOT NULL,
    component_uuid TEXT,
    main_component_uuid TEXT,
    status TEXT NOT NULL,
    submitter_login TEXT,
    worker_uuid TEXT,
    started_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

/// SQL schema for creating the ce_activity table.
pub const CREATE_CE_ACTIVITY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ce_activity (
    uuid TEXT PRIMARY KEY,
    task_type TEXT NOT NULL,
    component_uuid TEXT,
    main_component_uuid TEXT,
    status TEXT NOT NULL,
    submitter_login TEXT,
    worker_uuid TEXT,
    node_name TEXT,
    is_last INTEGER NOT NULL,
    is_last_key TEXT NOT NULL,
    analysis_uuid TEXT,
    error_message TEXT,
    error_stacktrace TEXT,
    error_type TEXT,
    started_at INTEGER,
    executed_at INTEGER,
    execution_time_ms INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)
"#;

/// SQL schema for creating the ce_task_characteristics table.
pub const CREATE_CE_TASK_CHARACTERISTICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ce_task_characteristics (
    uuid TEXT PRIMARY KEY,
    task_uuid TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT
)
"#;

/// SQL schema for creating the ce_task_input table.
pub const CREATE_CE_TASK_INPUT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ce_task_input (
    task_uuid TEXT PRIMARY KEY,
    input_data BLOB NOT NULL,
    created_at INTEGER NOT NULL
)
"#;

/// Index creation statements, one statement each (SQLite prepares a single
/// statement per query).
pub const CREATE_INDEXES: [&str; 6] = [
    "CREATE INDEX IF NOT EXISTS idx_ce_queue_status ON ce_queue(status)",
    "CREATE INDEX IF NOT EXISTS idx_ce_queue_main_component ON ce_queue(main_component_uuid)",
    "CREATE INDEX IF NOT EXISTS idx_ce_queue_worker ON ce_queue(worker_uuid)",
    "CREATE INDEX IF NOT EXISTS idx_ce_activity_is_last_key ON ce_activity(is_last_key)",
    "CREATE INDEX IF NOT EXISTS idx_ce_activity_component ON ce_activity(component_uuid)",
    "CREATE INDEX IF NOT EXISTS idx_ce_task_characteristics_task ON ce_task_characteristics(task_uuid)",
];

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut statements = vec![
        CREATE_CE_QUEUE_TABLE,
        CREATE_CE_ACTIVITY_TABLE,
        CREATE_CE_TASK_CHARACTERISTICS_TABLE,
        CREATE_CE_TASK_INPUT_TABLE,
    ];
    statements.extend(CREATE_INDEXES);
    statements
}

/// Table names in the schema.
pub mod tables {
    /// Queue table name.
    pub const CE_QUEUE: &str = "ce_queue";
    /// Activity table name.
    pub const CE_ACTIVITY: &str = "ce_activity";
    /// Task characteristics table name.
    pub const CE_TASK_CHARACTERISTICS: &str = "ce_task_characteristics";
    /// Task input table name.
    pub const CE_TASK_INPUT: &str = "ce_task_input";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_schema_statements_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 10);
        // Queue table comes first, indexes last
        assert!(statements[0].contains("ce_queue"));
        assert!(statements[9].contains("CREATE INDEX"));
    }

    #[test]
    fn test_one_statement_per_entry() {
        for statement in all_schema_statements() {
            assert!(!statement.trim().trim_end_matches(';').contains(';'));
        }
    }

    #[test]
    fn test_table_constants() {
        assert_eq!(tables::CE_QUEUE, "ce_queue");
        assert_eq!(tables::CE_ACTIVITY, "ce_activity");
        assert_eq!(tables::CE_TASK_CHARACTERISTICS, "ce_task_characteristics");
        assert_eq!(tables::CE_TASK_INPUT, "ce_task_input");
    }
}
