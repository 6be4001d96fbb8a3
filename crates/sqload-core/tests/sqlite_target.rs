use std::{fs, path::Path, time::Duration};

use pretty_assertions::assert_eq;
use rusqlite::Connection;
use sqload_core::{
    Budget, DataSourceOptions, ImportConfig, ImportCursor, ImportError, SQLiteOptions, SessionExecutor,
    create_connection,
    import::{FailureKind, FixedProbe},
};

fn executor(
    db: &Path,
    config: &ImportConfig,
) -> SessionExecutor {
    let opts = DataSourceOptions::SQLite(SQLiteOptions {
        readonly: false,
        filepath: db.to_string_lossy().into_owned(),
    });
    let session = create_connection(&opts, Duration::from_secs(5)).unwrap();
    SessionExecutor::new(config.clone(), session)
        .unwrap()
        .with_probe(Box::new(FixedProbe::default()))
}

fn import_all(
    db: &Path,
    dump: &Path,
    config: &ImportConfig,
    chunk: u64,
) {
    let mut cursor = ImportCursor::start(dump, config).unwrap();
    while !cursor.is_finished() {
        let result = executor(db, config).advance(&cursor, Some(Budget::lines(chunk)));
        assert!(result.error.is_none(), "{:?}", result.error);
        cursor = result.cursor;
    }
}

fn rows(db: &Path) -> Vec<(i64, String)> {
    let conn = Connection::open(db).unwrap();
    let mut stmt = conn.prepare("SELECT id, name FROM t ORDER BY id").unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

fn dump() -> String {
    let mut content = String::from("CREATE TABLE t (\n  id INTEGER PRIMARY KEY,\n  name TEXT\n);\n");
    content.push_str("INSERT INTO t VALUES (0, 'a;b');\n");
    content.push_str("INSERT INTO t VALUES (1, 'it''s');\n");
    content.push_str("INSERT INTO t VALUES (2, 'two\nlines;');\n");
    for i in 3..40 {
        content.push_str(&format!("INSERT INTO t VALUES ({i}, 'row {i}');\n"));
    }
    content.push_str("UPDATE t SET name = 'updated' WHERE id = 39;\n");
    content
}

#[test]
fn batched_and_unbatched_imports_store_the_same_rows() {
    let dir = tempfile::tempdir().unwrap();
    let dump_path = dir.path().join("dump.sql");
    fs::write(&dump_path, dump()).unwrap();

    let batched = dir.path().join("batched.db");
    import_all(&batched, &dump_path, &ImportConfig::default(), 5);

    let single = dir.path().join("single.db");
    let config = ImportConfig {
        insert_batch_row_limit: 1,
        ..ImportConfig::default()
    };
    import_all(&single, &dump_path, &config, 3);

    let stored = rows(&batched);
    assert_eq!(stored.len(), 40);
    assert_eq!(stored[0], (0, "a;b".to_string()));
    assert_eq!(stored[1], (1, "it's".to_string()));
    assert_eq!(stored[2], (2, "two\nlines;".to_string()));
    assert_eq!(stored[39], (39, "updated".to_string()));
    assert_eq!(stored, rows(&single));
}

#[test]
fn conflict_reports_remediation_and_fresh_cursor_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("target.db");
    Connection::open(&db)
        .unwrap()
        .execute_batch("CREATE TABLE t (old INTEGER);")
        .unwrap();

    let dump_path = dir.path().join("dump.sql");
    fs::write(&dump_path, dump()).unwrap();
    let config = ImportConfig::default();

    let cursor = ImportCursor::start(&dump_path, &config).unwrap();
    let result = executor(&db, &config).advance(&cursor, Some(Budget::unbounded()));
    assert!(!result.finished);
    let Some(ImportError::Execution(err)) = &result.error else {
        panic!("unexpected result: {:?}", result.error);
    };
    assert!(err.conflict);
    assert_eq!(err.line, 4);
    assert_eq!(err.object.as_deref(), Some("t"));

    let failure = result.cursor.failure.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Execution);
    let remediation = failure.remediation.unwrap();
    assert_eq!(remediation, "DROP TABLE IF EXISTS t;");

    // 失败的游标不能继续推进
    let again = executor(&db, &config).advance(&result.cursor, None);
    assert!(matches!(again.error, Some(ImportError::AlreadyFailed(_))));

    Connection::open(&db).unwrap().execute_batch(&remediation).unwrap();
    import_all(&db, &dump_path, &config, 1000);
    assert_eq!(rows(&db).len(), 40);
}
