//! Error surface: every failure path reaches SQL with a descriptive message
//! and leaves the table state unchanged.

use rusqlite::Connection;

fn create_test_db() -> Connection {
    let db = Connection::open_in_memory().expect("Failed to create database");
    sqlite_vector_search::init(&db).expect("Failed to init extension");
    db
}

fn vector_blob(values: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(values.len() * 4);
    for v in values {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

fn create_table(db: &Connection, dim: usize, distance_type: &str, max_elements: usize) {
    db.execute(
        &format!(
            r#"CREATE VIRTUAL TABLE t USING vector_search(
                '{{"name":"v","dim":{dim},"distance_type":"{distance_type}"}}',
                '{{"max_elements":{max_elements}}}'
            )"#
        ),
        [],
    )
    .expect("CREATE VIRTUAL TABLE should succeed");
}

fn row_count(db: &Connection, dim: usize) -> usize {
    let query = vec![0.0f32; dim];
    db.prepare("SELECT rowid FROM t WHERE knn_search(v, knn_param(?1, 100))")
        .unwrap()
        .query_map([vector_blob(&query)], |row| row.get::<_, i64>(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap()
        .len()
}

#[test]
fn test_query_dimension_mismatch() {
    let db = create_test_db();
    create_table(&db, 3, "l2", 100);

    db.execute(
        "INSERT INTO t(rowid, v) VALUES (1, ?1)",
        [vector_blob(&[1.0, 2.0, 3.0])],
    )
    .unwrap();

    // 8-byte blob decodes to dimension 2 against a dim-3 table
    let result = db
        .prepare("SELECT rowid FROM t WHERE knn_search(v, knn_param(?1, 2))")
        .unwrap()
        .query_map([vector_blob(&[0.9, 0.1])], |row| row.get::<_, i64>(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<i64>>>();

    let err = result.unwrap_err().to_string();
    assert!(err.contains("Dimension mismatch"), "got: {err}");
}

#[test]
fn test_insert_dimension_mismatch() {
    let db = create_test_db();
    create_table(&db, 3, "l2", 100);

    let result = db.execute(
        "INSERT INTO t(rowid, v) VALUES (1, ?1)",
        [vector_blob(&[1.0, 2.0])],
    );
    let err = result.unwrap_err().to_string();
    assert!(err.contains("Dimension mismatch"), "got: {err}");
    assert_eq!(row_count(&db, 3), 0);
}

#[test]
fn test_insert_bad_blob() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    db.execute("INSERT INTO t(rowid, v) VALUES (1, ?1)", [vector_blob(&[1.0, 0.0])])
        .unwrap();

    // 7 bytes is not a multiple of 4
    let result = db.execute("INSERT INTO t(rowid, v) VALUES (2, ?1)", [vec![0u8; 7]]);
    let err = result.unwrap_err().to_string();
    assert!(err.contains("Failed to perform insertion"), "got: {err}");

    assert_eq!(row_count(&db, 2), 1, "index size must be unchanged");
}

#[test]
fn test_insert_non_blob_vector() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    let result = db.execute("INSERT INTO t(rowid, v) VALUES (1, 'hello')", []);
    let err = result.unwrap_err().to_string();
    assert!(err.contains("vector must be of type Blob"), "got: {err}");
}

#[test]
fn test_capacity_exceeded() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 2);

    db.execute("INSERT INTO t(rowid, v) VALUES (1, ?1)", [vector_blob(&[1.0, 0.0])])
        .unwrap();
    db.execute("INSERT INTO t(rowid, v) VALUES (2, ?1)", [vector_blob(&[0.0, 1.0])])
        .unwrap();

    let result = db.execute("INSERT INTO t(rowid, v) VALUES (3, ?1)", [vector_blob(&[1.0, 1.0])]);
    let err = result.unwrap_err().to_string();
    assert!(err.contains("Index is full"), "got: {err}");

    assert_eq!(row_count(&db, 2), 2, "prior state must be unchanged");
}

#[test]
fn test_duplicate_rowid_rejected() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    db.execute("INSERT INTO t(rowid, v) VALUES (1, ?1)", [vector_blob(&[1.0, 0.0])])
        .unwrap();
    let result = db.execute("INSERT INTO t(rowid, v) VALUES (1, ?1)", [vector_blob(&[0.0, 1.0])]);
    let err = result.unwrap_err().to_string();
    assert!(err.contains("already present"), "got: {err}");

    // The first vector is still the stored one
    let fetched: Vec<u8> = db
        .query_row(
            "SELECT v FROM t WHERE knn_search(v, knn_param(?1, 1))",
            [vector_blob(&[1.0, 0.0])],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(fetched, vector_blob(&[1.0, 0.0]));
}

#[test]
fn test_insert_without_rowid() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    let result = db.execute("INSERT INTO t(v) VALUES (?1)", [vector_blob(&[1.0, 0.0])]);
    let err = result.unwrap_err().to_string();
    assert!(err.contains("rowid must be specified"), "got: {err}");
}

#[test]
fn test_negative_rowid_rejected() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    let result = db.execute(
        "INSERT INTO t(rowid, v) VALUES (-1, ?1)",
        [vector_blob(&[1.0, 0.0])],
    );
    let err = result.unwrap_err().to_string();
    assert!(err.contains("out of range"), "got: {err}");
}

#[test]
fn test_delete_not_supported() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    db.execute("INSERT INTO t(rowid, v) VALUES (1, ?1)", [vector_blob(&[1.0, 0.0])])
        .unwrap();

    // Deletion has no supported read path to find its rows, let alone an
    // xUpdate implementation; it must fail either way.
    assert!(db.execute("DELETE FROM t", []).is_err());
    assert_eq!(row_count(&db, 2), 1);
}

#[test]
fn test_update_not_supported() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    db.execute("INSERT INTO t(rowid, v) VALUES (1, ?1)", [vector_blob(&[1.0, 0.0])])
        .unwrap();

    let result = db.execute("UPDATE t SET v = ?1", [vector_blob(&[0.0, 1.0])]);
    assert!(result.is_err());
}

#[test]
fn test_knn_search_with_raw_integer() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    db.execute("INSERT INTO t(rowid, v) VALUES (1, ?1)", [vector_blob(&[1.0, 0.0])])
        .unwrap();

    let result = db
        .prepare("SELECT rowid FROM t WHERE knn_search(v, 42)")
        .unwrap()
        .query_map([], |row| row.get::<_, i64>(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<i64>>>();

    let err = result.unwrap_err().to_string();
    assert!(
        err.contains("knn_param() must be used as the 2nd argument of knn_search"),
        "got: {err}"
    );
}

#[test]
fn test_knn_search_with_value_from_other_function() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    db.execute("INSERT INTO t(rowid, v) VALUES (1, ?1)", [vector_blob(&[1.0, 0.0])])
        .unwrap();

    // A value produced by any other function carries no knn_param tag
    let result = db
        .prepare("SELECT rowid FROM t WHERE knn_search(v, abs(-3))")
        .unwrap()
        .query_map([], |row| row.get::<_, i64>(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<i64>>>();

    let err = result.unwrap_err().to_string();
    assert!(err.contains("knn_param() must be used"), "got: {err}");
}

#[test]
fn test_knn_param_isolated_from_other_functions() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    // A knn_param value handed to a generic scalar function reads as NULL
    // and never reaches the adapter
    let length: Option<i64> = db
        .query_row(
            "SELECT length(knn_param(?1, 2))",
            [vector_blob(&[1.0, 0.0])],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(length, None);
}

#[test]
fn test_full_scan_unsupported() {
    let db = create_test_db();
    create_table(&db, 2, "l2", 100);

    db.execute("INSERT INTO t(rowid, v) VALUES (1, ?1)", [vector_blob(&[1.0, 0.0])])
        .unwrap();

    // k-NN is the only read path; an unconstrained scan fails in Filter
    let result = db
        .prepare("SELECT rowid FROM t")
        .unwrap()
        .query_map([], |row| row.get::<_, i64>(0))
        .unwrap()
        .collect::<rusqlite::Result<Vec<i64>>>();

    let err = result.unwrap_err().to_string();
    assert!(err.contains("Invalid index number"), "got: {err}");
}
