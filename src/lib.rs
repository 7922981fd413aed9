//! sqlite-vector-search: SQLite extension for k-NN vector search
//!
//! An in-memory HNSW index exposed as a `vector_search` virtual table. A
//! table declares one vector column of fixed dimension; rows are inserted by
//! rowid and queried with a function-valued constraint:
//!
//! ```sql
//! CREATE VIRTUAL TABLE t USING vector_search(
//!     '{"name":"v","dim":128,"distance_type":"l2"}',
//!     '{"max_elements":100000}'
//! );
//! INSERT INTO t(rowid, v) VALUES (1, ?);  -- blob of 4*dim little-endian f32
//! SELECT rowid, distance FROM t WHERE knn_search(v, knn_param(?, 10));
//! ```
//!
//! The index lives for the lifetime of the table within one connection;
//! persistence, deletion, and updates are out of scope.

pub mod distance;
pub mod error;
pub mod index;
pub mod options;
pub mod space;
pub mod sql_functions;
pub mod vector;
pub mod vtab;

pub use error::{Error, Result};
pub use index::AnnIndex;
pub use options::IndexOptions;
pub use space::{DistanceType, VectorSpace};
pub use vector::Vector;

use rusqlite::Connection;

/// Initialize the extension on a connection: registers the `knn_search` and
/// `knn_param` scalar functions and the `vector_search` module.
pub fn init(db: &Connection) -> Result<()> {
    sql_functions::register_all(db)?;
    vtab::register_module(db)?;
    Ok(())
}

/// Extension entry point for SQLite to load this as a shared library.
///
/// Built only with the `loadable_extension` feature (which replaces the
/// bundled linkage); the entry point name follows SQLite's convention for a
/// library called `sqlitevectorsearch`.
///
/// # Safety
///
/// Called by SQLite's extension loading mechanism with a valid database
/// handle and API routines pointer.
#[cfg(feature = "loadable_extension")]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn sqlite3_sqlitevectorsearch_init(
    db: *mut rusqlite::ffi::sqlite3,
    _err_msg: *mut *mut std::os::raw::c_char,
    p_api: *mut rusqlite::ffi::sqlite3_api_routines,
) -> std::os::raw::c_int {
    use rusqlite::ffi;

    if unsafe { ffi::rusqlite_extension_init2(p_api) }.is_err() {
        return ffi::SQLITE_ERROR;
    }

    match std::panic::catch_unwind(|| {
        // SAFETY: db is a valid sqlite3 handle provided by SQLite
        let conn = match unsafe { Connection::from_handle(db) } {
            Ok(c) => c,
            Err(_) => return ffi::SQLITE_ERROR,
        };

        match init(&conn) {
            Ok(()) => {
                // SQLite owns the handle; don't close it
                std::mem::forget(conn);
                ffi::SQLITE_OK
            }
            Err(_) => ffi::SQLITE_ERROR,
        }
    }) {
        Ok(result) => result,
        Err(_) => ffi::SQLITE_ERROR,
    }
}
