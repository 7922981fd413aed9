//! Virtual table implementation for the vector_search module
//!
//! SQLite owns the vtab and cursor handles by raw pointer and expects the
//! `sqlite3_vtab` / `sqlite3_vtab_cursor` headers at offset zero, so both
//! structs below are `#[repr(C)]` with the header as their first field and
//! cross the boundary as `Box::into_raw` pointers. rusqlite's safe vtab API
//! exposes neither xFindFunction nor pointer-valued filter arguments, which
//! this module needs, so the `sqlite3_module` is assembled by hand.

use std::collections::BTreeSet;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr;

use rusqlite::{Connection, ffi};

use crate::error::{Error, Result};
use crate::index::AnnIndex;
use crate::options::IndexOptions;
use crate::space::VectorSpace;
use crate::sql_functions::{KNN_PARAM_TYPE, KnnParam, knn_search_func, result_error};
use crate::vector::Vector;

/// Declared schema: column 0 is the vector, column 1 the hidden distance.
const COLUMN_VECTOR: c_int = 0;
const COLUMN_DISTANCE: c_int = 1;

/// idxNum values written by BestIndex. Only the knn plan is serviced by
/// Filter; the rowid plan is recognized but inert.
const INDEX_KNN: c_int = 1;
const INDEX_ROWID: c_int = 2;

// argv[0] = module name, argv[1] = database name, argv[2] = table name,
// argv[3..] = arguments of the USING clause.
const MODULE_PARAM_OFFSET: c_int = 3;

/// Register the vector_search virtual table module.
pub fn register_module(db: &Connection) -> Result<()> {
    let rc = unsafe {
        ffi::sqlite3_create_module_v2(
            db.handle(),
            c"vector_search".as_ptr(),
            &VECTOR_SEARCH_MODULE,
            ptr::null_mut(),
            None,
        )
    };
    if rc == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(Error::Sqlite(rusqlite::Error::SqliteFailure(
            ffi::Error::new(rc),
            None,
        )))
    }
}

/// One virtual table: the parsed space, the HNSW index, and the set of
/// inserted rowids.
#[repr(C)]
pub struct VirtualTable {
    base: ffi::sqlite3_vtab,
    space: VectorSpace,
    index: AnnIndex,
    rowids: BTreeSet<i64>,
}

impl VirtualTable {
    fn dimension(&self) -> usize {
        self.space.dim
    }

    /// Replace the vtab's error message, freeing any previous one.
    fn set_error(&mut self, msg: &str) {
        unsafe {
            if !self.base.zErrMsg.is_null() {
                ffi::sqlite3_free(self.base.zErrMsg as *mut c_void);
            }
            self.base.zErrMsg = sqlite_strdup(msg);
        }
    }
}

impl Drop for VirtualTable {
    fn drop(&mut self) {
        if !self.base.zErrMsg.is_null() {
            unsafe { ffi::sqlite3_free(self.base.zErrMsg as *mut c_void) };
            self.base.zErrMsg = ptr::null_mut();
        }
    }
}

/// Per-query cursor state. `result` holds (distance, rowid) pairs sorted by
/// ascending distance; the search borrows `query_vector` for its lifetime.
#[repr(C)]
pub struct Cursor {
    base: ffi::sqlite3_vtab_cursor,
    result: Vec<(f32, i64)>,
    position: usize,
    query_vector: Vector,
}

impl Cursor {
    fn vtab(&self) -> &VirtualTable {
        unsafe { &*(self.base.pVtab as *const VirtualTable) }
    }

    fn current(&self) -> Option<(f32, i64)> {
        self.result.get(self.position).copied()
    }
}

/// Copy a message into sqlite3_malloc-ed memory so SQLite can free it.
unsafe fn sqlite_strdup(msg: &str) -> *mut c_char {
    match CString::new(msg) {
        Ok(c) => unsafe { ffi::sqlite3_mprintf(c"%s".as_ptr(), c.as_ptr()) },
        Err(_) => ptr::null_mut(),
    }
}

unsafe fn set_create_error(pz_err: *mut *mut c_char, msg: &str) {
    if pz_err.is_null() {
        return;
    }
    unsafe {
        if !(*pz_err).is_null() {
            ffi::sqlite3_free(*pz_err as *mut c_void);
        }
        *pz_err = sqlite_strdup(msg);
    }
}

// The index is memory-only, so xConnect shares the implementation with
// xCreate and xDisconnect with xDestroy.
unsafe extern "C" fn vs_create(
    db: *mut ffi::sqlite3,
    _aux: *mut c_void,
    argc: c_int,
    argv: *const *const c_char,
    pp_vtab: *mut *mut ffi::sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> c_int {
    assert!(!db.is_null());
    assert!(!pp_vtab.is_null());

    let rc = unsafe { ffi::sqlite3_vtab_config(db, ffi::SQLITE_VTAB_CONSTRAINT_SUPPORT, 1 as c_int) };
    if rc != ffi::SQLITE_OK {
        return rc;
    }

    if argc != MODULE_PARAM_OFFSET + 2 {
        unsafe {
            set_create_error(
                pz_err,
                &format!("Expected 2 arguments, got {}", argc - MODULE_PARAM_OFFSET),
            );
        }
        return ffi::SQLITE_ERROR;
    }
    let args = unsafe { std::slice::from_raw_parts(argv, argc as usize) };

    let space_str = unsafe { CStr::from_ptr(args[3]) }.to_string_lossy();
    tracing::debug!(space = %space_str, "parsing vector space literal");
    let space = match VectorSpace::from_string(&space_str) {
        Ok(space) => space,
        Err(e) => {
            unsafe {
                set_create_error(pz_err, &format!("Invalid vector space: {space_str}. Reason: {e}"));
            }
            return ffi::SQLITE_ERROR;
        }
    };

    let options_str = unsafe { CStr::from_ptr(args[4]) }.to_string_lossy();
    tracing::debug!(options = %options_str, "parsing index options literal");
    let options = match IndexOptions::from_string(&options_str) {
        Ok(options) => options,
        Err(e) => {
            unsafe {
                set_create_error(
                    pz_err,
                    &format!("Invalid index options: {options_str}. Reason: {e}"),
                );
            }
            return ffi::SQLITE_ERROR;
        }
    };

    let sql = format!("CREATE TABLE x({}, distance REAL HIDDEN)", space.vector_name);
    // The column name is a validated identifier, so the SQL has no interior NUL.
    let c_sql = match CString::new(sql) {
        Ok(c) => c,
        Err(_) => return ffi::SQLITE_ERROR,
    };
    let rc = unsafe { ffi::sqlite3_declare_vtab(db, c_sql.as_ptr()) };
    tracing::debug!(rc, "vtab schema declared");
    if rc != ffi::SQLITE_OK {
        return rc;
    }

    let index = AnnIndex::new(&space, &options);
    let vtab = Box::new(VirtualTable {
        base: unsafe { std::mem::zeroed() },
        space,
        index,
        rowids: BTreeSet::new(),
    });
    unsafe { *pp_vtab = Box::into_raw(vtab) as *mut ffi::sqlite3_vtab };
    ffi::SQLITE_OK
}

unsafe extern "C" fn vs_destroy(p_vtab: *mut ffi::sqlite3_vtab) -> c_int {
    assert!(!p_vtab.is_null());
    drop(unsafe { Box::from_raw(p_vtab as *mut VirtualTable) });
    ffi::SQLITE_OK
}

unsafe extern "C" fn vs_best_index(
    p_vtab: *mut ffi::sqlite3_vtab,
    p_info: *mut ffi::sqlite3_index_info,
) -> c_int {
    assert!(!p_vtab.is_null());
    assert!(!p_info.is_null());

    let info = unsafe { &mut *p_info };
    let constraints =
        unsafe { std::slice::from_raw_parts(info.aConstraint, info.nConstraint as usize) };
    let usages = unsafe {
        std::slice::from_raw_parts_mut(info.aConstraintUsage, info.nConstraint as usize)
    };

    // When both a knn function constraint and a rowid constraint are
    // present, the later assignment wins; the rowid plan is inert.
    for (constraint, usage) in constraints.iter().zip(usages.iter_mut()) {
        if constraint.usable == 0 {
            continue;
        }
        if c_int::from(constraint.op) == ffi::SQLITE_INDEX_CONSTRAINT_FUNCTION
            && constraint.iColumn == COLUMN_VECTOR
        {
            tracing::debug!("found vector search constraint");
            info.idxNum = INDEX_KNN;
            usage.argvIndex = 1;
            usage.omit = 1;
        } else if constraint.iColumn == -1 {
            tracing::debug!("found rowid constraint");
            info.idxNum = INDEX_ROWID;
            usage.argvIndex = 2;
            usage.omit = 1;
        } else {
            tracing::debug!(
                column = constraint.iColumn,
                op = constraint.op,
                "ignoring constraint"
            );
        }
    }

    ffi::SQLITE_OK
}

unsafe extern "C" fn vs_open(
    p_vtab: *mut ffi::sqlite3_vtab,
    pp_cursor: *mut *mut ffi::sqlite3_vtab_cursor,
) -> c_int {
    assert!(!p_vtab.is_null());
    assert!(!pp_cursor.is_null());

    let cursor = Box::new(Cursor {
        base: unsafe { std::mem::zeroed() },
        result: Vec::new(),
        position: 0,
        query_vector: Vector::default(),
    });
    unsafe { *pp_cursor = Box::into_raw(cursor) as *mut ffi::sqlite3_vtab_cursor };
    ffi::SQLITE_OK
}

unsafe extern "C" fn vs_close(p_cur: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    assert!(!p_cur.is_null());
    drop(unsafe { Box::from_raw(p_cur as *mut Cursor) });
    ffi::SQLITE_OK
}

unsafe extern "C" fn vs_filter(
    p_cur: *mut ffi::sqlite3_vtab_cursor,
    idx_num: c_int,
    _idx_str: *const c_char,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) -> c_int {
    assert!(!p_cur.is_null());
    let cursor = unsafe { &mut *(p_cur as *mut Cursor) };
    assert!(!cursor.base.pVtab.is_null());
    let vtab = unsafe { &mut *(cursor.base.pVtab as *mut VirtualTable) };

    tracing::debug!(idx_num, argc, "filter");

    if idx_num != INDEX_KNN {
        vtab.set_error(&format!("Invalid index number: {idx_num}"));
        return ffi::SQLITE_ERROR;
    }

    assert!(argc >= 1);
    let args = unsafe { std::slice::from_raw_parts(argv, argc as usize) };
    let param =
        unsafe { ffi::sqlite3_value_pointer(args[0], KNN_PARAM_TYPE.as_ptr()) } as *const KnnParam;
    if param.is_null() {
        vtab.set_error("knn_param() must be used as the 2nd argument of knn_search");
        return ffi::SQLITE_ERROR;
    }
    // The pointer is owned by the SQLite value and stays valid for the
    // duration of this call; nothing is retained past the clone below.
    let param = unsafe { &*param };

    if param.query_vector.dim() != vtab.dimension() {
        vtab.set_error(&format!(
            "Dimension mismatch: query vector has dimension {}, but the table has dimension {}",
            param.query_vector.dim(),
            vtab.dimension()
        ));
        return ffi::SQLITE_ERROR;
    }

    cursor.query_vector = if vtab.space.normalize {
        param.query_vector.normalize()
    } else {
        param.query_vector.clone()
    };
    cursor.result = vtab
        .index
        .search_knn(cursor.query_vector.as_slice(), param.k as usize)
        .into_iter()
        .map(|(distance, label)| (distance, label as i64))
        .collect();
    cursor.position = 0;
    ffi::SQLITE_OK
}

unsafe extern "C" fn vs_next(p_cur: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    assert!(!p_cur.is_null());
    let cursor = unsafe { &mut *(p_cur as *mut Cursor) };
    if cursor.position < cursor.result.len() {
        cursor.position += 1;
    }
    ffi::SQLITE_OK
}

unsafe extern "C" fn vs_eof(p_cur: *mut ffi::sqlite3_vtab_cursor) -> c_int {
    assert!(!p_cur.is_null());
    let cursor = unsafe { &*(p_cur as *const Cursor) };
    c_int::from(cursor.position >= cursor.result.len())
}

unsafe extern "C" fn vs_rowid(
    p_cur: *mut ffi::sqlite3_vtab_cursor,
    p_rowid: *mut ffi::sqlite3_int64,
) -> c_int {
    assert!(!p_cur.is_null());
    assert!(!p_rowid.is_null());

    let cursor = unsafe { &*(p_cur as *const Cursor) };
    match cursor.current() {
        Some((_, rowid)) => {
            unsafe { *p_rowid = rowid };
            ffi::SQLITE_OK
        }
        None => ffi::SQLITE_ERROR,
    }
}

unsafe extern "C" fn vs_column(
    p_cur: *mut ffi::sqlite3_vtab_cursor,
    ctx: *mut ffi::sqlite3_context,
    n: c_int,
) -> c_int {
    assert!(!p_cur.is_null());
    assert!(!ctx.is_null());

    let cursor = unsafe { &*(p_cur as *const Cursor) };
    let Some((distance, rowid)) = cursor.current() else {
        return ffi::SQLITE_ERROR;
    };

    match n {
        COLUMN_DISTANCE => {
            unsafe { ffi::sqlite3_result_double(ctx, f64::from(distance)) };
            ffi::SQLITE_OK
        }
        COLUMN_VECTOR => match cursor.vtab().index.get_by_label(rowid as usize) {
            Ok(vector) => {
                let blob = vector.to_blob();
                unsafe {
                    ffi::sqlite3_result_blob(
                        ctx,
                        blob.as_ptr() as *const c_void,
                        blob.len() as c_int,
                        ffi::SQLITE_TRANSIENT(),
                    );
                }
                ffi::SQLITE_OK
            }
            Err(_) => {
                unsafe { result_error(ctx, &format!("Can't find vector with rowid {rowid}")) };
                ffi::SQLITE_ERROR
            }
        },
        _ => {
            unsafe { result_error(ctx, &format!("Invalid column index: {n}")) };
            ffi::SQLITE_ERROR
        }
    }
}

// Only insert is supported.
unsafe extern "C" fn vs_update(
    p_vtab: *mut ffi::sqlite3_vtab,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
    p_rowid: *mut ffi::sqlite3_int64,
) -> c_int {
    assert!(!p_vtab.is_null());
    let vtab = unsafe { &mut *(p_vtab as *mut VirtualTable) };
    let args = unsafe { std::slice::from_raw_parts(argv, argc as usize) };

    let is_insert = argc > 1 && unsafe { ffi::sqlite3_value_type(args[0]) } == ffi::SQLITE_NULL;
    if !is_insert {
        vtab.set_error(&Error::UnsupportedOperation.to_string());
        return ffi::SQLITE_ERROR;
    }
    // An insert carries (NULL, rowid, vector, distance).
    assert!(argc >= 3);

    if unsafe { ffi::sqlite3_value_type(args[1]) } == ffi::SQLITE_NULL {
        vtab.set_error("rowid must be specified during insertion");
        return ffi::SQLITE_ERROR;
    }
    let raw_rowid = unsafe { ffi::sqlite3_value_int64(args[1]) };
    // The rowid doubles as the index label, whose width is usize.
    if raw_rowid < 0 || raw_rowid as u64 > usize::MAX as u64 {
        vtab.set_error(&format!("rowid {raw_rowid} out of range"));
        return ffi::SQLITE_ERROR;
    }
    let label = raw_rowid as usize;

    if vtab.rowids.contains(&raw_rowid) {
        let e = Error::DuplicateRowid(raw_rowid);
        vtab.set_error(&format!("Failed to perform insertion due to: {e}"));
        return ffi::SQLITE_ERROR;
    }

    if unsafe { ffi::sqlite3_value_type(args[2]) } != ffi::SQLITE_BLOB {
        vtab.set_error("vector must be of type Blob");
        return ffi::SQLITE_ERROR;
    }
    let blob = unsafe {
        let len = ffi::sqlite3_value_bytes(args[2]) as usize;
        if len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(ffi::sqlite3_value_blob(args[2]) as *const u8, len)
        }
    };

    let vector = match Vector::from_blob(blob) {
        Ok(v) => v,
        Err(e) => {
            vtab.set_error(&format!("Failed to perform insertion due to: {e}"));
            return ffi::SQLITE_ERROR;
        }
    };
    if vector.dim() != vtab.dimension() {
        let e = Error::DimensionMismatch {
            expected: vtab.dimension(),
            actual: vector.dim(),
        };
        vtab.set_error(&format!("Failed to perform insertion due to: {e}"));
        return ffi::SQLITE_ERROR;
    }

    let stored = if vtab.space.normalize {
        vector.normalize()
    } else {
        vector
    };
    if let Err(e) = vtab.index.add(label, stored.as_slice()) {
        vtab.set_error(&format!("Failed to perform insertion due to: {e}"));
        return ffi::SQLITE_ERROR;
    }
    vtab.rowids.insert(raw_rowid);
    unsafe { *p_rowid = raw_rowid };
    ffi::SQLITE_OK
}

unsafe extern "C" fn vs_find_function(
    p_vtab: *mut ffi::sqlite3_vtab,
    _n_arg: c_int,
    z_name: *const c_char,
    px_func: *mut Option<
        unsafe extern "C" fn(*mut ffi::sqlite3_context, c_int, *mut *mut ffi::sqlite3_value),
    >,
    pp_arg: *mut *mut c_void,
) -> c_int {
    assert!(!p_vtab.is_null());
    assert!(!z_name.is_null());

    let name = unsafe { CStr::from_ptr(z_name) };
    if name.to_bytes() == b"knn_search" {
        unsafe {
            *px_func = Some(knn_search_func);
            *pp_arg = ptr::null_mut();
        }
        return ffi::SQLITE_INDEX_CONSTRAINT_FUNCTION;
    }
    0
}

// Unset hooks stay NULL; the layout mirrors rusqlite's own module setup.
const ZERO_MODULE: ffi::sqlite3_module = unsafe {
    std::mem::transmute::<[u8; std::mem::size_of::<ffi::sqlite3_module>()], ffi::sqlite3_module>(
        [0_u8; std::mem::size_of::<ffi::sqlite3_module>()],
    )
};

static VECTOR_SEARCH_MODULE: ffi::sqlite3_module = ffi::sqlite3_module {
    iVersion: 2,
    xCreate: Some(vs_create),
    xConnect: Some(vs_create),
    xBestIndex: Some(vs_best_index),
    xDisconnect: Some(vs_destroy),
    xDestroy: Some(vs_destroy),
    xOpen: Some(vs_open),
    xClose: Some(vs_close),
    xFilter: Some(vs_filter),
    xNext: Some(vs_next),
    xEof: Some(vs_eof),
    xColumn: Some(vs_column),
    xRowid: Some(vs_rowid),
    xUpdate: Some(vs_update),
    xFindFunction: Some(vs_find_function),
    ..ZERO_MODULE
};
