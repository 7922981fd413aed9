//! SQL scalar function implementations
//!
//! Two functions make up the query surface: `knn_search(col, param)` is a
//! marker with an empty body that the virtual table's xFindFunction turns
//! into a planner constraint, and `knn_param(blob, k)` packages the query
//! into an opaque pointer value that only the matching Filter accepts.
//!
//! Pointer-valued results (`sqlite3_result_pointer`) are not reachable
//! through rusqlite's function API, so registration goes through the raw
//! FFI here.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::ptr;

use rusqlite::{Connection, ffi};

use crate::error::{Error, Result};
use crate::vector::Vector;

/// Type tag carried by the knn_param pointer value. Filter refuses any
/// pointer whose tag does not match.
pub(crate) const KNN_PARAM_TYPE: &CStr = c"vector_search_knn_param";

/// Heap-allocated parameter object produced by `knn_param()` and consumed by
/// the virtual table's Filter.
pub(crate) struct KnnParam {
    pub query_vector: Vector,
    pub k: u32,
}

/// Register both scalar functions with the connection.
pub fn register_all(db: &Connection) -> Result<()> {
    register_scalar(db, c"knn_search", knn_search_func)?;
    register_scalar(db, c"knn_param", knn_param_func)?;
    Ok(())
}

type ScalarFunc = unsafe extern "C" fn(*mut ffi::sqlite3_context, c_int, *mut *mut ffi::sqlite3_value);

fn register_scalar(db: &Connection, name: &CStr, x_func: ScalarFunc) -> Result<()> {
    let rc = unsafe {
        ffi::sqlite3_create_function_v2(
            db.handle(),
            name.as_ptr(),
            2,
            ffi::SQLITE_UTF8,
            ptr::null_mut(),
            Some(x_func),
            None,
            None,
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

/// Report a scalar-function error with an explicit byte length.
pub(crate) unsafe fn result_error(ctx: *mut ffi::sqlite3_context, msg: &str) {
    unsafe {
        ffi::sqlite3_result_error(ctx, msg.as_ptr() as *const c_char, msg.len() as c_int);
    }
}

/// Marker with an empty body; BestIndex recognizes it as the knn constraint.
pub(crate) unsafe extern "C" fn knn_search_func(
    _ctx: *mut ffi::sqlite3_context,
    _argc: c_int,
    _argv: *mut *mut ffi::sqlite3_value,
) {
}

unsafe extern "C" fn knn_param_destroy(param: *mut c_void) {
    if !param.is_null() {
        drop(unsafe { Box::from_raw(param as *mut KnnParam) });
    }
}

unsafe extern "C" fn knn_param_func(
    ctx: *mut ffi::sqlite3_context,
    argc: c_int,
    argv: *mut *mut ffi::sqlite3_value,
) {
    // Arity 2 is enforced at registration.
    let args = unsafe { std::slice::from_raw_parts(argv, argc as usize) };

    if unsafe { ffi::sqlite3_value_type(args[0]) } != ffi::SQLITE_BLOB {
        unsafe { result_error(ctx, "vector(1st param) should be of type Blob") };
        return;
    }
    if unsafe { ffi::sqlite3_value_type(args[1]) } != ffi::SQLITE_INTEGER {
        unsafe { result_error(ctx, "k(2nd param) should be of type INTEGER") };
        return;
    }

    let blob = unsafe {
        let len = ffi::sqlite3_value_bytes(args[0]) as usize;
        if len == 0 {
            &[]
        } else {
            std::slice::from_raw_parts(ffi::sqlite3_value_blob(args[0]) as *const u8, len)
        }
    };
    let query_vector = match Vector::from_blob(blob) {
        Ok(v) => v,
        Err(e) => {
            unsafe { result_error(ctx, &format!("Failed to parse vector due to: {e}")) };
            return;
        }
    };

    let k = unsafe { ffi::sqlite3_value_int64(args[1]) };
    if k <= 0 {
        unsafe { result_error(ctx, "k should be greater than 0") };
        return;
    }
    let Ok(k) = u32::try_from(k) else {
        unsafe { result_error(ctx, &format!("k {k} out of range")) };
        return;
    };

    let param = Box::new(KnnParam { query_vector, k });
    unsafe {
        ffi::sqlite3_result_pointer(
            ctx,
            Box::into_raw(param) as *mut c_void,
            KNN_PARAM_TYPE.as_ptr(),
            Some(knn_param_destroy),
        );
    }
}
