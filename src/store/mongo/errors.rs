//! The mongodb crate doesn't provide error code constants, so the one we
//! care about lives here.

use mongodb::error::{Error as DbError, ErrorKind, WriteFailure};

use crate::error::{Error, PersistenceError};

pub const DUPLICATE_KEY: i32 = 11000;

/// Return true if the given error is a duplicate key write error.
pub fn is_duplicate_key_error(err: &DbError) -> bool {
    if let ErrorKind::Write(WriteFailure::WriteError(ref e)) = *err.kind {
        return e.code == DUPLICATE_KEY;
    }
    false
}

/// Map a failed write: unique index violations become constraint errors,
/// anything else is passed through.
pub fn write_error(err: DbError, constraint: impl FnOnce() -> String) -> Error {
    if is_duplicate_key_error(&err) {
        PersistenceError::Constraint(constraint()).into()
    } else {
        err.into()
    }
}
