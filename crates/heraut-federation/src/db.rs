use heraut_store::{Database, SharedDatabase};

use crate::error::{FederationError, Result};

/// Run one short store call against the shared handle.
pub(crate) fn with_db<T>(
    db: &SharedDatabase,
    f: impl FnOnce(&mut Database) -> heraut_store::Result<T>,
) -> Result<T> {
    let mut guard = db.lock().map_err(|_| FederationError::LockPoisoned)?;
    f(&mut guard).map_err(FederationError::from)
}
