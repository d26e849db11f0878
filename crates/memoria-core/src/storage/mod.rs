//! Durable SQLite-backed tables: the pending-approval queue (§4.E) and the
//! identity-change log (§4.G). Both are row-granular — concurrent callers
//! serialize through SQLite's own locking, not an in-process mutex, so two
//! kernel instances pointed at the same file stay consistent.

pub mod identity;
pub mod pending;

pub use identity::{IdentityChangeRecord, IdentityChangeStore, IdentityStoreError};
pub use pending::{PendingQueueError, PendingQueueStore, PendingRecord};

use std::path::Path;

use rusqlite::Connection;

/// Opens a connection with the pragmas every durable table in this crate
/// wants: WAL for concurrent readers, a busy timeout instead of an
/// immediate `SQLITE_BUSY`, and foreign keys enforced.
pub(crate) fn open_connection(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}
