// db/test_support.rs
// Shared fixture for sync DB unit tests.

use rusqlite::Connection;

/// Open an in-memory connection with the full schema applied.
pub fn setup_test_connection() -> Connection {
    super::pool::ensure_sqlite_vec_registered();
    let conn = Connection::open_in_memory().expect("in-memory db");
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    super::schema::run_all_migrations(&conn).expect("migrations");
    conn
}
