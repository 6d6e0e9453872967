//! Testing utilities for rung.
//!
//! Following sqlx's testing philosophy, migration behavior is tested against
//! a real PostgreSQL server. Pure logic (file discovery, ledger
//! reconciliation, statement splitting) is tested without one.

pub mod db;

pub use db::{IsolatedTestDb, TestDatabase, TEST_DATABASE_URL};
