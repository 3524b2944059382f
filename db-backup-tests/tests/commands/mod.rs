//! Orchestrator scenarios for db-backup
//!
//! These tests run whole backup jobs against fake sources and backends.

mod cancellation;
mod failures;
mod restore;
mod validate;
