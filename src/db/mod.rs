//! Database module for SQLite operations.
//!
//! This module provides:
//! - Database initialization and migrations
//! - SQLite pragma configuration
//! - The persistence capabilities the core depends on, and their SQLite repository

pub mod migrations;
pub mod repo;
pub mod store;

pub use migrations::init_db;
pub use repo::Repository;
pub use store::{AtomicStateTransition, ClaimOutcome, ReconStore, SettlementStore, StoreError};
