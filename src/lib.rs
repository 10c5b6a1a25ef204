pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod normalize;
pub mod orchestration;

pub use auth::{Actor, AuthProvider, Role, StaticTokenAuth};
pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    BankTransaction, Decimal, EntityType, PayoutSource, PostingState, ReconLink, ReconStatus,
    SettlementBatch, SettlementRow,
};
pub use error::AppError;
pub use ledger::{LedgerClient, LedgerError, MockLedger, SqliteLedger};
pub use orchestration::{BatchManager, PostingGate, ReconService};
