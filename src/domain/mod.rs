//! Domain types for settlement ingestion, matching and posting.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Settlement events, batches and normalized rows
//! - Bank credits, payout views and recon links
//! - Posting preview lines and journal references
//! - Raw payload narrowing

pub mod bank;
pub mod decimal;
pub mod fields;
pub mod journal;
pub mod payload;
pub mod payout;
pub mod recon;
pub mod settlement;

pub use bank::{BankTransaction, NewBankTransaction};
pub use decimal::Decimal;
pub use fields::CanonicalField;
pub use journal::{JournalLine, JournalRef, JournalRequest, LedgerAccount, PostingRole, PreviewLine};
pub use payload::document_text;
pub use payout::{EntityType, PayoutEvent, PayoutSource};
pub use recon::{MatchCandidate, MatchReason, NewReconLink, ReconLink, ReconStatus};
pub use settlement::{
    EventType, KeyedSettlementRow, NewSettlementBatch, NewSettlementEvent, PostingState,
    SettlementBatch, SettlementEvent, SettlementRow, UpsertResult,
};
