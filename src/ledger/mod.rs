//! Ledger collaborator: the general ledger the posting gate writes journals into.

use crate::domain::{Decimal, JournalRef, JournalRequest};
use async_trait::async_trait;
use thiserror::Error;

pub mod mock;
pub mod sqlite;

pub use mock::MockLedger;
pub use sqlite::SqliteLedger;

/// General ledger operations the core relies on.
///
/// The ledger is authoritative for account existence and balancing. `create_journal` must be
/// idempotent per `JournalRequest::source_ref`: a repeated request returns the journal created
/// by the first one.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn create_journal(&self, request: &JournalRequest) -> Result<JournalRef, LedgerError>;

    async fn get_journal(&self, journal_id: i64) -> Result<Option<JournalRef>, LedgerError>;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// A ledger business rule refused the journal, e.g. an unknown account.
    #[error("Journal rejected: {0}")]
    Rejected(String),
    #[error("Journal does not balance: debit {debit}, credit {credit}")]
    Unbalanced { debit: Decimal, credit: Decimal },
    /// The ledger could not be reached or failed internally.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Whether the journal itself was refused, as opposed to the ledger failing.
    pub fn is_business_rule(&self) -> bool {
        matches!(self, LedgerError::Rejected(_) | LedgerError::Unbalanced { .. })
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Unavailable(err.to_string())
    }
}

/// Check the request before it reaches storage.
pub(crate) fn validate_request(request: &JournalRequest) -> Result<(), LedgerError> {
    if request.lines.is_empty() {
        return Err(LedgerError::Rejected("journal has no lines".to_string()));
    }
    if request.source_ref.trim().is_empty() {
        return Err(LedgerError::Rejected("journal has no source reference".to_string()));
    }
    if let Some(line) = request
        .lines
        .iter()
        .find(|l| l.debit.is_negative() || l.credit.is_negative())
    {
        return Err(LedgerError::Rejected(format!(
            "negative amount on account {}",
            line.account_id
        )));
    }

    let debit: Decimal = request.lines.iter().map(|l| l.debit).sum();
    let credit: Decimal = request.lines.iter().map(|l| l.credit).sum();
    if debit != credit {
        return Err(LedgerError::Unbalanced { debit, credit });
    }
    Ok(())
}
