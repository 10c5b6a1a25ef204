//! In-memory ledger for testing without a real general ledger.

use super::{validate_request, LedgerClient, LedgerError};
use crate::domain::{JournalRef, JournalRequest};
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockState {
    journals: Vec<(JournalRequest, JournalRef)>,
    failure: Option<LedgerError>,
    create_calls: usize,
}

/// Mock ledger that records journals in memory.
///
/// Idempotent per source reference like a real ledger. A configured failure is returned by
/// every `create_journal` call until cleared.
#[derive(Debug, Default)]
pub struct MockLedger {
    state: Mutex<MockState>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every create with `error`.
    pub fn with_failure(self, error: LedgerError) -> Self {
        self.set_failure(Some(error));
        self
    }

    pub fn set_failure(&self, error: Option<LedgerError>) {
        self.lock().failure = error;
    }

    /// Number of `create_journal` calls, including failed and repeated ones.
    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    /// Distinct journals created so far.
    pub fn journals(&self) -> Vec<(JournalRequest, JournalRef)> {
        self.lock().journals.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn create_journal(&self, request: &JournalRequest) -> Result<JournalRef, LedgerError> {
        let mut state = self.lock();
        state.create_calls += 1;

        if let Some(error) = state.failure.clone() {
            return Err(error);
        }
        validate_request(request)?;

        if let Some((_, existing)) = state
            .journals
            .iter()
            .find(|(r, _)| r.source_ref == request.source_ref)
        {
            return Ok(existing.clone());
        }

        let id = state.journals.len() as i64 + 1;
        let journal = JournalRef {
            id,
            doc_no: format!("MOCK-{:04}", id),
        };
        state.journals.push((request.clone(), journal.clone()));
        Ok(journal)
    }

    async fn get_journal(&self, journal_id: i64) -> Result<Option<JournalRef>, LedgerError> {
        Ok(self
            .lock()
            .journals
            .iter()
            .find(|(_, j)| j.id == journal_id)
            .map(|(_, j)| j.clone()))
    }
}
