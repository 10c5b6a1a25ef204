//! Services tying extraction, persistence, the ledger and matching together.

pub mod batches;
pub mod matching;
pub mod posting;

pub use batches::{BatchManager, IngestError, IngestOutcome};
pub use matching::{
    BankCandidates, ConfirmOutcome, MatchError, MatchRequest, PayoutCandidates, ReconService,
    SourceCandidates,
};
pub use posting::{PostOutcome, PostingError, PostingGate};
