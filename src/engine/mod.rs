//! Pure computation engines: posting previews and match scoring.

pub mod matcher;
pub mod posting;

pub use matcher::{MatchSettings, MAX_CANDIDATES_CAP};
pub use posting::{build_preview, AccountMap, BatchTotals, PostingPreview};
