//! Amount/date scoring of payout and bank credit candidates.

use crate::domain::{
    BankTransaction, Decimal, EntityType, MatchCandidate, MatchReason, PayoutEvent,
};
use chrono::{Days, NaiveDate};

/// Upper bound on candidates returned by any lookup.
pub const MAX_CANDIDATES_CAP: usize = 25;

/// Search windows and result size for candidate lookups.
///
/// Bank credits lag payouts more than the reverse, so the bank-anchored window is wider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSettings {
    pub bank_window_days: i64,
    pub payout_window_days: i64,
    pub max_candidates: usize,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            bank_window_days: 5,
            payout_window_days: 3,
            max_candidates: MAX_CANDIDATES_CAP,
        }
    }
}

impl MatchSettings {
    fn limit(&self) -> usize {
        self.max_candidates.clamp(1, MAX_CANDIDATES_CAP)
    }
}

/// Inclusive `[anchor - days, anchor + days]`, saturating at the calendar bounds.
pub fn date_window(anchor: NaiveDate, days: i64) -> (NaiveDate, NaiveDate) {
    let span = Days::new(days.max(0) as u64);
    (
        anchor.checked_sub_days(span).unwrap_or(NaiveDate::MIN),
        anchor.checked_add_days(span).unwrap_or(NaiveDate::MAX),
    )
}

/// `max(0, 100 - round(|diff|))`.
pub fn amount_score(anchor: Decimal, candidate: Decimal) -> u32 {
    let diff = (anchor - candidate).abs();
    match diff.round_to_i64() {
        Some(d) if d < 100 => (100 - d) as u32,
        _ => 0,
    }
}

pub fn match_reason(anchor: Decimal, candidate: Decimal) -> MatchReason {
    if (anchor - candidate).abs() <= Decimal::from(1_i64) {
        MatchReason::AmountMatch
    } else {
        MatchReason::NearAmountMatch
    }
}

/// Unknown currency on either side never excludes a candidate.
pub fn currencies_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => true,
    }
}

fn day_distance(a: NaiveDate, b: Option<NaiveDate>) -> i64 {
    b.map(|b| (a - b).num_days().abs()).unwrap_or(i64::MAX)
}

/// Order by score desc, then date distance asc, then entity id asc, and cap.
fn rank(mut scored: Vec<(MatchCandidate, i64)>, limit: usize) -> Vec<MatchCandidate> {
    scored.sort_by(|(a, da), (b, db)| {
        b.score
            .cmp(&a.score)
            .then(da.cmp(db))
            .then(a.entity_id.cmp(&b.entity_id))
    });
    scored.truncate(limit);
    scored.into_iter().map(|(c, _)| c).collect()
}

/// Score payouts against one bank credit.
pub fn rank_payouts(
    bank_txn: &BankTransaction,
    payouts: &[PayoutEvent],
    settings: &MatchSettings,
) -> Vec<MatchCandidate> {
    let anchor = bank_txn.anchor_date();
    let scored = payouts
        .iter()
        .filter(|p| currencies_compatible(bank_txn.currency.as_deref(), p.currency.as_deref()))
        .map(|p| {
            (
                MatchCandidate {
                    entity_type: p.entity_type,
                    entity_id: p.entity_id,
                    score: amount_score(bank_txn.credit, p.amount),
                    reason: match_reason(bank_txn.credit, p.amount),
                },
                day_distance(anchor, p.payout_date),
            )
        })
        .collect();
    rank(scored, settings.limit())
}

/// Score bank credits against one payout.
pub fn rank_bank_credits(
    payout: &PayoutEvent,
    bank_txns: &[BankTransaction],
    settings: &MatchSettings,
) -> Vec<MatchCandidate> {
    let scored = bank_txns
        .iter()
        .filter(|t| currencies_compatible(payout.currency.as_deref(), t.currency.as_deref()))
        .map(|t| {
            let distance = payout
                .payout_date
                .map(|d| day_distance(d, Some(t.anchor_date())))
                .unwrap_or(i64::MAX);
            (
                MatchCandidate {
                    entity_type: EntityType::BankTransaction,
                    entity_id: t.id,
                    score: amount_score(payout.amount, t.credit),
                    reason: match_reason(payout.amount, t.credit),
                },
                distance,
            )
        })
        .collect();
    rank(scored, settings.limit())
}
