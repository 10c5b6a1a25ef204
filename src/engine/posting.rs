//! Posting preview: the balanced journal a settlement batch would produce.
//!
//! Pure computation over a batch's rows and the configured role-to-account map. The preview
//! never drops a line: a role without a mapped account keeps `account_id = None` and carries
//! a warning, and posting refuses such a preview.

use crate::domain::{
    Decimal, JournalLine, JournalRequest, LedgerAccount, PostingRole, PreviewLine,
    SettlementBatch, SettlementRow,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Ledger account for each posting role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountMap {
    accounts: BTreeMap<PostingRole, LedgerAccount>,
}

impl AccountMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, role: PostingRole, account: LedgerAccount) {
        self.accounts.insert(role, account);
    }

    pub fn with(mut self, role: PostingRole, account_id: i64, account_name: &str) -> Self {
        self.insert(
            role,
            LedgerAccount {
                account_id,
                account_name: account_name.to_string(),
            },
        );
        self
    }

    pub fn resolve(&self, role: PostingRole) -> Option<&LedgerAccount> {
        self.accounts.get(&role)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &LedgerAccount> {
        self.accounts.values()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Column sums over a batch's rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTotals {
    pub gross_sales: Decimal,
    pub net_payout: Decimal,
    pub shipping_fee: Decimal,
    pub commission_fee: Decimal,
    pub fixed_fee: Decimal,
    pub closing_fee: Decimal,
    pub total_fees: Decimal,
    pub refund_amount: Decimal,
    pub other_charges: Decimal,
}

impl BatchTotals {
    /// Fees reported only as a total, beyond the itemized fee columns.
    pub fn unitemized_fees(&self) -> Decimal {
        let itemized = self.itemized_fees();
        let total = self.total_fees.abs();
        if total > itemized {
            total - itemized
        } else {
            Decimal::zero()
        }
    }

    fn itemized_fees(&self) -> Decimal {
        self.commission_fee.abs()
            + self.shipping_fee.abs()
            + self.fixed_fee.abs()
            + self.closing_fee.abs()
    }
}

pub fn batch_totals(rows: &[SettlementRow]) -> BatchTotals {
    let sum = |f: fn(&SettlementRow) -> Option<Decimal>| -> Decimal {
        rows.iter().filter_map(f).sum()
    };
    BatchTotals {
        gross_sales: sum(|r| r.gross_sales),
        net_payout: sum(|r| r.net_payout),
        shipping_fee: sum(|r| r.shipping_fee),
        commission_fee: sum(|r| r.commission_fee),
        fixed_fee: sum(|r| r.fixed_fee),
        closing_fee: sum(|r| r.closing_fee),
        total_fees: sum(|r| r.total_fees),
        refund_amount: sum(|r| r.refund_amount),
        other_charges: sum(|r| r.other_charges),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostingPreview {
    pub batch_id: i64,
    pub lines: Vec<PreviewLine>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub totals: BatchTotals,
}

impl PostingPreview {
    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }

    /// Nothing to post when every line is zero.
    pub fn is_zero(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn unresolved_roles(&self) -> Vec<PostingRole> {
        self.lines
            .iter()
            .filter(|l| !l.is_resolved())
            .map(|l| l.role)
            .collect()
    }
}

/// Signed amounts per role, debit positive.
fn signed_amounts(t: &BatchTotals) -> Vec<(PostingRole, Decimal)> {
    let other_fees = t.unitemized_fees();
    let revenue = if t.gross_sales.is_zero() {
        t.net_payout
            + t.itemized_fees()
            + other_fees
            + t.refund_amount.abs()
            + t.other_charges.abs()
    } else {
        t.gross_sales.abs()
    };

    vec![
        (PostingRole::SettlementClearing, t.net_payout),
        (PostingRole::CommissionExpense, t.commission_fee.abs()),
        (PostingRole::ShippingExpense, t.shipping_fee.abs()),
        (PostingRole::FixedFeeExpense, t.fixed_fee.abs()),
        (PostingRole::ClosingFeeExpense, t.closing_fee.abs()),
        (PostingRole::OtherFeeExpense, other_fees),
        (PostingRole::OtherCharges, t.other_charges.abs()),
        (PostingRole::SalesReturns, t.refund_amount.abs()),
        (PostingRole::SalesRevenue, -revenue),
    ]
}

fn preview_line(role: PostingRole, signed: Decimal, accounts: &AccountMap) -> PreviewLine {
    let (debit, credit) = if signed.is_negative() {
        (Decimal::zero(), signed.abs())
    } else {
        (signed, Decimal::zero())
    };

    let account = accounts.resolve(role);
    let warnings = if account.is_none() {
        vec![format!("No ledger account mapped for role {}", role)]
    } else {
        Vec::new()
    };

    PreviewLine {
        role,
        account_id: account.map(|a| a.account_id),
        account_name: account.map(|a| a.account_name.clone()),
        debit,
        credit,
        warnings,
    }
}

/// Build the balanced preview for a batch.
///
/// Amounts are rounded to minor units per line; any residue between the reported gross and
/// the itemized breakdown lands on a `settlement_difference` line so the preview balances.
pub fn build_preview(
    batch: &SettlementBatch,
    rows: &[SettlementRow],
    accounts: &AccountMap,
) -> PostingPreview {
    let totals = batch_totals(rows);

    let mut lines: Vec<PreviewLine> = signed_amounts(&totals)
        .into_iter()
        .map(|(role, amount)| (role, amount.round_money()))
        .filter(|(_, amount)| !amount.is_zero())
        .map(|(role, amount)| preview_line(role, amount, accounts))
        .collect();

    let debit: Decimal = lines.iter().map(|l| l.debit).sum();
    let credit: Decimal = lines.iter().map(|l| l.credit).sum();
    let residue = debit - credit;
    if !residue.is_zero() {
        // A debit surplus is balanced by a credit and vice versa.
        let mut line = preview_line(PostingRole::SettlementDifference, -residue, accounts);
        line.warnings.push(format!(
            "Settlement rows do not reconcile: {} posted as a difference",
            residue.abs()
        ));
        lines.push(line);
    }

    let total_debit: Decimal = lines.iter().map(|l| l.debit).sum();
    let total_credit: Decimal = lines.iter().map(|l| l.credit).sum();

    PostingPreview {
        batch_id: batch.id,
        lines,
        total_debit,
        total_credit,
        totals,
    }
}

/// Idempotency key the ledger deduplicates journals on.
pub fn source_ref(batch_id: i64) -> String {
    format!("settlement_batch:{}", batch_id)
}

/// Journal request for a fully resolved preview; `None` while any role is unmapped.
pub fn journal_request(
    batch: &SettlementBatch,
    preview: &PostingPreview,
    created_by: &str,
) -> Option<JournalRequest> {
    let lines = preview
        .lines
        .iter()
        .map(|l| {
            l.account_id.map(|account_id| JournalLine {
                account_id,
                debit: l.debit,
                credit: l.credit,
            })
        })
        .collect::<Option<Vec<_>>>()?;

    let reference = batch
        .batch_ref
        .clone()
        .unwrap_or_else(|| format!("#{}", batch.id));

    Some(JournalRequest {
        source_ref: source_ref(batch.id),
        memo: format!("{} settlement {}", batch.platform, reference),
        created_by: created_by.to_string(),
        lines,
    })
}
