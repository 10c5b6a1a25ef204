//! Canonical settlement fields recognised in report headers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of canonical fields a settlement column can map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    TxnDate,
    OrderId,
    SubOrderId,
    Sku,
    Qty,
    GrossSales,
    NetPayout,
    ShippingFee,
    CommissionFee,
    FixedFee,
    ClosingFee,
    TotalFees,
    RefundAmount,
    OtherCharges,
    SettlementType,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 15] = [
        CanonicalField::TxnDate,
        CanonicalField::OrderId,
        CanonicalField::SubOrderId,
        CanonicalField::Sku,
        CanonicalField::Qty,
        CanonicalField::GrossSales,
        CanonicalField::NetPayout,
        CanonicalField::ShippingFee,
        CanonicalField::CommissionFee,
        CanonicalField::FixedFee,
        CanonicalField::ClosingFee,
        CanonicalField::TotalFees,
        CanonicalField::RefundAmount,
        CanonicalField::OtherCharges,
        CanonicalField::SettlementType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::TxnDate => "txn_date",
            CanonicalField::OrderId => "order_id",
            CanonicalField::SubOrderId => "sub_order_id",
            CanonicalField::Sku => "sku",
            CanonicalField::Qty => "qty",
            CanonicalField::GrossSales => "gross_sales",
            CanonicalField::NetPayout => "net_payout",
            CanonicalField::ShippingFee => "shipping_fee",
            CanonicalField::CommissionFee => "commission_fee",
            CanonicalField::FixedFee => "fixed_fee",
            CanonicalField::ClosingFee => "closing_fee",
            CanonicalField::TotalFees => "total_fees",
            CanonicalField::RefundAmount => "refund_amount",
            CanonicalField::OtherCharges => "other_charges",
            CanonicalField::SettlementType => "settlement_type",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
