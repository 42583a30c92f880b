//! Quality review: quantity split validation, classification and valuation.
//!
//! Everything here is pure. The service wraps [`ReviewSubmission::check`] and
//! the resulting [`OrderReview`] in a single transaction with the status change.
use super::error::OrderError;
use super::order::{Order, OrderStatus, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(
    minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewType {
    #[n(0)]
    QualityCheck,
    #[n(1)]
    FinalReview,
}

impl ReviewType {
    /// Statuses in which a review of this type may be recorded.
    pub fn allowed_in(&self, status: OrderStatus) -> bool {
        match self {
            ReviewType::FinalReview => status == OrderStatus::InReview,
            ReviewType::QualityCheck => matches!(
                status,
                OrderStatus::Production | OrderStatus::ReadySend | OrderStatus::InReview
            ),
        }
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewResult {
    #[n(0)]
    Approved,
    #[n(1)]
    Partial,
    #[n(2)]
    Rejected,
}

impl ReviewResult {
    /// Order status a final review moves the order to.
    pub fn order_status(&self, approved_enters_payment: bool) -> OrderStatus {
        match self {
            ReviewResult::Approved if approved_enters_payment => OrderStatus::PaymentProcess,
            ReviewResult::Approved => OrderStatus::Finalized,
            ReviewResult::Partial => OrderStatus::PartiallyApproved,
            ReviewResult::Rejected => OrderStatus::Disapproved,
        }
    }
}

/// Order matters: a split with any second quality is never `Approved`, even
/// when nothing was rejected outright.
pub fn classify(approved: u64, rejected: u64, second_quality: u64) -> ReviewResult {
    if rejected == 0 && second_quality == 0 {
        ReviewResult::Approved
    } else if approved == 0 {
        ReviewResult::Rejected
    } else {
        ReviewResult::Partial
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityBucket {
    Rejected,
    SecondQuality,
}

impl fmt::Display for QuantityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QuantityBucket::Rejected => "rejected",
            QuantityBucket::SecondQuality => "second quality",
        })
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefectKind {
    #[n(0)]
    Sewing,
    #[n(1)]
    Fabric,
    #[n(2)]
    Measurement,
    #[n(3)]
    Stain,
    #[n(4)]
    Color,
    #[n(5)]
    Finishing,
    #[n(6)]
    Print,
    #[n(7)]
    Other,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct RejectedItem {
    #[n(0)]
    pub reason: DefectKind,
    #[n(1)]
    pub quantity: u64,
    #[n(2)]
    pub description: Option<String>,
    #[n(3)]
    pub rework_required: bool,
}

impl RejectedItem {
    pub fn new(reason: DefectKind, quantity: u64) -> Self {
        Self {
            reason,
            quantity,
            description: None,
            rework_required: true,
        }
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn set_rework_required(mut self, required: bool) -> Self {
        self.rework_required = required;
        self
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct SecondQualityItem {
    #[n(0)]
    pub quantity: u64,
    #[n(1)]
    pub defect: DefectKind,
    #[n(2)]
    pub description: Option<String>,
    #[n(3)]
    pub discount_percent: u8,
    #[n(4)]
    pub final_unit_value: u64, // derived from the order unit price at review time
}

impl SecondQualityItem {
    pub fn new(defect: DefectKind, quantity: u64, discount_percent: u8) -> Self {
        Self {
            quantity,
            defect,
            description: None,
            discount_percent,
            final_unit_value: 0,
        }
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Discounted unit value, rounded down to the minor unit.
    pub fn discounted(unit_price: u64, discount_percent: u8) -> u64 {
        let keep = 100u64.saturating_sub(u64::from(discount_percent));
        (u128::from(unit_price) * u128::from(keep) / 100) as u64
    }
}

// Review input as submitted by the reviewer; checked against the order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSubmission {
    pub review_type: ReviewType,
    pub approved: u64,
    pub rejected: u64,
    pub second_quality: u64,
    pub notes: Option<String>,
    pub rejected_items: Option<Vec<RejectedItem>>,
    pub second_quality_items: Option<Vec<SecondQualityItem>>,
}

impl ReviewSubmission {
    pub fn new(review_type: ReviewType) -> Self {
        Self {
            review_type,
            approved: 0,
            rejected: 0,
            second_quality: 0,
            notes: None,
            rejected_items: None,
            second_quality_items: None,
        }
    }
    pub fn final_review(approved: u64, rejected: u64, second_quality: u64) -> Self {
        Self::new(ReviewType::FinalReview).set_split(approved, rejected, second_quality)
    }
    pub fn quality_check(approved: u64, rejected: u64, second_quality: u64) -> Self {
        Self::new(ReviewType::QualityCheck).set_split(approved, rejected, second_quality)
    }
    pub fn set_split(mut self, approved: u64, rejected: u64, second_quality: u64) -> Self {
        self.approved = approved;
        self.rejected = rejected;
        self.second_quality = second_quality;
        self
    }
    pub fn set_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
    pub fn add_rejected_item(mut self, item: RejectedItem) -> Self {
        self.rejected_items.get_or_insert_with(Vec::new).push(item);
        self
    }
    pub fn add_second_quality_item(mut self, item: SecondQualityItem) -> Self {
        self.second_quality_items
            .get_or_insert_with(Vec::new)
            .push(item);
        self
    }

    fn total(&self) -> Option<u64> {
        self.approved
            .checked_add(self.rejected)?
            .checked_add(self.second_quality)
    }

    /// Validates the split against `order` without touching storage. The
    /// status precondition is checked by the caller inside its transaction.
    pub fn check(&self, order: &Order) -> Result<ReviewResult, OrderError> {
        let total = self.total().ok_or_else(|| {
            OrderError::InvalidInput("reviewed quantities overflow".into())
        })?;
        if total != order.quantity {
            return Err(OrderError::QuantityMismatch {
                expected: order.quantity,
                actual: total,
            });
        }

        if let Some(items) = &self.rejected_items {
            if items.iter().any(|i| i.quantity == 0) {
                return Err(OrderError::InvalidInput(
                    "rejected items must have a positive quantity".into(),
                ));
            }
            let sum = sum_quantities(items.iter().map(|i| i.quantity));
            if sum != self.rejected {
                return Err(OrderError::ItemQuantityMismatch {
                    bucket: QuantityBucket::Rejected,
                    expected: self.rejected,
                    actual: sum,
                });
            }
        }

        if let Some(items) = &self.second_quality_items {
            if items.iter().any(|i| i.quantity == 0) {
                return Err(OrderError::InvalidInput(
                    "second quality items must have a positive quantity".into(),
                ));
            }
            if let Some(item) = items.iter().find(|i| i.discount_percent > 100) {
                return Err(OrderError::InvalidInput(format!(
                    "discount of {}% exceeds 100%",
                    item.discount_percent
                )));
            }
            let sum = sum_quantities(items.iter().map(|i| i.quantity));
            if sum != self.second_quality {
                return Err(OrderError::ItemQuantityMismatch {
                    bucket: QuantityBucket::SecondQuality,
                    expected: self.second_quality,
                    actual: sum,
                });
            }
        }

        Ok(classify(self.approved, self.rejected, self.second_quality))
    }

    /// Builds the review row for an accepted submission.
    pub fn into_review(
        self,
        id: String,
        order: &Order,
        reviewer_id: String,
        result: ReviewResult,
        created_at: TimeStamp<Utc>,
    ) -> OrderReview {
        let second_quality_items = self
            .second_quality_items
            .unwrap_or_default()
            .into_iter()
            .map(|mut item| {
                item.final_unit_value =
                    SecondQualityItem::discounted(order.unit_price, item.discount_percent);
                item
            })
            .collect();

        OrderReview {
            id,
            order_id: order.id.clone(),
            review_type: self.review_type,
            total: order.quantity,
            approved: self.approved,
            rejected: self.rejected,
            second_quality: self.second_quality,
            notes: self.notes,
            reviewer_id,
            created_at,
            result,
            rejected_items: self.rejected_items.unwrap_or_default(),
            second_quality_items,
            child_order_id: None,
        }
    }
}

fn sum_quantities(quantities: impl Iterator<Item = u64>) -> u64 {
    quantities.fold(0u64, |acc, q| acc.saturating_add(q))
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct OrderReview {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub order_id: String,
    #[n(2)]
    pub review_type: ReviewType,
    #[n(3)]
    pub total: u64,
    #[n(4)]
    pub approved: u64,
    #[n(5)]
    pub rejected: u64,
    #[n(6)]
    pub second_quality: u64,
    #[n(7)]
    pub notes: Option<String>,
    #[n(8)]
    pub reviewer_id: String,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub result: ReviewResult,
    #[n(11)]
    pub rejected_items: Vec<RejectedItem>,
    #[n(12)]
    pub second_quality_items: Vec<SecondQualityItem>,
    #[n(13)]
    pub child_order_id: Option<String>,
}

/// Monetary view of a review at the order's unit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewValuation {
    pub approved_value: u64,
    pub second_quality_value: u64,
    pub rejected_value: u64,
}

impl ReviewValuation {
    pub fn payable(&self) -> u64 {
        self.approved_value.saturating_add(self.second_quality_value)
    }
}

impl OrderReview {
    /// Second-quality units without itemised discounts are valued at full price.
    pub fn valuation(&self, unit_price: u64) -> ReviewValuation {
        let itemised: u64 = self.second_quality_items.iter().map(|i| i.quantity).sum();
        let itemised_value: u64 = self
            .second_quality_items
            .iter()
            .map(|i| i.quantity.saturating_mul(i.final_unit_value))
            .sum();
        let unpriced = self.second_quality.saturating_sub(itemised);

        ReviewValuation {
            approved_value: self.approved.saturating_mul(unit_price),
            second_quality_value: itemised_value
                .saturating_add(unpriced.saturating_mul(unit_price)),
            rejected_value: self.rejected.saturating_mul(unit_price),
        }
    }

    pub fn can_spawn_rework(&self) -> bool {
        self.rejected > 0 && self.child_order_id.is_none()
    }
}
