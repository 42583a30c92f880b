//! Core order entity, statuses and actor roles
use super::error::OrderError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fmt;

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[n(0)]
    New,
    #[n(1)]
    Negotiating,
    #[n(2)]
    Accepted,
    #[n(3)]
    PreparingBrand,
    #[n(4)]
    TransitToSupplier,
    #[n(5)]
    ReceivedSupplier,
    #[n(6)]
    ProductionQueue,
    #[n(7)]
    Production,
    #[n(8)]
    ReadySend,
    #[n(9)]
    TransitToBrand,
    #[n(10)]
    InReview,
    #[n(11)]
    PartiallyApproved,
    #[n(12)]
    Disapproved,
    #[n(13)]
    AwaitingRework,
    #[n(14)]
    PaymentProcess,
    #[n(15)]
    Finalized,
    #[n(16)]
    Cancelled,
    #[n(17)]
    Rejected,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 18] = [
        OrderStatus::New,
        OrderStatus::Negotiating,
        OrderStatus::Accepted,
        OrderStatus::PreparingBrand,
        OrderStatus::TransitToSupplier,
        OrderStatus::ReceivedSupplier,
        OrderStatus::ProductionQueue,
        OrderStatus::Production,
        OrderStatus::ReadySend,
        OrderStatus::TransitToBrand,
        OrderStatus::InReview,
        OrderStatus::PartiallyApproved,
        OrderStatus::Disapproved,
        OrderStatus::AwaitingRework,
        OrderStatus::PaymentProcess,
        OrderStatus::Finalized,
        OrderStatus::Cancelled,
        OrderStatus::Rejected,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Finalized | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Negotiating => "NEGOTIATING",
            OrderStatus::Accepted => "ACCEPTED",
            OrderStatus::PreparingBrand => "PREPARING_BRAND",
            OrderStatus::TransitToSupplier => "TRANSIT_TO_SUPPLIER",
            OrderStatus::ReceivedSupplier => "RECEIVED_SUPPLIER",
            OrderStatus::ProductionQueue => "PRODUCTION_QUEUE",
            OrderStatus::Production => "PRODUCTION",
            OrderStatus::ReadySend => "READY_SEND",
            OrderStatus::TransitToBrand => "TRANSIT_TO_BRAND",
            OrderStatus::InReview => "IN_REVIEW",
            OrderStatus::PartiallyApproved => "PARTIALLY_APPROVED",
            OrderStatus::Disapproved => "DISAPPROVED",
            OrderStatus::AwaitingRework => "AWAITING_REWORK",
            OrderStatus::PaymentProcess => "PAYMENT_PROCESS",
            OrderStatus::Finalized => "FINALIZED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    serde::Serialize,
    serde::Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorRole {
    #[n(0)]
    Brand,
    #[n(1)]
    Supplier,
    #[n(2)]
    Admin,
}

impl ActorRole {
    pub const ALL: [ActorRole; 3] = [ActorRole::Brand, ActorRole::Supplier, ActorRole::Admin];
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            ActorRole::Brand => "BRAND",
            ActorRole::Supplier => "SUPPLIER",
            ActorRole::Admin => "ADMIN",
        })
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    #[n(0)]
    Original,
    #[n(1)]
    Rework,
}

/// Identity resolved upstream. The engine trusts it as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: ActorRole,
    pub brand_id: Option<String>,
    pub supplier_id: Option<String>,
}

impl Actor {
    pub fn brand(id: impl Into<String>, brand_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Brand,
            brand_id: Some(brand_id.into()),
            supplier_id: None,
        }
    }
    pub fn supplier(id: impl Into<String>, supplier_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Supplier,
            brand_id: None,
            supplier_id: Some(supplier_id.into()),
        }
    }
    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: ActorRole::Admin,
            brand_id: None,
            supplier_id: None,
        }
    }

    /// Checks the actor belongs to the party the order names for its role.
    /// Actors without a party reference (and admins) are not restricted.
    pub fn acts_for(&self, order: &Order) -> bool {
        match self.role {
            ActorRole::Admin => true,
            ActorRole::Brand => self
                .brand_id
                .as_ref()
                .is_none_or(|brand| *brand == order.brand_id),
            ActorRole::Supplier => match (&self.supplier_id, &order.supplier_id) {
                (Some(mine), Some(assigned)) => mine == assigned,
                _ => true,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// Compared by instant; the zone types themselves have no ordering.
impl<T: TimeZone> PartialEq for TimeStamp<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: TimeZone> Eq for TimeStamp<T> {}

impl<T: TimeZone> PartialOrd for TimeStamp<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: TimeZone> Ord for TimeStamp<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn days_from_now(days: i64) -> Self {
        Self(Utc::now() + Duration::days(days))
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Running review totals. Only ever incremented inside a review commit.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReviewTally {
    #[n(0)]
    pub reviews: u32,
    #[n(1)]
    pub reviewed: u64,
    #[n(2)]
    pub approved: u64,
    #[n(3)]
    pub rejected: u64,
    #[n(4)]
    pub second_quality: u64,
}

impl ReviewTally {
    pub fn record(&mut self, approved: u64, rejected: u64, second_quality: u64) {
        self.reviews += 1;
        self.reviewed += approved + rejected + second_quality;
        self.approved += approved;
        self.rejected += rejected;
        self.second_quality += second_quality;
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Order {
    #[n(0)]
    pub id: String, // bech32 encoded uuid7
    #[n(1)]
    pub display_id: String,
    #[n(2)]
    pub brand_id: String,
    #[n(3)]
    pub supplier_id: Option<String>,
    #[n(4)]
    pub product_type: String,
    #[n(5)]
    pub description: Option<String>,
    #[n(6)]
    pub status: OrderStatus,
    #[n(7)]
    pub parent_id: Option<String>,
    #[n(8)]
    pub revision: u32,
    #[n(9)]
    pub origin: Origin,
    #[n(10)]
    pub quantity: u64,
    #[n(11)]
    pub unit_price: u64, // minor currency units
    #[n(12)]
    pub materials_provided: bool,
    #[n(13)]
    pub tally: ReviewTally,
    #[n(14)]
    pub rework_spawned: u32,
    #[n(15)]
    pub open_reworks: u32,
    #[n(16)]
    pub created_at: TimeStamp<Utc>,
    #[n(17)]
    pub accepted_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub updated_at: TimeStamp<Utc>,
    #[n(19)]
    pub delivery_deadline: Option<TimeStamp<Utc>>,
    #[n(20)]
    pub version: u64,
    #[n(21)]
    pub history_len: u32,
    #[n(22)]
    pub history_head: Option<String>, // digest of the newest history entry
}

impl Order {
    pub fn total_value(&self) -> u64 {
        self.quantity.saturating_mul(self.unit_price)
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// No parent and never spawned rework, so hierarchy lookups can stop here.
    pub fn has_relatives(&self) -> bool {
        self.parent_id.is_some() || self.rework_spawned > 0
    }
}

// Builder for new orders, validated before anything is written.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    brand_id: Option<String>,
    supplier_id: Option<String>,
    product_type: Option<String>,
    description: Option<String>,
    quantity: u64,
    unit_price: u64,
    materials_provided: bool,
    delivery_deadline: Option<TimeStamp<Utc>>,
}

impl OrderDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_brand(mut self, brand_id: impl Into<String>) -> Self {
        self.brand_id = Some(brand_id.into());
        self
    }
    pub fn set_supplier(mut self, supplier_id: impl Into<String>) -> Self {
        self.supplier_id = Some(supplier_id.into());
        self
    }
    pub fn set_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn set_quantity(mut self, quantity: u64) -> Self {
        self.quantity = quantity;
        self
    }
    pub fn set_unit_price(mut self, unit_price: u64) -> Self {
        self.unit_price = unit_price;
        self
    }
    pub fn set_materials_provided(mut self, provided: bool) -> Self {
        self.materials_provided = provided;
        self
    }
    pub fn set_delivery_deadline(mut self, deadline: TimeStamp<Utc>) -> Self {
        self.delivery_deadline = Some(deadline);
        self
    }

    pub fn brand_id(&self) -> Option<&str> {
        self.brand_id.as_deref()
    }

    /// Checks required fields and that the deadline is not already behind `now`.
    pub fn validate(&self, now: &TimeStamp<Utc>) -> Result<(), OrderError> {
        if self.brand_id.as_deref().is_none_or(str::is_empty) {
            return Err(OrderError::InvalidInput("brand is not set".into()));
        }
        if self
            .product_type
            .as_deref()
            .is_none_or(|p| p.trim().is_empty())
        {
            return Err(OrderError::InvalidInput("product type is not set".into()));
        }
        if self.quantity == 0 {
            return Err(OrderError::InvalidInput("quantity is set to zero".into()));
        }
        if self.unit_price == 0 {
            return Err(OrderError::InvalidInput("unit price is set to zero".into()));
        }
        if let Some(deadline) = &self.delivery_deadline {
            if deadline < now {
                return Err(OrderError::InvalidInput(
                    "delivery deadline is in the past".into(),
                ));
            }
        }
        Ok(())
    }

    /// Produces the order row for a validated draft. Status starts at `NEW`.
    pub fn into_order(self, id: String, display_id: String, now: TimeStamp<Utc>) -> Order {
        Order {
            id,
            display_id,
            brand_id: self.brand_id.unwrap_or_default(),
            supplier_id: self.supplier_id,
            product_type: self.product_type.unwrap_or_default(),
            description: self.description,
            status: OrderStatus::New,
            parent_id: None,
            revision: 0,
            origin: Origin::Original,
            quantity: self.quantity,
            unit_price: self.unit_price,
            materials_provided: self.materials_provided,
            tally: ReviewTally::default(),
            rework_spawned: 0,
            open_reworks: 0,
            created_at: now.clone(),
            accepted_at: None,
            updated_at: now,
            delivery_deadline: self.delivery_deadline,
            version: 0,
            history_len: 0,
            history_head: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> OrderDraft {
        OrderDraft::new()
            .set_brand("brand_a")
            .set_product_type("t-shirt")
            .set_quantity(100)
            .set_unit_price(1_250)
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new();

        let encoding = minicbor::to_vec(original.clone()).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn order_row_survives_cbor() {
        let order = draft()
            .set_supplier("supplier_b")
            .set_delivery_deadline(TimeStamp::days_from_now(30))
            .into_order("order_x".into(), "TX-20240101-0001".into(), TimeStamp::new());

        let encoded = minicbor::to_vec(&order).unwrap();
        let decoded: Order = minicbor::decode(&encoded).unwrap();

        assert_eq!(order, decoded);
        assert_eq!(decoded.total_value(), 125_000);
        assert!(!decoded.has_relatives());
    }

    #[test]
    fn draft_validation_rejects_missing_fields() {
        let now = TimeStamp::new();
        assert!(draft().validate(&now).is_ok());
        assert!(draft().set_quantity(0).validate(&now).is_err());
        assert!(draft().set_unit_price(0).validate(&now).is_err());
        assert!(OrderDraft::new().set_quantity(5).validate(&now).is_err());

        let past = TimeStamp::new_with(2020, 1, 1, 0, 0, 0).unwrap();
        assert!(draft().set_delivery_deadline(past).validate(&now).is_err());
    }

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = OrderStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                &OrderStatus::Finalized,
                &OrderStatus::Cancelled,
                &OrderStatus::Rejected
            ]
        );
    }

    #[test]
    fn actor_party_checks() {
        let order = draft().into_order("order_x".into(), "TX".into(), TimeStamp::new());

        assert!(Actor::brand("u1", "brand_a").acts_for(&order));
        assert!(!Actor::brand("u1", "brand_other").acts_for(&order));
        // no supplier assigned yet
        assert!(Actor::supplier("u2", "supplier_b").acts_for(&order));
        assert!(Actor::admin("root").acts_for(&order));
    }
}
