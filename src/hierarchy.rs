//! Rework requests and the parent/child order tree.
use crate::order::{Order, OrderStatus, Origin, ReviewTally, TimeStamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Where a freshly spawned rework order starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReworkStart {
    /// Wait for the supplier to pick the rework up.
    #[default]
    AwaitingRework,
    /// Queue for production immediately.
    ProductionQueue,
}

impl ReworkStart {
    pub fn status(&self) -> OrderStatus {
        match self {
            ReworkStart::AwaitingRework => OrderStatus::AwaitingRework,
            ReworkStart::ProductionQueue => OrderStatus::ProductionQueue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReworkRequest {
    pub quantity: u64,
    /// Review whose rejected quantity is reworked; the newest eligible one when unset.
    pub review_id: Option<String>,
    pub description: Option<String>,
    pub delivery_deadline: Option<TimeStamp<Utc>>,
    pub start: Option<ReworkStart>,
}

impl ReworkRequest {
    pub fn new(quantity: u64) -> Self {
        Self {
            quantity,
            review_id: None,
            description: None,
            delivery_deadline: None,
            start: None,
        }
    }
    pub fn for_review(mut self, review_id: impl Into<String>) -> Self {
        self.review_id = Some(review_id.into());
        self
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn set_delivery_deadline(mut self, deadline: TimeStamp<Utc>) -> Self {
        self.delivery_deadline = Some(deadline);
        self
    }
    pub fn start_at(mut self, start: ReworkStart) -> Self {
        self.start = Some(start);
        self
    }
}

/// Builds the rework order for `parent`. Parties, product, materials flag,
/// price and acceptance carry over; quantity and deadline come from the request.
pub fn rework_child(
    parent: &Order,
    id: String,
    display_id: String,
    request: &ReworkRequest,
    status: OrderStatus,
    now: TimeStamp<Utc>,
) -> Order {
    Order {
        id,
        display_id,
        brand_id: parent.brand_id.clone(),
        supplier_id: parent.supplier_id.clone(),
        product_type: parent.product_type.clone(),
        description: request.description.clone(),
        status,
        parent_id: Some(parent.id.clone()),
        revision: parent.revision + 1,
        origin: Origin::Rework,
        quantity: request.quantity,
        unit_price: parent.unit_price,
        materials_provided: parent.materials_provided,
        tally: ReviewTally::default(),
        rework_spawned: 0,
        open_reworks: 0,
        created_at: now.clone(),
        accepted_at: parent.accepted_at.clone(),
        updated_at: now,
        delivery_deadline: request.delivery_deadline.clone(),
        version: 0,
        history_len: 0,
        history_head: None,
    }
}

/// Snapshot of an order's place in its rework tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderHierarchy {
    pub current: Order,
    pub root: Order,
    pub parent: Option<Order>,
    /// Ordered by revision, oldest generation first.
    pub children: Vec<Order>,
}

impl OrderHierarchy {
    /// An order with no parent and no children.
    pub fn standalone(order: Order) -> Self {
        Self {
            root: order.clone(),
            current: order,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn is_standalone(&self) -> bool {
        self.parent.is_none() && self.children.is_empty()
    }

    /// Number of parent links between the current order and the root.
    pub fn depth(&self) -> u32 {
        self.current.revision.saturating_sub(self.root.revision)
    }
}

/// Children ordering: revision first, then creation time, then display id.
pub fn sort_children(children: &mut [Order]) {
    children.sort_by(|a, b| {
        a.revision
            .cmp(&b.revision)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.display_id.cmp(&b.display_id))
    });
}
