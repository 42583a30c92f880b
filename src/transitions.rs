//! Static transition table.
//!
//! Every legal status change is one [`Edge`]: who may take it, which order
//! flags it needs and how it is triggered. Enforcement ([`TransitionTable::resolve`])
//! and the "what can I do next" query ([`TransitionTable::available`]) read the
//! same table.
use super::error::OrderError;
use super::order::{ActorRole, Order, OrderStatus, Origin};
use once_cell::sync::Lazy;
use std::collections::HashMap;

use ActorRole::{Brand, Supplier};
use OrderStatus::*;

/// How an edge is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Requested directly by an actor.
    Actor,
    /// Only as the outcome of a recorded review.
    Review,
    /// Only when a rework order is spawned.
    Rework,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    None,
    MaterialsProvided,
    MaterialsSourced,
    /// Rework order that has not branched into rework of its own.
    ReworkPendingStart,
    /// Rework was spawned and every child has reached a terminal status.
    ReworksResolved,
}

impl Requirement {
    pub fn flag(&self) -> &'static str {
        match self {
            Requirement::None => "none",
            Requirement::MaterialsProvided => "materialsProvided",
            Requirement::MaterialsSourced => "!materialsProvided",
            Requirement::ReworkPendingStart => "reworkPendingStart",
            Requirement::ReworksResolved => "reworksResolved",
        }
    }

    pub fn holds(&self, order: &Order) -> bool {
        match self {
            Requirement::None => true,
            Requirement::MaterialsProvided => order.materials_provided,
            Requirement::MaterialsSourced => !order.materials_provided,
            Requirement::ReworkPendingStart => {
                order.origin == Origin::Rework && order.rework_spawned == 0
            }
            Requirement::ReworksResolved => order.rework_spawned > 0 && order.open_reworks == 0,
        }
    }
}

/// Presentation hints carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeMeta {
    pub requires_confirmation: bool,
    pub requires_notes: bool,
    pub requires_review: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub roles: &'static [ActorRole],
    pub requires: Requirement,
    pub trigger: Trigger,
    pub meta: EdgeMeta,
}

impl Edge {
    const fn new(from: OrderStatus, to: OrderStatus, roles: &'static [ActorRole]) -> Self {
        Self {
            from,
            to,
            roles,
            requires: Requirement::None,
            trigger: Trigger::Actor,
            meta: EdgeMeta {
                requires_confirmation: false,
                requires_notes: false,
                requires_review: false,
            },
        }
    }
    const fn requires(mut self, requirement: Requirement) -> Self {
        self.requires = requirement;
        self
    }
    const fn via(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }
    const fn confirm(mut self) -> Self {
        self.meta.requires_confirmation = true;
        self
    }
    const fn notes(mut self) -> Self {
        self.meta.requires_notes = true;
        self
    }
    const fn review(mut self) -> Self {
        self.meta.requires_review = true;
        self
    }

    /// Admins may take any actor edge, other roles only the ones listed.
    pub fn permits(&self, role: ActorRole) -> bool {
        role == ActorRole::Admin || self.roles.contains(&role)
    }
}

const B: &[ActorRole] = &[Brand];
const S: &[ActorRole] = &[Supplier];
const BS: &[ActorRole] = &[Brand, Supplier];

pub static EDGES: &[Edge] = &[
    // negotiation and acceptance
    Edge::new(New, Negotiating, S).notes(),
    Edge::new(New, Accepted, S).confirm(),
    Edge::new(New, Rejected, S).confirm().notes(),
    Edge::new(New, Cancelled, B).confirm(),
    Edge::new(Negotiating, Accepted, BS).confirm(),
    Edge::new(Negotiating, Cancelled, BS).confirm().notes(),
    // materials come from the brand
    Edge::new(Accepted, PreparingBrand, B).requires(Requirement::MaterialsProvided),
    Edge::new(PreparingBrand, TransitToSupplier, B)
        .requires(Requirement::MaterialsProvided)
        .confirm(),
    Edge::new(TransitToSupplier, ReceivedSupplier, S)
        .requires(Requirement::MaterialsProvided)
        .confirm(),
    Edge::new(ReceivedSupplier, ProductionQueue, S).requires(Requirement::MaterialsProvided),
    // supplier sources materials
    Edge::new(Accepted, ProductionQueue, S).requires(Requirement::MaterialsSourced),
    Edge::new(Accepted, Production, S).requires(Requirement::MaterialsSourced),
    // production and delivery
    Edge::new(ProductionQueue, Production, S),
    Edge::new(Production, ReadySend, S),
    Edge::new(ReadySend, TransitToBrand, S).confirm(),
    Edge::new(TransitToBrand, InReview, B).confirm().review(),
    // review outcomes
    Edge::new(InReview, PaymentProcess, B).via(Trigger::Review).review(),
    Edge::new(InReview, Finalized, B).via(Trigger::Review).review(),
    Edge::new(InReview, PartiallyApproved, B).via(Trigger::Review).review(),
    Edge::new(InReview, Disapproved, B).via(Trigger::Review).review(),
    // after review
    Edge::new(PartiallyApproved, AwaitingRework, B).via(Trigger::Rework),
    Edge::new(Disapproved, AwaitingRework, B).via(Trigger::Rework),
    Edge::new(PartiallyApproved, PaymentProcess, B).confirm(),
    Edge::new(Disapproved, Finalized, B).confirm().notes(),
    Edge::new(AwaitingRework, ProductionQueue, S).requires(Requirement::ReworkPendingStart),
    Edge::new(AwaitingRework, Finalized, B)
        .requires(Requirement::ReworksResolved)
        .confirm(),
    Edge::new(PaymentProcess, Finalized, S).confirm(),
    // abandoning before production
    Edge::new(Accepted, Cancelled, BS).confirm().notes(),
    Edge::new(PreparingBrand, Cancelled, BS).confirm().notes(),
    Edge::new(TransitToSupplier, Cancelled, BS).confirm().notes(),
    Edge::new(ReceivedSupplier, Cancelled, BS).confirm().notes(),
    Edge::new(ProductionQueue, Cancelled, BS).confirm().notes(),
];

/// One option offered to an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOption {
    pub target_status: OrderStatus,
    pub requires_confirmation: bool,
    pub requires_notes: bool,
    pub requires_review: bool,
}

impl From<&Edge> for TransitionOption {
    fn from(edge: &Edge) -> Self {
        Self {
            target_status: edge.to,
            requires_confirmation: edge.meta.requires_confirmation,
            requires_notes: edge.meta.requires_notes,
            requires_review: edge.meta.requires_review,
        }
    }
}

/// Who has to act next when the asking actor has nothing to do.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Waiting {
    pub waiting_on_role: Option<ActorRole>,
    pub waiting_reason_label: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub current_status: OrderStatus,
    pub options: Vec<TransitionOption>,
    pub waiting: Option<Waiting>,
}

pub struct TransitionTable {
    by_from: HashMap<OrderStatus, Vec<&'static Edge>>,
}

static TABLE: Lazy<TransitionTable> = Lazy::new(|| TransitionTable::build(EDGES));

impl TransitionTable {
    pub fn global() -> &'static TransitionTable {
        &TABLE
    }

    fn build(edges: &'static [Edge]) -> Self {
        let mut by_from: HashMap<OrderStatus, Vec<&'static Edge>> = HashMap::new();
        for edge in edges {
            by_from.entry(edge.from).or_default().push(edge);
        }
        Self { by_from }
    }

    pub fn edges_from(&self, status: OrderStatus) -> &[&'static Edge] {
        self.by_from.get(&status).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edges_between(
        &self,
        from: OrderStatus,
        to: OrderStatus,
    ) -> impl Iterator<Item = &'static Edge> + '_ {
        self.edges_from(from).iter().copied().filter(move |e| e.to == to)
    }

    /// Whether `from -> to` is an edge of the graph at all, for any trigger.
    pub fn is_adjacent(&self, from: OrderStatus, to: OrderStatus) -> bool {
        self.edges_between(from, to).next().is_some()
    }

    /// Picks the edge an actor-requested transition uses, or says why none applies.
    ///
    /// Checks run graph first, then order flags, then role, so a caller always
    /// learns the most fundamental reason first.
    pub fn resolve(
        &self,
        order: &Order,
        role: ActorRole,
        to: OrderStatus,
    ) -> Result<&'static Edge, OrderError> {
        self.resolve_via(order, role, to, Trigger::Actor)
    }

    pub fn resolve_via(
        &self,
        order: &Order,
        role: ActorRole,
        to: OrderStatus,
        trigger: Trigger,
    ) -> Result<&'static Edge, OrderError> {
        let from = order.status;
        let invalid = OrderError::InvalidTransition { from, to };

        let triggered: Vec<_> = self
            .edges_between(from, to)
            .filter(|e| e.trigger == trigger)
            .collect();
        if triggered.is_empty() {
            return Err(invalid);
        }

        let satisfied: Vec<_> = triggered
            .iter()
            .copied()
            .filter(|e| e.requires.holds(order))
            .collect();
        if satisfied.is_empty() {
            return Err(OrderError::PreconditionFailed {
                from,
                to,
                flag: triggered[0].requires.flag(),
            });
        }

        satisfied
            .into_iter()
            .find(|e| e.permits(role))
            .ok_or(OrderError::Forbidden { role, from, to })
    }

    /// Options `role` can take right now, plus who is expected to act when
    /// there are none.
    pub fn available(&self, order: &Order, role: ActorRole) -> Availability {
        let live: Vec<_> = self
            .edges_from(order.status)
            .iter()
            .copied()
            .filter(|e| e.requires.holds(order))
            .collect();

        let options: Vec<TransitionOption> = live
            .iter()
            .filter(|e| e.trigger == Trigger::Actor && e.permits(role))
            .map(|e| TransitionOption::from(*e))
            .collect();

        let waiting = if options.is_empty() {
            Some(waiting_on(order, &live))
        } else {
            None
        };

        Availability {
            current_status: order.status,
            options,
            waiting,
        }
    }
}

fn waiting_on(order: &Order, live: &[&'static Edge]) -> Waiting {
    if order.status.is_terminal() {
        return Waiting {
            waiting_on_role: None,
            waiting_reason_label: "order closed",
        };
    }
    // Edges that only fire through a review point at the reviewing brand.
    if live.iter().any(|e| e.trigger == Trigger::Review) {
        return Waiting {
            waiting_on_role: Some(Brand),
            waiting_reason_label: "awaiting quality review",
        };
    }
    let role = live
        .iter()
        .filter(|e| e.trigger == Trigger::Actor)
        .flat_map(|e| e.roles.iter().copied())
        .next();

    match (order.status, role) {
        (AwaitingRework, _) if order.open_reworks > 0 => Waiting {
            waiting_on_role: Some(Supplier),
            waiting_reason_label: "rework in progress",
        },
        (status, role) => Waiting {
            waiting_on_role: role,
            waiting_reason_label: waiting_label(status),
        },
    }
}

fn waiting_label(status: OrderStatus) -> &'static str {
    match status {
        New => "awaiting supplier acceptance",
        Negotiating => "negotiation in progress",
        Accepted => "awaiting production start",
        PreparingBrand => "brand preparing materials",
        TransitToSupplier => "materials in transit to supplier",
        ReceivedSupplier => "materials received by supplier",
        ProductionQueue => "queued for production",
        Production => "in production",
        ReadySend => "ready to ship",
        TransitToBrand => "in transit to brand",
        InReview => "awaiting quality review",
        PartiallyApproved | Disapproved => "awaiting review follow-up",
        AwaitingRework => "awaiting rework",
        PaymentProcess => "awaiting payment confirmation",
        Finalized | Cancelled | Rejected => "order closed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{OrderDraft, TimeStamp};

    fn order_at(status: OrderStatus, materials_provided: bool) -> Order {
        let mut order = OrderDraft::new()
            .set_brand("brand_a")
            .set_product_type("hoodie")
            .set_quantity(100)
            .set_unit_price(900)
            .set_materials_provided(materials_provided)
            .into_order("order_1".into(), "TX-20240101-0001".into(), TimeStamp::new());
        order.status = status;
        order
    }

    #[test]
    fn terminal_statuses_have_no_edges() {
        let table = TransitionTable::global();
        for status in [Finalized, Cancelled, Rejected] {
            assert!(table.edges_from(status).is_empty(), "{status} has edges");
        }
    }

    #[test]
    fn every_non_terminal_status_has_an_edge() {
        let table = TransitionTable::global();
        for status in OrderStatus::ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(!table.edges_from(*status).is_empty(), "{status} is a dead end");
        }
    }

    #[test]
    fn materials_flag_selects_branch() {
        let table = TransitionTable::global();
        let sourced = order_at(Accepted, false);
        let provided = order_at(Accepted, true);

        assert!(table.resolve(&sourced, Supplier, ProductionQueue).is_ok());
        assert!(matches!(
            table.resolve(&sourced, Brand, PreparingBrand),
            Err(OrderError::PreconditionFailed {
                flag: "materialsProvided",
                ..
            })
        ));
        assert!(table.resolve(&provided, Brand, PreparingBrand).is_ok());
        assert!(matches!(
            table.resolve(&provided, Supplier, ProductionQueue),
            Err(OrderError::PreconditionFailed { .. })
        ));
    }

    #[test]
    fn review_edges_are_not_requestable() {
        let table = TransitionTable::global();
        let order = order_at(InReview, false);
        for target in [Finalized, PaymentProcess, PartiallyApproved, Disapproved] {
            for role in ActorRole::ALL {
                assert!(matches!(
                    table.resolve(&order, role, target),
                    Err(OrderError::InvalidTransition { .. })
                ));
            }
            assert!(
                table
                    .resolve_via(&order, Brand, target, Trigger::Review)
                    .is_ok()
            );
        }
    }

    #[test]
    fn admin_overrides_roles_but_not_graph() {
        let table = TransitionTable::global();
        let order = order_at(New, false);

        assert!(table.resolve(&order, ActorRole::Admin, Accepted).is_ok());
        assert!(matches!(
            table.resolve(&order, ActorRole::Admin, Production),
            Err(OrderError::InvalidTransition { .. })
        ));
        assert!(matches!(
            table.resolve(&order, Brand, Accepted),
            Err(OrderError::Forbidden { .. })
        ));
    }

    #[test]
    fn availability_reports_waiting_party() {
        let table = TransitionTable::global();
        let order = order_at(New, false);

        let supplier = table.available(&order, Supplier);
        let targets: Vec<_> = supplier.options.iter().map(|o| o.target_status).collect();
        assert_eq!(targets, vec![Negotiating, Accepted, Rejected]);
        assert!(supplier.waiting.is_none());

        let brand = table.available(&order_at(Production, false), Brand);
        assert!(brand.options.is_empty());
        assert_eq!(
            brand.waiting,
            Some(Waiting {
                waiting_on_role: Some(Supplier),
                waiting_reason_label: "in production",
            })
        );

        let review = table.available(&order_at(InReview, false), Supplier);
        assert_eq!(
            review.waiting.and_then(|w| w.waiting_on_role),
            Some(Brand)
        );

        let closed = table.available(&order_at(Cancelled, false), ActorRole::Admin);
        assert!(closed.options.is_empty());
        assert_eq!(
            closed.waiting.map(|w| w.waiting_reason_label),
            Some("order closed")
        );
    }

    #[test]
    fn rework_parent_waits_for_children() {
        let table = TransitionTable::global();
        let mut parent = order_at(AwaitingRework, false);
        parent.rework_spawned = 1;
        parent.open_reworks = 1;

        assert!(matches!(
            table.resolve(&parent, Brand, Finalized),
            Err(OrderError::PreconditionFailed {
                flag: "reworksResolved",
                ..
            })
        ));
        let waiting = table.available(&parent, Brand).waiting.unwrap();
        assert_eq!(waiting.waiting_reason_label, "rework in progress");

        parent.open_reworks = 0;
        assert!(table.resolve(&parent, Brand, Finalized).is_ok());
    }
}
