//! Service layer API for order lifecycle operations
use crate::config::EngineConfig;
use crate::error::OrderError;
use crate::events::{DomainEvent, EventSink, LogSink};
use crate::hierarchy::{self, OrderHierarchy, ReworkRequest};
use crate::history::{OrderTimeline, StatusHistoryEntry};
use crate::order::{Actor, ActorRole, Order, OrderDraft, OrderStatus, TimeStamp};
use crate::review::{OrderReview, ReviewSubmission, ReviewType};
use crate::store::{OrderStore, OrderTx, TxResult};
use crate::transitions::{Availability, TransitionTable, Trigger};
use crate::utils::{
    ORDER_HRP, REVIEW_HRP, display_day_key, format_display_id, new_uuid_to_bech32,
    rework_display_id,
};
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;

pub struct OrderService {
    store: OrderStore,
    config: EngineConfig,
    events: Arc<dyn EventSink>,
}

fn new_id(hrp: &str) -> Result<String, OrderError> {
    new_uuid_to_bech32(hrp).map_err(|e| OrderError::Codec(e.to_string()))
}

// Blank notes count as no notes.
fn clean_notes(notes: Option<&str>) -> Option<String> {
    notes
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

fn status_event(order: &Order, entry: &StatusHistoryEntry) -> DomainEvent {
    DomainEvent::StatusChanged {
        order_id: order.id.clone(),
        display_id: order.display_id.clone(),
        previous_status: entry.previous_status,
        new_status: entry.new_status,
        actor_id: entry.actor_id.clone(),
        actor_role: entry.actor_role,
        notes: entry.notes.clone(),
    }
}

fn require_role(actor: &Actor, action: &'static str) -> Result<(), OrderError> {
    match actor.role {
        ActorRole::Brand | ActorRole::Admin => Ok(()),
        role => Err(OrderError::ForbiddenAction { role, action }),
    }
}

impl OrderService {
    /// Service with default settings that logs its events.
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, OrderError> {
        Self::with_config(instance, EngineConfig::default(), Arc::new(LogSink))
    }

    pub fn with_config(
        instance: Arc<sled::Db>,
        config: EngineConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, OrderError> {
        Ok(Self {
            store: OrderStore::open(instance)?,
            config,
            events,
        })
    }

    /// Opens the database the config points at.
    pub fn open(config: EngineConfig, events: Arc<dyn EventSink>) -> anyhow::Result<Self> {
        config.validate()?;
        let db = if config.storage.temporary {
            sled::Config::new().temporary(true).open()
        } else {
            sled::open(&config.storage.path)
        }
        .with_context(|| format!("opening order store at {}", config.storage.path.display()))?;

        tracing::info!(
            path = %config.storage.path.display(),
            temporary = config.storage.temporary,
            "order store opened"
        );
        Ok(Self::with_config(Arc::new(db), config, events)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn flush(&self) -> Result<usize, OrderError> {
        self.store.flush()
    }

    fn publish(&self, events: &[DomainEvent]) {
        for event in events {
            self.events.publish(event);
        }
    }

    /// Create a new order in `NEW` with a fresh daily display id
    #[tracing::instrument(skip_all, fields(actor = %actor.id))]
    pub fn create_order(&self, actor: &Actor, draft: OrderDraft) -> Result<Order, OrderError> {
        require_role(actor, "create orders")?;

        // Brand users order for their own brand
        let requested = draft.brand_id().map(str::to_string);
        let draft = match (requested.as_deref(), actor.brand_id.as_deref()) {
            (None, Some(own)) => draft.set_brand(own),
            (Some(requested), Some(own)) if requested != own => {
                return Err(OrderError::ForbiddenAction {
                    role: actor.role,
                    action: "create orders for another brand",
                });
            }
            _ => draft,
        };

        let now = TimeStamp::<Utc>::new();
        draft.validate(&now)?;
        let id = new_id(ORDER_HRP)?;
        let day_key = display_day_key(&self.config.display_id.prefix, &now.to_datetime_utc());

        let (order, entry) = self.store.transact(|tx| {
            let sequence = tx.next_sequence(&day_key)?;
            let mut order = draft.clone().into_order(
                id.clone(),
                format_display_id(&day_key, sequence),
                now.clone(),
            );
            let entry =
                tx.append_history(&mut order, None, &actor.id, actor.role, None, now.clone())?;
            tx.insert_order(&order)?;
            Ok((order, entry))
        })?;

        tracing::info!(
            order_id = %order.id,
            display_id = %order.display_id,
            quantity = order.quantity,
            "order created"
        );
        self.publish(&[status_event(&order, &entry)]);
        Ok(order)
    }

    /// Change quantity or unit price while the order is still being negotiated
    #[tracing::instrument(skip_all, fields(%order_id, actor = %actor.id))]
    pub fn amend_terms(
        &self,
        order_id: &str,
        actor: &Actor,
        quantity: Option<u64>,
        unit_price: Option<u64>,
    ) -> Result<Order, OrderError> {
        require_role(actor, "amend order terms")?;
        if quantity == Some(0) || unit_price == Some(0) {
            return Err(OrderError::InvalidInput(
                "amended quantity and price must be positive".into(),
            ));
        }

        let order = self.store.transact(|tx| {
            let mut order = tx.load_order(order_id)?;
            if !actor.acts_for(&order) {
                return Err(OrderError::ForbiddenAction {
                    role: actor.role,
                    action: "amend orders of another brand",
                }
                .into());
            }
            if !matches!(order.status, OrderStatus::New | OrderStatus::Negotiating) {
                return Err(OrderError::InvalidState {
                    action: "amend order terms",
                    actual: order.status,
                }
                .into());
            }
            if let Some(quantity) = quantity {
                order.quantity = quantity;
            }
            if let Some(unit_price) = unit_price {
                order.unit_price = unit_price;
            }
            order.version += 1;
            order.updated_at = TimeStamp::new();
            tx.save_order(&order)?;
            Ok(order)
        })?;

        tracing::info!(
            order_id = %order.id,
            quantity = order.quantity,
            unit_price = order.unit_price,
            "order terms amended"
        );
        Ok(order)
    }

    /// Move an order along an actor-triggered edge
    pub fn request_transition(
        &self,
        order_id: &str,
        actor: &Actor,
        target: OrderStatus,
        notes: Option<&str>,
    ) -> Result<Order, OrderError> {
        self.transition(order_id, actor, target, notes, None)
    }

    /// Same as [`OrderService::request_transition`], failing with
    /// [`OrderError::Conflict`] when the order moved past `expected_version`.
    pub fn request_transition_checked(
        &self,
        order_id: &str,
        actor: &Actor,
        target: OrderStatus,
        notes: Option<&str>,
        expected_version: u64,
    ) -> Result<Order, OrderError> {
        self.transition(order_id, actor, target, notes, Some(expected_version))
    }

    #[tracing::instrument(skip(self, actor, notes), fields(actor = %actor.id, role = %actor.role))]
    fn transition(
        &self,
        order_id: &str,
        actor: &Actor,
        target: OrderStatus,
        notes: Option<&str>,
        expected_version: Option<u64>,
    ) -> Result<Order, OrderError> {
        let notes = clean_notes(notes);
        let table = TransitionTable::global();

        let result = self.store.transact(|tx| {
            let mut order = tx.load_order(order_id)?;
            if let Some(expected) = expected_version {
                if expected != order.version {
                    return Err(OrderError::Conflict {
                        order_id: order.id.clone(),
                        expected,
                        actual: order.version,
                    }
                    .into());
                }
            }

            let from = order.status;
            let edge = table.resolve(&order, actor.role, target)?;
            if !actor.acts_for(&order) {
                return Err(OrderError::Forbidden {
                    role: actor.role,
                    from,
                    to: target,
                }
                .into());
            }
            if edge.meta.requires_notes && notes.is_none() {
                return Err(OrderError::PreconditionFailed {
                    from,
                    to: target,
                    flag: "notes",
                }
                .into());
            }

            let entry = self.advance(tx, &mut order, target, actor, notes.clone())?;
            Ok((order, entry))
        });

        match result {
            Ok((order, entry)) => {
                tracing::info!(
                    order_id = %order.id,
                    display_id = %order.display_id,
                    from = ?entry.previous_status,
                    to = %order.status,
                    version = order.version,
                    "order status changed"
                );
                self.publish(&[status_event(&order, &entry)]);
                Ok(order)
            }
            Err(err) => {
                tracing::debug!(error = %err, "transition rejected");
                Err(err)
            }
        }
    }

    /// The single place a status is written. Bumps the version, stamps
    /// acceptance, appends history and releases the parent once a rework
    /// order closes. Saves the order.
    fn advance(
        &self,
        tx: &OrderTx<'_>,
        order: &mut Order,
        to: OrderStatus,
        actor: &Actor,
        notes: Option<String>,
    ) -> TxResult<StatusHistoryEntry> {
        let now = TimeStamp::<Utc>::new();
        let previous = order.status;

        order.status = to;
        order.version += 1;
        order.updated_at = now.clone();
        if to == OrderStatus::Accepted {
            if order.accepted_at.is_none() {
                order.accepted_at = Some(now.clone());
            }
            if order.supplier_id.is_none() && actor.role == ActorRole::Supplier {
                order.supplier_id = actor.supplier_id.clone();
            }
        }

        let entry =
            tx.append_history(order, Some(previous), &actor.id, actor.role, notes, now.clone())?;

        if to.is_terminal() {
            if let Some(parent_id) = &order.parent_id {
                match tx.find_order(parent_id)? {
                    Some(mut parent) => {
                        parent.open_reworks = parent.open_reworks.saturating_sub(1);
                        parent.version += 1;
                        parent.updated_at = now;
                        tx.save_order(&parent)?;
                    }
                    None => tracing::warn!(
                        order_id = %order.id,
                        parent_id = %parent_id,
                        "closed rework order has no parent on record"
                    ),
                }
            }
        }

        tx.save_order(order)?;
        Ok(entry)
    }

    /// Options `role` has on the order right now
    pub fn available_transitions(
        &self,
        order_id: &str,
        role: ActorRole,
    ) -> Result<Availability, OrderError> {
        let order = self.store.get_order(order_id)?;
        Ok(TransitionTable::global().available(&order, role))
    }

    /// Record a quality check or final review; a final review also moves
    /// the order to the status its result maps to
    #[tracing::instrument(skip_all, fields(%order_id, reviewer = %reviewer.id))]
    pub fn submit_review(
        &self,
        order_id: &str,
        reviewer: &Actor,
        submission: ReviewSubmission,
    ) -> Result<OrderReview, OrderError> {
        require_role(reviewer, "submit reviews")?;
        let approved_enters_payment = self.config.review.approved_enters_payment;
        let table = TransitionTable::global();

        let result = self.store.transact(|tx| {
            let mut order = tx.load_order(order_id)?;
            if !reviewer.acts_for(&order) {
                return Err(OrderError::ForbiddenAction {
                    role: reviewer.role,
                    action: "review orders of another brand",
                }
                .into());
            }
            if order.status.is_terminal() || !submission.review_type.allowed_in(order.status) {
                let action = match submission.review_type {
                    ReviewType::FinalReview => "record a final review",
                    ReviewType::QualityCheck => "record a quality check",
                };
                return Err(OrderError::InvalidState {
                    action,
                    actual: order.status,
                }
                .into());
            }

            let outcome = submission.check(&order)?;
            let now = TimeStamp::<Utc>::new();
            let seq = order.tally.reviews;
            let review = submission.clone().into_review(
                new_id(REVIEW_HRP)?,
                &order,
                reviewer.id.clone(),
                outcome,
                now.clone(),
            );
            order
                .tally
                .record(review.approved, review.rejected, review.second_quality);
            tx.save_review(seq, &review)?;

            let entry = match review.review_type {
                ReviewType::FinalReview => {
                    let target = outcome.order_status(approved_enters_payment);
                    table.resolve_via(&order, reviewer.role, target, Trigger::Review)?;
                    Some(self.advance(tx, &mut order, target, reviewer, review.notes.clone())?)
                }
                ReviewType::QualityCheck => {
                    order.version += 1;
                    order.updated_at = now;
                    tx.save_order(&order)?;
                    None
                }
            };
            Ok((review, order, entry))
        });

        let (review, order, entry) = match result {
            Ok(committed) => committed,
            Err(err) => {
                tracing::debug!(error = %err, "review rejected");
                return Err(err);
            }
        };

        tracing::info!(
            order_id = %order.id,
            review_id = %review.id,
            result = ?review.result,
            approved = review.approved,
            rejected = review.rejected,
            second_quality = review.second_quality,
            status = %order.status,
            "review recorded"
        );

        let mut events = vec![DomainEvent::ReviewCompleted {
            order_id: order.id.clone(),
            review_id: review.id.clone(),
            result: review.result,
            approved_qty: review.approved,
            rejected_qty: review.rejected,
            second_quality_qty: review.second_quality,
            reviewer_id: review.reviewer_id.clone(),
        }];
        if let Some(entry) = &entry {
            events.push(status_event(&order, entry));
        }
        self.publish(&events);
        Ok(review)
    }

    /// Spawn a rework order for rejected units of a review
    #[tracing::instrument(skip_all, fields(%parent_id, actor = %actor.id, quantity = request.quantity))]
    pub fn spawn_child_order(
        &self,
        parent_id: &str,
        actor: &Actor,
        request: ReworkRequest,
    ) -> Result<Order, OrderError> {
        require_role(actor, "spawn rework orders")?;
        if request.quantity == 0 {
            return Err(OrderError::InvalidInput(
                "rework quantity must be positive".into(),
            ));
        }
        let now = TimeStamp::<Utc>::new();
        if let Some(deadline) = &request.delivery_deadline {
            if *deadline < now {
                return Err(OrderError::InvalidInput(
                    "delivery deadline is in the past".into(),
                ));
            }
        }
        let start = request.start.unwrap_or(self.config.rework.default_start);
        let child_id = new_id(ORDER_HRP)?;
        let table = TransitionTable::global();

        let result = self.store.transact(|tx| {
            let mut parent = tx.load_order(parent_id)?;
            if !actor.acts_for(&parent) {
                return Err(OrderError::ForbiddenAction {
                    role: actor.role,
                    action: "spawn rework for another brand",
                }
                .into());
            }
            if parent.status.is_terminal() {
                return Err(OrderError::InvalidState {
                    action: "spawn rework",
                    actual: parent.status,
                }
                .into());
            }

            let Some((seq, mut review)) = tx.find_review(&parent, request.review_id.as_deref())?
            else {
                let wanted = request
                    .review_id
                    .clone()
                    .unwrap_or_else(|| format!("with unclaimed rejects on {}", parent.id));
                return Err(OrderError::not_found("review", wanted).into());
            };
            if review.child_order_id.is_some() {
                return Err(OrderError::ReworkAlreadySpawned {
                    review_id: review.id.clone(),
                }
                .into());
            }
            if request.quantity > review.rejected {
                return Err(OrderError::ReworkQuantityExceeded {
                    requested: request.quantity,
                    available: review.rejected,
                }
                .into());
            }

            parent.rework_spawned += 1;
            parent.open_reworks += 1;
            let display_id =
                rework_display_id(&parent.display_id, parent.revision + 1, parent.rework_spawned);
            let mut child = hierarchy::rework_child(
                &parent,
                child_id.clone(),
                display_id,
                &request,
                start.status(),
                now.clone(),
            );
            let child_entry = tx.append_history(
                &mut child,
                None,
                &actor.id,
                actor.role,
                Some(format!("rework of {}", parent.display_id)),
                now.clone(),
            )?;
            tx.insert_order(&child)?;
            tx.link_child(&parent.id, parent.rework_spawned, &child.id)?;

            review.child_order_id = Some(child.id.clone());
            tx.save_review(seq, &review)?;

            let parent_entry = if matches!(
                parent.status,
                OrderStatus::PartiallyApproved | OrderStatus::Disapproved
            ) {
                table.resolve_via(
                    &parent,
                    actor.role,
                    OrderStatus::AwaitingRework,
                    Trigger::Rework,
                )?;
                let notes = Some(format!("rework {} spawned", child.display_id));
                Some(self.advance(tx, &mut parent, OrderStatus::AwaitingRework, actor, notes)?)
            } else {
                parent.version += 1;
                parent.updated_at = now.clone();
                tx.save_order(&parent)?;
                None
            };

            Ok((child, child_entry, parent, parent_entry))
        });

        let (child, child_entry, parent, parent_entry) = match result {
            Ok(committed) => committed,
            Err(err) => {
                tracing::debug!(error = %err, "rework rejected");
                return Err(err);
            }
        };

        tracing::info!(
            parent_id = %parent.id,
            child_id = %child.id,
            display_id = %child.display_id,
            revision = child.revision,
            status = %child.status,
            "rework order spawned"
        );

        let mut events = vec![
            DomainEvent::ReworkSpawned {
                parent_order_id: parent.id.clone(),
                child_order_id: child.id.clone(),
                quantity: child.quantity,
                revision_number: child.revision,
            },
            status_event(&child, &child_entry),
        ];
        if let Some(entry) = &parent_entry {
            events.push(status_event(&parent, entry));
        }
        self.publish(&events);
        Ok(child)
    }

    /// Order with its root, direct parent and direct children
    #[tracing::instrument(skip(self))]
    pub fn get_hierarchy(&self, order_id: &str) -> Result<OrderHierarchy, OrderError> {
        let current = self.store.get_order(order_id)?;
        if !current.has_relatives() {
            return Ok(OrderHierarchy::standalone(current));
        }

        let parent = match &current.parent_id {
            Some(parent_id) => {
                let parent = self.store.find_order(parent_id)?;
                if parent.is_none() {
                    tracing::warn!(order_id, parent_id = %parent_id, "parent order missing");
                }
                parent
            }
            None => None,
        };

        // Each hop lowers the revision, so the walk ends within `revision` steps.
        let mut root = parent.clone().unwrap_or_else(|| current.clone());
        for _ in 0..current.revision {
            let Some(next_id) = root.parent_id.clone() else {
                break;
            };
            match self.store.find_order(&next_id)? {
                Some(next) => root = next,
                None => {
                    tracing::warn!(order_id, missing = %next_id, "ancestor order missing");
                    break;
                }
            }
        }

        let mut children = Vec::new();
        if current.rework_spawned > 0 {
            for child_id in self.store.child_ids(&current.id)? {
                match self.store.find_order(&child_id)? {
                    Some(child) => children.push(child),
                    None => {
                        tracing::warn!(order_id, child_id = %child_id, "child order missing")
                    }
                }
            }
            hierarchy::sort_children(&mut children);
        }

        Ok(OrderHierarchy {
            current,
            root,
            parent,
            children,
        })
    }

    pub fn get_order(&self, order_id: &str) -> Result<Order, OrderError> {
        self.store.get_order(order_id)
    }

    pub fn find_by_display_id(&self, display_id: &str) -> Result<Order, OrderError> {
        let order_id = self
            .store
            .order_id_for_display(display_id)?
            .ok_or_else(|| OrderError::not_found("display id", display_id))?;
        self.store.get_order(&order_id)
    }

    /// Status history, oldest entry first
    pub fn history(&self, order_id: &str) -> Result<OrderTimeline, OrderError> {
        let order = self.store.get_order(order_id)?;
        Ok(OrderTimeline::new(order.id.clone(), self.store.history(&order.id)?))
    }

    /// Checks the stored history chain against the order's recorded head
    pub fn verify_history(&self, order_id: &str) -> Result<(), OrderError> {
        let order = self.store.get_order(order_id)?;
        let timeline = OrderTimeline::new(order.id.clone(), self.store.history(&order.id)?);
        if timeline.entries.len() != order.history_len as usize {
            return Err(OrderError::HistoryCorrupted {
                order_id: order.id,
                seq: timeline.entries.len() as u32,
            });
        }
        timeline.verify(order.history_head.as_deref())
    }

    /// Reviews in submission order
    pub fn reviews(&self, order_id: &str) -> Result<Vec<OrderReview>, OrderError> {
        let order = self.store.get_order(order_id)?;
        self.store.reviews(&order.id)
    }
}
