//! Fixtures shared by the integration suites.
#![allow(dead_code)]

use anyhow::Context;
use order_lifecycle::{
    Actor, EngineConfig, MemorySink, Order, OrderDraft, OrderService, OrderStatus,
};
use std::sync::{Arc, Once};
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Installs a test writer once per binary. Set `RUST_LOG` to see the logs.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A service over its own on-disk database. The directory lives as long as
/// the harness, so every test gets a fresh store.
pub struct Harness {
    pub service: OrderService,
    pub events: Arc<MemorySink>,
    pub db: Arc<sled::Db>,
    pub dir: TempDir,
}

pub fn harness() -> anyhow::Result<Harness> {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> anyhow::Result<Harness> {
    init_tracing();
    // Sled locks its directory, so each test opens a database of its own.
    let dir = tempfile::tempdir()?;
    let db = Arc::new(sled::open(dir.path().join("orders.db"))?);
    let events = Arc::new(MemorySink::new());
    let service = OrderService::with_config(db.clone(), config, events.clone())?;
    Ok(Harness {
        service,
        events,
        db,
        dir,
    })
}

pub fn brand() -> Actor {
    Actor::brand("user_brand", "brand_acme")
}

pub fn supplier() -> Actor {
    Actor::supplier("user_supplier", "supplier_mill")
}

pub fn admin() -> Actor {
    Actor::admin("user_admin")
}

pub fn draft(quantity: u64) -> OrderDraft {
    OrderDraft::new()
        .set_brand("brand_acme")
        .set_product_type("t-shirt")
        .set_description("organic cotton crew neck")
        .set_quantity(quantity)
        .set_unit_price(1_200)
}

/// Applies each `(actor, target)` step in turn.
pub fn walk(
    service: &OrderService,
    order_id: &str,
    steps: &[(Actor, OrderStatus)],
) -> anyhow::Result<Order> {
    let mut order = service.get_order(order_id)?;
    for (actor, target) in steps {
        order = service
            .request_transition(order_id, actor, *target, None)
            .with_context(|| format!("{} -> {target} as {}", order.status, actor.role))?;
    }
    Ok(order)
}

/// Production path of a freshly created order up to `IN_REVIEW`.
pub fn path_to_review(materials_provided: bool) -> Vec<(Actor, OrderStatus)> {
    use OrderStatus::*;

    let mut steps = vec![(supplier(), Accepted)];
    if materials_provided {
        steps.extend([
            (brand(), PreparingBrand),
            (brand(), TransitToSupplier),
            (supplier(), ReceivedSupplier),
            (supplier(), ProductionQueue),
        ]);
    } else {
        steps.push((supplier(), ProductionQueue));
    }
    steps.extend([
        (supplier(), Production),
        (supplier(), ReadySend),
        (supplier(), TransitToBrand),
        (brand(), InReview),
    ]);
    steps
}

/// Path of a rework order waiting in `AWAITING_REWORK` up to `IN_REVIEW`.
pub fn rework_path_to_review() -> Vec<(Actor, OrderStatus)> {
    use OrderStatus::*;

    vec![
        (supplier(), ProductionQueue),
        (supplier(), Production),
        (supplier(), ReadySend),
        (supplier(), TransitToBrand),
        (brand(), InReview),
    ]
}

/// Creates an order and drives it to `IN_REVIEW`.
pub fn order_in_review(
    service: &OrderService,
    quantity: u64,
    materials_provided: bool,
) -> anyhow::Result<Order> {
    let order = service.create_order(
        &brand(),
        draft(quantity).set_materials_provided(materials_provided),
    )?;
    walk(service, &order.id, &path_to_review(materials_provided))
}
