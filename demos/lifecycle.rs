//! Walks one textile order from creation through a partial review and its
//! rework order.
//!
//! ```text
//! cargo run --example lifecycle [path/to/engine.toml]
//! RUST_LOG=order_lifecycle=debug,order_events=info cargo run --example lifecycle
//! ```
//!
//! Without a config file the demo runs against a temporary database.
use anyhow::Context;
use order_lifecycle::{
    Actor, ActorRole, EngineConfig, LogSink, OrderDraft, OrderService, OrderStatus,
    ReviewSubmission, ReworkRequest, TimeStamp,
    review::{DefectKind, RejectedItem, SecondQualityItem},
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => EngineConfig::temporary(),
    };
    let service = OrderService::open(config, Arc::new(LogSink))?;

    let brand = Actor::brand("user_anna", "brand_northwind");
    let supplier = Actor::supplier("user_rui", "supplier_porto_knits");

    let order = service.create_order(
        &brand,
        OrderDraft::new()
            .set_product_type("merino sweater")
            .set_description("crew neck, navy, sizes S-XL")
            .set_quantity(100)
            .set_unit_price(4_500)
            .set_delivery_deadline(TimeStamp::days_from_now(45)),
    )?;

    for (actor, target) in [
        (&supplier, OrderStatus::Accepted),
        (&supplier, OrderStatus::ProductionQueue),
        (&supplier, OrderStatus::Production),
        (&supplier, OrderStatus::ReadySend),
        (&supplier, OrderStatus::TransitToBrand),
        (&brand, OrderStatus::InReview),
    ] {
        service
            .request_transition(&order.id, actor, target, None)
            .with_context(|| format!("moving {} to {target}", order.display_id))?;
    }

    let review = service.submit_review(
        &order.id,
        &brand,
        ReviewSubmission::final_review(80, 15, 5)
            .set_notes("loose cuffs on 15 units, uneven dye on 5")
            .add_rejected_item(RejectedItem::new(DefectKind::Sewing, 15))
            .add_second_quality_item(SecondQualityItem::new(DefectKind::Color, 5, 25)),
    )?;
    let value = review.valuation(4_500);
    println!(
        "review {:?}: payable {} (rejected {})",
        review.result,
        value.payable(),
        value.rejected_value
    );

    let child = service.spawn_child_order(
        &order.id,
        &brand,
        ReworkRequest::new(review.rejected).set_description("re-knit cuffs"),
    )?;

    let tree = service.get_hierarchy(&child.id)?;
    println!(
        "rework {} (revision {}) under {}",
        child.display_id, child.revision, tree.root.display_id
    );

    for role in ActorRole::ALL {
        let next = service.available_transitions(&child.id, role)?;
        let targets: Vec<_> = next.options.iter().map(|o| o.target_status).collect();
        println!("{role:>8} on {}: {targets:?} {:?}", child.display_id, next.waiting);
    }

    service.verify_history(&order.id)?;
    println!("{}", service.history(&order.id)?);
    Ok(())
}
