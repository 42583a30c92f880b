//! Property-based tests for the transition table and the history chain
//!
//! The table is checked exhaustively against randomly flagged orders: every
//! non-edge is refused for every role, and every edge is refused for roles it
//! does not list. The chain properties append random status walks through the
//! store and check that verification catches any tampering.
//!
//! What these tests DON'T cover (deliberately):
//!
//! - Actor party checks (the service does those, see the scenario suite)
//! - Notes and confirmation hints (presentation only)

use order_lifecycle::{
    ActorRole, Order, OrderDraft, OrderError, OrderStatus, TimeStamp,
    history::OrderTimeline,
    order::Origin,
    store::OrderStore,
    transitions::{EDGES, TransitionTable, Trigger},
};
use proptest::prelude::*;
use std::sync::Arc;

fn status_strategy() -> impl Strategy<Value = OrderStatus> {
    prop::sample::select(OrderStatus::ALL.to_vec())
}

fn terminal_strategy() -> impl Strategy<Value = OrderStatus> {
    prop::sample::select(vec![
        OrderStatus::Finalized,
        OrderStatus::Cancelled,
        OrderStatus::Rejected,
    ])
}

fn role_strategy() -> impl Strategy<Value = ActorRole> {
    prop::sample::select(ActorRole::ALL.to_vec())
}

/// Orders in any status with any combination of flags and rework counters
fn order_strategy() -> impl Strategy<Value = Order> {
    (
        status_strategy(),
        any::<bool>(),
        any::<bool>(),
        0u32..3,
        0u32..3,
    )
        .prop_map(|(status, materials, rework, spawned, open)| {
            let mut order = OrderDraft::new()
                .set_brand("brand_acme")
                .set_product_type("linen shirt")
                .set_quantity(10)
                .set_unit_price(2_500)
                .set_materials_provided(materials)
                .into_order("order_p".into(), "TX-20240101-0001".into(), TimeStamp::new());
            order.status = status;
            if rework {
                order.origin = Origin::Rework;
                order.revision = 1;
            }
            order.rework_spawned = spawned;
            order.open_reworks = open.min(spawned);
            order
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// A pair with no edge in the graph is refused the same way for every role
    #[test]
    fn prop_non_edges_are_invalid(order in order_strategy(), to in status_strategy(), role in role_strategy()) {
        let table = TransitionTable::global();
        prop_assume!(!table.is_adjacent(order.status, to));

        let result = table.resolve(&order, role, to);
        let is_invalid = matches!(result, Err(OrderError::InvalidTransition { .. }));
        prop_assert!(is_invalid, "{} -> {} as {}: {:?}", order.status, to, role, result);
    }

    /// Terminal orders never move
    #[test]
    fn prop_terminal_orders_never_move(
        mut order in order_strategy(),
        terminal in terminal_strategy(),
        to in status_strategy(),
        role in role_strategy(),
    ) {
        order.status = terminal;
        prop_assert!(order.status.is_terminal());
        prop_assert!(TransitionTable::global().resolve(&order, role, to).is_err());
        prop_assert!(TransitionTable::global().available(&order, role).options.is_empty());
    }

    /// Offered options are exactly the targets `resolve` accepts
    #[test]
    fn prop_available_matches_resolve(order in order_strategy(), role in role_strategy()) {
        let table = TransitionTable::global();
        let offered: Vec<_> = table
            .available(&order, role)
            .options
            .iter()
            .map(|o| o.target_status)
            .collect();

        for to in OrderStatus::ALL {
            let accepted = table.resolve(&order, role, to).is_ok();
            prop_assert_eq!(accepted, offered.contains(&to), "{} -> {} as {}", order.status, to, role);
        }
    }
}

/// Roles missing from an edge get `Forbidden` once the order satisfies the
/// edge's requirement; admins pass every actor edge.
#[test]
fn edges_gate_roles() {
    let table = TransitionTable::global();
    let base = OrderDraft::new()
        .set_brand("brand_acme")
        .set_product_type("linen shirt")
        .set_quantity(10)
        .set_unit_price(2_500);

    for edge in EDGES.iter().filter(|e| e.trigger == Trigger::Actor) {
        for materials in [false, true] {
            for (origin, spawned, open) in [(Origin::Original, 0, 0), (Origin::Original, 1, 0), (Origin::Rework, 0, 0)] {
                let mut order = base
                    .clone()
                    .set_materials_provided(materials)
                    .into_order("order_e".into(), "TX-1".into(), TimeStamp::new());
                order.status = edge.from;
                order.origin = origin;
                order.rework_spawned = spawned;
                order.open_reworks = open;
                if !edge.requires.holds(&order) {
                    continue;
                }

                for role in [ActorRole::Brand, ActorRole::Supplier] {
                    let result = table.resolve(&order, role, edge.to);
                    if edge.roles.contains(&role) {
                        assert!(result.is_ok(), "{} -> {} as {role}", edge.from, edge.to);
                    } else if table
                        .edges_between(edge.from, edge.to)
                        .all(|e| !e.roles.contains(&role))
                    {
                        assert!(
                            matches!(result, Err(OrderError::Forbidden { .. })),
                            "{} -> {} as {role}: {result:?}",
                            edge.from,
                            edge.to
                        );
                    }
                }
                assert!(table.resolve(&order, ActorRole::Admin, edge.to).is_ok());
            }
        }
    }
}

// HISTORY CHAIN

fn store() -> anyhow::Result<OrderStore> {
    let db = sled::Config::new().temporary(true).open()?;
    Ok(OrderStore::open(Arc::new(db))?)
}

/// Writes a creation entry plus one entry per status in `walk`.
fn record_walk(store: &OrderStore, walk: &[OrderStatus]) -> anyhow::Result<Order> {
    let order = OrderDraft::new()
        .set_brand("brand_acme")
        .set_product_type("wool scarf")
        .set_quantity(5)
        .set_unit_price(4_000)
        .into_order("order_h".into(), "TX-20240101-0001".into(), TimeStamp::new());

    Ok(store.transact(|tx| {
        let mut order = order.clone();
        tx.append_history(&mut order, None, "user_brand", ActorRole::Brand, None, TimeStamp::new())?;
        for status in walk {
            let previous = order.status;
            order.status = *status;
            tx.append_history(
                &mut order,
                Some(previous),
                "user_supplier",
                ActorRole::Supplier,
                Some(format!("to {status}")),
                TimeStamp::new(),
            )?;
        }
        tx.insert_order(&order)?;
        Ok(order)
    })?)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Every recorded walk verifies against the head stored on the order
    #[test]
    fn prop_recorded_history_verifies(walk in prop::collection::vec(status_strategy(), 0..12)) {
        let store = store().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let order = record_walk(&store, &walk).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let timeline = OrderTimeline::new(
            order.id.clone(),
            store.history(&order.id).map_err(|e| TestCaseError::fail(e.to_string()))?,
        );

        prop_assert_eq!(timeline.entries.len(), walk.len() + 1);
        prop_assert_eq!(timeline.current_status(), Some(order.status));
        prop_assert!(timeline.verify(order.history_head.as_deref()).is_ok());
    }

    /// Changing any entry, or dropping the newest, breaks verification
    #[test]
    fn prop_tampering_is_detected(
        walk in prop::collection::vec(status_strategy(), 1..12),
        pick in any::<prop::sample::Index>(),
        truncate in any::<bool>(),
    ) {
        let store = store().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let order = record_walk(&store, &walk).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let mut entries = store.history(&order.id).map_err(|e| TestCaseError::fail(e.to_string()))?;

        if truncate {
            entries.pop();
        } else {
            let idx = pick.index(entries.len());
            entries[idx].actor_id = "user_mallory".into();
        }

        let timeline = OrderTimeline::new(order.id.clone(), entries);
        let is_corrupted = matches!(
            timeline.verify(order.history_head.as_deref()),
            Err(OrderError::HistoryCorrupted { .. })
        );
        prop_assert!(is_corrupted);
    }
}
