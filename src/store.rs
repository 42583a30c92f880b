//! sled-backed persistence for orders, their history, reviews and rework links.
//!
//! Tree layout (values are CBOR):
//!
//! | tree          | key                         | value                     |
//! |---------------|-----------------------------|---------------------------|
//! | `orders`      | order id                    | [`Order`]                 |
//! | `display_ids` | display id                  | order id                  |
//! | `history`     | `{order id}/{seq:010}`      | [`StatusHistoryEntry`]    |
//! | `reviews`     | `{order id}/{seq:06}`       | [`OrderReview`]           |
//! | `children`    | `{parent id}/{ordinal:06}`  | child order id            |
//! | `sequences`   | `{prefix}-{yyyymmdd}`       | big-endian `u32` counter  |
use crate::error::OrderError;
use crate::history::StatusHistoryEntry;
use crate::order::{ActorRole, Order, OrderStatus, TimeStamp};
use crate::review::OrderReview;
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use std::sync::Arc;

pub type TxResult<T> = ConflictableTransactionResult<T, OrderError>;

// Lets `?` abort a transaction with a domain error.
impl From<OrderError> for ConflictableTransactionError<OrderError> {
    fn from(err: OrderError) -> Self {
        ConflictableTransactionError::Abort(err)
    }
}

fn history_key(order_id: &str, seq: u32) -> String {
    format!("{order_id}/{seq:010}")
}

fn review_key(order_id: &str, seq: u32) -> String {
    format!("{order_id}/{seq:06}")
}

fn child_key(parent_id: &str, ordinal: u32) -> String {
    format!("{parent_id}/{ordinal:06}")
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, OrderError> {
    Ok(minicbor::to_vec(value)?)
}

fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T, OrderError> {
    Ok(minicbor::decode(bytes)?)
}

fn decode_str(bytes: &[u8]) -> Result<String, OrderError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| OrderError::Codec(e.to_string()))
}

pub struct OrderStore {
    instance: Arc<sled::Db>,
    orders: sled::Tree,
    display_ids: sled::Tree,
    history: sled::Tree,
    reviews: sled::Tree,
    children: sled::Tree,
    sequences: sled::Tree,
}

impl OrderStore {
    pub fn open(instance: Arc<sled::Db>) -> Result<Self, OrderError> {
        Ok(Self {
            orders: instance.open_tree("orders")?,
            display_ids: instance.open_tree("display_ids")?,
            history: instance.open_tree("history")?,
            reviews: instance.open_tree("reviews")?,
            children: instance.open_tree("children")?,
            sequences: instance.open_tree("sequences")?,
            instance,
        })
    }

    pub fn find_order(&self, order_id: &str) -> Result<Option<Order>, OrderError> {
        self.orders
            .get(order_id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn get_order(&self, order_id: &str) -> Result<Order, OrderError> {
        self.find_order(order_id)?
            .ok_or_else(|| OrderError::not_found("order", order_id))
    }

    pub fn order_id_for_display(&self, display_id: &str) -> Result<Option<String>, OrderError> {
        self.display_ids
            .get(display_id.as_bytes())?
            .map(|bytes| decode_str(&bytes))
            .transpose()
    }

    pub fn history(&self, order_id: &str) -> Result<Vec<StatusHistoryEntry>, OrderError> {
        self.history
            .scan_prefix(format!("{order_id}/").as_bytes())
            .map(|kv| {
                let (_, value) = kv?;
                decode(&value)
            })
            .collect()
    }

    pub fn reviews(&self, order_id: &str) -> Result<Vec<OrderReview>, OrderError> {
        self.reviews
            .scan_prefix(format!("{order_id}/").as_bytes())
            .map(|kv| {
                let (_, value) = kv?;
                decode(&value)
            })
            .collect()
    }

    /// Child ids in spawn order.
    pub fn child_ids(&self, parent_id: &str) -> Result<Vec<String>, OrderError> {
        self.children
            .scan_prefix(format!("{parent_id}/").as_bytes())
            .map(|kv| {
                let (_, value) = kv?;
                decode_str(&value)
            })
            .collect()
    }

    /// Runs `f` as one serializable transaction over every tree. sled re-runs
    /// the closure on conflict, so it must derive everything from what it reads.
    pub fn transact<T, F>(&self, f: F) -> Result<T, OrderError>
    where
        F: Fn(&OrderTx<'_>) -> TxResult<T>,
    {
        (
            &self.orders,
            &self.display_ids,
            &self.history,
            &self.reviews,
            &self.children,
            &self.sequences,
        )
            .transaction(
                |(orders, display_ids, history, reviews, children, sequences)| {
                    f(&OrderTx {
                        orders,
                        display_ids,
                        history,
                        reviews,
                        children,
                        sequences,
                    })
                },
            )
            .map_err(|err| match err {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => OrderError::Storage(err),
            })
    }

    pub fn flush(&self) -> Result<usize, OrderError> {
        Ok(self.instance.flush()?)
    }
}

/// Transactional view handed to [`OrderStore::transact`] closures.
pub struct OrderTx<'a> {
    orders: &'a TransactionalTree,
    display_ids: &'a TransactionalTree,
    history: &'a TransactionalTree,
    reviews: &'a TransactionalTree,
    children: &'a TransactionalTree,
    sequences: &'a TransactionalTree,
}

impl OrderTx<'_> {
    pub fn find_order(&self, order_id: &str) -> TxResult<Option<Order>> {
        match self.orders.get(order_id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn load_order(&self, order_id: &str) -> TxResult<Order> {
        match self.find_order(order_id)? {
            Some(order) => Ok(order),
            None => Err(OrderError::not_found("order", order_id).into()),
        }
    }

    pub fn save_order(&self, order: &Order) -> TxResult<()> {
        self.orders.insert(order.id.as_bytes(), encode(order)?)?;
        Ok(())
    }

    /// Stores a new order and claims its display id.
    pub fn insert_order(&self, order: &Order) -> TxResult<()> {
        if self.display_ids.get(order.display_id.as_bytes())?.is_some() {
            return Err(OrderError::DuplicateDisplayId(order.display_id.clone()).into());
        }
        self.display_ids
            .insert(order.display_id.as_bytes(), order.id.as_bytes())?;
        self.save_order(order)
    }

    /// Next value of the daily display-id counter, starting at 1.
    pub fn next_sequence(&self, day_key: &str) -> TxResult<u32> {
        let current = match self.sequences.get(day_key.as_bytes())? {
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_ref().try_into().map_err(|_| {
                    OrderError::Codec(format!("corrupt sequence counter `{day_key}`"))
                })?;
                u32::from_be_bytes(raw)
            }
            None => 0,
        };
        let next = current + 1;
        self.sequences
            .insert(day_key.as_bytes(), &next.to_be_bytes()[..])?;
        Ok(next)
    }

    /// Appends a history entry recording `order.status` and advances the
    /// order's chain head. The caller saves the order afterwards.
    pub fn append_history(
        &self,
        order: &mut Order,
        previous_status: Option<OrderStatus>,
        actor_id: &str,
        actor_role: ActorRole,
        notes: Option<String>,
        timestamp: TimeStamp<Utc>,
    ) -> TxResult<StatusHistoryEntry> {
        let entry = StatusHistoryEntry {
            order_id: order.id.clone(),
            seq: order.history_len,
            previous_status,
            new_status: order.status,
            actor_id: actor_id.to_string(),
            actor_role,
            notes,
            timestamp,
            prev_digest: order.history_head.clone(),
        };
        let (digest, cbor) = entry.build()?;
        self.history
            .insert(history_key(&order.id, entry.seq).as_bytes(), cbor)?;

        order.history_len += 1;
        order.history_head = Some(digest);
        Ok(entry)
    }

    /// Stores review number `seq` of an order.
    pub fn save_review(&self, seq: u32, review: &OrderReview) -> TxResult<()> {
        self.reviews
            .insert(review_key(&review.order_id, seq).as_bytes(), encode(review)?)?;
        Ok(())
    }

    /// Looks a review up by id, or takes the newest one that still has
    /// unclaimed rejected quantity. Returns its sequence number too.
    pub fn find_review(
        &self,
        order: &Order,
        review_id: Option<&str>,
    ) -> TxResult<Option<(u32, OrderReview)>> {
        for seq in (0..order.tally.reviews).rev() {
            let Some(bytes) = self.reviews.get(review_key(&order.id, seq).as_bytes())? else {
                continue;
            };
            let review: OrderReview = decode(&bytes)?;
            let matches = match review_id {
                Some(id) => review.id == id,
                None => review.can_spawn_rework(),
            };
            if matches {
                return Ok(Some((seq, review)));
            }
        }
        Ok(None)
    }

    pub fn link_child(&self, parent_id: &str, ordinal: u32, child_id: &str) -> TxResult<()> {
        self.children
            .insert(child_key(parent_id, ordinal).as_bytes(), child_id.as_bytes())?;
        Ok(())
    }
}
