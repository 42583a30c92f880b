//! Append-only status history. Entries are content addressed and chained so
//! the log can be checked against the head digest kept on the order row.
use super::error::OrderError;
use super::order::{ActorRole, OrderStatus, TimeStamp};
use chrono::Utc;
use std::fmt;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct StatusHistoryEntry {
    #[n(0)]
    pub order_id: String,
    #[n(1)]
    pub seq: u32,
    #[n(2)]
    pub previous_status: Option<OrderStatus>, // None for the creation entry
    #[n(3)]
    pub new_status: OrderStatus,
    #[n(4)]
    pub actor_id: String,
    #[n(5)]
    pub actor_role: ActorRole,
    #[n(6)]
    pub notes: Option<String>,
    #[n(7)]
    pub timestamp: TimeStamp<Utc>,
    #[n(8)]
    pub prev_digest: Option<String>,
}

impl StatusHistoryEntry {
    /// Encodes the entry and returns its digest alongside the CBOR bytes.
    pub fn build(&self) -> Result<(String, Vec<u8>), OrderError> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

/// Ordered history of one order, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTimeline {
    pub order_id: String,
    pub entries: Vec<StatusHistoryEntry>,
}

impl OrderTimeline {
    pub fn new(order_id: String, entries: Vec<StatusHistoryEntry>) -> Self {
        Self { order_id, entries }
    }

    pub fn current_status(&self) -> Option<OrderStatus> {
        self.entries.last().map(|e| e.new_status)
    }

    /// When the order most recently entered `status`.
    pub fn reached_at(&self, status: OrderStatus) -> Option<&TimeStamp<Utc>> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.new_status == status)
            .map(|e| &e.timestamp)
    }

    /// Statuses in the order they were entered.
    pub fn path(&self) -> Vec<OrderStatus> {
        self.entries.iter().map(|e| e.new_status).collect()
    }

    /// Recomputes every digest and checks the chain ends at `head`.
    pub fn verify(&self, head: Option<&str>) -> Result<(), OrderError> {
        let mut prev: Option<String> = None;
        let mut last_status: Option<OrderStatus> = None;

        for (idx, entry) in self.entries.iter().enumerate() {
            let broken = || OrderError::HistoryCorrupted {
                order_id: self.order_id.clone(),
                seq: entry.seq,
            };
            if entry.seq as usize != idx
                || entry.prev_digest != prev
                || entry.previous_status != last_status
            {
                return Err(broken());
            }
            let (digest, _) = entry.build()?;
            prev = Some(digest);
            last_status = Some(entry.new_status);
        }

        if prev.as_deref() != head {
            return Err(OrderError::HistoryCorrupted {
                order_id: self.order_id.clone(),
                seq: self.entries.len() as u32,
            });
        }
        Ok(())
    }
}

impl fmt::Display for OrderTimeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "history of {}", self.order_id)?;
        for entry in &self.entries {
            let from = entry
                .previous_status
                .map(|s| s.as_str())
                .unwrap_or("-");
            write!(
                f,
                "  #{:<3} {} {:>20} -> {:<20} by {} ({})",
                entry.seq,
                entry.timestamp.to_datetime_utc().format("%Y-%m-%d %H:%M:%S"),
                from,
                entry.new_status,
                entry.actor_id,
                entry.actor_role,
            )?;
            if let Some(notes) = &entry.notes {
                write!(f, " \"{notes}\"")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
