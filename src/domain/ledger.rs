//! Ledger entries and partition tails
//!
//! A `LedgerEntry` is the immutable, engine-owned record of one applied event.
//! A `PartitionTail` is the state needed to append the next entry; it is the
//! only contended record in the system and is only ever replaced through the
//! store's compare-and-swap.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::{
    Amount, Balance, Direction, EventId, PartitionKey, TransactionEvent, TransactionMetadata,
    TransactionType,
};

/// Immutable record of an applied transaction event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub event_id: EventId,
    pub partition: PartitionKey,
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub amount: Amount,
    /// Balance after this entry, in physical (append) order
    pub running_balance: Balance,
    pub sequence_number: i64,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set when the entry arrived after an entry with a later `processed_at`
    pub late: bool,
    pub metadata: TransactionMetadata,
    pub reported_balance: Option<Decimal>,
    pub fingerprint: String,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Logical statement order: processed_at, then created_at, then sequence number.
    pub fn logical_cmp(&self, other: &LedgerEntry) -> Ordering {
        self.processed_at
            .cmp(&other.processed_at)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.sequence_number.cmp(&other.sequence_number))
    }

    /// Signed contribution of this entry to the balance
    pub fn delta(&self) -> Decimal {
        self.amount.signed(self.direction)
    }

    /// Tail balance this entry was computed from
    pub fn previous_balance(&self) -> Decimal {
        self.running_balance.value() - self.delta()
    }
}

/// Latest applied state of a partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionTail {
    pub partition: PartitionKey,
    /// Sequence number of the last entry, 0 when the partition is empty
    pub sequence_number: i64,
    pub running_balance: Balance,
    /// Greatest processed_at applied so far
    pub latest_processed_at: Option<DateTime<Utc>>,
    /// Balance the partition started from before its first entry
    pub opening_balance: Balance,
}

impl PartitionTail {
    /// Tail of a partition that has never been written
    pub fn empty(partition: PartitionKey) -> Self {
        Self {
            partition,
            sequence_number: 0,
            running_balance: Balance::zero(),
            latest_processed_at: None,
            opening_balance: Balance::zero(),
        }
    }

    /// Tail of an empty partition that starts from a seeded balance
    pub fn seeded(partition: PartitionKey, opening_balance: Balance) -> Self {
        Self {
            running_balance: opening_balance,
            opening_balance,
            ..Self::empty(partition)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sequence_number == 0
    }

    /// Build the entry that appending `event` on top of this tail produces.
    pub fn next_entry(&self, event: &TransactionEvent, recorded_at: DateTime<Utc>) -> LedgerEntry {
        let late = self
            .latest_processed_at
            .map(|latest| event.processed_at < latest)
            .unwrap_or(false);

        LedgerEntry {
            event_id: event.id.clone(),
            partition: self.partition.clone(),
            transaction_type: event.transaction_type,
            direction: event.direction,
            amount: event.amount,
            running_balance: self.running_balance.apply(event.direction, &event.amount),
            sequence_number: self.sequence_number + 1,
            processed_at: event.processed_at,
            created_at: event.created_at,
            late,
            metadata: event.metadata.clone(),
            reported_balance: event.balance,
            fingerprint: event.fingerprint(),
            recorded_at,
        }
    }

    /// The tail after `entry` has been appended
    pub fn advance(&self, entry: &LedgerEntry) -> PartitionTail {
        let latest_processed_at = match self.latest_processed_at {
            Some(latest) if latest >= entry.processed_at => Some(latest),
            _ => Some(entry.processed_at),
        };

        PartitionTail {
            partition: self.partition.clone(),
            sequence_number: entry.sequence_number,
            running_balance: entry.running_balance,
            latest_processed_at,
            opening_balance: self.opening_balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountType, CurrencyType};
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn partition() -> PartitionKey {
        PartitionKey::new("user-123", AccountType::Brazilian, CurrencyType::Brl)
    }

    fn event(id: &str, direction: Direction, amount: Decimal, processed_at: DateTime<Utc>) -> TransactionEvent {
        TransactionEvent {
            id: EventId::new(id),
            user_id: "user-123".to_string(),
            account: AccountType::Brazilian,
            currency: CurrencyType::Brl,
            transaction_type: TransactionType::InstantTransfer,
            direction,
            amount: Amount::new(amount).unwrap(),
            balance: None,
            metadata: TransactionMetadata::default(),
            processed_at,
            created_at: processed_at,
        }
    }

    #[test]
    fn test_first_entry_starts_from_zero() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let tail = PartitionTail::empty(partition());
        let entry = tail.next_entry(&event("a", Direction::Credit, dec!(600.00), t), t);

        assert_eq!(entry.sequence_number, 1);
        assert_eq!(entry.running_balance.value(), dec!(600.00));
        assert!(!entry.late);
    }

    #[test]
    fn test_seeded_tail_starts_from_opening_balance() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let tail = PartitionTail::seeded(partition(), Balance::new(dec!(100)));
        let entry = tail.next_entry(&event("a", Direction::Debit, dec!(30), t), t);

        assert_eq!(entry.running_balance.value(), dec!(70));
        assert!(tail.is_empty());
    }

    #[test]
    fn test_advance_tracks_latest_processed_at_and_flags_late() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let tail = PartitionTail::empty(partition());

        let a = tail.next_entry(&event("a", Direction::Credit, dec!(10), t + Duration::days(10)), t);
        let tail = tail.advance(&a);

        let b = tail.next_entry(&event("b", Direction::Debit, dec!(4), t), t);
        assert!(b.late);
        assert_eq!(b.sequence_number, 2);
        assert_eq!(b.running_balance.value(), dec!(6));

        let tail = tail.advance(&b);
        assert_eq!(tail.latest_processed_at, Some(t + Duration::days(10)));
        assert_eq!(tail.sequence_number, 2);
    }

    #[test]
    fn test_logical_order_ties() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let tail = PartitionTail::empty(partition());

        let mut first = event("a", Direction::Credit, dec!(1), t);
        first.created_at = t - Duration::seconds(5);
        let a = tail.next_entry(&event("x", Direction::Credit, dec!(1), t), t);
        let tail = tail.advance(&a);
        let b = tail.next_entry(&first, t);

        // same processed_at, b was created earlier
        assert_eq!(b.logical_cmp(&a), Ordering::Less);

        let tail = tail.advance(&b);
        let c = tail.next_entry(&event("c", Direction::Credit, dec!(1), t), t);
        // identical timestamps fall back to sequence number
        assert_eq!(a.logical_cmp(&c), Ordering::Less);
    }
}
