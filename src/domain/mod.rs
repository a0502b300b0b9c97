//! Domain module
//!
//! Core domain types shared by intake, consumption and statements.

pub mod amount;
pub mod context;
pub mod error;
pub mod events;
pub mod ledger;
pub mod partition;

pub use amount::{Amount, AmountError, Balance};
pub use context::OperationContext;
pub use error::RejectionReason;
pub use events::{
    AccountType, CurrencyType, Direction, EventId, RawTransactionEvent, TransactionEvent,
    TransactionMetadata, TransactionType, UnknownVariant,
};
pub use ledger::{LedgerEntry, PartitionTail};
pub use partition::PartitionKey;
