//! Transaction Events
//!
//! Inbound transaction events and the closed enumerations they carry.
//! Wire values follow the upstream producers (`"CREDITO"`, `"CONTA BRASILEIRA"`, ...).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use super::{Amount, PartitionKey};

/// Error returned when a wire value does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Kind of financial transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Instant transfer
    #[serde(rename = "PIX")]
    InstantTransfer,
    /// Domestic wire transfer
    #[serde(rename = "TED")]
    WireTransfer,
    /// Currency exchange
    #[serde(rename = "CAMBIO")]
    Exchange,
    #[serde(rename = "TRANSACAO DE CARTAO")]
    CardPurchase,
    #[serde(rename = "ACAO")]
    SecurityTrade,
    #[serde(rename = "WIRE")]
    CrossBorderWire,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::InstantTransfer => "PIX",
            TransactionType::WireTransfer => "TED",
            TransactionType::Exchange => "CAMBIO",
            TransactionType::CardPurchase => "TRANSACAO DE CARTAO",
            TransactionType::SecurityTrade => "ACAO",
            TransactionType::CrossBorderWire => "WIRE",
        }
    }
}

impl FromStr for TransactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PIX" => Ok(TransactionType::InstantTransfer),
            "TED" => Ok(TransactionType::WireTransfer),
            "CAMBIO" => Ok(TransactionType::Exchange),
            "TRANSACAO DE CARTAO" => Ok(TransactionType::CardPurchase),
            "ACAO" => Ok(TransactionType::SecurityTrade),
            "WIRE" => Ok(TransactionType::CrossBorderWire),
            other => Err(UnknownVariant::new("transaction type", other)),
        }
    }
}

/// Direction of a ledger movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "CREDITO")]
    Credit,
    #[serde(rename = "DEBITO")]
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "CREDITO",
            Direction::Debit => "DEBITO",
        }
    }
}

impl FromStr for Direction {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREDITO" => Ok(Direction::Credit),
            "DEBITO" => Ok(Direction::Debit),
            other => Err(UnknownVariant::new("direction", other)),
        }
    }
}

/// Account product the balance belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccountType {
    #[serde(rename = "CONTA BRASILEIRA")]
    Brazilian,
    #[serde(rename = "CONTA INVESTIMENTO")]
    Investment,
    #[serde(rename = "CONTA BANKING")]
    Banking,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Brazilian => "CONTA BRASILEIRA",
            AccountType::Investment => "CONTA INVESTIMENTO",
            AccountType::Banking => "CONTA BANKING",
        }
    }
}

impl FromStr for AccountType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONTA BRASILEIRA" => Ok(AccountType::Brazilian),
            "CONTA INVESTIMENTO" => Ok(AccountType::Investment),
            "CONTA BANKING" => Ok(AccountType::Banking),
            other => Err(UnknownVariant::new("account type", other)),
        }
    }
}

/// Currency of the account partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CurrencyType {
    #[serde(rename = "BRL")]
    Brl,
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "EUR")]
    Eur,
}

impl CurrencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyType::Brl => "BRL",
            CurrencyType::Usd => "USD",
            CurrencyType::Eur => "EUR",
        }
    }
}

impl FromStr for CurrencyType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BRL" => Ok(CurrencyType::Brl),
            "USD" => Ok(CurrencyType::Usd),
            "EUR" => Ok(CurrencyType::Eur),
            other => Err(UnknownVariant::new("currency", other)),
        }
    }
}

macro_rules! impl_display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

impl_display_as_str!(TransactionType, Direction, AccountType, CurrencyType);

/// Globally unique event identifier, the deduplication key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id for events submitted without one
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Free-form metadata, opaque to the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Event payload exactly as received on intake, before validation.
///
/// Every field is optional and enumerations are kept as strings so the
/// validator can report the first failing check instead of a parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransactionEvent {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub user_id: Option<String>,

    #[serde(default)]
    pub account: Option<String>,

    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default, rename = "type")]
    pub transaction_type: Option<String>,

    #[serde(default)]
    pub direction: Option<String>,

    #[serde(default)]
    pub amount: Option<Decimal>,

    /// Caller-reported balance snapshot (advisory)
    #[serde(default)]
    pub balance: Option<Decimal>,

    #[serde(default)]
    pub metadata: Option<TransactionMetadata>,

    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// An accepted transaction event, as carried on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub id: EventId,
    pub user_id: String,
    pub account: AccountType,
    pub currency: CurrencyType,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub amount: Amount,
    /// Caller-reported balance. Kept for audit, never used for computation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Decimal>,
    #[serde(default)]
    pub metadata: TransactionMetadata,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TransactionEvent {
    /// The (user, account, currency) partition this event belongs to
    pub fn partition(&self) -> PartitionKey {
        PartitionKey::new(self.user_id.clone(), self.account, self.currency)
    }

    /// SHA-256 over the canonical JSON payload.
    ///
    /// Used to notice an id being reused for a different payload.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}
