//! Event Validator
//!
//! Normalizes and validates inbound transaction events. Pure: no I/O, no clock.
//!
//! Checks run in a fixed order and the first failure is reported:
//! 1. required fields present and non-empty
//! 2. amount > 0 (and within precision/range limits)
//! 3. direction is known
//! 4. transaction type is known
//! 5. created_at <= processed_at
//! 6. identifiers well-formed, account type and currency known

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{
    AccountType, Amount, CurrencyType, Direction, EventId, RawTransactionEvent, RejectionReason,
    TransactionEvent, TransactionMetadata, TransactionType,
};

const MAX_IDENTIFIER_LEN: usize = 128;

/// An event that passed every check, possibly still without an id
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEvent {
    pub id: Option<EventId>,
    pub user_id: String,
    pub account: AccountType,
    pub currency: CurrencyType,
    pub transaction_type: TransactionType,
    pub direction: Direction,
    pub amount: Amount,
    pub balance: Option<Decimal>,
    pub metadata: TransactionMetadata,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ValidEvent {
    /// Finalize into a queueable event, generating an id when the caller sent none.
    pub fn into_event(self) -> TransactionEvent {
        TransactionEvent {
            id: self.id.unwrap_or_else(EventId::generate),
            user_id: self.user_id,
            account: self.account,
            currency: self.currency,
            transaction_type: self.transaction_type,
            direction: self.direction,
            amount: self.amount,
            balance: self.balance,
            metadata: self.metadata,
            processed_at: self.processed_at,
            created_at: self.created_at,
        }
    }
}

/// Validate a raw event.
pub fn validate(raw: &RawTransactionEvent) -> Result<ValidEvent, RejectionReason> {
    // 1. Required fields
    if matches!(raw.id.as_deref(), Some(id) if id.trim().is_empty()) {
        return Err(RejectionReason::MissingField("id"));
    }
    let user_id = required_str(&raw.user_id, "user_id")?;
    let account = required_str(&raw.account, "account")?;
    let currency = required_str(&raw.currency, "currency")?;
    let transaction_type = required_str(&raw.transaction_type, "type")?;
    let direction = required_str(&raw.direction, "direction")?;
    let amount = raw.amount.ok_or(RejectionReason::MissingField("amount"))?;
    let processed_at = raw
        .processed_at
        .ok_or(RejectionReason::MissingField("processed_at"))?;
    let created_at = raw
        .created_at
        .ok_or(RejectionReason::MissingField("created_at"))?;

    // 2. Amount
    let amount = Amount::new(amount)?;

    // 3. Direction
    let direction: Direction = direction
        .parse()
        .map_err(|_| RejectionReason::UnknownDirection(direction.to_string()))?;

    // 4. Transaction type
    let transaction_type: TransactionType = transaction_type
        .parse()
        .map_err(|_| RejectionReason::UnknownTransactionType(transaction_type.to_string()))?;

    // 5. Timestamps
    if created_at > processed_at {
        return Err(RejectionReason::CreatedAfterProcessed);
    }

    // 6. Identifiers
    let id = match raw.id.as_deref() {
        Some(id) => Some(EventId::new(well_formed(id.trim(), "id")?)),
        None => None,
    };
    let user_id = well_formed(user_id, "user_id")?;
    let account: AccountType = account
        .parse()
        .map_err(|_| RejectionReason::UnknownAccountType(account.to_string()))?;
    let currency: CurrencyType = currency
        .parse()
        .map_err(|_| RejectionReason::UnknownCurrency(currency.to_string()))?;

    Ok(ValidEvent {
        id,
        user_id: user_id.to_string(),
        account,
        currency,
        transaction_type,
        direction,
        amount,
        balance: raw.balance,
        metadata: raw.metadata.clone().unwrap_or_default(),
        processed_at,
        created_at,
    })
}

fn required_str<'a>(
    value: &'a Option<String>,
    field: &'static str,
) -> Result<&'a str, RejectionReason> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(RejectionReason::MissingField(field)),
    }
}

/// Identifier rule shared by intake and partition lookups: ASCII
/// alphanumerics plus `-_.:`, at most 128 characters.
pub fn well_formed<'a>(value: &'a str, field: &'static str) -> Result<&'a str, RejectionReason> {
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));

    if value.is_empty() || value.len() > MAX_IDENTIFIER_LEN || !valid_chars {
        return Err(RejectionReason::MalformedIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}
