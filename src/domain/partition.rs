//! Partition key
//!
//! `(user_id, account, currency)` defines an independent balance and
//! ordering domain.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::{AccountType, CurrencyType};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub user_id: String,
    pub account: AccountType,
    pub currency: CurrencyType,
}

impl PartitionKey {
    pub fn new(user_id: impl Into<String>, account: AccountType, currency: CurrencyType) -> Self {
        Self {
            user_id: user_id.into(),
            account,
            currency,
        }
    }

    /// Stable routing of a partition onto one of `shard_count` queue lanes.
    ///
    /// The value is persisted with queued messages, so it must not depend on
    /// process-local hashing.
    pub fn shard(&self, shard_count: usize) -> usize {
        if shard_count <= 1 {
            return 0;
        }

        let mut hasher = Sha256::new();
        hasher.update(self.user_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.account.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.currency.as_str().as_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(prefix) % shard_count as u64) as usize
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.account, self.currency)
    }
}
