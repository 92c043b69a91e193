//! Snapshot partitions
//!
//! Each engine exposes a fixed list of keys. The payload of a key is the borsh
//! encoding of a dedicated struct in which every map has already been turned
//! into a vector sorted by key, so identical state always yields identical
//! bytes.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::error::{Result, SettlementError};

pub trait StateProvider {
    fn namespace(&self) -> &'static str;

    fn keys(&self) -> &'static [&'static str];

    fn serialize_state(&self, key: &str) -> Result<Vec<u8>>;

    /// Replace the partition `key` with the decoded payload.
    fn restore_state(&mut self, key: &str, payload: &[u8]) -> Result<()>;
}

pub fn encode<T: BorshSerialize>(key: &str, value: &T) -> Result<Vec<u8>> {
    value
        .try_to_vec()
        .map_err(|e| SettlementError::SnapshotEncode {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

pub fn decode<T: BorshDeserialize>(key: &str, payload: &[u8]) -> Result<T> {
    T::try_from_slice(payload).map_err(|e| SettlementError::SnapshotDecode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn unknown_key(key: &str) -> SettlementError {
    SettlementError::SnapshotKeyDoesNotExist {
        key: key.to_string(),
    }
}
