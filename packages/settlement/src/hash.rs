//! Hash computation for dedup references and bridge messages
//!
//! Chain-event references are hashed with a length-prefixed layout so that
//! two references only collide if every field matches. Bridge messages use
//! 32-byte big-endian words like the bridge contracts do.

use tiny_keccak::{Hasher, Keccak};

/// Asset class tag for builtin-asset events.
pub const ASSET_CLASS_BUILTIN: &str = "builtin";
/// Asset class tag for ERC20 bridge events.
pub const ASSET_CLASS_ERC20: &str = "erc20";

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Identity of a foreign-chain fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEventRef<'a> {
    pub chain_id: &'a str,
    pub asset_class: &'a str,
    pub block: u64,
    pub tx_hash: &'a str,
    pub log_index: u64,
}

impl<'a> ChainEventRef<'a> {
    /// Key stored in the seen set.
    pub fn dedup_key(&self) -> String {
        hex::encode(keccak256(&self.encode(self.chain_id)))
    }

    /// Key of the same event as seen before references carried a chain id.
    pub fn legacy_dedup_key(&self) -> String {
        hex::encode(keccak256(&self.encode("")))
    }

    fn encode(&self, chain_id: &str) -> Vec<u8> {
        let mut data = Vec::with_capacity(
            16 + chain_id.len() + self.asset_class.len() + self.tx_hash.len() + 16,
        );
        push_str(&mut data, chain_id);
        push_str(&mut data, self.asset_class);
        data.extend_from_slice(&self.block.to_be_bytes());
        push_str(&mut data, self.tx_hash);
        data.extend_from_slice(&self.log_index.to_be_bytes());
        data
    }
}

fn push_str(data: &mut Vec<u8>, s: &str) {
    data.extend_from_slice(&(s.len() as u32).to_be_bytes());
    data.extend_from_slice(s.as_bytes());
}

/// keccak256 over an encoded dispatch strategy, hex encoded.
pub fn dispatch_strategy_hash(encoded: &[u8]) -> String {
    hex::encode(keccak256(encoded))
}

/// Left-pad `bytes` into a 32-byte word (keeps the last 32 bytes if longer).
fn word(bytes: &[u8]) -> [u8; 32] {
    let mut w = [0u8; 32];
    if bytes.len() >= 32 {
        w.copy_from_slice(&bytes[bytes.len() - 32..]);
    } else {
        w[32 - bytes.len()..].copy_from_slice(bytes);
    }
    w
}

/// Decode a 0x-prefixed hex address; undecodable input is hashed instead so
/// the message stays well defined.
fn address_word(address: &str) -> [u8; 32] {
    let trimmed = address.trim_start_matches("0x");
    match hex::decode(trimmed) {
        Ok(bytes) => word(&bytes),
        Err(_) => keccak256(address.as_bytes()),
    }
}

/// Message signed by validators to release an ERC20 withdrawal:
/// keccak256(token, amount, receiver, creation, nonce, "withdrawAsset").
pub fn withdrawal_message(
    token_address: &str,
    amount: u128,
    receiver: &str,
    created_secs: i64,
    nonce: u128,
) -> [u8; 32] {
    let mut data = Vec::with_capacity(6 * 32);
    data.extend_from_slice(&address_word(token_address));
    data.extend_from_slice(&word(&amount.to_be_bytes()));
    data.extend_from_slice(&address_word(receiver));
    data.extend_from_slice(&word(&created_secs.max(0).to_be_bytes()));
    data.extend_from_slice(&word(&nonce.to_be_bytes()));
    data.extend_from_slice(&word(b"withdrawAsset"));
    keccak256(&data)
}

/// Message signed by validators to list an asset on the bridge.
pub fn list_asset_message(
    token_address: &str,
    asset_id: &str,
    lifetime_limit: u128,
    withdraw_threshold: u128,
    nonce: u128,
) -> [u8; 32] {
    let mut data = Vec::with_capacity(6 * 32);
    data.extend_from_slice(&address_word(token_address));
    data.extend_from_slice(&address_word(asset_id));
    data.extend_from_slice(&word(&lifetime_limit.to_be_bytes()));
    data.extend_from_slice(&word(&withdraw_threshold.to_be_bytes()));
    data.extend_from_slice(&word(&nonce.to_be_bytes()));
    data.extend_from_slice(&word(b"listAsset"));
    keccak256(&data)
}

/// Message signed by validators to change an asset's bridge limits.
pub fn set_asset_limits_message(
    token_address: &str,
    lifetime_limit: u128,
    withdraw_threshold: u128,
    nonce: u128,
) -> [u8; 32] {
    let mut data = Vec::with_capacity(5 * 32);
    data.extend_from_slice(&address_word(token_address));
    data.extend_from_slice(&word(&lifetime_limit.to_be_bytes()));
    data.extend_from_slice(&word(&withdraw_threshold.to_be_bytes()));
    data.extend_from_slice(&word(&nonce.to_be_bytes()));
    data.extend_from_slice(&word(b"setAssetLimits"));
    keccak256(&data)
}
