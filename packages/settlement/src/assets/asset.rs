//! Asset definitions
//!
//! An [`Asset`] is either builtin (lives only on this chain) or an ERC20
//! token locked in a bridge contract on a foreign chain. Lifecycle handling is
//! shared through [`AssetKind`]; anything touching the bridge (signing
//! messages, limits) needs an explicit match on the variant.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SettlementError};
use crate::hash;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum AssetStatus {
    Proposed,
    PendingListing,
    Enabled,
    Rejected,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Proposed => "proposed",
            AssetStatus::PendingListing => "pending_listing",
            AssetStatus::Enabled => "enabled",
            AssetStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Source-independent description of an asset.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct AssetDetails {
    pub name: String,
    pub symbol: String,
    pub decimals: u64,
    /// Reference unit used to size minimum transfers and fee caps.
    pub quantum: u128,
}

impl AssetDetails {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SettlementError::InvalidAssetDetails {
                reason: "name is empty".to_string(),
            });
        }
        if self.symbol.is_empty() {
            return Err(SettlementError::InvalidAssetDetails {
                reason: "symbol is empty".to_string(),
            });
        }
        if self.quantum == 0 {
            return Err(SettlementError::InvalidAssetDetails {
                reason: "quantum must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Where an asset comes from, as submitted in a proposal or genesis file.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AssetSource {
    Builtin {
        max_faucet_amount_mint: u128,
    },
    Erc20 {
        chain_id: String,
        contract_address: String,
        lifetime_limit: u128,
        withdraw_threshold: u128,
    },
}

/// Fields every asset carries regardless of source.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct AssetCore {
    pub id: String,
    pub details: AssetDetails,
    pub status: AssetStatus,
    /// Set once the witness (or a non-validator node) accepted the asset.
    pub valid: bool,
}

/// Lifecycle operations shared by every asset source.
pub trait AssetKind {
    fn core(&self) -> &AssetCore;

    fn core_mut(&mut self) -> &mut AssetCore;

    fn id(&self) -> &str {
        &self.core().id
    }

    fn details(&self) -> &AssetDetails {
        &self.core().details
    }

    fn status(&self) -> AssetStatus {
        self.core().status
    }

    fn is_valid(&self) -> bool {
        self.core().valid
    }

    fn set_valid(&mut self) {
        self.core_mut().valid = true;
    }

    fn set_pending_listing(&mut self) {
        self.core_mut().status = AssetStatus::PendingListing;
    }

    fn set_enabled(&mut self) {
        self.core_mut().status = AssetStatus::Enabled;
    }

    fn set_rejected(&mut self) {
        self.core_mut().status = AssetStatus::Rejected;
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct BuiltinAsset {
    pub core: AssetCore,
    pub max_faucet_amount_mint: u128,
}

impl AssetKind for BuiltinAsset {
    fn core(&self) -> &AssetCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AssetCore {
        &mut self.core
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub struct Erc20Asset {
    pub core: AssetCore,
    pub chain_id: String,
    pub contract_address: String,
    pub lifetime_limit: u128,
    pub withdraw_threshold: u128,
}

impl AssetKind for Erc20Asset {
    fn core(&self) -> &AssetCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AssetCore {
        &mut self.core
    }
}

impl Erc20Asset {
    pub fn list_asset_message(&self, nonce: u128) -> [u8; 32] {
        hash::list_asset_message(
            &self.contract_address,
            &self.core.id,
            self.lifetime_limit,
            self.withdraw_threshold,
            nonce,
        )
    }

    pub fn set_asset_limits_message(&self, nonce: u128) -> [u8; 32] {
        hash::set_asset_limits_message(
            &self.contract_address,
            self.lifetime_limit,
            self.withdraw_threshold,
            nonce,
        )
    }

    pub fn withdrawal_message(
        &self,
        amount: u128,
        receiver: &str,
        created_secs: i64,
        nonce: u128,
    ) -> [u8; 32] {
        hash::withdrawal_message(&self.contract_address, amount, receiver, created_secs, nonce)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, BorshSerialize, BorshDeserialize,
)]
pub enum Asset {
    Builtin(BuiltinAsset),
    Erc20(Erc20Asset),
}

impl AssetKind for Asset {
    fn core(&self) -> &AssetCore {
        match self {
            Asset::Builtin(a) => a.core(),
            Asset::Erc20(a) => a.core(),
        }
    }

    fn core_mut(&mut self) -> &mut AssetCore {
        match self {
            Asset::Builtin(a) => a.core_mut(),
            Asset::Erc20(a) => a.core_mut(),
        }
    }
}

impl Asset {
    /// Build a freshly proposed asset.
    pub fn new(id: &str, details: AssetDetails, source: AssetSource) -> Self {
        let core = AssetCore {
            id: id.to_string(),
            details,
            status: AssetStatus::Proposed,
            valid: false,
        };
        match source {
            AssetSource::Builtin {
                max_faucet_amount_mint,
            } => Asset::Builtin(BuiltinAsset {
                core,
                max_faucet_amount_mint,
            }),
            AssetSource::Erc20 {
                chain_id,
                contract_address,
                lifetime_limit,
                withdraw_threshold,
            } => Asset::Erc20(Erc20Asset {
                core,
                chain_id,
                contract_address,
                lifetime_limit,
                withdraw_threshold,
            }),
        }
    }

    pub fn source(&self) -> AssetSource {
        match self {
            Asset::Builtin(a) => AssetSource::Builtin {
                max_faucet_amount_mint: a.max_faucet_amount_mint,
            },
            Asset::Erc20(a) => AssetSource::Erc20 {
                chain_id: a.chain_id.clone(),
                contract_address: a.contract_address.clone(),
                lifetime_limit: a.lifetime_limit,
                withdraw_threshold: a.withdraw_threshold,
            },
        }
    }

    pub fn quantum(&self) -> u128 {
        self.details().quantum
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Asset::Builtin(_))
    }

    pub fn as_erc20(&self) -> Option<&Erc20Asset> {
        match self {
            Asset::Erc20(a) => Some(a),
            Asset::Builtin(_) => None,
        }
    }

    /// Message validators sign to release a withdrawal of this asset.
    pub fn withdrawal_message(
        &self,
        amount: u128,
        receiver: &str,
        created_secs: i64,
        nonce: u128,
    ) -> Result<[u8; 32]> {
        match self {
            Asset::Erc20(a) => Ok(a.withdrawal_message(amount, receiver, created_secs, nonce)),
            Asset::Builtin(_) => Err(SettlementError::WrongAssetUsedForErc20Withdraw),
        }
    }

    /// Apply a staged update. Identity fields (id, decimals, source chain and
    /// contract) cannot change.
    pub fn update(&mut self, staged: &Asset) -> Result<()> {
        if self.id() != staged.id() || self.details().decimals != staged.details().decimals {
            return Err(SettlementError::InvalidAssetDetails {
                reason: "asset identity cannot change".to_string(),
            });
        }
        match (self, staged) {
            (Asset::Builtin(current), Asset::Builtin(next)) => {
                current.core.details = next.core.details.clone();
                current.max_faucet_amount_mint = next.max_faucet_amount_mint;
                Ok(())
            }
            (Asset::Erc20(current), Asset::Erc20(next)) => {
                if current.chain_id != next.chain_id
                    || current.contract_address != next.contract_address
                {
                    return Err(SettlementError::InvalidAssetDetails {
                        reason: "bridged contract cannot change".to_string(),
                    });
                }
                current.core.details = next.core.details.clone();
                current.lifetime_limit = next.lifetime_limit;
                current.withdraw_threshold = next.withdraw_threshold;
                Ok(())
            }
            _ => Err(SettlementError::UnknownAssetSource),
        }
    }

    /// True when `details` and `source` describe this asset.
    pub fn matches(&self, details: &AssetDetails, source: &AssetSource) -> bool {
        self.details() == details && &self.source() == source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(symbol: &str) -> AssetDetails {
        AssetDetails {
            name: format!("{symbol} token"),
            symbol: symbol.to_string(),
            decimals: 18,
            quantum: 100,
        }
    }

    fn erc20_source(limit: u128) -> AssetSource {
        AssetSource::Erc20 {
            chain_id: "1".to_string(),
            contract_address: "0xdead".to_string(),
            lifetime_limit: limit,
            withdraw_threshold: 10,
        }
    }

    #[test]
    fn test_new_asset_is_proposed_and_invalid() {
        let asset = Asset::new("a1", details("ETH"), erc20_source(1_000));
        assert_eq!(asset.status(), AssetStatus::Proposed);
        assert!(!asset.is_valid());
        assert_eq!(asset.id(), "a1");
        assert_eq!(asset.quantum(), 100);
    }

    #[test]
    fn test_lifecycle_setters() {
        let mut asset = Asset::new("a1", details("VEGA"), AssetSource::Builtin {
            max_faucet_amount_mint: 10,
        });
        asset.set_valid();
        asset.set_pending_listing();
        assert_eq!(asset.status(), AssetStatus::PendingListing);
        asset.set_enabled();
        assert_eq!(asset.status(), AssetStatus::Enabled);
        assert!(asset.is_valid());
    }

    #[test]
    fn test_builtin_has_no_withdrawal_message() {
        let asset = Asset::new("a1", details("VEGA"), AssetSource::Builtin {
            max_faucet_amount_mint: 10,
        });
        assert_eq!(
            asset.withdrawal_message(1, "0xbeef", 0, 1),
            Err(SettlementError::WrongAssetUsedForErc20Withdraw)
        );
        assert!(asset.as_erc20().is_none());
    }

    #[test]
    fn test_update_erc20_limits() {
        let mut current = Asset::new("a1", details("ETH"), erc20_source(1_000));
        let staged = Asset::new("a1", details("ETH"), erc20_source(5_000));
        current.update(&staged).unwrap();
        assert_eq!(current.as_erc20().unwrap().lifetime_limit, 5_000);
    }

    #[test]
    fn test_update_rejects_source_change() {
        let mut current = Asset::new("a1", details("ETH"), erc20_source(1_000));
        let staged = Asset::new("a1", details("ETH"), AssetSource::Builtin {
            max_faucet_amount_mint: 1,
        });
        assert_eq!(current.update(&staged), Err(SettlementError::UnknownAssetSource));
    }

    #[test]
    fn test_details_validation() {
        assert!(details("ETH").validate().is_ok());
        let bad = AssetDetails {
            quantum: 0,
            ..details("ETH")
        };
        assert!(bad.validate().is_err());
    }
}
