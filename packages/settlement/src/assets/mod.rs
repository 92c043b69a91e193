//! Asset registry
//!
//! Owns every collateral asset definition. Proposed assets live in the pending
//! map until enabled; updates to enabled assets are staged in a side table and
//! applied only once the bridge confirmed them.

mod asset;
mod snapshot;

pub use asset::{
    Asset, AssetCore, AssetDetails, AssetKind, AssetSource, AssetStatus, BuiltinAsset, Erc20Asset,
};
pub use snapshot::{ACTIVE_ASSETS_KEY, PENDING_ASSETS_KEY, PENDING_UPDATES_ASSETS_KEY};

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{Result, SettlementError};
use crate::events::Event;
use crate::interfaces::{BridgeView, Broker, Topology};

/// Asset entry of a genesis file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GenesisAsset {
    pub details: AssetDetails,
    pub source: AssetSource,
}

pub struct AssetRegistry {
    /// Enabled assets
    assets: BTreeMap<String, Asset>,
    pending: BTreeMap<String, Asset>,
    pending_updates: BTreeMap<String, Asset>,
    /// (chain id, lowercase contract address) -> asset id, enabled ERC20s only
    addresses: BTreeMap<(String, String), String>,
    bridge_views: BTreeMap<String, Arc<dyn BridgeView>>,
    topology: Arc<dyn Topology>,
    broker: Arc<dyn Broker>,
}

fn address_key(chain_id: &str, address: &str) -> (String, String) {
    (chain_id.to_string(), address.to_lowercase())
}

impl AssetRegistry {
    pub fn new(topology: Arc<dyn Topology>, broker: Arc<dyn Broker>) -> Self {
        Self {
            assets: BTreeMap::new(),
            pending: BTreeMap::new(),
            pending_updates: BTreeMap::new(),
            addresses: BTreeMap::new(),
            bridge_views: BTreeMap::new(),
            topology,
            broker,
        }
    }

    /// Register the bridge of `chain_id` (primary or secondary).
    pub fn set_bridge_view(&mut self, chain_id: &str, view: Arc<dyn BridgeView>) {
        self.bridge_views.insert(chain_id.to_string(), view);
    }

    pub fn bridge_view(&self, chain_id: &str) -> Option<Arc<dyn BridgeView>> {
        self.bridge_views.get(chain_id).cloned()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Add a proposed asset under the id of the proposal that created it.
    pub fn new_asset(
        &mut self,
        proposal_id: &str,
        details: AssetDetails,
        source: AssetSource,
    ) -> Result<String> {
        details.validate()?;
        if self.assets.contains_key(proposal_id) || self.pending.contains_key(proposal_id) {
            return Err(SettlementError::AssetAlreadyExists {
                id: proposal_id.to_string(),
            });
        }
        if let AssetSource::Erc20 {
            chain_id,
            contract_address,
            ..
        } = &source
        {
            self.validate_ethereum_address(contract_address, chain_id)?;
        }

        let asset = Asset::new(proposal_id, details, source);
        info!(asset_id = %proposal_id, symbol = %asset.details().symbol, "Asset proposed");
        self.broker.send(Event::AssetUpdated {
            asset: asset.clone(),
        });
        self.pending.insert(proposal_id.to_string(), asset);
        Ok(proposal_id.to_string())
    }

    /// Confirm a pending asset exists where its source says it does.
    ///
    /// Non-validator nodes mark it valid unconditionally: they follow
    /// consensus instead of checking the bridge themselves.
    pub fn validate_asset(&mut self, id: &str) -> Result<()> {
        let is_validator = self.topology.is_validator();
        let asset = self
            .pending
            .get_mut(id)
            .ok_or(SettlementError::AssetDoesNotExist)?;

        if is_validator {
            if let Asset::Erc20(erc20) = &*asset {
                let view = self.bridge_views.get(&erc20.chain_id).ok_or_else(|| {
                    SettlementError::UnknownChainId {
                        chain_id: erc20.chain_id.clone(),
                    }
                })?;
                if let Err(e) = view.find_asset(&erc20.contract_address) {
                    warn!(
                        asset_id = %id,
                        address = %erc20.contract_address,
                        error = %e,
                        "Asset not found on bridge"
                    );
                    return Err(SettlementError::AssetNotFoundOnBridge {
                        address: erc20.contract_address.clone(),
                    });
                }
            }
        }

        asset.set_valid();
        debug!(asset_id = %id, "Asset validated");
        Ok(())
    }

    pub fn set_pending_listing(&mut self, id: &str) -> Result<()> {
        let asset = self
            .pending
            .get_mut(id)
            .ok_or(SettlementError::AssetDoesNotExist)?;
        asset.set_pending_listing();
        self.broker.send(Event::AssetUpdated {
            asset: asset.clone(),
        });
        Ok(())
    }

    /// Reject a pending asset. It is dropped from the registry.
    pub fn set_rejected(&mut self, id: &str) -> Result<()> {
        let mut asset = self
            .pending
            .remove(id)
            .ok_or(SettlementError::AssetDoesNotExist)?;
        asset.set_rejected();
        info!(asset_id = %id, "Asset rejected");
        self.broker.send(Event::AssetUpdated { asset });
        Ok(())
    }

    /// Move a pending asset to the enabled set.
    pub fn enable(&mut self, id: &str) -> Result<()> {
        let mut asset = self
            .pending
            .remove(id)
            .ok_or(SettlementError::AssetDoesNotExist)?;
        asset.set_enabled();
        self.insert_enabled(asset.clone());
        info!(asset_id = %id, "Asset enabled");
        self.broker.send(Event::AssetUpdated { asset });
        Ok(())
    }

    fn insert_enabled(&mut self, asset: Asset) {
        if let Asset::Erc20(erc20) = &asset {
            self.addresses.insert(
                address_key(&erc20.chain_id, &erc20.contract_address),
                erc20.core.id.clone(),
            );
        }
        self.assets.insert(asset.id().to_string(), asset);
    }

    // ========================================================================
    // Staged Updates
    // ========================================================================

    /// Stage an update to an enabled asset until the bridge confirms it.
    pub fn stage_asset_update(&mut self, updated: Asset) -> Result<()> {
        let current = self
            .assets
            .get(updated.id())
            .ok_or(SettlementError::AssetDoesNotExist)?;
        if current.is_builtin() != updated.is_builtin() {
            return Err(SettlementError::UnknownAssetSource);
        }
        updated.details().validate()?;
        current.clone().update(&updated)?;
        debug!(asset_id = %updated.id(), "Asset update staged");
        self.pending_updates
            .insert(updated.id().to_string(), updated);
        Ok(())
    }

    pub fn get_pending_update(&self, id: &str) -> Result<&Asset> {
        self.pending_updates
            .get(id)
            .ok_or(SettlementError::AssetDoesNotExist)
    }

    /// Apply a staged update onto the enabled asset.
    ///
    /// Panics if the staged data cannot be applied. Staging runs the same
    /// checks, so a failure here means the state is corrupt.
    pub fn apply_asset_update(&mut self, id: &str) -> Result<&Asset> {
        let staged = self
            .pending_updates
            .get(id)
            .ok_or(SettlementError::AssetDoesNotExist)?;
        let current = self
            .assets
            .get_mut(id)
            .ok_or(SettlementError::AssetDoesNotExist)?;

        if let Err(e) = current.update(staged) {
            error!(asset_id = %id, error = %e, "Staged asset update could not be applied");
            panic!("couldn't update the asset {}: {}", id, e);
        }
        self.pending_updates.remove(id);

        let current = self
            .assets
            .get(id)
            .ok_or(SettlementError::AssetDoesNotExist)?;
        info!(asset_id = %id, "Asset update applied");
        self.broker.send(Event::AssetUpdated {
            asset: current.clone(),
        });
        Ok(current)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Look up an asset, enabled first, then pending.
    pub fn get(&self, id: &str) -> Result<&Asset> {
        self.assets
            .get(id)
            .or_else(|| self.pending.get(id))
            .ok_or(SettlementError::AssetDoesNotExist)
    }

    /// Enabled assets sorted by id
    pub fn get_enabled_assets(&self) -> Vec<&Asset> {
        self.assets.values().collect()
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.assets.contains_key(id)
    }

    pub fn exists_for_address(&self, chain_id: &str, address: &str) -> bool {
        self.addresses.contains_key(&address_key(chain_id, address))
    }

    pub fn get_asset_id_from_address(&self, chain_id: &str, address: &str) -> Option<&str> {
        self.addresses
            .get(&address_key(chain_id, address))
            .map(String::as_str)
    }

    /// Check an ERC20 contract can be proposed as a new asset on `chain_id`.
    pub fn validate_ethereum_address(&self, address: &str, chain_id: &str) -> Result<()> {
        if !self.bridge_views.contains_key(chain_id) {
            return Err(SettlementError::UnknownChainId {
                chain_id: chain_id.to_string(),
            });
        }
        let in_use = self.exists_for_address(chain_id, address)
            || self.pending.values().any(|asset| match asset {
                Asset::Erc20(erc20) => {
                    erc20.chain_id == chain_id
                        && erc20.contract_address.eq_ignore_ascii_case(address)
                }
                Asset::Builtin(_) => false,
            });
        if in_use {
            return Err(SettlementError::Erc20AddressAlreadyInUse {
                address: address.to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // Genesis
    // ========================================================================

    /// Enable the genesis assets.
    ///
    /// Re-loading an asset already known with different details is a fatal
    /// inconsistency.
    pub fn load_genesis(&mut self, assets: BTreeMap<String, GenesisAsset>) -> Result<()> {
        for (id, genesis) in assets {
            if let Ok(existing) = self.get(&id) {
                if existing.matches(&genesis.details, &genesis.source) {
                    debug!(asset_id = %id, "Genesis asset already loaded");
                    continue;
                }
                error!(asset_id = %id, "Genesis asset details disagree with known asset");
                panic!("asset {} already exists with different details", id);
            }

            genesis.details.validate()?;
            let mut asset = Asset::new(&id, genesis.details, genesis.source);
            asset.set_valid();
            asset.set_enabled();
            info!(asset_id = %id, symbol = %asset.details().symbol, "Genesis asset enabled");
            self.broker.send(Event::AssetUpdated {
                asset: asset.clone(),
            });
            self.insert_enabled(asset);
        }
        Ok(())
    }

    pub fn load_genesis_json(&mut self, json: &str) -> Result<()> {
        let assets: BTreeMap<String, GenesisAsset> =
            serde_json::from_str(json).map_err(|e| SettlementError::InvalidAssetDetails {
                reason: e.to_string(),
            })?;
        self.load_genesis(assets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::interfaces::BridgeEvent;
    use std::sync::Mutex;

    struct Node(bool);

    impl Topology for Node {
        fn is_validator(&self) -> bool {
            self.0
        }
    }

    #[derive(Default)]
    struct Events(Mutex<Vec<Event>>);

    impl Broker for Events {
        fn send(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }

        fn send_batch(&self, events: Vec<Event>) {
            self.0.lock().unwrap().extend(events);
        }
    }

    struct Bridge {
        known: Vec<String>,
    }

    impl BridgeView for Bridge {
        fn find_asset(&self, contract_address: &str) -> Result<()> {
            if self.known.iter().any(|a| a == contract_address) {
                Ok(())
            } else {
                Err(SettlementError::BridgeView("unknown".to_string()))
            }
        }

        fn find_event(&self, _event: &BridgeEvent<'_>) -> Result<()> {
            Ok(())
        }
    }

    fn registry(validator: bool) -> (AssetRegistry, Arc<Events>) {
        let events = Arc::new(Events::default());
        let mut registry = AssetRegistry::new(Arc::new(Node(validator)), events.clone());
        registry.set_bridge_view(
            "1",
            Arc::new(Bridge {
                known: vec!["0xaaa".to_string()],
            }),
        );
        (registry, events)
    }

    fn details(symbol: &str) -> AssetDetails {
        AssetDetails {
            name: symbol.to_string(),
            symbol: symbol.to_string(),
            decimals: 18,
            quantum: 1,
        }
    }

    fn erc20(address: &str) -> AssetSource {
        AssetSource::Erc20 {
            chain_id: "1".to_string(),
            contract_address: address.to_string(),
            lifetime_limit: 100,
            withdraw_threshold: 10,
        }
    }

    #[test]
    fn test_propose_enable() {
        let (mut registry, events) = registry(true);
        let id = registry.new_asset("p1", details("ETH"), erc20("0xaaa")).unwrap();
        assert_eq!(registry.get(&id).unwrap().status(), AssetStatus::Proposed);
        assert!(!registry.is_enabled(&id));

        registry.validate_asset(&id).unwrap();
        registry.set_pending_listing(&id).unwrap();
        registry.enable(&id).unwrap();

        let asset = registry.get(&id).unwrap();
        assert_eq!(asset.status(), AssetStatus::Enabled);
        assert!(asset.is_valid());
        assert!(registry.exists_for_address("1", "0xaaa"));
        assert_eq!(registry.get_asset_id_from_address("1", "0xAaA"), Some("p1"));
        assert_eq!(events.0.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_validator_checks_bridge() {
        let (mut registry, _) = registry(true);
        registry.new_asset("p1", details("DAI"), erc20("0xbbb")).unwrap();
        assert_eq!(
            registry.validate_asset("p1"),
            Err(SettlementError::AssetNotFoundOnBridge {
                address: "0xbbb".to_string()
            })
        );
        assert!(!registry.get("p1").unwrap().is_valid());
    }

    #[test]
    fn test_non_validator_skips_bridge() {
        let (mut registry, _) = registry(false);
        registry.new_asset("p1", details("DAI"), erc20("0xbbb")).unwrap();
        registry.validate_asset("p1").unwrap();
        assert!(registry.get("p1").unwrap().is_valid());
    }

    #[test]
    fn test_address_in_use() {
        let (mut registry, _) = registry(true);
        registry.new_asset("p1", details("ETH"), erc20("0xaaa")).unwrap();
        assert_eq!(
            registry.new_asset("p2", details("ETH2"), erc20("0xAAA")),
            Err(SettlementError::Erc20AddressAlreadyInUse {
                address: "0xAAA".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_chain() {
        let (registry, _) = registry(true);
        assert!(matches!(
            registry.validate_ethereum_address("0xaaa", "56"),
            Err(SettlementError::UnknownChainId { .. })
        ));
    }

    #[test]
    fn test_apply_update_requires_stage() {
        let (mut registry, _) = registry(true);
        registry.new_asset("p1", details("ETH"), erc20("0xaaa")).unwrap();
        registry.enable("p1").unwrap();
        assert_eq!(
            registry.apply_asset_update("p1").map(|_| ()),
            Err(SettlementError::AssetDoesNotExist)
        );

        let mut updated = registry.get("p1").unwrap().clone();
        if let Asset::Erc20(erc20) = &mut updated {
            erc20.lifetime_limit = 500;
        }
        registry.stage_asset_update(updated).unwrap();
        assert!(registry.get_pending_update("p1").is_ok());

        let applied = registry.apply_asset_update("p1").unwrap();
        assert_eq!(applied.as_erc20().unwrap().lifetime_limit, 500);
        assert!(registry.get_pending_update("p1").is_err());
    }

    #[test]
    fn test_stage_requires_enabled() {
        let (mut registry, _) = registry(true);
        registry.new_asset("p1", details("ETH"), erc20("0xaaa")).unwrap();
        let pending = registry.get("p1").unwrap().clone();
        assert_eq!(
            registry.stage_asset_update(pending),
            Err(SettlementError::AssetDoesNotExist)
        );
    }

    #[test]
    fn test_staging_identity_change_refused() {
        let (mut registry, _) = registry(true);
        registry.new_asset("p1", details("ETH"), erc20("0xaaa")).unwrap();
        registry.enable("p1").unwrap();

        let mut decimals = registry.get("p1").unwrap().clone();
        if let Asset::Erc20(erc20) = &mut decimals {
            erc20.core.details.decimals = 6;
        }
        assert!(matches!(
            registry.stage_asset_update(decimals),
            Err(SettlementError::InvalidAssetDetails { .. })
        ));

        let mut contract = registry.get("p1").unwrap().clone();
        if let Asset::Erc20(erc20) = &mut contract {
            erc20.contract_address = "0xbbb".to_string();
        }
        assert!(matches!(
            registry.stage_asset_update(contract),
            Err(SettlementError::InvalidAssetDetails { .. })
        ));

        assert!(registry.get_pending_update("p1").is_err());
        // nothing staged, so applying cannot panic
        assert_eq!(
            registry.apply_asset_update("p1").map(|_| ()),
            Err(SettlementError::AssetDoesNotExist)
        );
    }

    #[test]
    fn test_genesis_json() {
        let (mut registry, _) = registry(false);
        let json = r#"{
            "VOTE": {
                "details": {"name": "vote", "symbol": "VOTE", "decimals": 5, "quantum": 1},
                "source": {"builtin": {"max_faucet_amount_mint": 10}}
            }
        }"#;
        registry.load_genesis_json(json).unwrap();
        assert!(registry.is_enabled("VOTE"));
        // idempotent when details agree
        registry.load_genesis_json(json).unwrap();
        assert_eq!(registry.get_enabled_assets().len(), 1);
    }

    #[test]
    #[should_panic(expected = "already exists with different details")]
    fn test_genesis_mismatch_is_fatal() {
        let (mut registry, _) = registry(false);
        let mut assets = BTreeMap::new();
        assets.insert(
            "VOTE".to_string(),
            GenesisAsset {
                details: details("VOTE"),
                source: AssetSource::Builtin {
                    max_faucet_amount_mint: 1,
                },
            },
        );
        registry.load_genesis(assets.clone()).unwrap();
        if let Some(genesis) = assets.get_mut("VOTE") {
            genesis.details.decimals = 6;
        }
        let _ = registry.load_genesis(assets);
    }
}
