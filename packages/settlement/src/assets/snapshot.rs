use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::BTreeMap;

use super::{Asset, AssetKind, AssetRegistry};
use crate::error::Result;
use crate::snapshot::{decode, encode, unknown_key, StateProvider};

pub const ACTIVE_ASSETS_KEY: &str = "active_assets";
pub const PENDING_ASSETS_KEY: &str = "pending_assets";
pub const PENDING_UPDATES_ASSETS_KEY: &str = "pending_updates_assets";

const KEYS: &[&str] = &[
    ACTIVE_ASSETS_KEY,
    PENDING_ASSETS_KEY,
    PENDING_UPDATES_ASSETS_KEY,
];

#[derive(BorshSerialize, BorshDeserialize)]
struct AssetsPayload {
    assets: Vec<Asset>,
}

fn payload(assets: &BTreeMap<String, Asset>) -> AssetsPayload {
    AssetsPayload {
        assets: assets.values().cloned().collect(),
    }
}

fn by_id(assets: Vec<Asset>) -> BTreeMap<String, Asset> {
    assets
        .into_iter()
        .map(|asset| (asset.id().to_string(), asset))
        .collect()
}

impl StateProvider for AssetRegistry {
    fn namespace(&self) -> &'static str {
        "assets"
    }

    fn keys(&self) -> &'static [&'static str] {
        KEYS
    }

    fn serialize_state(&self, key: &str) -> Result<Vec<u8>> {
        match key {
            ACTIVE_ASSETS_KEY => encode(key, &payload(&self.assets)),
            PENDING_ASSETS_KEY => encode(key, &payload(&self.pending)),
            PENDING_UPDATES_ASSETS_KEY => encode(key, &payload(&self.pending_updates)),
            _ => Err(unknown_key(key)),
        }
    }

    fn restore_state(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        match key {
            ACTIVE_ASSETS_KEY => {
                let restored: AssetsPayload = decode(key, bytes)?;
                self.assets.clear();
                self.addresses.clear();
                for asset in restored.assets {
                    self.insert_enabled(asset);
                }
            }
            PENDING_ASSETS_KEY => {
                let restored: AssetsPayload = decode(key, bytes)?;
                self.pending = by_id(restored.assets);
            }
            PENDING_UPDATES_ASSETS_KEY => {
                let restored: AssetsPayload = decode(key, bytes)?;
                self.pending_updates = by_id(restored.assets);
            }
            _ => return Err(unknown_key(key)),
        }
        Ok(())
    }
}
