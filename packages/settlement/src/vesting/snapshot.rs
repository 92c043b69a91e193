use borsh::{BorshDeserialize, BorshSerialize};

use super::{Engine, PartyRewards};
use crate::error::Result;
use crate::snapshot::{decode, encode, unknown_key, StateProvider};

pub const VESTING_KEY: &str = "vesting";

const KEYS: &[&str] = &[VESTING_KEY];

#[derive(BorshSerialize, BorshDeserialize)]
struct PartyRewardsEntry {
    party: String,
    locked: Vec<(String, Vec<(u64, u128)>)>,
    vesting: Vec<(String, u128)>,
}

#[derive(BorshSerialize, BorshDeserialize)]
struct VestingPayload {
    parties: Vec<PartyRewardsEntry>,
}

impl StateProvider for Engine {
    fn namespace(&self) -> &'static str {
        "vesting"
    }

    fn keys(&self) -> &'static [&'static str] {
        KEYS
    }

    fn serialize_state(&self, key: &str) -> Result<Vec<u8>> {
        if key != VESTING_KEY {
            return Err(unknown_key(key));
        }
        let parties = self
            .state
            .iter()
            .map(|(party, rewards)| PartyRewardsEntry {
                party: party.clone(),
                locked: rewards
                    .locked
                    .iter()
                    .map(|(asset, locks)| {
                        (asset.clone(), locks.iter().map(|(l, a)| (*l, *a)).collect())
                    })
                    .collect(),
                vesting: rewards
                    .vesting
                    .iter()
                    .map(|(asset, amount)| (asset.clone(), *amount))
                    .collect(),
            })
            .collect();
        encode(key, &VestingPayload { parties })
    }

    fn restore_state(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        if key != VESTING_KEY {
            return Err(unknown_key(key));
        }
        let restored: VestingPayload = decode(key, bytes)?;
        self.state = restored
            .parties
            .into_iter()
            .map(|entry| {
                let rewards = PartyRewards {
                    locked: entry
                        .locked
                        .into_iter()
                        .map(|(asset, locks)| (asset, locks.into_iter().collect()))
                        .collect(),
                    vesting: entry.vesting.into_iter().collect(),
                };
                (entry.party, rewards)
            })
            .collect();
        self.multiplier_cache.clear();
        Ok(())
    }
}
