//! Vesting engine
//!
//! Rewards land here first. A reward locked for `n` epochs waits `n` epoch
//! ends before it starts vesting. Vesting balances are paid out to the
//! party's vested account a fraction at a time, once per epoch.

mod snapshot;

pub use snapshot::VESTING_KEY;

use bigdecimal::BigDecimal;
use num_traits::One;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::assets::AssetRegistry;
use crate::config::{BenefitTier, NetworkParameters};
use crate::error::{Result, SettlementError};
use crate::events::Event;
use crate::interfaces::{ActivityStreak, Broker, Ledger, Parties};
use crate::metrics;
use crate::num::{floor_to_amount, from_amount, mul_amount};
use crate::types::{AssetId, Epoch, EpochAction, PartyId, Transfer, TransferType};

/// Prefix of the cache entries holding the summed view of a party
const OWNER_PREFIX: &str = "owner-";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartyRewards {
    /// asset -> epochs left -> amount
    pub locked: BTreeMap<AssetId, BTreeMap<u64, u128>>,
    /// asset -> amount available for vesting
    pub vesting: BTreeMap<AssetId, u128>,
}

impl PartyRewards {
    fn is_empty(&self) -> bool {
        self.locked.is_empty() && self.vesting.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MultiplierAndQuantumBalance {
    pub multiplier: BigDecimal,
    pub quantum_balance: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartyVestingStats {
    pub party: PartyId,
    pub reward_bonus_multiplier: BigDecimal,
    pub quantum_balance: u128,
    pub summed_reward_bonus_multiplier: BigDecimal,
    pub summed_quantum_balance: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedBalance {
    pub asset: AssetId,
    pub amount: u128,
    pub until_epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VestingBalance {
    pub asset: AssetId,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartyVestingSummary {
    pub party: PartyId,
    pub locked: Vec<LockedBalance>,
    pub vesting: Vec<VestingBalance>,
}

/// Amount released from `balance` in one epoch: `balance × rate`, raised to
/// the minimum transfer and capped by the balance.
pub fn vested_payout(
    balance: u128,
    quantum: u128,
    rate: &BigDecimal,
    minimum_transfer: &BigDecimal,
) -> u128 {
    let minimum = mul_amount(quantum, minimum_transfer);
    let expected = floor_to_amount(&(from_amount(balance) * rate));
    expected.max(minimum).min(balance)
}

pub struct Engine {
    ledger: Arc<dyn Ledger>,
    broker: Arc<dyn Broker>,
    streak: Arc<dyn ActivityStreak>,
    parties: Arc<dyn Parties>,

    base_rate: BigDecimal,
    min_transfer: BigDecimal,
    benefit_tiers: Vec<BenefitTier>,

    state: BTreeMap<PartyId, PartyRewards>,
    /// Cleared at every epoch boundary
    multiplier_cache: BTreeMap<String, MultiplierAndQuantumBalance>,
}

impl Engine {
    pub fn new(
        params: &NetworkParameters,
        ledger: Arc<dyn Ledger>,
        broker: Arc<dyn Broker>,
        streak: Arc<dyn ActivityStreak>,
        parties: Arc<dyn Parties>,
    ) -> Self {
        Self {
            ledger,
            broker,
            streak,
            parties,
            base_rate: params.rewards_vesting_base_rate.clone(),
            min_transfer: params.rewards_vesting_minimum_transfer.clone(),
            benefit_tiers: params.vesting_benefit_tiers.clone(),
            state: BTreeMap::new(),
            multiplier_cache: BTreeMap::new(),
        }
    }

    // ========================================================================
    // Network Parameter Updates
    // ========================================================================

    /// Replace the benefit table. Thresholds must be distinct.
    pub fn on_benefit_tiers_update(&mut self, mut tiers: Vec<BenefitTier>) -> Result<()> {
        tiers.sort_by_key(|t| t.minimum_quantum_balance);
        if tiers
            .windows(2)
            .any(|pair| pair[0].minimum_quantum_balance == pair[1].minimum_quantum_balance)
        {
            return Err(SettlementError::InvalidBenefitTiers {
                reason: "duplicate minimum quantum balance".to_string(),
            });
        }
        self.benefit_tiers = tiers;
        Ok(())
    }

    pub fn on_reward_vesting_base_rate_update(&mut self, base_rate: BigDecimal) {
        self.base_rate = base_rate;
    }

    pub fn on_reward_vesting_minimum_transfer_update(&mut self, minimum_transfer: BigDecimal) {
        self.min_transfer = minimum_transfer;
    }

    // ========================================================================
    // Rewards
    // ========================================================================

    pub fn add_reward(&mut self, party: &str, asset: &str, amount: u128, locked_for_epochs: u64) {
        if amount == 0 {
            return;
        }
        let rewards = self.state.entry(party.to_string()).or_default();
        let balance = if locked_for_epochs == 0 {
            rewards.vesting.entry(asset.to_string()).or_default()
        } else {
            rewards
                .locked
                .entry(asset.to_string())
                .or_default()
                .entry(locked_for_epochs)
                .or_default()
        };
        *balance = balance.saturating_add(amount);
        debug!(party, asset, amount, locked_for_epochs, "Reward added");
    }

    pub fn party_rewards(&self, party: &str) -> Option<&PartyRewards> {
        self.state.get(party)
    }

    pub fn on_epoch(&mut self, assets: &AssetRegistry, epoch: Epoch) {
        if epoch.action != EpochAction::End {
            return;
        }
        self.multiplier_cache.clear();
        self.move_locked();
        self.distribute_vested(assets);
        self.broadcast_stats(epoch.seq);
        self.broadcast_summary(epoch.seq);
        self.state.retain(|_, rewards| !rewards.is_empty());
        self.multiplier_cache.clear();
        info!(epoch = epoch.seq, parties = self.state.len(), "Vesting epoch ended");
    }

    /// Count every lock down by one epoch; expired locks start vesting.
    fn move_locked(&mut self) {
        for rewards in self.state.values_mut() {
            let mut released: Vec<(AssetId, u128)> = Vec::new();
            for (asset, locks) in rewards.locked.iter_mut() {
                let mut remaining: BTreeMap<u64, u128> = BTreeMap::new();
                for (epochs_left, amount) in std::mem::take(locks) {
                    match epochs_left.saturating_sub(1) {
                        0 => released.push((asset.clone(), amount)),
                        left => {
                            let balance = remaining.entry(left).or_default();
                            *balance = balance.saturating_add(amount);
                        }
                    }
                }
                *locks = remaining;
            }
            rewards.locked.retain(|_, locks| !locks.is_empty());
            for (asset, amount) in released {
                let balance = rewards.vesting.entry(asset).or_default();
                *balance = balance.saturating_add(amount);
            }
        }
    }

    fn payout(&self, party: &str, quantum: u128, balance: u128) -> u128 {
        let rate = self.base_rate.clone() * self.streak.reward_vesting_multiplier(party);
        vested_payout(balance, quantum, &rate, &self.min_transfer)
    }

    fn distribute_vested(&mut self, assets: &AssetRegistry) {
        let mut transfers: Vec<Transfer> = Vec::new();
        let parties: Vec<PartyId> = self.state.keys().cloned().collect();

        for party in parties {
            let balances: Vec<(AssetId, u128)> = match self.state.get(&party) {
                Some(rewards) => rewards.vesting.iter().map(|(a, b)| (a.clone(), *b)).collect(),
                None => continue,
            };
            for (asset, balance) in balances {
                let quantum = match assets.get(&asset) {
                    Ok(a) => a.quantum(),
                    Err(e) => {
                        warn!(party = %party, asset = %asset, error = %e, "Vesting asset unknown, skipping payout");
                        continue;
                    }
                };
                let amount = self.payout(&party, quantum, balance);
                if amount == 0 {
                    continue;
                }
                if let Some(rewards) = self.state.get_mut(&party) {
                    if amount == balance {
                        rewards.vesting.remove(&asset);
                    } else {
                        rewards.vesting.insert(asset.clone(), balance - amount);
                    }
                }
                metrics::record_vesting_payout(&asset, amount);
                transfers.push(Transfer {
                    owner: party.clone(),
                    asset,
                    amount,
                    min_amount: amount,
                    transfer_type: TransferType::RewardsVested,
                    market: String::new(),
                });
            }
        }

        if transfers.is_empty() {
            return;
        }
        match self.ledger.transfer_vested_rewards(&transfers) {
            Ok(movements) => self.broker.send(Event::LedgerMovements { movements }),
            Err(e) => {
                error!(error = %e, transfers = transfers.len(), "Could not transfer vested rewards");
                panic!("could not transfer vested rewards: {}", e);
            }
        }
    }

    // ========================================================================
    // Bonus Multipliers
    // ========================================================================

    fn tier_multiplier(&self, quantum_balance: u128) -> BigDecimal {
        self.benefit_tiers
            .iter()
            .take_while(|tier| tier.minimum_quantum_balance <= quantum_balance)
            .last()
            .map(|tier| tier.reward_multiplier.clone())
            .unwrap_or_else(BigDecimal::one)
    }

    /// Multiplier and quantum balance of a single key.
    pub fn get_reward_bonus_multiplier(&mut self, party: &str) -> MultiplierAndQuantumBalance {
        if let Some(cached) = self.multiplier_cache.get(party) {
            return cached.clone();
        }
        let quantum_balance = self.ledger.get_all_vesting_quantum_balance(party);
        let single = MultiplierAndQuantumBalance {
            multiplier: self.tier_multiplier(quantum_balance),
            quantum_balance,
        };
        self.multiplier_cache.insert(party.to_string(), single.clone());
        single
    }

    /// Single view of `party` and the summed view over `party` and every key
    /// reachable through related keys.
    pub fn get_single_and_summed_reward_bonus_multipliers(
        &mut self,
        party: &str,
    ) -> (MultiplierAndQuantumBalance, MultiplierAndQuantumBalance) {
        let single = self.get_reward_bonus_multiplier(party);
        let owner_key = format!("{}{}", OWNER_PREFIX, party);
        if let Some(summed) = self.multiplier_cache.get(&owner_key) {
            return (single, summed.clone());
        }

        let mut visited: BTreeSet<PartyId> = BTreeSet::new();
        let mut queue: VecDeque<PartyId> = VecDeque::from([party.to_string()]);
        let mut quantum_balance = 0u128;
        while let Some(key) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            quantum_balance =
                quantum_balance.saturating_add(self.get_reward_bonus_multiplier(&key).quantum_balance);
            for related in self.parties.related_keys(&key) {
                if !visited.contains(&related) {
                    queue.push_back(related);
                }
            }
        }

        let summed = MultiplierAndQuantumBalance {
            multiplier: self.tier_multiplier(quantum_balance),
            quantum_balance,
        };
        self.multiplier_cache.insert(owner_key, summed.clone());
        (single, summed)
    }

    // ========================================================================
    // Events
    // ========================================================================

    fn broadcast_stats(&mut self, epoch: u64) {
        let parties: Vec<PartyId> = self.state.keys().cloned().collect();
        let stats = parties
            .into_iter()
            .map(|party| {
                let (single, summed) = self.get_single_and_summed_reward_bonus_multipliers(&party);
                PartyVestingStats {
                    party,
                    reward_bonus_multiplier: single.multiplier,
                    quantum_balance: single.quantum_balance,
                    summed_reward_bonus_multiplier: summed.multiplier,
                    summed_quantum_balance: summed.quantum_balance,
                }
            })
            .collect();
        self.broker.send(Event::VestingStatsUpdated { epoch, stats });
    }

    fn broadcast_summary(&self, epoch: u64) {
        let parties = self
            .state
            .iter()
            .filter(|(_, rewards)| !rewards.is_empty())
            .map(|(party, rewards)| PartyVestingSummary {
                party: party.clone(),
                locked: rewards
                    .locked
                    .iter()
                    .flat_map(|(asset, locks)| {
                        locks.iter().map(move |(left, amount)| LockedBalance {
                            asset: asset.clone(),
                            amount: *amount,
                            until_epoch: epoch + left,
                        })
                    })
                    .collect(),
                vesting: rewards
                    .vesting
                    .iter()
                    .map(|(asset, amount)| VestingBalance {
                        asset: asset.clone(),
                        amount: *amount,
                    })
                    .collect(),
            })
            .collect();
        self.broker.send(Event::VestingBalancesSummary { epoch, parties });
    }
}
