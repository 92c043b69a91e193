//! Transfer fees and taker-fee discounts
//!
//! The fee of a transfer is `min(amount × factor, max_quantum_amount ×
//! quantum)`. Taker fees paid in an epoch mature when the next epoch ends,
//! then stay usable as a discount on transfer fees for `window` epochs.

use bigdecimal::BigDecimal;
use borsh::{BorshDeserialize, BorshSerialize};
use std::collections::{BTreeMap, VecDeque};

use crate::num::mul_amount;
use crate::types::{AccountType, AssetId, PartyId};

/// Theoretical fee before any discount.
#[allow(clippy::too_many_arguments)]
pub fn calculate_fee(
    amount: u128,
    quantum: u128,
    fee_factor: &BigDecimal,
    max_quantum_amount: &BigDecimal,
    from: &str,
    from_account_type: AccountType,
    to: &str,
    to_account_type: AccountType,
) -> u128 {
    // Moving vested rewards into one's own general account is free.
    if from_account_type == AccountType::VestedRewards
        && to_account_type == AccountType::General
        && from == to
    {
        return 0;
    }
    let fee = mul_amount(amount, fee_factor);
    let cap = mul_amount(quantum, max_quantum_amount);
    fee.min(cap)
}

/// A discount applied to one fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscountedFee {
    pub fee: u128,
    pub consumed: u128,
}

/// Window entry change produced by an epoch rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscountUpdate {
    pub party: PartyId,
    pub asset: AssetId,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FeeDiscountEntry {
    pub party: PartyId,
    pub asset: AssetId,
    /// Oldest epoch first
    pub slots: Vec<u128>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct PendingTakerFees {
    pub party: PartyId,
    pub asset: AssetId,
    pub amount: u128,
}

#[derive(Debug, Clone, Default)]
pub struct FeeDiscounts {
    window: usize,
    /// (party, asset) -> fees paid per epoch, oldest first. The newest slot
    /// is still maturing and only counts once the next epoch ends.
    windows: BTreeMap<(PartyId, AssetId), VecDeque<u128>>,
    /// Taker fees registered during the current epoch
    pending: BTreeMap<(PartyId, AssetId), u128>,
}

/// Slots usable as a discount: all but the maturing one.
fn matured(slots: &VecDeque<u128>) -> impl Iterator<Item = &u128> {
    slots.iter().take(slots.len().saturating_sub(1))
}

fn sum<'a>(slots: impl Iterator<Item = &'a u128>) -> u128 {
    slots.fold(0u128, |acc, s| acc.saturating_add(*s))
}

impl FeeDiscounts {
    pub fn new(window: u64) -> Self {
        Self {
            window: window.max(1) as usize,
            windows: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.window + 1
    }

    /// Change the window length, keeping the newest slots.
    pub fn set_window(&mut self, window: u64) {
        self.window = window.max(1) as usize;
        let capacity = self.capacity();
        for slots in self.windows.values_mut() {
            while slots.len() > capacity {
                slots.pop_front();
            }
        }
    }

    /// Queue taker fees paid this epoch. They become usable at the end of
    /// the following epoch.
    pub fn register<'a>(
        &mut self,
        asset: &str,
        fees_by_party: impl IntoIterator<Item = (&'a str, u128)>,
    ) {
        for (party, fee) in fees_by_party {
            if fee == 0 {
                continue;
            }
            let pending = self
                .pending
                .entry((party.to_string(), asset.to_string()))
                .or_insert(0);
            *pending = pending.saturating_add(fee);
        }
    }

    pub fn available(&self, asset: &str, party: &str) -> u128 {
        self.windows
            .get(&(party.to_string(), asset.to_string()))
            .map(|slots| sum(matured(slots)))
            .unwrap_or(0)
    }

    /// Discount `fee` without consuming anything.
    pub fn preview(&self, asset: &str, party: &str, fee: u128) -> DiscountedFee {
        let consumed = fee.min(self.available(asset, party));
        DiscountedFee {
            fee: fee - consumed,
            consumed,
        }
    }

    /// Discount `fee` and debit the consumed amount, oldest slots first.
    pub fn apply(&mut self, asset: &str, party: &str, fee: u128) -> DiscountedFee {
        let discounted = self.preview(asset, party, fee);
        if discounted.consumed == 0 {
            return discounted;
        }
        if let Some(slots) = self
            .windows
            .get_mut(&(party.to_string(), asset.to_string()))
        {
            let usable = slots.len().saturating_sub(1);
            let mut remaining = discounted.consumed;
            for slot in slots.iter_mut().take(usable) {
                let take = remaining.min(*slot);
                *slot -= take;
                remaining -= take;
                if remaining == 0 {
                    break;
                }
            }
        }
        discounted
    }

    /// Close the epoch: the registered fees (or zero) become the maturing
    /// slot of every entry, and the previous maturing slot joins the window.
    /// Entries whose fees in flight fall below the asset's tracking threshold
    /// are evicted. Returns every entry touched, with its usable discount.
    pub fn rotate(&mut self, min_tracked: impl Fn(&str) -> u128) -> Vec<DiscountUpdate> {
        let pending = std::mem::take(&mut self.pending);
        for key in pending.keys() {
            self.windows.entry(key.clone()).or_default();
        }

        let mut updates = Vec::with_capacity(self.windows.len());
        let capacity = self.capacity();
        self.windows.retain(|(party, asset), slots| {
            slots.push_back(pending.get(&(party.clone(), asset.clone())).copied().unwrap_or(0));
            while slots.len() > capacity {
                slots.pop_front();
            }
            let total = sum(slots.iter());
            let keep = total > 0 && total >= min_tracked(asset.as_str());
            updates.push(DiscountUpdate {
                party: party.clone(),
                asset: asset.clone(),
                amount: if keep { sum(matured(slots)) } else { 0 },
            });
            keep
        });
        updates
    }

    pub(crate) fn entries(&self) -> Vec<FeeDiscountEntry> {
        self.windows
            .iter()
            .map(|((party, asset), slots)| FeeDiscountEntry {
                party: party.clone(),
                asset: asset.clone(),
                slots: slots.iter().copied().collect(),
            })
            .collect()
    }

    pub(crate) fn pending_entries(&self) -> Vec<PendingTakerFees> {
        self.pending
            .iter()
            .map(|((party, asset), amount)| PendingTakerFees {
                party: party.clone(),
                asset: asset.clone(),
                amount: *amount,
            })
            .collect()
    }

    pub(crate) fn restore(&mut self, entries: Vec<FeeDiscountEntry>, pending: Vec<PendingTakerFees>) {
        self.windows = entries
            .into_iter()
            .map(|e| ((e.party, e.asset), e.slots.into_iter().collect()))
            .collect();
        self.pending = pending
            .into_iter()
            .map(|p| ((p.party, p.asset), p.amount))
            .collect();
    }
}

/// Minimum window total kept for an asset of the given quantum.
pub fn minimum_tracked(quantum: u128, minimum_tracked_amount: &BigDecimal) -> u128 {
    mul_amount(quantum, minimum_tracked_amount)
}
