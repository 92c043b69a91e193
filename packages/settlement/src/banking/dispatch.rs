//! Dispatch strategies
//!
//! A recurring transfer into a reward pool carries a dispatch strategy that
//! says how the pool is split. Identical strategies are shared and
//! ref-counted under the keccak hash of their encoding.

use bigdecimal::BigDecimal;
use num_traits::Zero;
use tracing::debug;

use super::transfers::{leg, Instructions};
use super::{DispatchStrategyEntry, Engine};
use crate::error::Result;
use crate::hash;
use crate::num::mul_amount;
use crate::snapshot::encode;
use crate::types::{AccountType, DispatchMetric, DispatchStrategy, TransferType, SYSTEM_OWNER};

pub fn dispatch_strategy_hash(strategy: &DispatchStrategy) -> Result<String> {
    let encoded = encode("dispatch_strategy", strategy)?;
    Ok(hash::dispatch_strategy_hash(&encoded))
}

/// Where the funds of one distribution go.
pub(super) struct Payout<'a> {
    pub funder: &'a str,
    pub funder_account_type: AccountType,
    pub funder_market: &'a str,
    pub to_account_type: AccountType,
    pub asset: &'a str,
    pub amount: u128,
    pub reference: &'a str,
}

impl Engine {
    pub(super) fn register_dispatch_strategy(&mut self, strategy: &DispatchStrategy) -> Result<String> {
        let hash = dispatch_strategy_hash(strategy)?;
        self.dispatch_strategies
            .entry(hash.clone())
            .or_insert_with(|| DispatchStrategyEntry {
                strategy: strategy.clone(),
                ref_count: 0,
            })
            .ref_count += 1;
        Ok(hash)
    }

    pub(super) fn unregister_dispatch_strategy(&mut self, strategy: Option<&DispatchStrategy>) {
        let Some(strategy) = strategy else {
            return;
        };
        let Ok(hash) = dispatch_strategy_hash(strategy) else {
            return;
        };
        if let Some(entry) = self.dispatch_strategies.get_mut(&hash) {
            entry.ref_count = entry.ref_count.saturating_sub(1);
        }
    }

    /// Strategies no longer referenced are dropped at the start of the epoch.
    pub(super) fn purge_dispatch_strategies(&mut self) {
        let before = self.dispatch_strategies.len();
        self.dispatch_strategies.retain(|_, entry| entry.ref_count > 0);
        let purged = before - self.dispatch_strategies.len();
        if purged > 0 {
            debug!(purged, "Purged unreferenced dispatch strategies");
        }
    }

    /// Rebuild the ref-counts from the transfers that reference a strategy.
    pub(super) fn rebuild_dispatch_strategies(&mut self) -> Result<()> {
        let strategies: Vec<DispatchStrategy> = self
            .recurring_transfers
            .values()
            .filter_map(|t| t.dispatch_strategy.clone())
            .chain(
                self.recurring_gov_transfers
                    .values()
                    .filter_map(|t| t.dispatch_strategy().cloned()),
            )
            .collect();
        self.dispatch_strategies.clear();
        for strategy in &strategies {
            self.register_dispatch_strategy(strategy)?;
        }
        Ok(())
    }

    pub fn get_dispatch_strategy(&self, hash: &str) -> Option<&DispatchStrategy> {
        self.dispatch_strategies
            .get(hash)
            .filter(|entry| entry.ref_count > 0)
            .map(|entry| &entry.strategy)
    }

    /// Ledger pairs paying `payout.amount` out according to `strategy`.
    ///
    /// Market-value pools are split across markets with an eligible proposer
    /// by score. Other pools receive a single transfer keyed by the strategy
    /// hash, but only while somebody scores on the metric. An empty result
    /// means nothing is paid this epoch.
    pub(super) fn dispatch_instructions(
        &self,
        strategy: &DispatchStrategy,
        payout: &Payout<'_>,
    ) -> Result<(Instructions, Vec<String>)> {
        let mut instructions = Instructions::default();
        let mut paid_markets = Vec::new();

        if strategy.metric == DispatchMetric::MarketValue {
            let scores = self.tracker.markets_with_eligible_proposer(
                &strategy.asset_for_metric,
                &strategy.markets,
                payout.asset,
                payout.funder,
            );
            for score in scores {
                let amount = mul_amount(payout.amount, &score.score);
                if amount == 0 {
                    continue;
                }
                instructions.pair(
                    leg(
                        payout.funder,
                        payout.asset,
                        amount,
                        TransferType::TransferFundsSend,
                        payout.funder_market,
                    ),
                    payout.funder_account_type,
                    leg(
                        SYSTEM_OWNER,
                        payout.asset,
                        amount,
                        TransferType::TransferFundsDistribute,
                        &score.market,
                    ),
                    payout.to_account_type,
                    payout.reference,
                );
                paid_markets.push(score.market);
            }
            return Ok((instructions, paid_markets));
        }

        let scores = self.tracker.calculate_metric_for_individuals(strategy);
        let zero = BigDecimal::zero();
        if !scores.iter().any(|s| s.score > zero) {
            return Ok((instructions, paid_markets));
        }
        let hash = dispatch_strategy_hash(strategy)?;
        instructions.pair(
            leg(
                payout.funder,
                payout.asset,
                payout.amount,
                TransferType::TransferFundsSend,
                payout.funder_market,
            ),
            payout.funder_account_type,
            leg(
                SYSTEM_OWNER,
                payout.asset,
                payout.amount,
                TransferType::TransferFundsDistribute,
                &hash,
            ),
            payout.to_account_type,
            payout.reference,
        );
        Ok((instructions, paid_markets))
    }

    pub(super) fn mark_paid_proposers(
        &self,
        strategy: &DispatchStrategy,
        asset: &str,
        funder: &str,
        markets: &[String],
    ) {
        for market in markets {
            self.tracker.mark_paid_proposer(
                &strategy.asset_for_metric,
                market,
                asset,
                &strategy.markets,
                funder,
            );
        }
    }
}
