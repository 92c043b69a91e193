//! Recurring transfers
//!
//! Paid at the end of every epoch in `[start_epoch, end_epoch]`. The amount
//! decays by `factor` per elapsed epoch. A transfer that fails any check when
//! it is due is stopped for good.

use bigdecimal::BigDecimal;
use num_traits::Zero;
use tracing::{info, warn};

use super::dispatch::{dispatch_strategy_hash, Payout};
use super::transfers::{credit_owner, leg, Instructions, RecurringTransfer, TransferCommand};
use super::Engine;
use crate::assets::AssetRegistry;
use crate::error::{Result, SettlementError};
use crate::events::Event;
use crate::metrics;
use crate::num::{floor_to_amount, from_amount, pow_truncated};
use crate::types::{unix_nanos, AccountType, TransferStatus, TransferType};

type RecurringKey = (String, String, String, AccountType, AccountType, String);

fn recurring_key(transfer: &RecurringTransfer) -> Result<RecurringKey> {
    let strategy = match &transfer.dispatch_strategy {
        Some(ds) => dispatch_strategy_hash(ds)?,
        None => String::new(),
    };
    let base = &transfer.base;
    Ok((
        base.from.clone(),
        base.to.clone(),
        base.asset.clone(),
        base.from_account_type,
        base.to_account_type,
        strategy,
    ))
}

/// Amount due at `epoch`: `amount × factor^(epoch − start)`, floored.
pub(super) fn recurring_amount(transfer: &RecurringTransfer, epoch: u64) -> u128 {
    let elapsed = epoch.saturating_sub(transfer.start_epoch);
    floor_to_amount(&(from_amount(transfer.base.amount) * pow_truncated(&transfer.factor, elapsed)))
}

/// Epoch bounds shared by user and governance recurring transfers.
pub(super) fn check_epochs(start: u64, end: Option<u64>, current: u64) -> Result<()> {
    if start == 0 {
        return Err(SettlementError::StartEpochIsZero);
    }
    if end == Some(0) {
        return Err(SettlementError::EndEpochIsZero);
    }
    if let Some(end) = end {
        if start > end {
            return Err(SettlementError::StartEpochAfterEndEpoch);
        }
    }
    if start < current {
        return Err(SettlementError::StartEpochInThePast);
    }
    Ok(())
}

impl Engine {
    pub(super) fn recurring_transfer(
        &mut self,
        assets: &AssetRegistry,
        mut transfer: RecurringTransfer,
    ) -> Result<()> {
        transfer.base.timestamp = unix_nanos(&self.time.now());

        if let Err(e) = self.validate_recurring(assets, &transfer) {
            transfer.base.status = TransferStatus::Rejected;
            warn!(
                transfer_id = %transfer.base.id,
                from = %transfer.base.from,
                error = %e,
                "Recurring transfer rejected"
            );
            self.publish_transfer(TransferCommand::Recurring(transfer), Some(e.to_string()));
            return Err(e);
        }

        if let Some(strategy) = &transfer.dispatch_strategy {
            self.register_dispatch_strategy(strategy)?;
        }
        transfer.base.status = TransferStatus::Pending;
        info!(
            transfer_id = %transfer.base.id,
            start_epoch = transfer.start_epoch,
            end_epoch = ?transfer.end_epoch,
            "Recurring transfer accepted"
        );
        self.recurring_transfers
            .insert(transfer.base.id.clone(), transfer.clone());
        self.publish_transfer(TransferCommand::Recurring(transfer), None);
        Ok(())
    }

    fn validate_recurring(&self, assets: &AssetRegistry, transfer: &RecurringTransfer) -> Result<()> {
        let base = &transfer.base;
        self.check_accounts(base)?;
        match base.to_account_type {
            AccountType::General | AccountType::GlobalReward | AccountType::NetworkTreasury => {}
            t if t.is_reward_metric() => {
                if transfer.dispatch_strategy.is_none() {
                    return Err(SettlementError::DispatchStrategyRequired);
                }
            }
            _ => return Err(SettlementError::UnsupportedToAccountType),
        }
        check_epochs(transfer.start_epoch, transfer.end_epoch, self.current_epoch)?;
        if transfer.factor <= BigDecimal::zero() {
            return Err(SettlementError::InvalidFactor);
        }

        let quantum = self.check_asset(assets, &base.asset, base.amount)?;
        if let Some(strategy) = &transfer.dispatch_strategy {
            for market in &strategy.markets {
                if !self.tracker.market_tracked_for_asset(market, &base.asset) {
                    return Err(SettlementError::MarketNotTrackedForAsset {
                        market: market.clone(),
                        asset: base.asset.clone(),
                    });
                }
            }
        }

        let key = recurring_key(transfer)?;
        for existing in self.recurring_transfers.values() {
            if recurring_key(existing)? == key {
                return Err(SettlementError::DuplicateRecurringTransfer);
            }
        }

        let fee = self.transfer_fee(quantum, base, base.amount);
        let discounted = self.fee_discounts.preview(&base.asset, &base.from, fee);
        self.ensure_funds(
            &base.from,
            &base.asset,
            base.from_account_type,
            base.amount,
            discounted.fee,
        )
    }

    /// Cancel a recurring transfer owned by `party`.
    pub fn cancel_transfer_funds(&mut self, party: &str, transfer_id: &str) -> Result<()> {
        let transfer = self
            .recurring_transfers
            .get(transfer_id)
            .ok_or(SettlementError::RecurringTransferNotFound)?;
        if transfer.base.from != party {
            return Err(SettlementError::CannotCancelNotOwner);
        }
        let Some(mut transfer) = self.recurring_transfers.remove(transfer_id) else {
            return Err(SettlementError::RecurringTransferNotFound);
        };
        self.unregister_dispatch_strategy(transfer.dispatch_strategy.as_ref());
        transfer.base.status = TransferStatus::Cancelled;
        info!(transfer_id, party, "Recurring transfer cancelled");
        self.publish_transfer(TransferCommand::Recurring(transfer), None);
        Ok(())
    }

    pub fn get_recurring_transfer(&self, id: &str) -> Option<&RecurringTransfer> {
        self.recurring_transfers.get(id)
    }

    // ========================================================================
    // Epoch Distribution
    // ========================================================================

    pub(super) fn distribute_recurring_transfers(&mut self, assets: &AssetRegistry, epoch: u64) {
        let mut events = Vec::new();
        let mut finished: Vec<(String, TransferStatus, Option<String>)> = Vec::new();

        let due: Vec<RecurringTransfer> = self
            .recurring_transfers
            .values()
            .filter(|t| epoch >= t.start_epoch)
            .cloned()
            .collect();

        for transfer in &due {
            match self.pay_recurring(assets, transfer, epoch, &mut events) {
                Ok(()) => {
                    if transfer.end_epoch == Some(epoch) {
                        finished.push((transfer.base.id.clone(), TransferStatus::Done, None));
                    }
                }
                Err(e) => {
                    warn!(
                        transfer_id = %transfer.base.id,
                        epoch,
                        error = %e,
                        "Stopping recurring transfer"
                    );
                    finished.push((
                        transfer.base.id.clone(),
                        TransferStatus::Stopped,
                        Some(e.to_string()),
                    ));
                }
            }
        }

        for (id, status, reason) in finished {
            let Some(mut transfer) = self.recurring_transfers.remove(&id) else {
                continue;
            };
            self.unregister_dispatch_strategy(transfer.dispatch_strategy.as_ref());
            transfer.base.status = status;
            metrics::record_transfer("recurring", status.as_str());
            events.push(Event::TransferFunds {
                transfer: TransferCommand::Recurring(transfer),
                reason,
            });
        }

        if !events.is_empty() {
            self.broker.send_batch(events);
        }
    }

    fn pay_recurring(
        &mut self,
        assets: &AssetRegistry,
        transfer: &RecurringTransfer,
        epoch: u64,
        events: &mut Vec<Event>,
    ) -> Result<()> {
        let base = &transfer.base;
        let asset = assets
            .get(&base.asset)
            .map_err(SettlementError::invalid_transfer_asset)?;
        let quantum = asset.quantum();
        let amount = recurring_amount(transfer, epoch);
        if amount == 0 || amount < self.minimum_transfer(quantum) {
            return Err(SettlementError::LessThanMinimalAmount);
        }

        let (mut instructions, paid_markets) = match &transfer.dispatch_strategy {
            Some(strategy) => self.dispatch_instructions(
                strategy,
                &Payout {
                    funder: &base.from,
                    funder_account_type: base.from_account_type,
                    funder_market: "",
                    to_account_type: base.to_account_type,
                    asset: &base.asset,
                    amount,
                    reference: &base.reference,
                },
            )?,
            None => {
                let mut instructions = Instructions::default();
                instructions.pair(
                    leg(&base.from, &base.asset, amount, TransferType::TransferFundsSend, ""),
                    base.from_account_type,
                    leg(
                        credit_owner(&base.to, base.to_account_type),
                        &base.asset,
                        amount,
                        TransferType::TransferFundsDistribute,
                        "",
                    ),
                    base.to_account_type,
                    &base.reference,
                );
                (instructions, Vec::new())
            }
        };
        if instructions.is_empty() {
            return Ok(());
        }

        let total = instructions.total_credited();
        let fee = self.transfer_fee(quantum, base, total);
        let discounted = self.fee_discounts.preview(&base.asset, &base.from, fee);
        self.ensure_funds(
            &base.from,
            &base.asset,
            base.from_account_type,
            total,
            discounted.fee,
        )?;
        instructions.fee(&base.from, &base.asset, discounted.fee, base.from_account_type);

        let movements = self.execute(&instructions)?;
        if let Some(strategy) = &transfer.dispatch_strategy {
            self.mark_paid_proposers(strategy, &base.asset, &base.from, &paid_markets);
        }
        events.push(Event::LedgerMovements { movements });
        if let Some(event) = self.settle_fee(&base.id, &base.asset, &base.from, fee) {
            events.push(event);
        }
        Ok(())
    }
}
