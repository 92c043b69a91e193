//! One-off transfers and the validation shared by every transfer kind
//!
//! Ledger instructions are always emitted as (debit, credit) pairs followed
//! by the fee debits.

use bigdecimal::BigDecimal;
use borsh::{BorshDeserialize, BorshSerialize};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::fees::{calculate_fee, DiscountedFee};
use super::Engine;
use crate::assets::{AssetKind, AssetRegistry};
use crate::error::{Result, SettlementError};
use crate::events::Event;
use crate::metrics;
use crate::num::mul_amount;
use crate::types::{
    unix_nanos, AccountType, AssetId, DispatchStrategy, LedgerMovement, PartyId, Transfer,
    TransferStatus, TransferType, SYSTEM_OWNER,
};

/// Fields common to every user transfer.
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize,
)]
pub struct TransferBase {
    pub id: String,
    pub from: PartyId,
    pub from_account_type: AccountType,
    pub to: PartyId,
    pub to_account_type: AccountType,
    pub asset: AssetId,
    pub amount: u128,
    pub reference: String,
    pub status: TransferStatus,
    pub timestamp: i64,
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, BorshSerialize, BorshDeserialize,
)]
pub struct OneOffTransfer {
    pub base: TransferBase,
    /// Unix nanos; funds are held until then when in the future.
    pub deliver_on: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringTransfer {
    pub base: TransferBase,
    pub start_epoch: u64,
    pub end_epoch: Option<u64>,
    /// Applied once per elapsed epoch
    pub factor: BigDecimal,
    pub dispatch_strategy: Option<DispatchStrategy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferCommand {
    OneOff(OneOffTransfer),
    Recurring(RecurringTransfer),
}

impl TransferCommand {
    pub fn base(&self) -> &TransferBase {
        match self {
            TransferCommand::OneOff(t) => &t.base,
            TransferCommand::Recurring(t) => &t.base,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TransferCommand::OneOff(_) => "one_off",
            TransferCommand::Recurring(_) => "recurring",
        }
    }
}

/// Build one ledger leg.
pub(super) fn leg(
    owner: &str,
    asset: &str,
    amount: u128,
    transfer_type: TransferType,
    market: &str,
) -> Transfer {
    Transfer {
        owner: owner.to_string(),
        asset: asset.to_string(),
        amount,
        min_amount: amount,
        transfer_type,
        market: market.to_string(),
    }
}

/// Owner of the account credited for `to`.
pub(super) fn credit_owner(to: &str, to_account_type: AccountType) -> &str {
    match to_account_type {
        AccountType::General => to,
        _ => SYSTEM_OWNER,
    }
}

/// Ledger instructions of one transfer.
#[derive(Debug, Default)]
pub(super) struct Instructions {
    pub transfers: Vec<Transfer>,
    pub account_types: Vec<AccountType>,
    pub references: Vec<String>,
    pub fee_transfers: Vec<Transfer>,
    pub fee_account_types: Vec<AccountType>,
}

impl Instructions {
    pub fn pair(
        &mut self,
        debit: Transfer,
        debit_type: AccountType,
        credit: Transfer,
        credit_type: AccountType,
        reference: &str,
    ) {
        self.transfers.push(debit);
        self.account_types.push(debit_type);
        self.transfers.push(credit);
        self.account_types.push(credit_type);
        self.references.push(reference.to_string());
        self.references.push(reference.to_string());
    }

    pub fn fee(&mut self, payer: &str, asset: &str, fee: u128, account_type: AccountType) {
        if fee == 0 {
            return;
        }
        self.fee_transfers
            .push(leg(payer, asset, fee, TransferType::InfrastructureFeePay, ""));
        self.fee_account_types.push(account_type);
    }

    pub fn total_credited(&self) -> u128 {
        self.transfers
            .iter()
            .skip(1)
            .step_by(2)
            .fold(0u128, |acc, t| acc.saturating_add(t.amount))
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

impl Engine {
    // ========================================================================
    // Entry Points
    // ========================================================================

    /// Validate and execute (or schedule) a user transfer.
    pub fn transfer_funds(
        &mut self,
        assets: &AssetRegistry,
        transfer: TransferCommand,
    ) -> Result<()> {
        match transfer {
            TransferCommand::OneOff(t) => self.one_off_transfer(assets, t),
            TransferCommand::Recurring(t) => self.recurring_transfer(assets, t),
        }
    }

    /// Theoretical fee and the discount that would apply, for
    /// transferring `amount` of `asset`.
    #[allow(clippy::too_many_arguments)]
    pub fn estimate_fee(
        &self,
        assets: &AssetRegistry,
        from: &str,
        from_account_type: AccountType,
        to: &str,
        to_account_type: AccountType,
        asset: &str,
        amount: u128,
    ) -> Result<DiscountedFee> {
        let quantum = assets.get(asset)?.quantum();
        let fee = calculate_fee(
            amount,
            quantum,
            &self.transfer_fee_factor,
            &self.transfer_fee_max_quantum_amount,
            from,
            from_account_type,
            to,
            to_account_type,
        );
        Ok(self.fee_discounts.preview(asset, from, fee))
    }

    // ========================================================================
    // Shared Validation
    // ========================================================================

    pub(super) fn check_accounts(&self, base: &TransferBase) -> Result<()> {
        if base.from.is_empty() {
            return Err(SettlementError::InvalidFromAccount);
        }
        if base.to.is_empty() {
            return Err(SettlementError::InvalidToAccount);
        }
        if base.amount == 0 {
            return Err(SettlementError::CannotTransferZeroFunds);
        }
        match base.from_account_type {
            AccountType::General | AccountType::VestedRewards => {}
            _ => return Err(SettlementError::UnsupportedFromAccountType),
        }
        if base.from_account_type == AccountType::VestedRewards
            && (base.to_account_type != AccountType::General || base.to != base.from)
        {
            return Err(SettlementError::CanOnlyTransferVestedToOwnGeneralAccount);
        }
        Ok(())
    }

    /// The asset must be enabled and `amount` at least the minimum transfer.
    /// Returns the asset quantum.
    pub(super) fn check_asset(
        &self,
        assets: &AssetRegistry,
        asset_id: &str,
        amount: u128,
    ) -> Result<u128> {
        let asset = assets
            .get(asset_id)
            .map_err(SettlementError::invalid_transfer_asset)?;
        if !assets.is_enabled(asset_id) {
            return Err(SettlementError::invalid_transfer_asset(
                SettlementError::AssetNotEnabled {
                    id: asset.id().to_string(),
                },
            ));
        }
        let quantum = asset.quantum();
        if amount < self.minimum_transfer(quantum) {
            return Err(SettlementError::LessThanMinimalAmount);
        }
        Ok(quantum)
    }

    pub(super) fn minimum_transfer(&self, quantum: u128) -> u128 {
        mul_amount(quantum, &self.min_transfer_quantum_multiple)
    }

    pub(super) fn transfer_fee(&self, quantum: u128, base: &TransferBase, amount: u128) -> u128 {
        calculate_fee(
            amount,
            quantum,
            &self.transfer_fee_factor,
            &self.transfer_fee_max_quantum_amount,
            &base.from,
            base.from_account_type,
            &base.to,
            base.to_account_type,
        )
    }

    fn source_balance(&self, party: &str, asset: &str, account_type: AccountType) -> Result<u128> {
        let account = match account_type {
            AccountType::General => self.ledger.get_party_general_account(party, asset)?,
            AccountType::VestedRewards => {
                self.ledger.get_party_vested_reward_account(party, asset)?
            }
            _ => return Err(SettlementError::UnsupportedFromAccountType),
        };
        Ok(account.balance)
    }

    /// The source account must cover `amount + fee`.
    pub(super) fn ensure_funds(
        &self,
        party: &str,
        asset: &str,
        account_type: AccountType,
        amount: u128,
        fee: u128,
    ) -> Result<()> {
        let balance = self
            .source_balance(party, asset, account_type)
            .map_err(SettlementError::fee_payment)?;
        if balance < amount.saturating_add(fee) {
            return Err(SettlementError::fee_payment(
                SettlementError::NotEnoughFundsToTransfer,
            ));
        }
        Ok(())
    }

    pub(super) fn execute(&self, instructions: &Instructions) -> Result<Vec<LedgerMovement>> {
        self.ledger.transfer_funds(
            &instructions.transfers,
            &instructions.account_types,
            &instructions.references,
            &instructions.fee_transfers,
            &instructions.fee_account_types,
        )
    }

    /// Consume the discount and report the fee actually charged.
    pub(super) fn settle_fee(
        &mut self,
        transfer_id: &str,
        asset: &str,
        payer: &str,
        fee: u128,
    ) -> Option<Event> {
        let applied = self.fee_discounts.apply(asset, payer, fee);
        if applied.fee == 0 && applied.consumed == 0 {
            return None;
        }
        metrics::record_transfer_fee(asset, applied.fee, applied.consumed);
        Some(Event::TransferFeesPaid {
            transfer_id: transfer_id.to_string(),
            amount: applied.fee,
            discount_applied: applied.consumed,
            epoch: self.current_epoch,
        })
    }

    pub(super) fn publish_transfer(&self, transfer: TransferCommand, reason: Option<String>) {
        metrics::record_transfer(transfer.kind(), transfer.base().status.as_str());
        self.broker.send(Event::TransferFunds { transfer, reason });
    }

    // ========================================================================
    // One-off Transfers
    // ========================================================================

    fn one_off_transfer(&mut self, assets: &AssetRegistry, mut transfer: OneOffTransfer) -> Result<()> {
        let now = unix_nanos(&self.time.now());
        transfer.base.timestamp = now;

        if let Err(e) = self.execute_one_off(assets, &mut transfer, now) {
            transfer.base.status = TransferStatus::Rejected;
            warn!(
                transfer_id = %transfer.base.id,
                from = %transfer.base.from,
                error = %e,
                "One-off transfer rejected"
            );
            self.publish_transfer(TransferCommand::OneOff(transfer), Some(e.to_string()));
            return Err(e);
        }

        self.publish_transfer(TransferCommand::OneOff(transfer), None);
        Ok(())
    }

    fn execute_one_off(
        &mut self,
        assets: &AssetRegistry,
        transfer: &mut OneOffTransfer,
        now: i64,
    ) -> Result<()> {
        self.check_accounts(&transfer.base)?;
        match transfer.base.to_account_type {
            AccountType::General | AccountType::GlobalReward | AccountType::NetworkTreasury => {}
            t if t.is_reward_metric() => return Err(SettlementError::DispatchStrategyRequired),
            _ => return Err(SettlementError::UnsupportedToAccountType),
        }
        let quantum = self.check_asset(assets, &transfer.base.asset, transfer.base.amount)?;

        let base = &transfer.base;
        let fee = self.transfer_fee(quantum, base, base.amount);
        let discounted = self.fee_discounts.preview(&base.asset, &base.from, fee);
        self.ensure_funds(
            &base.from,
            &base.asset,
            base.from_account_type,
            base.amount,
            discounted.fee,
        )?;

        let deliver_on = transfer.deliver_on.filter(|at| *at > now);
        let mut instructions = Instructions::default();
        let debit = leg(
            &base.from,
            &base.asset,
            base.amount,
            TransferType::TransferFundsSend,
            "",
        );
        if deliver_on.is_some() {
            // held in the network's pending transfers account until delivery
            instructions.pair(
                debit,
                base.from_account_type,
                leg(
                    SYSTEM_OWNER,
                    &base.asset,
                    base.amount,
                    TransferType::TransferFundsDistribute,
                    "",
                ),
                AccountType::PendingTransfers,
                &base.reference,
            );
        } else {
            instructions.pair(
                debit,
                base.from_account_type,
                leg(
                    credit_owner(&base.to, base.to_account_type),
                    &base.asset,
                    base.amount,
                    TransferType::TransferFundsDistribute,
                    "",
                ),
                base.to_account_type,
                &base.reference,
            );
        }
        instructions.fee(&base.from, &base.asset, discounted.fee, base.from_account_type);

        let movements = self.execute(&instructions)?;
        let id = base.id.clone();
        let asset = base.asset.clone();
        let from = base.from.clone();
        let fee_event = self.settle_fee(&id, &asset, &from, fee);

        self.broker.send(Event::LedgerMovements { movements });
        if let Some(event) = fee_event {
            self.broker.send(event);
        }

        match deliver_on {
            Some(at) => {
                transfer.base.status = TransferStatus::Pending;
                debug!(transfer_id = %id, deliver_on = at, "One-off transfer scheduled");
                self.scheduled_transfers
                    .entry(at)
                    .or_default()
                    .push(transfer.clone());
            }
            None => {
                transfer.base.status = TransferStatus::Done;
                info!(transfer_id = %id, amount = %transfer.base.amount, "One-off transfer done");
            }
        }
        Ok(())
    }

    /// Deliver scheduled one-off transfers that are due, earliest first.
    pub(super) fn deliver_scheduled_transfers(&mut self, now: DateTime<Utc>) {
        let now = unix_nanos(&now);
        let due: Vec<i64> = self.scheduled_transfers.range(..=now).map(|(at, _)| *at).collect();

        for at in due {
            let Some(transfers) = self.scheduled_transfers.remove(&at) else {
                continue;
            };
            for mut transfer in transfers {
                let base = &transfer.base;
                let mut instructions = Instructions::default();
                instructions.pair(
                    leg(
                        SYSTEM_OWNER,
                        &base.asset,
                        base.amount,
                        TransferType::TransferFundsSend,
                        "",
                    ),
                    AccountType::PendingTransfers,
                    leg(
                        credit_owner(&base.to, base.to_account_type),
                        &base.asset,
                        base.amount,
                        TransferType::TransferFundsDistribute,
                        "",
                    ),
                    base.to_account_type,
                    &base.reference,
                );

                let reason = match self.execute(&instructions) {
                    Ok(movements) => {
                        self.broker.send(Event::LedgerMovements { movements });
                        transfer.base.status = TransferStatus::Done;
                        info!(transfer_id = %transfer.base.id, "Scheduled transfer delivered");
                        None
                    }
                    Err(e) => {
                        transfer.base.status = TransferStatus::Rejected;
                        warn!(
                            transfer_id = %transfer.base.id,
                            error = %e,
                            "Scheduled transfer could not be delivered"
                        );
                        Some(e.to_string())
                    }
                };
                self.publish_transfer(TransferCommand::OneOff(transfer), reason);
            }
        }
    }

    /// Scheduled one-off transfers, earliest delivery first.
    pub fn scheduled_transfers(&self) -> Vec<&OneOffTransfer> {
        self.scheduled_transfers.values().flatten().collect()
    }

    // ========================================================================
    // Fee Discounts
    // ========================================================================

    /// Queue taker fees paid by parties in `asset` during the current epoch.
    pub fn register_taker_fees<'a>(
        &mut self,
        asset: &str,
        fees_by_party: impl IntoIterator<Item = (&'a str, u128)>,
    ) {
        self.fee_discounts.register(asset, fees_by_party);
    }

    pub fn available_fee_discount(&self, asset: &str, party: &str) -> u128 {
        self.fee_discounts.available(asset, party)
    }

    pub(super) fn rotate_fee_discounts(&mut self, assets: &AssetRegistry, epoch: u64) {
        let minimum = self.fee_discount_minimum_tracked_amount.clone();
        let updates = self.fee_discounts.rotate(|asset| {
            assets
                .get(asset)
                .map(|a| super::fees::minimum_tracked(a.quantum(), &minimum))
                .unwrap_or(0)
        });
        if updates.is_empty() {
            return;
        }
        let events = updates
            .into_iter()
            .map(|u| Event::TransferFeesDiscountUpdated {
                party: u.party,
                asset: u.asset,
                amount: u.amount,
                epoch,
            })
            .collect();
        self.broker.send_batch(events);
    }
}
